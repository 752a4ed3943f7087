//! Reference tempo per dance clip.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One entry of the clip table as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipReference {
    pub index: u32,
    pub reference_bpm: f32,
}

impl ClipReference {
    pub fn new(index: u32, reference_bpm: f32) -> Self {
        Self {
            index,
            reference_bpm,
        }
    }
}

/// Tempos the stock dance clips were authored at.
pub fn default_clip_references() -> Vec<ClipReference> {
    [
        137.0, 108.0, 125.0, 106.0, 141.0, 100.0, 120.0, 128.0, 108.0, 184.0, 82.0, 121.0, 185.0,
    ]
    .iter()
    .enumerate()
    .map(|(index, bpm)| ClipReference::new(index as u32, *bpm))
    .collect()
}

/// Immutable lookup from clip index to the tempo the clip was authored at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipReferenceTable {
    entries: HashMap<u32, f32>,
}

impl ClipReferenceTable {
    /// Build a table, skipping entries without a usable tempo.
    /// A repeated index keeps the last entry.
    pub fn from_references<I>(references: I) -> Self
    where
        I: IntoIterator<Item = ClipReference>,
    {
        let mut entries = HashMap::new();
        for reference in references {
            if !reference.reference_bpm.is_finite() || reference.reference_bpm <= 0.0 {
                log::warn!(
                    "Skipping clip {}: reference BPM {} is not positive",
                    reference.index,
                    reference.reference_bpm
                );
                continue;
            }
            entries.insert(reference.index, reference.reference_bpm);
        }
        Self { entries }
    }

    pub fn reference_bpm(&self, clip_index: u32) -> Option<f32> {
        self.entries.get(&clip_index).copied()
    }

    pub fn contains(&self, clip_index: u32) -> bool {
        self.entries.contains_key(&clip_index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by clip index.
    pub fn references(&self) -> Vec<ClipReference> {
        let mut references: Vec<_> = self
            .entries
            .iter()
            .map(|(index, bpm)| ClipReference::new(*index, *bpm))
            .collect();
        references.sort_by_key(|reference| reference.index);
        references
    }
}
