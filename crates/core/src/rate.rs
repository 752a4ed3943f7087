//! Playback rate calculation from live and reference tempo.

/// Tempo values below this are treated as "no tempo".
pub const BPM_EPSILON: f32 = 0.1;

/// Reference tempo used when neither the clip nor the live tempo gives one.
pub const NOMINAL_BPM: f32 = 120.0;

/// Compute the playback multiplier using the default epsilon and nominal BPM.
pub fn compute_rate(current_bpm: f32, reference_bpm: Option<f32>) -> f32 {
    RateCalculator::default().compute(current_bpm, reference_bpm)
}

/// Maps a live tempo and a clip's authored tempo to a playback multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCalculator {
    pub epsilon: f32,
    pub nominal_bpm: f32,
}

impl RateCalculator {
    pub fn new(epsilon: f32, nominal_bpm: f32) -> Self {
        Self {
            epsilon,
            nominal_bpm,
        }
    }

    /// Returns `current / reference`, falling back to 1.0 whenever the
    /// division would be undefined or meaningless.
    ///
    /// A missing reference means the clip is not in the table; the live
    /// tempo then stands in for it (rate 1.0), unless the live tempo itself
    /// is below epsilon, in which case the nominal tempo is used.
    pub fn compute(&self, current_bpm: f32, reference_bpm: Option<f32>) -> f32 {
        if !current_bpm.is_finite() || current_bpm <= 0.0 {
            return 1.0;
        }

        let reference = match reference_bpm {
            Some(reference) => reference,
            None if current_bpm >= self.epsilon => current_bpm,
            None => self.nominal_bpm,
        };

        if !reference.is_finite() || reference < self.epsilon {
            return 1.0;
        }

        current_bpm / reference
    }
}

impl Default for RateCalculator {
    fn default() -> Self {
        Self::new(BPM_EPSILON, NOMINAL_BPM)
    }
}
