//! Single-slot hand-off of the latest BPM sample from the network side to
//! the thread that owns the controller.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A validated tempo reading. Always finite and greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct BpmSample(f32);

impl BpmSample {
    pub fn new(bpm: f32) -> Option<Self> {
        if bpm.is_finite() && bpm > 0.0 {
            Some(Self(bpm))
        } else {
            None
        }
    }

    pub fn bpm(&self) -> f32 {
        self.0
    }
}

impl fmt::Display for BpmSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BPM", self.0)
    }
}

#[derive(Default)]
struct Slot {
    pending: Mutex<Option<BpmSample>>,
    published: AtomicU64,
    overwritten: AtomicU64,
}

/// Create a connected publisher/inbox pair.
pub fn bpm_inbox() -> (BpmPublisher, BpmInbox) {
    let slot = Arc::new(Slot::default());
    (
        BpmPublisher { slot: slot.clone() },
        BpmInbox { slot },
    )
}

/// Writing half. Newest sample wins; nothing is buffered.
#[derive(Clone)]
pub struct BpmPublisher {
    slot: Arc<Slot>,
}

impl BpmPublisher {
    /// Store `sample` as the pending value. Returns true if it replaced a
    /// sample the consumer had not drained yet.
    pub fn publish(&self, sample: BpmSample) -> bool {
        let replaced = self.slot.pending.lock().replace(sample).is_some();
        self.slot.published.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.slot.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }
}

/// Reading half, owned by the controller.
pub struct BpmInbox {
    slot: Arc<Slot>,
}

impl BpmInbox {
    /// Take the pending sample, if any. Never blocks on I/O.
    pub fn drain(&self) -> Option<BpmSample> {
        self.slot.pending.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.pending.lock().is_some()
    }

    /// Total samples published so far.
    pub fn published(&self) -> u64 {
        self.slot.published.load(Ordering::Relaxed)
    }

    /// Samples superseded before the consumer drained them.
    pub fn overwritten(&self) -> u64 {
        self.slot.overwritten.load(Ordering::Relaxed)
    }
}
