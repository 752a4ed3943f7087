use dancesync_core::AnimationTarget;
use parking_lot::Mutex;

/// Stand-in animation target that reports rate changes through the log.
pub struct LoggingAvatar {
    name: String,
    rate: Mutex<f32>,
}

impl LoggingAvatar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate: Mutex::new(1.0),
        }
    }
}

impl AnimationTarget for LoggingAvatar {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_playback_rate(&self, rate: f32) {
        let mut current = self.rate.lock();
        if *current != rate {
            log::info!("{}: playback rate {:.4} -> {:.4}", self.name, *current, rate);
        }
        *current = rate;
    }

    fn playback_rate(&self) -> f32 {
        *self.rate.lock()
    }
}
