//! Dance state machine that turns BPM updates into playback rates.

use std::sync::Arc;

use crate::clip_table::ClipReferenceTable;
use crate::error::{Result, SyncError};
use crate::inbox::BpmInbox;
use crate::rate::{RateCalculator, NOMINAL_BPM};

/// The animation system the controller drives.
pub trait AnimationTarget: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    fn set_playback_rate(&self, rate: f32);

    /// Rate currently applied on the target.
    fn playback_rate(&self) -> f32;

    /// Clip selected by the animation system itself, if it tracks one.
    fn current_clip_selector(&self) -> Option<u32> {
        None
    }
}

/// Whether the avatar is dancing and which clip it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanceState {
    #[default]
    Idle,
    Dancing {
        clip_index: u32,
    },
}

impl DanceState {
    pub fn is_dancing(&self) -> bool {
        matches!(self, Self::Dancing { .. })
    }

    pub fn clip_index(&self) -> Option<u32> {
        match self {
            Self::Idle => None,
            Self::Dancing { clip_index } => Some(*clip_index),
        }
    }
}

/// Owns dance state and the animation target. Every method is meant to run
/// on the same thread; BPM updates arrive through the inbox and are only
/// applied from [`tick`](Self::tick).
pub struct DanceSyncController {
    table: ClipReferenceTable,
    inbox: BpmInbox,
    calculator: RateCalculator,
    target: Option<Arc<dyn AnimationTarget>>,
    state: DanceState,
    last_clip_index: u32,
    current_bpm: f32,
    applied_rate: Option<f32>,
}

impl DanceSyncController {
    pub fn new(
        table: ClipReferenceTable,
        inbox: BpmInbox,
        calculator: RateCalculator,
        initial_bpm: f32,
    ) -> Self {
        let current_bpm = if initial_bpm.is_finite() && initial_bpm > 0.0 {
            initial_bpm
        } else {
            NOMINAL_BPM
        };

        Self {
            table,
            inbox,
            calculator,
            target: None,
            state: DanceState::Idle,
            last_clip_index: 0,
            current_bpm,
            applied_rate: None,
        }
    }

    /// Enter or leave the dancing state and apply the resulting rate.
    ///
    /// Without a target the state is still recorded, so the right rate is
    /// applied as soon as a target is attached.
    pub fn set_dance_state(&mut self, is_dancing: bool, clip_index: u32) {
        self.last_clip_index = clip_index;
        self.state = if is_dancing {
            DanceState::Dancing { clip_index }
        } else {
            DanceState::Idle
        };

        if let Err(e) = self.apply_current_rate() {
            log::warn!(
                "{}; dance state {:?} will apply once one is attached",
                e,
                self.state
            );
        }
    }

    /// Like [`set_dance_state`](Self::set_dance_state), but takes the clip
    /// from the target's own selector when it has one.
    pub fn sync_from_target(&mut self, is_dancing: bool) {
        let clip_index = self
            .target
            .as_ref()
            .and_then(|target| target.current_clip_selector())
            .unwrap_or(self.last_clip_index);
        self.set_dance_state(is_dancing, clip_index);
    }

    /// Swap the animation target. A different target gets the current rate
    /// immediately; passing the same target again does nothing.
    pub fn set_animator_target(&mut self, target: Option<Arc<dyn AnimationTarget>>) {
        let Some(target) = target else {
            if let Some(previous) = self.target.take() {
                log::warn!("Animation target {} detached", previous.name());
            } else {
                log::warn!("Attempted to set an empty animation target");
            }
            self.applied_rate = None;
            return;
        };

        if let Some(current) = &self.target {
            if Arc::ptr_eq(current, &target) {
                return;
            }
        }

        log::info!("Animation target set to {}", target.name());
        self.target = Some(target);
        // Whatever was applied to the old target says nothing about the new one
        self.applied_rate = None;
        if let Err(e) = self.apply_current_rate() {
            log::warn!("Could not apply playback rate: {}", e);
        }
    }

    /// Drain the inbox and, while dancing, apply the rate for the newest
    /// sample. Returns the rate that was applied, if any.
    ///
    /// The tempo is recorded even when the rate cannot be applied, in which
    /// case [`SyncError::MissingTarget`] is returned.
    pub fn tick(&mut self) -> Result<Option<f32>> {
        let Some(sample) = self.inbox.drain() else {
            return Ok(None);
        };
        self.current_bpm = sample.bpm();
        log::debug!("Tempo update: {}", sample);

        if !self.state.is_dancing() {
            return Ok(None);
        }

        self.apply_current_rate()
    }

    fn apply_current_rate(&mut self) -> Result<Option<f32>> {
        let target = self.target.clone().ok_or(SyncError::MissingTarget)?;

        match self.state {
            DanceState::Dancing { clip_index } => {
                let reference = self.table.reference_bpm(clip_index);
                if reference.is_none() {
                    log::debug!(
                        "Clip {} has no reference BPM; using live tempo {} as reference",
                        clip_index,
                        self.current_bpm
                    );
                }

                let rate = self.calculator.compute(self.current_bpm, reference);
                target.set_playback_rate(rate);
                self.applied_rate = Some(rate);

                log::info!(
                    "Dancing clip {} at {} BPM (reference {:?}), rate {:.4}",
                    clip_index,
                    self.current_bpm,
                    reference,
                    rate
                );
                Ok(Some(rate))
            }
            DanceState::Idle => {
                if target.playback_rate() == 1.0 {
                    self.applied_rate = Some(1.0);
                    return Ok(None);
                }

                target.set_playback_rate(1.0);
                self.applied_rate = Some(1.0);
                log::info!("Not dancing, reset playback rate of {} to 1", target.name());
                Ok(Some(1.0))
            }
        }
    }

    pub fn state(&self) -> DanceState {
        self.state
    }

    pub fn is_dancing(&self) -> bool {
        self.state.is_dancing()
    }

    pub fn current_bpm(&self) -> f32 {
        self.current_bpm
    }

    /// Rate last written to the current target, if any.
    pub fn applied_rate(&self) -> Option<f32> {
        self.applied_rate
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    pub fn clip_table(&self) -> &ClipReferenceTable {
        &self.table
    }
}
