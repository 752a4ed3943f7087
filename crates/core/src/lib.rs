//! Dance sync core
//!
//! Scales an avatar's dance playback speed to a live tempo. BPM values come
//! in over UDP (or from a JSON file), are handed to the owning thread through
//! a single-slot inbox, and are turned into a playback multiplier relative to
//! the tempo each dance clip was authored at.

pub use bpm_file::{read_bpm_file, BpmFileConfig, BpmFileContents, BpmFileWatcher};
pub use clip_table::{default_clip_references, ClipReference, ClipReferenceTable};
pub use config::{ConfigError, ConfigManager, ConfigSchema, SyncSettings};
pub use controller::{AnimationTarget, DanceState, DanceSyncController};
pub use error::{Result, SyncError};
pub use inbox::{bpm_inbox, BpmInbox, BpmPublisher, BpmSample};
pub use listener::{
    parse_bpm_payload, BpmListener, ListenerConfig, ListenerState, DEFAULT_BPM_PORT,
    MAX_UDP_PAYLOAD,
};
pub use rate::{compute_rate, RateCalculator, BPM_EPSILON, NOMINAL_BPM};
pub use source::BpmSource;

mod bpm_file;
mod clip_table;
mod config;
mod controller;
pub mod error;
mod inbox;
mod listener;
mod rate;
mod source;
