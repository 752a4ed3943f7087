//! Error types for BPM ingestion and playback sync.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while receiving BPM updates or applying playback rates.
///
/// None of these are fatal. The listener and file sources recover from
/// payload and socket errors locally; the controller reports a missing
/// target to its caller and keeps the new tempo.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Datagram payload was not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Payload text could not be parsed as a number.
    #[error("invalid BPM payload: {0:?}")]
    InvalidPayload(String),

    /// Parsed value was zero, negative or not finite.
    #[error("BPM must be a positive number, got {0}")]
    NonPositiveBpm(f32),

    /// The UDP socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Transient socket error during receive.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// `start()` was called on a source that is already running.
    #[error("source is already running")]
    AlreadyRunning,

    /// A polling source was configured with a zero interval.
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    /// No animation target is attached to the controller.
    #[error("no animation target attached")]
    MissingTarget,

    /// The JSON BPM file could not be read or decoded.
    #[error("BPM file {path:?}: {message}")]
    BpmFile { path: PathBuf, message: String },
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
