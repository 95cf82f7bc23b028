//! Error types
//!
//! [`Error`] covers structural failures that abort the requested operation.
//! [`DispatchError`] is the per-event soft failure recorded during playback.

use crate::pool::PlaybackId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("a capture session is already active")]
    AlreadyCapturing,

    #[error("no capture session is active")]
    NotCapturing,

    #[error("invalid playback speed {0}: must be a finite number greater than zero")]
    InvalidSpeed(f64),

    #[error("malformed event{}: {reason}", at_record(.record))]
    MalformedEvent {
        record: Option<usize>,
        reason: String,
    },

    #[error("no input backend available: {0}")]
    Unsupported(String),

    #[error("input backend error: {0}")]
    Backend(String),

    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("playback {0} panicked")]
    PlaybackPanicked(PlaybackId),
}

impl Error {
    pub(crate) fn malformed(record: Option<usize>, reason: impl Into<String>) -> Self {
        Error::MalformedEvent {
            record,
            reason: reason.into(),
        }
    }
}

fn at_record(record: &Option<usize>) -> String {
    record.map(|i| format!(" at record {}", i)).unwrap_or_default()
}

/// Failure to synthesize a single event; playback logs it and moves on
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unresolvable key {0:?}")]
    UnresolvableKey(String),

    #[error("input injection failed: {0}")]
    Failed(String),
}

/// Reject speeds that can't scale a timeline
pub(crate) fn check_speed(speed: f64) -> Result<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidSpeed(speed))
    }
}
