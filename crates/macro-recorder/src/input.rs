//! Input device capabilities
//!
//! Capture and playback never talk to the OS directly. They go through an
//! [`InputSource`] (observe live input) and an [`InputSink`] (synthesize input),
//! so the same engine runs against a real backend from [`crate::platform`] or
//! against the doubles in [`crate::testing`].

use crate::error::{DispatchError, Result};
use crate::events::{Button, EventKind, Key};
use std::sync::Arc;
use std::time::Instant;

/// Callback invoked for every observed input, with the instant it was observed
///
/// Called from the backend's notification thread. Must not block.
pub type InputListener = Arc<dyn Fn(EventKind, Instant) + Send + Sync>;

/// Something that can observe system input without altering it
pub trait InputSource: Send + Sync {
    /// Start delivering notifications to `listener`
    fn subscribe(&self, listener: InputListener) -> Result<Box<dyn InputSubscription>>;
}

/// Live subscription returned by [`InputSource::subscribe`]
pub trait InputSubscription: Send {
    /// Stop delivery. Once this returns the listener is not called again.
    fn cancel(self: Box<Self>);
}

/// Something that can synthesize input actions
pub trait InputSink: Send + Sync {
    /// Absolute pointer positioning
    fn move_to(&self, x: i32, y: i32) -> std::result::Result<(), DispatchError>;

    fn button(&self, button: Button, pressed: bool) -> std::result::Result<(), DispatchError>;

    /// Relative wheel motion
    fn scroll(&self, dx: i32, dy: i32) -> std::result::Result<(), DispatchError>;

    fn key(&self, key: &Key, pressed: bool) -> std::result::Result<(), DispatchError>;
}
