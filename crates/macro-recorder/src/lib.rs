//! macro-recorder - capture and replay pointer/keyboard macros
//!
//! Records live input into an immutable [`EventSequence`], stores and
//! exchanges it as JSON, and replays it with the original spacing scaled by a
//! speed multiplier. Any number of playbacks can run at once, started
//! directly or by a bound trigger, while a capture is in progress.
//!
//! ## Platform Support
//!
//! - **macOS**: CGEventTap capture, CGEventPost playback
//! - **Linux / Windows**: through `rdev` with the `rdev` feature
//!
//! ```rust,no_run
//! use macro_recorder::prelude::*;
//!
//! let (source, sink) = macro_recorder::platform::default_backend()?;
//! let session = SessionManager::new(source, sink, SessionConfig::default());
//!
//! session.begin_capture()?;
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! let recorded = session.end_capture()?;
//!
//! let report = session.play_blocking(recorded, 2.0)?;
//! println!("{} events replayed", report.dispatched);
//! # Ok::<(), macro_recorder::Error>(())
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod input;
pub mod platform;
pub mod playback;
pub mod pool;
pub mod session;
pub mod storage;
pub mod testing;
pub mod trigger;

pub use capture::{CaptureSession, Recorder};
pub use config::{RecorderConfig, ReplayConfig, SessionConfig};
pub use error::{DispatchError, Error, Result};
pub use events::*;
pub use input::{InputListener, InputSink, InputSource, InputSubscription};
pub use playback::{CancelToken, PlaybackReport, PlaybackRequest, Player, SkippedEvent};
pub use pool::{PlaybackEvent, PlaybackId, PlaybackOrigin, PlaybackPool, Receiver};
pub use session::SessionManager;
pub use storage::{Macro, MacroStorage};
pub use trigger::{TriggerBinding, TriggerCoordinator};

pub mod prelude {
    pub use crate::config::{RecorderConfig, ReplayConfig, SessionConfig};
    pub use crate::error::{DispatchError, Error};
    pub use crate::events::*;
    pub use crate::input::{InputSink, InputSource};
    pub use crate::playback::{PlaybackReport, Player};
    pub use crate::pool::{PlaybackEvent, PlaybackId, PlaybackOrigin};
    pub use crate::session::SessionManager;
    pub use crate::storage::{Macro, MacroStorage};
}
