//! Platform input backends
//!
//! macOS uses CGEventTap / CGEventPost directly. Other desktops go through
//! `rdev` when the `rdev` feature is enabled.

use crate::error::Result;
use crate::input::{InputSink, InputSource};
use std::sync::Arc;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(all(feature = "rdev", not(target_os = "macos")))]
pub mod rdev_backend;

/// The `(source, sink)` pair for this build
#[cfg(target_os = "macos")]
pub fn default_backend() -> Result<(Arc<dyn InputSource>, Arc<dyn InputSink>)> {
    macos::warn_if_untrusted();
    Ok((Arc::new(macos::TapSource), Arc::new(macos::PostSink::new())))
}

/// The `(source, sink)` pair for this build
#[cfg(all(feature = "rdev", not(target_os = "macos")))]
pub fn default_backend() -> Result<(Arc<dyn InputSource>, Arc<dyn InputSink>)> {
    Ok((
        Arc::new(rdev_backend::RdevSource),
        Arc::new(rdev_backend::RdevSink),
    ))
}

/// The `(source, sink)` pair for this build
#[cfg(not(any(target_os = "macos", feature = "rdev")))]
pub fn default_backend() -> Result<(Arc<dyn InputSource>, Arc<dyn InputSink>)> {
    Err(crate::error::Error::Unsupported(format!(
        "{} (rebuild with the `rdev` feature)",
        std::env::consts::OS
    )))
}
