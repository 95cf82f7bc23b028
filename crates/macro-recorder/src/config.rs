//! Recorder and replay configuration

use crate::events::EventKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capture configuration - which input categories get recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub record_pointer_moves: bool,
    pub record_pointer_buttons: bool,
    pub record_scroll: bool,
    pub record_keyboard: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_pointer_moves: true,
            record_pointer_buttons: true,
            record_scroll: true,
            record_keyboard: true,
        }
    }
}

impl RecorderConfig {
    pub fn accepts(&self, kind: &EventKind) -> bool {
        match kind {
            EventKind::PointerMove { .. } => self.record_pointer_moves,
            EventKind::PointerButton { .. } => self.record_pointer_buttons,
            EventKind::PointerScroll { .. } => self.record_scroll,
            EventKind::KeyDown { .. } | EventKind::KeyUp { .. } => self.record_keyboard,
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Wait before the playback clock starts, cancellable
    #[serde(with = "millis")]
    pub start_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub recorder: RecorderConfig,
    pub replay: ReplayConfig,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
