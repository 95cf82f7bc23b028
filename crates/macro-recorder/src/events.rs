//! Event types for recorded macros
//!
//! An [`Event`] is one timestamped pointer or keyboard observation. Events are
//! grouped into an immutable [`EventSequence`] which is what gets stored,
//! exchanged and replayed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Single timestamped input event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds since capture start
    pub timestamp: f64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(timestamp: f64, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }
}

/// What happened - closed set of pointer and keyboard actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Absolute pointer position
    PointerMove { x: i32, y: i32 },
    /// Button press or release at a position
    PointerButton {
        x: i32,
        y: i32,
        button: Button,
        pressed: bool,
    },
    /// Wheel motion at a position, deltas are relative
    PointerScroll { x: i32, y: i32, dx: i32, dy: i32 },
    KeyDown { key: Key },
    KeyUp { key: Key },
}

impl EventKind {
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            EventKind::PointerMove { .. }
                | EventKind::PointerButton { .. }
                | EventKind::PointerScroll { .. }
        )
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, EventKind::KeyDown { .. } | EventKind::KeyUp { .. })
    }
}

/// Pointer buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Left,
    Right,
    Middle,
}

impl Button {
    pub fn as_str(&self) -> &'static str {
        match self {
            Button::Left => "left",
            Button::Right => "right",
            Button::Middle => "middle",
        }
    }

    /// Strict lookup, `None` for anything outside the vocabulary
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "left" => Some(Button::Left),
            "right" => Some(Button::Right),
            "middle" => Some(Button::Middle),
            _ => None,
        }
    }

    /// Lenient lookup used by input backends: unknown buttons act as the primary one
    pub fn from_name_or_primary(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            tracing::debug!(button = name, "unknown pointer button, using left");
            Button::Left
        })
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key identifier
///
/// Either a printable character, a name from the [`NamedKey`] vocabulary, or
/// an opaque name the input layer reported that we don't know about. Opaque
/// names are kept verbatim so they survive a save/load cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Named(NamedKey),
    Other(OpaqueKey),
}

/// A key name outside the known vocabulary
///
/// Only [`Key::parse`] creates these, so an opaque name never shadows a
/// character or a [`NamedKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpaqueKey(String);

impl OpaqueKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpaqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Key {
    /// Normalize a textual key identifier
    ///
    /// `"a"` is a character, `"shift"` and `"Key.shift"` are named keys,
    /// anything else is kept as an opaque name.
    pub fn parse(s: &str) -> Self {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Key::Char(c);
        }
        let name = s.strip_prefix("Key.").unwrap_or(s);
        match NamedKey::from_name(name) {
            Some(named) => Key::Named(named),
            None => Key::Other(OpaqueKey(s.to_string())),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Named(k) => k.as_str().to_string(),
            Key::Other(s) => s.to_string(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c),
            Key::Named(k) => f.write_str(k.as_str()),
            Key::Other(s) => f.write_str(s.as_str()),
        }
    }
}

impl From<char> for Key {
    fn from(c: char) -> Self {
        Key::Char(c)
    }
}

impl From<NamedKey> for Key {
    fn from(k: NamedKey) -> Self {
        Key::Named(k)
    }
}

macro_rules! named_keys {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Non-printable keys with a stable symbolic name
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NamedKey {
            $($variant),+
        }

        impl NamedKey {
            pub const ALL: &'static [NamedKey] = &[$(NamedKey::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(NamedKey::$variant => $name),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(NamedKey::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

named_keys! {
    Alt => "alt",
    AltL => "alt_l",
    AltR => "alt_r",
    AltGr => "alt_gr",
    Backspace => "backspace",
    CapsLock => "caps_lock",
    Cmd => "cmd",
    CmdL => "cmd_l",
    CmdR => "cmd_r",
    Ctrl => "ctrl",
    CtrlL => "ctrl_l",
    CtrlR => "ctrl_r",
    Delete => "delete",
    Down => "down",
    End => "end",
    Enter => "enter",
    Esc => "esc",
    F1 => "f1",
    F2 => "f2",
    F3 => "f3",
    F4 => "f4",
    F5 => "f5",
    F6 => "f6",
    F7 => "f7",
    F8 => "f8",
    F9 => "f9",
    F10 => "f10",
    F11 => "f11",
    F12 => "f12",
    F13 => "f13",
    F14 => "f14",
    F15 => "f15",
    F16 => "f16",
    F17 => "f17",
    F18 => "f18",
    F19 => "f19",
    F20 => "f20",
    Home => "home",
    Insert => "insert",
    Left => "left",
    Menu => "menu",
    NumLock => "num_lock",
    PageDown => "page_down",
    PageUp => "page_up",
    Pause => "pause",
    PrintScreen => "print_screen",
    Right => "right",
    ScrollLock => "scroll_lock",
    Shift => "shift",
    ShiftL => "shift_l",
    ShiftR => "shift_r",
    Space => "space",
    Tab => "tab",
    Up => "up",
    MediaPlayPause => "media_play_pause",
    MediaVolumeMute => "media_volume_mute",
    MediaVolumeDown => "media_volume_down",
    MediaVolumeUp => "media_volume_up",
    MediaPrevious => "media_previous",
    MediaNext => "media_next",
}

impl fmt::Display for NamedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, immutable list of events - one macro's behavior
///
/// Cloning is cheap, the events are shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSequence {
    events: Arc<[Event]>,
}

impl EventSequence {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the last event
    pub fn duration(&self) -> Duration {
        self.events
            .last()
            .and_then(|e| Duration::try_from_secs_f64(e.timestamp).ok())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> SequenceSummary {
        let mut s = SequenceSummary::default();
        for e in self.iter() {
            match e.kind {
                EventKind::PointerMove { .. } => s.moves += 1,
                EventKind::PointerButton { .. } => s.buttons += 1,
                EventKind::PointerScroll { .. } => s.scrolls += 1,
                EventKind::KeyDown { .. } => s.key_downs += 1,
                EventKind::KeyUp { .. } => s.key_ups += 1,
            }
        }
        s
    }
}

impl From<Vec<Event>> for EventSequence {
    fn from(events: Vec<Event>) -> Self {
        Self::new(events)
    }
}

impl FromIterator<Event> for EventSequence {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a EventSequence {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Per-type event counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SequenceSummary {
    pub moves: usize,
    pub buttons: usize,
    pub scrolls: usize,
    pub key_downs: usize,
    pub key_ups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_char() {
        assert_eq!(Key::parse("a"), Key::Char('a'));
        assert_eq!(Key::parse("é"), Key::Char('é'));
    }

    #[test]
    fn parse_named_with_and_without_prefix() {
        assert_eq!(Key::parse("shift"), Key::Named(NamedKey::Shift));
        assert_eq!(Key::parse("Key.page_down"), Key::Named(NamedKey::PageDown));
    }

    #[test]
    fn unknown_name_stays_opaque() {
        let k = Key::parse("hyper_launch");
        assert!(matches!(&k, Key::Other(o) if o.as_str() == "hyper_launch"));
        assert_eq!(k.to_string(), "hyper_launch");
    }

    #[test]
    fn opaque_names_never_shadow_known_keys() {
        for name in ["shift", "Key.enter", "q"] {
            assert!(!matches!(Key::parse(name), Key::Other(_)), "{}", name);
        }
        let k = Key::parse("launch_app2");
        assert_eq!(Key::parse(&k.name()), k);
    }

    #[test]
    fn named_vocabulary_is_consistent() {
        for k in NamedKey::ALL {
            assert_eq!(NamedKey::from_name(k.as_str()), Some(*k));
        }
    }

    #[test]
    fn lenient_button_defaults_to_left() {
        assert_eq!(Button::from_name("x1"), None);
        assert_eq!(Button::from_name_or_primary("x1"), Button::Left);
        assert_eq!(Button::from_name_or_primary("middle"), Button::Middle);
    }

    #[test]
    fn summary_and_duration() {
        let seq = EventSequence::new(vec![
            Event::new(0.0, EventKind::KeyDown { key: 'a'.into() }),
            Event::new(0.05, EventKind::KeyUp { key: 'a'.into() }),
            Event::new(0.5, EventKind::PointerMove { x: 1, y: 2 }),
        ]);
        let s = seq.summary();
        assert_eq!((s.key_downs, s.key_ups, s.moves), (1, 1, 1));
        assert_eq!(seq.duration(), Duration::from_millis(500));
    }
}
