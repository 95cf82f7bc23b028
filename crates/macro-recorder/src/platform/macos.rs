//! macOS backend: listen-only CGEventTap for capture, CGEventPost for playback

use crate::error::{DispatchError, Error, Result};
use crate::events::{Button, EventKind, Key, NamedKey};
use crate::input::{InputListener, InputSink, InputSource, InputSubscription};
use cidre::cg::event::access as cg_access;
use cidre::{cf, cg};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

// CGEventPost / CGEventCreate are not exposed by cidre
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventPost(tap: u32, event: *const c_void);
    fn CGEventCreate(source: *const c_void) -> *mut c_void;
    fn CGEventGetLocation(event: *const c_void) -> cg::Point;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFRelease(cf: *const c_void);
}

const HID_EVENT_TAP: u32 = 0;

// CGEventFlags masks
const FLAG_CAPS: u64 = 0x10000;
const FLAG_SHIFT: u64 = 0x20000;
const FLAG_CTRL: u64 = 0x40000;
const FLAG_ALT: u64 = 0x80000;
const FLAG_CMD: u64 = 0x100000;

/// Log a warning when input monitoring hasn't been granted yet
pub fn warn_if_untrusted() {
    if !cg_access::listen_preflight() {
        warn!("input monitoring permission missing; enable it in System Settings > Privacy & Security");
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Input source backed by a session-level event tap
///
/// Each subscription owns its own tap and run-loop thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct TapSource;

impl InputSource for TapSource {
    fn subscribe(&self, listener: InputListener) -> Result<Box<dyn InputSubscription>> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);

        let thread = thread::Builder::new()
            .name("event-tap".into())
            .spawn({
                let stop = stop.clone();
                move || run_tap(listener, stop, ready_tx)
            })
            .map_err(|e| Error::Backend(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(TapSubscription { stop, thread })),
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(Error::Backend(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Backend("event tap thread exited early".into()))
            }
        }
    }
}

struct TapSubscription {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

impl InputSubscription for TapSubscription {
    fn cancel(self: Box<Self>) {
        self.stop.store(true, Ordering::SeqCst);
        // The callback only runs on the tap thread
        let _ = self.thread.join();
    }
}

struct TapState {
    listener: InputListener,
}

fn run_tap(
    listener: InputListener,
    stop: Arc<AtomicBool>,
    ready: crossbeam_channel::Sender<std::result::Result<(), String>>,
) {
    let mask = cg::EventType::LEFT_MOUSE_DOWN.mask()
        | cg::EventType::LEFT_MOUSE_UP.mask()
        | cg::EventType::RIGHT_MOUSE_DOWN.mask()
        | cg::EventType::RIGHT_MOUSE_UP.mask()
        | cg::EventType::OHTER_MOUSE_DOWN.mask()
        | cg::EventType::OHTER_MOUSE_UP.mask()
        | cg::EventType::MOUSE_MOVED.mask()
        | cg::EventType::LEFT_MOUSE_DRAGGED.mask()
        | cg::EventType::RIGHT_MOUSE_DRAGGED.mask()
        | cg::EventType::OHTER_MOUSE_DRAGGED.mask()
        | cg::EventType::SCROLL_WHEEL.mask()
        | cg::EventType::KEY_DOWN.mask()
        | cg::EventType::KEY_UP.mask()
        | cg::EventType::FLAGS_CHANGED.mask();

    let state = Box::into_raw(Box::new(TapState { listener }));

    let tap = cg::EventTap::new(
        cg::EventTapLocation::Session,
        cg::EventTapPlacement::TailAppend,
        cg::EventTapOpts::LISTEN_ONLY,
        mask,
        tap_callback,
        state,
    );

    let Some(tap) = tap else {
        drop(unsafe { Box::from_raw(state) });
        let _ = ready.send(Err(
            "failed to create event tap (is input monitoring allowed?)".into(),
        ));
        return;
    };

    let Some(src) = cf::MachPort::run_loop_src(&tap, 0) else {
        drop(tap);
        drop(unsafe { Box::from_raw(state) });
        let _ = ready.send(Err("failed to create run loop source".into()));
        return;
    };

    let rl = cf::RunLoop::current();
    rl.add_src(&src, cf::RunLoopMode::default());
    let _ = ready.send(Ok(()));
    debug!("event tap running");

    while !stop.load(Ordering::Relaxed) {
        cf::RunLoop::run_in_mode(cf::RunLoopMode::default(), 0.05, true);
    }

    rl.remove_src(&src, cf::RunLoopMode::default());
    drop(src);
    drop(tap);
    // Tap is gone, nothing references the state anymore
    drop(unsafe { Box::from_raw(state) });
    debug!("event tap stopped");
}

extern "C" fn tap_callback(
    _proxy: *mut cg::EventTapProxy,
    event_type: cg::EventType,
    event: &mut cg::Event,
    user_info: *mut TapState,
) -> Option<&cg::Event> {
    let at = Instant::now();
    let state = unsafe { &*user_info };
    if let Some(kind) = translate(event_type, event) {
        (state.listener)(kind, at);
    }
    Some(event)
}

fn translate(event_type: cg::EventType, event: &cg::Event) -> Option<EventKind> {
    let loc = event.location();
    let (x, y) = (loc.x.round() as i32, loc.y.round() as i32);
    let flags = event.flags().0;

    let button = |pressed: bool, button: Button| EventKind::PointerButton {
        x,
        y,
        button,
        pressed,
    };

    Some(match event_type {
        cg::EventType::MOUSE_MOVED
        | cg::EventType::LEFT_MOUSE_DRAGGED
        | cg::EventType::RIGHT_MOUSE_DRAGGED
        | cg::EventType::OHTER_MOUSE_DRAGGED => EventKind::PointerMove { x, y },

        cg::EventType::LEFT_MOUSE_DOWN => button(true, Button::Left),
        cg::EventType::LEFT_MOUSE_UP => button(false, Button::Left),
        cg::EventType::RIGHT_MOUSE_DOWN => button(true, Button::Right),
        cg::EventType::RIGHT_MOUSE_UP => button(false, Button::Right),
        cg::EventType::OHTER_MOUSE_DOWN | cg::EventType::OHTER_MOUSE_UP => {
            let number = event.field_i64(cg::EventField::MOUSE_EVENT_BUTTON_NUMBER);
            let name = if number == 2 { "middle" } else { "other" };
            button(
                event_type == cg::EventType::OHTER_MOUSE_DOWN,
                Button::from_name_or_primary(name),
            )
        }

        cg::EventType::SCROLL_WHEEL => {
            let dy = event.field_i64(cg::EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS1) as i32;
            let dx = event.field_i64(cg::EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS2) as i32;
            if dx == 0 && dy == 0 {
                return None;
            }
            EventKind::PointerScroll { x, y, dx, dy }
        }

        cg::EventType::KEY_DOWN | cg::EventType::KEY_UP => {
            let keycode = event.field_i64(cg::EventField::KEYBOARD_EVENT_KEYCODE) as u16;
            let key = keycode_to_key(keycode, flags);
            if event_type == cg::EventType::KEY_DOWN {
                EventKind::KeyDown { key }
            } else {
                EventKind::KeyUp { key }
            }
        }

        // Modifiers only report a flags change; the keycode says which one
        cg::EventType::FLAGS_CHANGED => {
            let keycode = event.field_i64(cg::EventField::KEYBOARD_EVENT_KEYCODE) as u16;
            let named = keycode_to_named(keycode)?;
            let pressed = flags & modifier_flag(named)? != 0;
            let key = Key::Named(named);
            if pressed {
                EventKind::KeyDown { key }
            } else {
                EventKind::KeyUp { key }
            }
        }

        _ => return None,
    })
}

fn modifier_flag(key: NamedKey) -> Option<u64> {
    use NamedKey::*;
    Some(match key {
        Shift | ShiftL | ShiftR => FLAG_SHIFT,
        Ctrl | CtrlL | CtrlR => FLAG_CTRL,
        Alt | AltL | AltR | AltGr => FLAG_ALT,
        Cmd | CmdL | CmdR => FLAG_CMD,
        CapsLock => FLAG_CAPS,
        _ => return None,
    })
}

// ============================================================================
// Playback
// ============================================================================

/// Input sink posting synthesized CGEvents at the HID level
#[derive(Default)]
pub struct PostSink {
    /// Buttons currently held, so moves are posted as drags
    held: Mutex<Vec<Button>>,
    /// Pressed modifier flags, applied to synthesized key events
    modifiers: Mutex<u64>,
}

impl PostSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn post(event: &cg::Event) {
        unsafe {
            CGEventPost(HID_EVENT_TAP, event as *const _ as *const c_void);
        }
    }

    fn cursor() -> cg::Point {
        unsafe {
            let event = CGEventCreate(std::ptr::null());
            if event.is_null() {
                return cg::Point { x: 0.0, y: 0.0 };
            }
            let loc = CGEventGetLocation(event);
            CFRelease(event);
            loc
        }
    }
}

fn cg_button(button: Button) -> (cg::MouseButton, cg::EventType, cg::EventType, cg::EventType) {
    match button {
        Button::Left => (
            cg::MouseButton::Left,
            cg::EventType::LEFT_MOUSE_DOWN,
            cg::EventType::LEFT_MOUSE_UP,
            cg::EventType::LEFT_MOUSE_DRAGGED,
        ),
        Button::Right => (
            cg::MouseButton::Right,
            cg::EventType::RIGHT_MOUSE_DOWN,
            cg::EventType::RIGHT_MOUSE_UP,
            cg::EventType::RIGHT_MOUSE_DRAGGED,
        ),
        Button::Middle => (
            cg::MouseButton::Center,
            cg::EventType::OHTER_MOUSE_DOWN,
            cg::EventType::OHTER_MOUSE_UP,
            cg::EventType::OHTER_MOUSE_DRAGGED,
        ),
    }
}

fn failed(what: &str) -> DispatchError {
    DispatchError::Failed(format!("could not create {} event", what))
}

impl InputSink for PostSink {
    fn move_to(&self, x: i32, y: i32) -> std::result::Result<(), DispatchError> {
        let pos = cg::Point {
            x: x as f64,
            y: y as f64,
        };
        let (btn, event_type) = match self.held.lock().last() {
            Some(b) => {
                let (btn, _, _, dragged) = cg_button(*b);
                (btn, dragged)
            }
            None => (cg::MouseButton::Left, cg::EventType::MOUSE_MOVED),
        };
        let evt = cg::Event::mouse(None, event_type, pos, btn).ok_or_else(|| failed("move"))?;
        Self::post(&evt);
        Ok(())
    }

    fn button(&self, button: Button, pressed: bool) -> std::result::Result<(), DispatchError> {
        let (btn, down, up, _) = cg_button(button);
        let evt = cg::Event::mouse(None, if pressed { down } else { up }, Self::cursor(), btn)
            .ok_or_else(|| failed("button"))?;
        Self::post(&evt);

        let mut held = self.held.lock();
        held.retain(|b| *b != button);
        if pressed {
            held.push(button);
        }
        Ok(())
    }

    fn scroll(&self, dx: i32, dy: i32) -> std::result::Result<(), DispatchError> {
        // Deltas are signed int32 on the C side
        let evt = cg::Event::wheel_2(None, cg::ScrollEventUnit::Line, dy as u32, dx as u32)
            .ok_or_else(|| failed("scroll"))?;
        Self::post(&evt);
        Ok(())
    }

    fn key(&self, key: &Key, pressed: bool) -> std::result::Result<(), DispatchError> {
        let (keycode, shift) = match key {
            Key::Char(c) => char_to_keycode(*c),
            Key::Named(named) => named_to_keycode(*named).map(|k| (k, false)),
            Key::Other(_) => None,
        }
        .ok_or_else(|| DispatchError::UnresolvableKey(key.name()))?;

        let mut modifiers = self.modifiers.lock();
        if let Key::Named(named) = key {
            if let Some(flag) = modifier_flag(*named) {
                if pressed {
                    *modifiers |= flag;
                } else {
                    *modifiers &= !flag;
                }
            }
        }
        let mut flags = *modifiers;
        if shift {
            flags |= FLAG_SHIFT;
        }
        drop(modifiers);

        let mut evt =
            cg::Event::keyboard(None, keycode, pressed).ok_or_else(|| failed("keyboard"))?;
        evt.set_flags(cg::EventFlags(flags));
        Self::post(&evt);
        Ok(())
    }
}

// ============================================================================
// Keycode Mapping
// ============================================================================

/// Virtual keycodes for named keys. Generic names come first so that
/// reverse lookup prefers them.
const NAMED_KEYCODES: &[(NamedKey, u16)] = &[
    (NamedKey::Enter, 36),
    (NamedKey::Tab, 48),
    (NamedKey::Space, 49),
    (NamedKey::Backspace, 51),
    (NamedKey::Esc, 53),
    (NamedKey::CmdR, 54),
    (NamedKey::Cmd, 55),
    (NamedKey::Shift, 56),
    (NamedKey::CapsLock, 57),
    (NamedKey::Alt, 58),
    (NamedKey::Ctrl, 59),
    (NamedKey::ShiftR, 60),
    (NamedKey::AltR, 61),
    (NamedKey::CtrlR, 62),
    (NamedKey::F17, 64),
    (NamedKey::NumLock, 71),
    (NamedKey::MediaVolumeUp, 72),
    (NamedKey::MediaVolumeDown, 73),
    (NamedKey::MediaVolumeMute, 74),
    (NamedKey::F18, 79),
    (NamedKey::F19, 80),
    (NamedKey::F20, 90),
    (NamedKey::F5, 96),
    (NamedKey::F6, 97),
    (NamedKey::F7, 98),
    (NamedKey::F3, 99),
    (NamedKey::F8, 100),
    (NamedKey::F9, 101),
    (NamedKey::F11, 103),
    (NamedKey::F13, 105),
    (NamedKey::F16, 106),
    (NamedKey::F14, 107),
    (NamedKey::F10, 109),
    (NamedKey::Menu, 110),
    (NamedKey::F12, 111),
    (NamedKey::F15, 113),
    (NamedKey::Insert, 114),
    (NamedKey::Home, 115),
    (NamedKey::PageUp, 116),
    (NamedKey::Delete, 117),
    (NamedKey::F4, 118),
    (NamedKey::End, 119),
    (NamedKey::F2, 120),
    (NamedKey::PageDown, 121),
    (NamedKey::F1, 122),
    (NamedKey::Left, 123),
    (NamedKey::Right, 124),
    (NamedKey::Down, 125),
    (NamedKey::Up, 126),
    // Aliases
    (NamedKey::CmdL, 55),
    (NamedKey::ShiftL, 56),
    (NamedKey::AltL, 58),
    (NamedKey::CtrlL, 59),
    (NamedKey::AltGr, 61),
];

fn keycode_to_named(keycode: u16) -> Option<NamedKey> {
    NAMED_KEYCODES
        .iter()
        .find(|(_, code)| *code == keycode)
        .map(|(named, _)| *named)
}

fn named_to_keycode(named: NamedKey) -> Option<u16> {
    NAMED_KEYCODES
        .iter()
        .find(|(n, _)| *n == named)
        .map(|(_, code)| *code)
}

fn keycode_to_key(keycode: u16, flags: u64) -> Key {
    if let Some(named) = keycode_to_named(keycode) {
        return Key::Named(named);
    }
    match keycode_to_char(keycode, flags) {
        Some(c) => Key::Char(c),
        None => Key::parse(&format!("keycode_{}", keycode)),
    }
}

fn keycode_to_char(keycode: u16, flags: u64) -> Option<char> {
    let shift = flags & FLAG_SHIFT != 0;
    let caps = flags & FLAG_CAPS != 0;

    let c = match keycode {
        0 => 'a', 1 => 's', 2 => 'd', 3 => 'f', 4 => 'h', 5 => 'g', 6 => 'z', 7 => 'x',
        8 => 'c', 9 => 'v', 11 => 'b', 12 => 'q', 13 => 'w', 14 => 'e', 15 => 'r',
        16 => 'y', 17 => 't', 31 => 'o', 32 => 'u', 34 => 'i', 35 => 'p', 37 => 'l',
        38 => 'j', 40 => 'k', 45 => 'n', 46 => 'm',
        18 => if shift { '!' } else { '1' },
        19 => if shift { '@' } else { '2' },
        20 => if shift { '#' } else { '3' },
        21 => if shift { '$' } else { '4' },
        22 => if shift { '^' } else { '6' },
        23 => if shift { '%' } else { '5' },
        24 => if shift { '+' } else { '=' },
        25 => if shift { '(' } else { '9' },
        26 => if shift { '&' } else { '7' },
        27 => if shift { '_' } else { '-' },
        28 => if shift { '*' } else { '8' },
        29 => if shift { ')' } else { '0' },
        30 => if shift { '}' } else { ']' },
        33 => if shift { '{' } else { '[' },
        39 => if shift { '"' } else { '\'' },
        41 => if shift { ':' } else { ';' },
        42 => if shift { '|' } else { '\\' },
        43 => if shift { '<' } else { ',' },
        44 => if shift { '?' } else { '/' },
        47 => if shift { '>' } else { '.' },
        50 => if shift { '~' } else { '`' },
        _ => return None,
    };

    if (shift || caps) && c.is_ascii_lowercase() {
        Some(c.to_ascii_uppercase())
    } else {
        Some(c)
    }
}

/// Char to (keycode, needs_shift)
fn char_to_keycode(c: char) -> Option<(u16, bool)> {
    let upper = c.is_ascii_uppercase();
    Some(match c.to_ascii_lowercase() {
        'a' => (0, upper),
        'b' => (11, upper),
        'c' => (8, upper),
        'd' => (2, upper),
        'e' => (14, upper),
        'f' => (3, upper),
        'g' => (5, upper),
        'h' => (4, upper),
        'i' => (34, upper),
        'j' => (38, upper),
        'k' => (40, upper),
        'l' => (37, upper),
        'm' => (46, upper),
        'n' => (45, upper),
        'o' => (31, upper),
        'p' => (35, upper),
        'q' => (12, upper),
        'r' => (15, upper),
        's' => (1, upper),
        't' => (17, upper),
        'u' => (32, upper),
        'v' => (9, upper),
        'w' => (13, upper),
        'x' => (7, upper),
        'y' => (16, upper),
        'z' => (6, upper),
        '0' | ')' => (29, c == ')'),
        '1' | '!' => (18, c == '!'),
        '2' | '@' => (19, c == '@'),
        '3' | '#' => (20, c == '#'),
        '4' | '$' => (21, c == '$'),
        '5' | '%' => (23, c == '%'),
        '6' | '^' => (22, c == '^'),
        '7' | '&' => (26, c == '&'),
        '8' | '*' => (28, c == '*'),
        '9' | '(' => (25, c == '('),
        ' ' => (49, false),
        '\n' => (36, false),
        '\t' => (48, false),
        '-' | '_' => (27, c == '_'),
        '=' | '+' => (24, c == '+'),
        '[' | '{' => (33, c == '{'),
        ']' | '}' => (30, c == '}'),
        '\\' | '|' => (42, c == '|'),
        ';' | ':' => (41, c == ':'),
        '\'' | '"' => (39, c == '"'),
        ',' | '<' => (43, c == '<'),
        '.' | '>' => (47, c == '>'),
        '/' | '?' => (44, c == '?'),
        '`' | '~' => (50, c == '~'),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chars_round_trip_through_keycodes() {
        for c in "azAZ09!@ ;:'\"/?`~".chars() {
            let (code, shift) = char_to_keycode(c).unwrap();
            let flags = if shift { FLAG_SHIFT } else { 0 };
            let back = keycode_to_key(code, flags);
            let expected = match c {
                ' ' => Key::Named(NamedKey::Space),
                _ => Key::Char(c),
            };
            assert_eq!(back, expected, "{:?}", c);
        }
    }

    #[test]
    fn named_keys_prefer_generic_names() {
        assert_eq!(keycode_to_named(56), Some(NamedKey::Shift));
        assert_eq!(keycode_to_named(60), Some(NamedKey::ShiftR));
        assert_eq!(named_to_keycode(NamedKey::ShiftL), Some(56));
        assert_eq!(named_to_keycode(NamedKey::PrintScreen), None);
    }

    #[test]
    fn unknown_keycode_is_opaque() {
        assert_eq!(keycode_to_key(200, 0), Key::parse("keycode_200"));
    }
}
