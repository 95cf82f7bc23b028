//! rdev backend for Linux (X11) and Windows
//!
//! `rdev::listen` never returns, so one process-wide listener thread is
//! started on first use and fans events out to the live subscriptions.

use crate::error::{DispatchError, Error, Result};
use crate::events::{Button, EventKind, Key, NamedKey};
use crate::input::{InputListener, InputSink, InputSource, InputSubscription};
use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

static HUB: OnceLock<Hub> = OnceLock::new();

fn hub() -> &'static Hub {
    HUB.get_or_init(Hub::default)
}

#[derive(Default)]
struct Hub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, InputListener)>>,
    /// Last pointer position, rdev button events carry none
    pointer: Mutex<(i32, i32)>,
    held: Mutex<HeldKeys>,
    running: Mutex<bool>,
}

impl Hub {
    fn ensure_running(&'static self) -> Result<()> {
        let mut running = self.running.lock();
        if *running {
            return Ok(());
        }

        let (err_tx, err_rx) = bounded::<String>(1);
        thread::Builder::new()
            .name("rdev-listen".into())
            .spawn(move || {
                if let Err(e) = rdev::listen(move |event| self.deliver(event)) {
                    error!(error = ?e, "rdev listener stopped");
                    let _ = err_tx.send(format!("{:?}", e));
                    *self.running.lock() = false;
                }
            })
            .map_err(|e| Error::Backend(e.to_string()))?;

        // listen() blocks forever on success, errors show up right away
        match err_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(reason) => Err(Error::Backend(reason)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                *running = true;
                debug!("rdev listener running");
                Ok(())
            }
        }
    }

    fn deliver(&self, event: rdev::Event) {
        let at = Instant::now();
        let Some(kind) = self.translate(&event) else {
            return;
        };
        let listeners = self.listeners.lock();
        for (_, listener) in listeners.iter() {
            listener(kind.clone(), at);
        }
    }

    fn translate(&self, event: &rdev::Event) -> Option<EventKind> {
        Some(match &event.event_type {
            rdev::EventType::MouseMove { x, y } => {
                let (x, y) = (x.round() as i32, y.round() as i32);
                *self.pointer.lock() = (x, y);
                EventKind::PointerMove { x, y }
            }
            rdev::EventType::ButtonPress(b) | rdev::EventType::ButtonRelease(b) => {
                let (x, y) = *self.pointer.lock();
                EventKind::PointerButton {
                    x,
                    y,
                    button: from_rdev_button(*b),
                    pressed: matches!(event.event_type, rdev::EventType::ButtonPress(_)),
                }
            }
            rdev::EventType::Wheel { delta_x, delta_y } => {
                let (x, y) = *self.pointer.lock();
                EventKind::PointerScroll {
                    x,
                    y,
                    dx: *delta_x as i32,
                    dy: *delta_y as i32,
                }
            }
            rdev::EventType::KeyPress(k) => EventKind::KeyDown {
                key: self.held.lock().press(*k, event.name.as_deref()),
            },
            rdev::EventType::KeyRelease(k) => EventKind::KeyUp {
                key: self.held.lock().release(*k),
            },
        })
    }
}

/// Input source backed by the shared rdev listener
#[derive(Debug, Default, Clone, Copy)]
pub struct RdevSource;

impl InputSource for RdevSource {
    fn subscribe(&self, listener: InputListener) -> Result<Box<dyn InputSubscription>> {
        let hub = hub();
        hub.ensure_running()?;
        let id = hub.next_id.fetch_add(1, Ordering::Relaxed);
        hub.listeners.lock().push((id, listener));
        Ok(Box::new(RdevSubscription { id }))
    }
}

struct RdevSubscription {
    id: u64,
}

impl InputSubscription for RdevSubscription {
    fn cancel(self: Box<Self>) {
        // Delivery holds the same lock, so no call is in flight once this returns
        hub().listeners.lock().retain(|(id, _)| *id != self.id);
    }
}

/// Input sink using `rdev::simulate`
#[derive(Debug, Default, Clone, Copy)]
pub struct RdevSink;

impl RdevSink {
    fn simulate(event: &rdev::EventType) -> std::result::Result<(), DispatchError> {
        rdev::simulate(event)
            .map_err(|_| DispatchError::Failed(format!("could not simulate {:?}", event)))
    }
}

impl InputSink for RdevSink {
    fn move_to(&self, x: i32, y: i32) -> std::result::Result<(), DispatchError> {
        Self::simulate(&rdev::EventType::MouseMove {
            x: x as f64,
            y: y as f64,
        })
    }

    fn button(&self, button: Button, pressed: bool) -> std::result::Result<(), DispatchError> {
        let b = to_rdev_button(button);
        Self::simulate(&if pressed {
            rdev::EventType::ButtonPress(b)
        } else {
            rdev::EventType::ButtonRelease(b)
        })
    }

    fn scroll(&self, dx: i32, dy: i32) -> std::result::Result<(), DispatchError> {
        Self::simulate(&rdev::EventType::Wheel {
            delta_x: dx as i64,
            delta_y: dy as i64,
        })
    }

    fn key(&self, key: &Key, pressed: bool) -> std::result::Result<(), DispatchError> {
        let k = to_rdev_key(key).ok_or_else(|| DispatchError::UnresolvableKey(key.name()))?;
        Self::simulate(&if pressed {
            rdev::EventType::KeyPress(k)
        } else {
            rdev::EventType::KeyRelease(k)
        })
    }
}

fn from_rdev_button(b: rdev::Button) -> Button {
    match b {
        rdev::Button::Left => Button::Left,
        rdev::Button::Right => Button::Right,
        rdev::Button::Middle => Button::Middle,
        rdev::Button::Unknown(n) => Button::from_name_or_primary(&format!("button{}", n)),
    }
}

fn to_rdev_button(b: Button) -> rdev::Button {
    match b {
        Button::Left => rdev::Button::Left,
        Button::Right => rdev::Button::Right,
        Button::Middle => rdev::Button::Middle,
    }
}

const NAMED: &[(NamedKey, rdev::Key)] = &[
    (NamedKey::Alt, rdev::Key::Alt),
    (NamedKey::AltGr, rdev::Key::AltGr),
    (NamedKey::Backspace, rdev::Key::Backspace),
    (NamedKey::CapsLock, rdev::Key::CapsLock),
    (NamedKey::Cmd, rdev::Key::MetaLeft),
    (NamedKey::CmdR, rdev::Key::MetaRight),
    (NamedKey::Ctrl, rdev::Key::ControlLeft),
    (NamedKey::CtrlR, rdev::Key::ControlRight),
    (NamedKey::Delete, rdev::Key::Delete),
    (NamedKey::Down, rdev::Key::DownArrow),
    (NamedKey::End, rdev::Key::End),
    (NamedKey::Enter, rdev::Key::Return),
    (NamedKey::Esc, rdev::Key::Escape),
    (NamedKey::F1, rdev::Key::F1),
    (NamedKey::F2, rdev::Key::F2),
    (NamedKey::F3, rdev::Key::F3),
    (NamedKey::F4, rdev::Key::F4),
    (NamedKey::F5, rdev::Key::F5),
    (NamedKey::F6, rdev::Key::F6),
    (NamedKey::F7, rdev::Key::F7),
    (NamedKey::F8, rdev::Key::F8),
    (NamedKey::F9, rdev::Key::F9),
    (NamedKey::F10, rdev::Key::F10),
    (NamedKey::F11, rdev::Key::F11),
    (NamedKey::F12, rdev::Key::F12),
    (NamedKey::Home, rdev::Key::Home),
    (NamedKey::Insert, rdev::Key::Insert),
    (NamedKey::Left, rdev::Key::LeftArrow),
    (NamedKey::NumLock, rdev::Key::NumLock),
    (NamedKey::PageDown, rdev::Key::PageDown),
    (NamedKey::PageUp, rdev::Key::PageUp),
    (NamedKey::Pause, rdev::Key::Pause),
    (NamedKey::PrintScreen, rdev::Key::PrintScreen),
    (NamedKey::Right, rdev::Key::RightArrow),
    (NamedKey::ScrollLock, rdev::Key::ScrollLock),
    (NamedKey::Shift, rdev::Key::ShiftLeft),
    (NamedKey::ShiftR, rdev::Key::ShiftRight),
    (NamedKey::Space, rdev::Key::Space),
    (NamedKey::Tab, rdev::Key::Tab),
    (NamedKey::Up, rdev::Key::UpArrow),
    // Aliases, only used for playback
    (NamedKey::AltL, rdev::Key::Alt),
    (NamedKey::AltR, rdev::Key::AltGr),
    (NamedKey::CmdL, rdev::Key::MetaLeft),
    (NamedKey::CtrlL, rdev::Key::ControlLeft),
    (NamedKey::ShiftL, rdev::Key::ShiftLeft),
];

/// Unshifted characters on a US layout
const CHARS: &[(char, rdev::Key)] = &[
    ('a', rdev::Key::KeyA), ('b', rdev::Key::KeyB), ('c', rdev::Key::KeyC),
    ('d', rdev::Key::KeyD), ('e', rdev::Key::KeyE), ('f', rdev::Key::KeyF),
    ('g', rdev::Key::KeyG), ('h', rdev::Key::KeyH), ('i', rdev::Key::KeyI),
    ('j', rdev::Key::KeyJ), ('k', rdev::Key::KeyK), ('l', rdev::Key::KeyL),
    ('m', rdev::Key::KeyM), ('n', rdev::Key::KeyN), ('o', rdev::Key::KeyO),
    ('p', rdev::Key::KeyP), ('q', rdev::Key::KeyQ), ('r', rdev::Key::KeyR),
    ('s', rdev::Key::KeyS), ('t', rdev::Key::KeyT), ('u', rdev::Key::KeyU),
    ('v', rdev::Key::KeyV), ('w', rdev::Key::KeyW), ('x', rdev::Key::KeyX),
    ('y', rdev::Key::KeyY), ('z', rdev::Key::KeyZ),
    ('0', rdev::Key::Num0), ('1', rdev::Key::Num1), ('2', rdev::Key::Num2),
    ('3', rdev::Key::Num3), ('4', rdev::Key::Num4), ('5', rdev::Key::Num5),
    ('6', rdev::Key::Num6), ('7', rdev::Key::Num7), ('8', rdev::Key::Num8),
    ('9', rdev::Key::Num9),
    ('`', rdev::Key::BackQuote), ('-', rdev::Key::Minus), ('=', rdev::Key::Equal),
    ('[', rdev::Key::LeftBracket), (']', rdev::Key::RightBracket),
    (';', rdev::Key::SemiColon), ('\'', rdev::Key::Quote), ('\\', rdev::Key::BackSlash),
    (',', rdev::Key::Comma), ('.', rdev::Key::Dot), ('/', rdev::Key::Slash),
];

fn from_rdev_key(key: rdev::Key, typed: Option<&str>) -> Key {
    if let Some((named, _)) = NAMED.iter().find(|(_, k)| *k == key) {
        return Key::Named(*named);
    }
    // Prefer what the layout actually produced
    if let Some(c) = typed.and_then(single_printable) {
        return Key::Char(c);
    }
    match CHARS.iter().find(|(_, k)| *k == key) {
        Some((c, _)) => Key::Char(*c),
        None => Key::parse(&format!("{:?}", key)),
    }
}

/// Keys currently down, as they were reported on press
///
/// Releases carry no typed text, so a release reuses its press's key to keep
/// `'A'` down paired with `'A'` up.
#[derive(Default)]
struct HeldKeys(Vec<(rdev::Key, Key)>);

impl HeldKeys {
    fn press(&mut self, raw: rdev::Key, typed: Option<&str>) -> Key {
        let key = from_rdev_key(raw, typed);
        match self.0.iter_mut().find(|(k, _)| *k == raw) {
            // Auto-repeat keeps the first reading
            Some((_, held)) => held.clone(),
            None => {
                self.0.push((raw, key.clone()));
                key
            }
        }
    }

    fn release(&mut self, raw: rdev::Key) -> Key {
        match self.0.iter().position(|(k, _)| *k == raw) {
            Some(pos) => self.0.remove(pos).1,
            None => from_rdev_key(raw, None),
        }
    }
}

fn to_rdev_key(key: &Key) -> Option<rdev::Key> {
    match key {
        Key::Named(named) => NAMED.iter().find(|(n, _)| n == named).map(|(_, k)| *k),
        Key::Char(c) => {
            let lower = c.to_ascii_lowercase();
            CHARS.iter().find(|(ch, _)| *ch == lower).map(|(_, k)| *k)
        }
        Key::Other(_) => None,
    }
}

fn single_printable(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => Some(c),
        _ => None,
    }
}
