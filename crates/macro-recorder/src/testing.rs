//! In-process input devices
//!
//! [`ManualSource`] lets a test (or a script) push synthetic input into a
//! capture. [`RecordingSink`] remembers every action it is asked to perform.
//! [`DrySink`] only logs, for rehearsing a macro without touching the desktop.

use crate::error::{DispatchError, Result};
use crate::events::{Button, EventKind, Key};
use crate::input::{InputListener, InputSink, InputSource, InputSubscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Input source driven by [`ManualSource::emit`]
#[derive(Clone, Default)]
pub struct ManualSource {
    inner: Arc<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, InputListener)>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `kind` to every subscriber, observed now
    pub fn emit(&self, kind: EventKind) {
        self.emit_at(kind, Instant::now());
    }

    /// Deliver `kind` with an explicit observation instant
    pub fn emit_at(&self, kind: EventKind, at: Instant) {
        // Delivered under the lock so a cancelled subscription never sees more input
        let listeners = self.inner.listeners.lock();
        for (_, listener) in listeners.iter() {
            listener(kind.clone(), at);
        }
    }

    pub fn subscribers(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl InputSource for ManualSource {
    fn subscribe(&self, listener: InputListener) -> Result<Box<dyn InputSubscription>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, listener));
        Ok(Box::new(ManualSubscription {
            inner: self.inner.clone(),
            id,
        }))
    }
}

struct ManualSubscription {
    inner: Arc<ManualInner>,
    id: u64,
}

impl InputSubscription for ManualSubscription {
    fn cancel(self: Box<Self>) {
        self.inner.listeners.lock().retain(|(id, _)| *id != self.id);
    }
}

/// One synthesized action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move { x: i32, y: i32 },
    Button { button: Button, pressed: bool },
    Scroll { dx: i32, dy: i32 },
    Key { key: Key, pressed: bool },
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub action: Action,
    pub at: Instant,
}

type FailurePolicy = Box<dyn Fn(&Action) -> Option<DispatchError> + Send + Sync>;

/// Sink that records what it was asked to do
#[derive(Default)]
pub struct RecordingSink {
    log: Mutex<Vec<Dispatched>>,
    fail: Option<FailurePolicy>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail (and don't record) every action for which `policy` returns an error
    pub fn failing_when(
        policy: impl Fn(&Action) -> Option<DispatchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            fail: Some(Box::new(policy)),
        }
    }

    pub fn actions(&self) -> Vec<Action> {
        self.log.lock().iter().map(|d| d.action.clone()).collect()
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn push(&self, action: Action) -> std::result::Result<(), DispatchError> {
        let at = Instant::now();
        if let Some(err) = self.fail.as_ref().and_then(|policy| policy(&action)) {
            return Err(err);
        }
        self.log.lock().push(Dispatched { action, at });
        Ok(())
    }
}

impl InputSink for RecordingSink {
    fn move_to(&self, x: i32, y: i32) -> std::result::Result<(), DispatchError> {
        self.push(Action::Move { x, y })
    }

    fn button(&self, button: Button, pressed: bool) -> std::result::Result<(), DispatchError> {
        self.push(Action::Button { button, pressed })
    }

    fn scroll(&self, dx: i32, dy: i32) -> std::result::Result<(), DispatchError> {
        self.push(Action::Scroll { dx, dy })
    }

    fn key(&self, key: &Key, pressed: bool) -> std::result::Result<(), DispatchError> {
        self.push(Action::Key {
            key: key.clone(),
            pressed,
        })
    }
}

/// Sink that logs actions instead of performing them
#[derive(Debug, Default, Clone, Copy)]
pub struct DrySink;

impl InputSink for DrySink {
    fn move_to(&self, x: i32, y: i32) -> std::result::Result<(), DispatchError> {
        info!(x, y, "move");
        Ok(())
    }

    fn button(&self, button: Button, pressed: bool) -> std::result::Result<(), DispatchError> {
        info!(%button, pressed, "button");
        Ok(())
    }

    fn scroll(&self, dx: i32, dy: i32) -> std::result::Result<(), DispatchError> {
        info!(dx, dy, "scroll");
        Ok(())
    }

    fn key(&self, key: &Key, pressed: bool) -> std::result::Result<(), DispatchError> {
        info!(%key, pressed, "key");
        Ok(())
    }
}
