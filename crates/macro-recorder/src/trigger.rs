//! Trigger bindings
//!
//! Maps trigger identifiers (typically hotkey names) to a sequence and speed.
//! Firing looks the binding up and hands it to the [`PlaybackPool`], so the
//! thread that noticed the trigger only pays for a lookup and a thread spawn.

use crate::error::{check_speed, Result};
use crate::events::{EventKind, EventSequence};
use crate::input::InputListener;
use crate::playback::PlaybackRequest;
use crate::pool::{PlaybackId, PlaybackOrigin, PlaybackPool};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerBinding {
    pub sequence: EventSequence,
    pub speed: f64,
}

pub struct TriggerCoordinator {
    bindings: RwLock<HashMap<String, TriggerBinding>>,
    pool: Arc<PlaybackPool>,
}

impl TriggerCoordinator {
    pub fn new(pool: Arc<PlaybackPool>) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            pool,
        }
    }

    /// Bind `id`, replacing any previous binding in one step.
    /// Returns the binding that was replaced.
    pub fn bind(
        &self,
        id: impl Into<String>,
        sequence: EventSequence,
        speed: f64,
    ) -> Result<Option<TriggerBinding>> {
        check_speed(speed)?;
        let id = id.into();
        let previous = self
            .bindings
            .write()
            .insert(id.clone(), TriggerBinding { sequence, speed });
        if previous.is_some() {
            debug!(trigger = %id, "trigger rebound");
        } else {
            debug!(trigger = %id, "trigger bound");
        }
        Ok(previous)
    }

    /// Remove a binding. Unknown ids are ignored.
    pub fn unbind(&self, id: &str) -> Option<TriggerBinding> {
        let removed = self.bindings.write().remove(id);
        if removed.is_some() {
            debug!(trigger = id, "trigger unbound");
        }
        removed
    }

    /// Remove every binding, returns how many there were
    pub fn unbind_all(&self) -> usize {
        let mut bindings = self.bindings.write();
        let n = bindings.len();
        bindings.clear();
        n
    }

    pub fn binding(&self, id: &str) -> Option<TriggerBinding> {
        self.bindings.read().get(id).cloned()
    }

    pub fn is_bound(&self, id: &str) -> bool {
        self.bindings.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.bindings.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Start playback for `id` on the pool. `Ok(None)` if nothing is bound.
    pub fn fire(&self, id: &str) -> Result<Option<PlaybackId>> {
        // Clone out so the read lock isn't held across the spawn
        let Some(binding) = self.binding(id) else {
            debug!(trigger = id, "fired unbound trigger");
            return Ok(None);
        };
        let request = PlaybackRequest::new(binding.sequence, binding.speed);
        self.pool
            .launch(request, PlaybackOrigin::Trigger(id.to_string()))
            .map(Some)
    }

    /// Listener that fires the trigger named after each pressed key
    ///
    /// Meant to be subscribed to an input source; key releases and pointer
    /// input are ignored.
    pub fn hotkey_listener(coordinator: Arc<Self>) -> InputListener {
        Arc::new(move |kind, _at| {
            if let EventKind::KeyDown { key } = kind {
                let id = key.name();
                if coordinator.is_bound(&id) {
                    if let Err(e) = coordinator.fire(&id) {
                        warn!(trigger = %id, error = %e, "trigger failed to start playback");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::events::{Event, Key, NamedKey};
    use crate::playback::Player;
    use crate::testing::{Action, RecordingSink};
    use std::time::Instant;

    fn coordinator(sink: &Arc<RecordingSink>) -> (Arc<PlaybackPool>, TriggerCoordinator) {
        let pool = Arc::new(PlaybackPool::new(Player::new(sink.clone())));
        (pool.clone(), TriggerCoordinator::new(pool))
    }

    fn seq(x: i32) -> EventSequence {
        EventSequence::new(vec![Event::new(0.0, EventKind::PointerMove { x, y: 0 })])
    }

    #[test]
    fn rebind_replaces() {
        let sink = Arc::new(RecordingSink::new());
        let (pool, triggers) = coordinator(&sink);
        assert!(triggers.bind("f1", seq(1), 1.0).unwrap().is_none());
        let old = triggers.bind("f1", seq(2), 2.0).unwrap().unwrap();
        assert_eq!(old.sequence, seq(1));

        let id = triggers.fire("f1").unwrap().unwrap();
        pool.wait(id);
        assert_eq!(sink.actions(), vec![Action::Move { x: 2, y: 0 }]);
    }

    #[test]
    fn bind_rejects_bad_speed() {
        let sink = Arc::new(RecordingSink::new());
        let (_, triggers) = coordinator(&sink);
        assert!(matches!(triggers.bind("f1", seq(1), 0.0), Err(Error::InvalidSpeed(_))));
        assert!(!triggers.is_bound("f1"));
    }

    #[test]
    fn unbind_unknown_is_noop() {
        let sink = Arc::new(RecordingSink::new());
        let (_, triggers) = coordinator(&sink);
        assert!(triggers.unbind("nope").is_none());
        triggers.bind("a", seq(1), 1.0).unwrap();
        triggers.bind("b", seq(1), 1.0).unwrap();
        assert_eq!(triggers.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(triggers.unbind_all(), 2);
        assert!(triggers.ids().is_empty());
    }

    #[test]
    fn fire_unbound_does_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let (_, triggers) = coordinator(&sink);
        assert_eq!(triggers.fire("f9").unwrap(), None);
    }

    #[test]
    fn hotkey_listener_fires_without_blocking() {
        let sink = Arc::new(RecordingSink::new());
        let (pool, triggers) = coordinator(&sink);
        let long: EventSequence = (0..2)
            .map(|i| Event::new(i as f64 * 0.3, EventKind::PointerMove { x: i, y: 0 }))
            .collect();
        triggers.bind("f9", long, 1.0).unwrap();
        let listener = TriggerCoordinator::hotkey_listener(Arc::new(triggers));

        let started = Instant::now();
        listener(EventKind::KeyDown { key: Key::Named(NamedKey::F9) }, Instant::now());
        listener(EventKind::KeyUp { key: Key::Named(NamedKey::F9) }, Instant::now());
        listener(EventKind::KeyDown { key: Key::Char('q') }, Instant::now());
        assert!(started.elapsed() < std::time::Duration::from_millis(200));

        let results = pool.wait_all();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.as_ref().unwrap().dispatched, 2);
    }
}
