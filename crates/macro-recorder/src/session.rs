//! Session manager - the surface the surrounding application talks to
//!
//! Holds the single capture slot, the playback pool, and the trigger table.
//! A capture and any number of playbacks can be active at the same time.

use crate::capture::Recorder;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::events::EventSequence;
use crate::input::{InputSink, InputSource};
use crate::playback::{PlaybackReport, PlaybackRequest, Player};
use crate::pool::{PlaybackEvent, PlaybackId, PlaybackOrigin, PlaybackPool, Receiver};
use crate::trigger::TriggerCoordinator;
use std::sync::Arc;
use tracing::info;

pub struct SessionManager {
    recorder: Recorder,
    pool: Arc<PlaybackPool>,
    triggers: Arc<TriggerCoordinator>,
}

impl SessionManager {
    pub fn new(
        source: Arc<dyn InputSource>,
        sink: Arc<dyn InputSink>,
        config: SessionConfig,
    ) -> Self {
        let pool = Arc::new(PlaybackPool::new(Player::with_config(sink, config.replay)));
        Self {
            recorder: Recorder::with_config(source, config.recorder),
            triggers: Arc::new(TriggerCoordinator::new(pool.clone())),
            pool,
        }
    }

    // === Capture ===

    pub fn begin_capture(&self) -> Result<()> {
        self.recorder.start()
    }

    pub fn end_capture(&self) -> Result<EventSequence> {
        self.recorder.stop()
    }

    pub fn is_capturing(&self) -> bool {
        self.recorder.is_capturing()
    }

    /// Events captured so far by the active session
    pub fn captured(&self) -> Option<usize> {
        self.recorder.recorded()
    }

    // === Playback ===

    /// Start playback in the background. Bad speeds fail here, before anything runs.
    pub fn play(&self, sequence: EventSequence, speed: f64) -> Result<PlaybackId> {
        self.pool
            .launch(PlaybackRequest::new(sequence, speed), PlaybackOrigin::Direct)
    }

    /// Start playback and wait for it
    pub fn play_blocking(&self, sequence: EventSequence, speed: f64) -> Result<PlaybackReport> {
        let id = self.play(sequence, speed)?;
        // Reaped direct runs keep their outcome for `wait`
        self.pool
            .wait(id)
            .unwrap_or_else(|| Ok(PlaybackReport::default()))
    }

    pub fn cancel(&self, id: PlaybackId) -> bool {
        self.pool.cancel(id)
    }

    pub fn cancel_all(&self) {
        self.pool.cancel_all()
    }

    pub fn wait(&self, id: PlaybackId) -> Option<Result<PlaybackReport>> {
        self.pool.wait(id)
    }

    pub fn active_playbacks(&self) -> usize {
        self.pool.active()
    }

    /// Completion notifications for every run started from now on
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.pool.subscribe()
    }

    // === Triggers ===

    pub fn bind_trigger(
        &self,
        id: impl Into<String>,
        sequence: EventSequence,
        speed: f64,
    ) -> Result<()> {
        self.triggers.bind(id, sequence, speed).map(|_| ())
    }

    pub fn unbind_trigger(&self, id: &str) {
        self.triggers.unbind(id);
    }

    pub fn unbind_all(&self) {
        self.triggers.unbind_all();
    }

    pub fn fire_trigger(&self, id: &str) -> Result<Option<PlaybackId>> {
        self.triggers.fire(id)
    }

    pub fn triggers(&self) -> &Arc<TriggerCoordinator> {
        &self.triggers
    }

    /// Unbind every trigger, stop capturing, cancel every playback and wait
    /// for them to unwind
    pub fn shutdown(&self) {
        let unbound = self.triggers.unbind_all();
        if let Ok(discarded) = self.recorder.stop() {
            info!(events = discarded.len(), "discarded capture on shutdown");
        }
        let runs = self.pool.shutdown();
        info!(playbacks = runs.len(), triggers = unbound, "session shut down");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.pool.cancel_all();
    }
}
