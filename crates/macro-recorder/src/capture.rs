//! Capture sessions
//!
//! A [`CaptureSession`] subscribes to an [`InputSource`], stamps every
//! notification relative to the session start and appends it to an in-memory
//! buffer. [`Recorder`] owns the single session slot.

use crate::config::RecorderConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventSequence};
use crate::input::{InputListener, InputSource, InputSubscription};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Buffer shared between the notification thread and the session owner
struct CaptureBuffer {
    start: Instant,
    config: RecorderConfig,
    state: Mutex<BufferState>,
}

struct BufferState {
    events: Vec<Event>,
    /// Last timestamp handed out, timestamps never go below it
    last: f64,
    open: bool,
}

impl CaptureBuffer {
    fn new(config: RecorderConfig) -> Self {
        Self {
            start: Instant::now(),
            config,
            state: Mutex::new(BufferState {
                events: Vec::new(),
                last: 0.0,
                open: true,
            }),
        }
    }

    fn ingest(&self, kind: EventKind, observed: Instant) {
        if !self.config.accepts(&kind) {
            return;
        }
        let mut state = self.state.lock();
        if !state.open {
            return;
        }
        // Backends may deliver notifications slightly out of order across
        // devices; clamp so the sequence stays non-decreasing.
        let t = observed
            .saturating_duration_since(self.start)
            .as_secs_f64()
            .max(state.last);
        state.last = t;
        state.events.push(Event::new(t, kind));
    }

    /// Close the buffer and hand out its events. Nothing is appended afterwards.
    fn close(&self) -> Vec<Event> {
        let mut state = self.state.lock();
        state.open = false;
        std::mem::take(&mut state.events)
    }

    fn len(&self) -> usize {
        self.state.lock().events.len()
    }
}

/// One running capture
pub struct CaptureSession {
    buffer: Arc<CaptureBuffer>,
    subscription: Option<Box<dyn InputSubscription>>,
}

impl CaptureSession {
    /// Start observing `source`. Returns as soon as the subscription is live.
    pub fn start(source: &dyn InputSource, config: RecorderConfig) -> Result<Self> {
        let buffer = Arc::new(CaptureBuffer::new(config));
        let sink = buffer.clone();
        let listener: InputListener = Arc::new(move |kind, at| sink.ingest(kind, at));
        let subscription = source.subscribe(listener)?;
        info!("capture started");
        Ok(Self {
            buffer,
            subscription: Some(subscription),
        })
    }

    /// Events recorded so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn elapsed(&self) -> Duration {
        self.buffer.start.elapsed()
    }

    /// Finish the capture and return everything that was ingested
    pub fn stop(mut self) -> EventSequence {
        let events = self.buffer.close();
        if let Some(sub) = self.subscription.take() {
            sub.cancel();
        }
        info!(
            events = events.len(),
            secs = self.elapsed().as_secs_f64(),
            "capture stopped"
        );
        EventSequence::new(events)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.buffer.close();
            sub.cancel();
            debug!("capture session dropped without stop");
        }
    }
}

/// Owns the single capture slot
pub struct Recorder {
    source: Arc<dyn InputSource>,
    config: RecorderConfig,
    active: Mutex<Option<CaptureSession>>,
}

impl Recorder {
    pub fn new(source: Arc<dyn InputSource>) -> Self {
        Self::with_config(source, RecorderConfig::default())
    }

    pub fn with_config(source: Arc<dyn InputSource>, config: RecorderConfig) -> Self {
        Self {
            source,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<()> {
        let mut slot = self.active.lock();
        if slot.is_some() {
            return Err(Error::AlreadyCapturing);
        }
        *slot = Some(CaptureSession::start(
            self.source.as_ref(),
            self.config.clone(),
        )?);
        Ok(())
    }

    pub fn stop(&self) -> Result<EventSequence> {
        let session = self.active.lock().take().ok_or(Error::NotCapturing)?;
        Ok(session.stop())
    }

    pub fn is_capturing(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Events recorded by the active session, `None` when idle
    pub fn recorded(&self) -> Option<usize> {
        self.active.lock().as_ref().map(CaptureSession::len)
    }
}
