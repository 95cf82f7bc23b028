//! Macro playback
//!
//! [`Player`] turns an [`EventSequence`] back into input actions on an
//! [`InputSink`], keeping the recorded spacing scaled by a speed multiplier.
//! Pacing is measured against a single start instant, so a late wake-up is
//! absorbed by the next wait instead of accumulating.

use crate::config::ReplayConfig;
use crate::error::{check_speed, DispatchError, Result};
use crate::events::{EventKind, EventSequence, Key};
use crate::input::InputSink;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

/// A sequence plus the speed to play it at
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub sequence: EventSequence,
    /// 1.0 = real-time, 2.0 = twice as fast
    pub speed: f64,
}

impl PlaybackRequest {
    pub fn new(sequence: EventSequence, speed: f64) -> Self {
        Self { sequence, speed }
    }

    pub fn validate(&self) -> Result<()> {
        check_speed(self.speed)
    }
}

/// Cooperative cancellation for a running playback
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep for `timeout` unless cancelled first. Returns true if cancelled.
    ///
    /// A timeout past the end of the clock waits for cancellation only.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .cond
                        .wait_until(&mut cancelled, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.cond.wait(&mut cancelled),
            }
        }
        *cancelled
    }
}

/// One event that could not be synthesized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEvent {
    /// Position in the sequence
    pub index: usize,
    pub error: DispatchError,
}

/// Outcome of a playback run
#[derive(Debug, Clone, Default)]
pub struct PlaybackReport {
    pub dispatched: usize,
    pub moves: usize,
    pub buttons: usize,
    pub scrolls: usize,
    pub keys: usize,
    pub skipped: Vec<SkippedEvent>,
    /// Stopped before the last event
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl PlaybackReport {
    fn record(&mut self, kind: &EventKind) {
        self.dispatched += 1;
        match kind {
            EventKind::PointerMove { .. } => self.moves += 1,
            EventKind::PointerButton { .. } => self.buttons += 1,
            EventKind::PointerScroll { .. } => self.scrolls += 1,
            EventKind::KeyDown { .. } | EventKind::KeyUp { .. } => self.keys += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && !self.cancelled
    }
}

/// Replays sequences onto a sink
#[derive(Clone)]
pub struct Player {
    sink: Arc<dyn InputSink>,
    config: ReplayConfig,
}

impl Player {
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self::with_config(sink, ReplayConfig::default())
    }

    pub fn with_config(sink: Arc<dyn InputSink>, config: ReplayConfig) -> Self {
        Self { sink, config }
    }

    /// Play to completion on the calling thread
    pub fn play(&self, sequence: &EventSequence, speed: f64) -> Result<PlaybackReport> {
        self.play_until(sequence, speed, &CancelToken::new())
    }

    /// Play until done or until `cancel` fires
    pub fn play_until(
        &self,
        sequence: &EventSequence,
        speed: f64,
        cancel: &CancelToken,
    ) -> Result<PlaybackReport> {
        check_speed(speed)?;
        let mut report = PlaybackReport::default();
        if sequence.is_empty() {
            return Ok(report);
        }

        if !self.config.start_delay.is_zero() && cancel.sleep(self.config.start_delay) {
            report.cancelled = true;
            return Ok(report);
        }

        info!(events = sequence.len(), speed, "playback started");
        let start = Instant::now();

        for (index, event) in sequence.iter().enumerate() {
            let target = scaled(event.timestamp, speed);
            let elapsed = start.elapsed();
            let cancelled = if target > elapsed {
                cancel.sleep(target - elapsed)
            } else {
                cancel.is_cancelled()
            };
            if cancelled {
                report.cancelled = true;
                break;
            }

            match self.dispatch(&event.kind) {
                Ok(()) => {
                    trace!(index, kind = ?event.kind, "dispatched");
                    report.record(&event.kind);
                }
                Err(error) => {
                    warn!(index, %error, "skipping event");
                    report.skipped.push(SkippedEvent { index, error });
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            dispatched = report.dispatched,
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            secs = report.elapsed.as_secs_f64(),
            "playback finished"
        );
        Ok(report)
    }

    fn dispatch(&self, kind: &EventKind) -> std::result::Result<(), DispatchError> {
        match kind {
            EventKind::PointerMove { x, y } => self.sink.move_to(*x, *y),
            EventKind::PointerButton {
                button, pressed, ..
            } => self.sink.button(*button, *pressed),
            EventKind::PointerScroll { dx, dy, .. } => self.sink.scroll(*dx, *dy),
            EventKind::KeyDown { key } => self.key(key, true),
            EventKind::KeyUp { key } => self.key(key, false),
        }
    }

    fn key(&self, key: &Key, pressed: bool) -> std::result::Result<(), DispatchError> {
        match key {
            Key::Other(name) => Err(DispatchError::UnresolvableKey(name.to_string())),
            _ => self.sink.key(key, pressed),
        }
    }
}

/// Offset from playback start at which an event is due
///
/// Saturates at `Duration::MAX` for a very small speed.
fn scaled(timestamp: f64, speed: f64) -> Duration {
    let secs = timestamp / speed;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::events::{Button, Event, NamedKey};
    use crate::testing::{Action, RecordingSink};

    fn player(sink: &Arc<RecordingSink>) -> Player {
        Player::new(sink.clone())
    }

    #[test]
    fn empty_sequence_is_noop() {
        let sink = Arc::new(RecordingSink::new());
        let report = player(&sink).play(&EventSequence::empty(), 1.0).unwrap();
        assert_eq!(report.dispatched, 0);
        assert!(sink.actions().is_empty());
    }

    #[test]
    fn invalid_speed_dispatches_nothing() {
        let sink = Arc::new(RecordingSink::new());
        let seq = EventSequence::new(vec![Event::new(0.0, EventKind::PointerMove { x: 1, y: 1 })]);
        for speed in [0.0, -2.0, f64::NAN] {
            assert!(matches!(
                player(&sink).play(&seq, speed),
                Err(Error::InvalidSpeed(_))
            ));
        }
        assert!(sink.actions().is_empty());
    }

    #[test]
    fn dispatches_in_sequence_order() {
        let sink = Arc::new(RecordingSink::new());
        let seq = EventSequence::new(vec![
            Event::new(0.0, EventKind::KeyDown { key: Key::Char('a') }),
            Event::new(0.0, EventKind::PointerMove { x: 5, y: 6 }),
            Event::new(
                0.001,
                EventKind::PointerButton {
                    x: 5,
                    y: 6,
                    button: Button::Middle,
                    pressed: true,
                },
            ),
            Event::new(0.001, EventKind::PointerScroll { x: 5, y: 6, dx: 1, dy: -1 }),
            Event::new(0.002, EventKind::KeyUp { key: Key::Char('a') }),
        ]);
        let report = player(&sink).play(&seq, 1.0).unwrap();
        assert!(report.is_clean());
        assert_eq!(
            sink.actions(),
            vec![
                Action::Key { key: Key::Char('a'), pressed: true },
                Action::Move { x: 5, y: 6 },
                Action::Button { button: Button::Middle, pressed: true },
                Action::Scroll { dx: 1, dy: -1 },
                Action::Key { key: Key::Char('a'), pressed: false },
            ]
        );
        assert_eq!((report.keys, report.moves, report.buttons, report.scrolls), (2, 1, 1, 1));
    }

    #[test]
    fn unresolvable_key_is_skipped() {
        let sink = Arc::new(RecordingSink::new());
        let seq = EventSequence::new(vec![
            Event::new(0.0, EventKind::KeyDown { key: Key::parse("mystery") }),
            Event::new(0.0, EventKind::KeyDown { key: Key::Named(NamedKey::Enter) }),
        ]);
        let report = player(&sink).play(&seq, 1.0).unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(
            report.skipped,
            vec![SkippedEvent {
                index: 0,
                error: DispatchError::UnresolvableKey("mystery".into())
            }]
        );
        assert_eq!(sink.actions().len(), 1);
    }

    #[test]
    fn dispatch_failure_does_not_abort() {
        let sink = Arc::new(RecordingSink::failing_when(|a| {
            matches!(a, Action::Move { x: 2, .. }).then(|| DispatchError::Failed("busy".into()))
        }));
        let seq: EventSequence = (1..=3)
            .map(|x| Event::new(0.0, EventKind::PointerMove { x, y: 0 }))
            .collect();
        let report = player(&sink).play(&seq, 1.0).unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(
            sink.actions(),
            vec![Action::Move { x: 1, y: 0 }, Action::Move { x: 3, y: 0 }]
        );
    }

    #[test]
    fn paces_relative_to_start() {
        let sink = Arc::new(RecordingSink::new());
        let seq = EventSequence::new(vec![
            Event::new(0.0, EventKind::KeyDown { key: Key::Char('a') }),
            Event::new(0.05, EventKind::KeyUp { key: Key::Char('a') }),
            Event::new(0.10, EventKind::PointerMove { x: 10, y: 10 }),
        ]);
        let started = Instant::now();
        player(&sink).play(&seq, 1.0).unwrap();
        let offsets: Vec<Duration> = sink
            .dispatched()
            .iter()
            .map(|d| d.at.duration_since(started))
            .collect();
        assert!(offsets[0] < Duration::from_millis(30), "{:?}", offsets);
        assert!(offsets[1] >= Duration::from_millis(50), "{:?}", offsets);
        assert!(offsets[2] >= Duration::from_millis(100), "{:?}", offsets);
        assert!(offsets[2] < Duration::from_millis(400), "{:?}", offsets);
    }

    #[test]
    fn cancel_stops_mid_sequence() {
        let sink = Arc::new(RecordingSink::new());
        let seq = EventSequence::new(vec![
            Event::new(0.0, EventKind::PointerMove { x: 1, y: 1 }),
            Event::new(5.0, EventKind::PointerMove { x: 2, y: 2 }),
        ]);
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        let started = Instant::now();
        let report = player(&sink).play_until(&seq, 1.0, &cancel).unwrap();
        t.join().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.dispatched, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn start_delay_is_cancellable() {
        let sink = Arc::new(RecordingSink::new());
        let p = Player::with_config(
            sink.clone(),
            ReplayConfig {
                start_delay: Duration::from_secs(10),
            },
        );
        let seq = EventSequence::new(vec![Event::new(0.0, EventKind::PointerMove { x: 1, y: 1 })]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = p.play_until(&seq, 1.0, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(sink.actions().is_empty());
    }

    #[test]
    fn cancel_token_sleep_times_out() {
        let token = CancelToken::new();
        let started = Instant::now();
        assert!(!token.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        token.cancel();
        assert!(token.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn scaled_offsets() {
        assert_eq!(scaled(1.0, 2.0), Duration::from_millis(500));
        assert_eq!(scaled(1.0, 0.5), Duration::from_secs(2));
        assert_eq!(scaled(-1.0, 1.0), Duration::ZERO);
        assert_eq!(scaled(0.0, 1e-20), Duration::ZERO);
        assert_eq!(scaled(1.0, 1e-20), Duration::MAX);
    }

    #[test]
    fn tiny_speed_waits_instead_of_rushing() {
        let sink = Arc::new(RecordingSink::new());
        let seq = EventSequence::new(vec![
            Event::new(0.0, EventKind::PointerMove { x: 1, y: 1 }),
            Event::new(1.0, EventKind::PointerMove { x: 2, y: 2 }),
        ]);
        for speed in [1e-20, 1.0 / 1.5e19] {
            let cancel = CancelToken::new();
            let canceller = cancel.clone();
            let t = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                canceller.cancel();
            });
            let started = Instant::now();
            let report = player(&sink).play_until(&seq, speed, &cancel).unwrap();
            t.join().unwrap();
            assert!(report.cancelled);
            assert_eq!(report.dispatched, 1);
            assert!(started.elapsed() >= Duration::from_millis(50));
        }
        assert_eq!(sink.actions().len(), 2);
    }

    #[test]
    fn unbounded_sleep_ends_on_cancel() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        assert!(token.sleep(Duration::MAX));
        t.join().unwrap();
    }
}
