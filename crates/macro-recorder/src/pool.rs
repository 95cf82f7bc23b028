//! Concurrent playback runs
//!
//! Every request gets its own thread, an id, and a cancel token. Completion
//! is reported through [`PlaybackEvent`] notifications and through
//! [`PlaybackPool::wait`].

use crate::error::{Error, Result};
use crate::playback::{CancelToken, PlaybackReport, PlaybackRequest, Player};
pub use crossbeam_channel::Receiver;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// Finished runs kept for a late [`PlaybackPool::wait`]
const COMPLETED_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who asked for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOrigin {
    Direct,
    Trigger(String),
}

/// Lifecycle notifications
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started {
        id: PlaybackId,
        origin: PlaybackOrigin,
    },
    Finished {
        id: PlaybackId,
        origin: PlaybackOrigin,
        report: PlaybackReport,
    },
    Failed {
        id: PlaybackId,
        origin: PlaybackOrigin,
        reason: String,
    },
}

impl PlaybackEvent {
    pub fn id(&self) -> PlaybackId {
        match self {
            PlaybackEvent::Started { id, .. }
            | PlaybackEvent::Finished { id, .. }
            | PlaybackEvent::Failed { id, .. } => *id,
        }
    }
}

/// Fan-out of notifications to every live subscriber
#[derive(Clone, Default)]
struct Notifier {
    subscribers: Arc<Mutex<Vec<Sender<PlaybackEvent>>>>,
}

impl Notifier {
    fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn send(&self, event: PlaybackEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A spawned run
struct PlaybackHandle {
    origin: PlaybackOrigin,
    cancel: CancelToken,
    thread: thread::JoinHandle<Result<PlaybackReport>>,
}

impl PlaybackHandle {
    fn join(self, id: PlaybackId) -> Result<PlaybackReport> {
        self.thread
            .join()
            .unwrap_or(Err(Error::PlaybackPanicked(id)))
    }
}

/// Runs any number of playbacks side by side
pub struct PlaybackPool {
    player: Player,
    next_id: AtomicU64,
    running: Mutex<HashMap<PlaybackId, PlaybackHandle>>,
    /// Outcomes of reaped runs, oldest first
    completed: Mutex<VecDeque<(PlaybackId, Result<PlaybackReport>)>>,
    notifier: Notifier,
}

impl PlaybackPool {
    pub fn new(player: Player) -> Self {
        Self {
            player,
            next_id: AtomicU64::new(1),
            running: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
            notifier: Notifier::default(),
        }
    }

    /// Validate and start a run on its own thread
    ///
    /// Fails synchronously on a bad speed; nothing is spawned in that case.
    pub fn launch(&self, request: PlaybackRequest, origin: PlaybackOrigin) -> Result<PlaybackId> {
        request.validate()?;
        self.reap();

        let id = PlaybackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelToken::new();

        let player = self.player.clone();
        let notifier = self.notifier.clone();
        let token = cancel.clone();
        let run_origin = origin.clone();
        let thread = thread::Builder::new()
            .name(format!("playback-{}", id.0))
            .spawn(move || run(id, run_origin, player, request, token, notifier))
            .map_err(Error::Spawn)?;

        debug!(%id, ?origin, "playback launched");
        self.running.lock().insert(
            id,
            PlaybackHandle {
                origin,
                cancel,
                thread,
            },
        );
        Ok(id)
    }

    /// Ask a run to stop. Returns false if the id is unknown or already collected.
    pub fn cancel(&self, id: PlaybackId) -> bool {
        match self.running.lock().get(&id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for handle in self.running.lock().values() {
            handle.cancel.cancel();
        }
    }

    /// Block until a run completes and collect its report
    ///
    /// `None` if the id is unknown, already collected, or finished so long
    /// ago that its outcome was dropped.
    pub fn wait(&self, id: PlaybackId) -> Option<Result<PlaybackReport>> {
        let handle = self.running.lock().remove(&id);
        match handle {
            Some(handle) => Some(handle.join(id)),
            None => {
                let mut completed = self.completed.lock();
                let pos = completed.iter().position(|(done, _)| *done == id)?;
                completed.remove(pos).map(|(_, result)| result)
            }
        }
    }

    /// Block until every tracked run completes
    pub fn wait_all(&self) -> Vec<(PlaybackId, Result<PlaybackReport>)> {
        let handles: Vec<_> = self.running.lock().drain().collect();
        let mut results: Vec<_> = self.completed.lock().drain(..).collect();
        results.extend(
            handles
                .into_iter()
                .map(|(id, handle)| (id, handle.join(id))),
        );
        results.sort_by_key(|(id, _)| *id);
        results
    }

    /// Runs that haven't finished yet
    pub fn active(&self) -> usize {
        self.running
            .lock()
            .values()
            .filter(|h| !h.thread.is_finished())
            .count()
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.notifier.subscribe()
    }

    pub fn shutdown(&self) -> Vec<(PlaybackId, Result<PlaybackReport>)> {
        self.cancel_all();
        self.wait_all()
    }

    /// Join finished runs and keep only the newest outcomes
    ///
    /// Trigger runs are dropped outright, their outcome went out as a
    /// notification and nobody holds their id.
    fn reap(&self) {
        let finished: Vec<_> = {
            let mut running = self.running.lock();
            let ids: Vec<_> = running
                .iter()
                .filter(|(_, h)| h.thread.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| running.remove(&id).map(|h| (id, h)))
                .collect()
        };
        if finished.is_empty() {
            return;
        }

        let mut completed = self.completed.lock();
        let mut finished: Vec<_> = finished
            .into_iter()
            .filter_map(|(id, handle)| {
                let direct = handle.origin == PlaybackOrigin::Direct;
                let result = handle.join(id);
                direct.then_some((id, result))
            })
            .collect();
        finished.sort_by_key(|(id, _)| *id);
        completed.extend(finished);
        while completed.len() > COMPLETED_LIMIT {
            if let Some((id, _)) = completed.pop_front() {
                debug!(%id, "dropping unclaimed playback outcome");
            }
        }
    }
}

fn run(
    id: PlaybackId,
    origin: PlaybackOrigin,
    player: Player,
    request: PlaybackRequest,
    cancel: CancelToken,
    notifier: Notifier,
) -> Result<PlaybackReport> {
    notifier.send(PlaybackEvent::Started {
        id,
        origin: origin.clone(),
    });

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        player.play_until(&request.sequence, request.speed, &cancel)
    }));

    match outcome {
        Ok(Ok(report)) => {
            notifier.send(PlaybackEvent::Finished {
                id,
                origin,
                report: report.clone(),
            });
            Ok(report)
        }
        Ok(Err(e)) => {
            notifier.send(PlaybackEvent::Failed {
                id,
                origin,
                reason: e.to_string(),
            });
            Err(e)
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(%id, %reason, "playback panicked");
            notifier.send(PlaybackEvent::Failed { id, origin, reason });
            Err(Error::PlaybackPanicked(id))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::events::{Event, EventKind, EventSequence};
    use crate::testing::{Action, RecordingSink};
    use std::time::{Duration, Instant};

    fn pool(sink: &Arc<RecordingSink>) -> PlaybackPool {
        PlaybackPool::new(Player::new(sink.clone()))
    }

    fn moves(n: i32, gap: f64) -> EventSequence {
        (0..n)
            .map(|i| Event::new(i as f64 * gap, EventKind::PointerMove { x: i, y: i }))
            .collect()
    }

    #[test]
    fn launch_rejects_bad_speed_synchronously() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        assert!(matches!(
            p.launch(PlaybackRequest::new(moves(2, 0.0), 0.0), PlaybackOrigin::Direct),
            Err(Error::InvalidSpeed(_))
        ));
        assert_eq!(p.active(), 0);
        assert!(sink.actions().is_empty());
    }

    #[test]
    fn launch_returns_before_playback_finishes() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        let started = Instant::now();
        let id = p
            .launch(PlaybackRequest::new(moves(3, 0.1), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        let report = p.wait(id).unwrap().unwrap();
        assert_eq!(report.dispatched, 3);
        assert!(p.wait(id).is_none());
    }

    #[test]
    fn notifications_cover_lifecycle() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        let rx = p.subscribe();
        let id = p
            .launch(PlaybackRequest::new(moves(2, 0.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, PlaybackEvent::Started { id: got, .. } if got == id));
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            PlaybackEvent::Finished { id: got, report, .. } => {
                assert_eq!(got, id);
                assert_eq!(report.dispatched, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancel_all_aborts_runs() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        let a = p
            .launch(PlaybackRequest::new(moves(3, 10.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        let b = p
            .launch(PlaybackRequest::new(moves(3, 10.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        let results = p.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a, b]);
        for (_, r) in results {
            let report = r.unwrap();
            assert!(report.cancelled);
            assert_eq!(report.dispatched, 1);
        }
    }

    #[test]
    fn cancel_single_run() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        let slow = p
            .launch(PlaybackRequest::new(moves(2, 10.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        let fast = p
            .launch(PlaybackRequest::new(moves(2, 0.01), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        assert!(p.cancel(slow));
        assert!(p.wait(slow).unwrap().unwrap().cancelled);
        assert!(!p.wait(fast).unwrap().unwrap().cancelled);
        assert!(!p.cancel(slow));
    }

    #[test]
    fn panicking_sink_is_reported() {
        let sink = Arc::new(RecordingSink::failing_when(|a| -> Option<DispatchError> {
            if matches!(a, Action::Move { x: 1, .. }) {
                panic!("device vanished");
            }
            None
        }));
        let p = pool(&sink);
        let rx = p.subscribe();
        let id = p
            .launch(PlaybackRequest::new(moves(2, 0.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        assert!(matches!(p.wait(id), Some(Err(Error::PlaybackPanicked(got))) if got == id));
        let failed = rx
            .iter()
            .find(|e| matches!(e, PlaybackEvent::Failed { .. }))
            .unwrap();
        match failed {
            PlaybackEvent::Failed { reason, .. } => assert!(reason.contains("device vanished")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn unclaimed_direct_runs_are_not_retained_forever() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        let rx = p.subscribe();
        let runs = 3 * COMPLETED_LIMIT;
        let ids: Vec<_> = (0..runs)
            .map(|_| {
                p.launch(PlaybackRequest::new(moves(1, 0.0), 1.0), PlaybackOrigin::Direct)
                    .unwrap()
            })
            .collect();

        let mut finished = 0;
        while finished < runs {
            if let PlaybackEvent::Finished { .. } = rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                finished += 1;
            }
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.active() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let last = p
            .launch(PlaybackRequest::new(moves(1, 0.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        assert!(p.running.lock().len() <= 1);
        assert_eq!(p.completed.lock().len(), COMPLETED_LIMIT);

        // Oldest outcomes are gone, recent ones can still be collected
        assert!(p.wait(ids[0]).is_none());
        assert_eq!(p.wait(ids[runs - 1]).unwrap().unwrap().dispatched, 1);
        assert!(p.wait(ids[runs - 1]).is_none());
        assert_eq!(p.wait(last).unwrap().unwrap().dispatched, 1);
    }

    #[test]
    fn finished_trigger_runs_are_dropped() {
        let sink = Arc::new(RecordingSink::new());
        let p = pool(&sink);
        let fired = p
            .launch(
                PlaybackRequest::new(moves(1, 0.0), 1.0),
                PlaybackOrigin::Trigger("f1".into()),
            )
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.active() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        p.launch(PlaybackRequest::new(moves(1, 0.0), 1.0), PlaybackOrigin::Direct)
            .unwrap();
        assert!(p.wait(fired).is_none());
        assert!(p.completed.lock().is_empty());
    }
}
