use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::event::{Effect, PlaybackEvent, TransitionRecord, TransitionRing};
use super::machine::PlaybackMachine;
use super::state::{PlaybackSession, SessionSnapshot};
use crate::model::{Stream, StreamRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Event for session {got} does not match current session {current}")]
    StaleSession { current: Uuid, got: Uuid },
    #[error("Session {0} is closed")]
    Closed(Uuid),
}

struct Inner {
    session: PlaybackSession,
    watchdog: Option<JoinHandle<()>>,
    history: TransitionRing,
    closed: bool,
}

/// Runs a [`PlaybackSession`] against a [`PlaybackMachine`] and carries out
/// the watchdog effects on the Tokio runtime.
///
/// Scheduling a watchdog spawns a task, so [`dispatch`](Self::dispatch) must
/// be called from within a runtime. The task holds only a weak reference to
/// the session; dropping every handle or closing the session cancels it.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    machine: Arc<PlaybackMachine>,
    inner: Arc<Mutex<Inner>>,
}

impl SessionHandle {
    pub fn new(machine: Arc<PlaybackMachine>, session: PlaybackSession, history_limit: usize) -> Self {
        Self {
            id: session.id(),
            machine,
            inner: Arc::new(Mutex::new(Inner {
                session,
                watchdog: None,
                history: TransitionRing::new(history_limit),
                closed: false,
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Feed `event` to the session identified by `session_id`.
    pub fn dispatch(&self, session_id: Uuid, event: PlaybackEvent) -> Result<Vec<Effect>, PlaybackError> {
        if session_id != self.id {
            return Err(PlaybackError::StaleSession {
                current: self.id,
                got: session_id,
            });
        }
        let mut guard = lock(&self.inner);
        if guard.closed {
            return Err(PlaybackError::Closed(self.id));
        }
        Ok(apply(&self.machine, &self.inner, &mut guard, event))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.inner).session.snapshot()
    }

    /// Newest transition first.
    pub fn history(&self) -> Vec<TransitionRecord> {
        lock(&self.inner).history.list()
    }

    /// Look up a stream of this session's inventory.
    pub fn find_stream(&self, r: &StreamRef) -> Option<Stream> {
        lock(&self.inner).session.inventory().find(r).cloned()
    }

    pub fn watchdog_pending(&self) -> bool {
        lock(&self.inner)
            .watchdog
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    /// Cancel pending work and reject further events.
    pub fn close(&self) {
        let mut guard = lock(&self.inner);
        if let Some(handle) = guard.watchdog.take() {
            handle.abort();
        }
        guard.closed = true;
        debug!(session = %self.id, "Playback session closed");
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn apply(
    machine: &Arc<PlaybackMachine>,
    shared: &Arc<Mutex<Inner>>,
    inner: &mut Inner,
    event: PlaybackEvent,
) -> Vec<Effect> {
    let from = inner.session.phase();
    let kind = event.kind();
    let effects = machine.step(&mut inner.session, event);
    let to = inner.session.phase();

    for effect in &effects {
        match effect {
            Effect::ScheduleWatchdog {
                generation,
                after_ms,
            } => {
                if let Some(previous) = inner.watchdog.take() {
                    previous.abort();
                }
                inner.watchdog = Some(spawn_watchdog(
                    Arc::clone(machine),
                    Arc::downgrade(shared),
                    inner.session.id(),
                    *generation,
                    Duration::from_millis(*after_ms),
                ));
            }
            Effect::CancelWatchdog => {
                if let Some(handle) = inner.watchdog.take() {
                    handle.abort();
                }
            }
            _ => {}
        }
    }

    if from != to || !effects.is_empty() {
        inner.history.push(TransitionRecord::new(
            inner.session.id(),
            kind,
            from,
            to,
            effects.clone(),
        ));
    }
    effects
}

fn spawn_watchdog(
    machine: Arc<PlaybackMachine>,
    shared: Weak<Mutex<Inner>>,
    session_id: Uuid,
    generation: u64,
    after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let Some(strong) = shared.upgrade() else {
            return;
        };
        let mut guard = lock(&strong);
        if guard.closed || guard.session.id() != session_id {
            return;
        }
        debug!(session = %session_id, generation, "Watchdog fired");
        guard.watchdog = None;
        apply(&machine, &strong, &mut guard, PlaybackEvent::WatchdogFired { generation });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{EmbedDomain, EmbedDomainManager};
    use crate::fallback::StreamInventory;
    use crate::model::{Match, SourceRef, Teams};
    use crate::playback::{FailureReason, PlaybackPhase};

    fn handle(domain_count: usize, watchdog_ms: u64) -> (SessionHandle, Match) {
        let domains = (1..=domain_count)
            .map(|i| EmbedDomain::parse(&format!("d{i}.example")).unwrap())
            .collect();
        let manager = Arc::new(EmbedDomainManager::new(domains, Duration::from_secs(300)).unwrap());
        let machine = Arc::new(PlaybackMachine::new(manager, Duration::from_millis(watchdog_ms)));
        let m = Match {
            id: "m1".into(),
            title: "Arsenal vs Chelsea".into(),
            category: "football".into(),
            date: 0,
            date_defaulted: false,
            teams: Teams::pair("Arsenal", "Chelsea"),
            sources: vec![SourceRef::new("alpha", "1"), SourceRef::new("bravo", "2")],
            poster: None,
            popular: false,
            viewer_count: None,
        };
        let session = PlaybackSession::first_available(&m, StreamInventory::from_match(&m)).unwrap();
        (SessionHandle::new(machine, session, 10), m)
    }

    fn fail(h: &SessionHandle) -> Vec<Effect> {
        let attempt = h.snapshot().attempt;
        h.dispatch(h.id(), PlaybackEvent::LoadFailed { attempt, reason: None })
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_forces_error_when_stream_never_arrives() {
        let (h, _) = handle(1, 5000);
        h.dispatch(h.id(), PlaybackEvent::Start { now: chrono::Utc::now() })
            .unwrap();
        fail(&h);
        assert!(h.watchdog_pending());
        assert_eq!(h.snapshot().phase, PlaybackPhase::WaitingForFallback);

        tokio::time::sleep(Duration::from_millis(5001)).await;
        tokio::task::yield_now().await;

        let snap = h.snapshot();
        assert_eq!(snap.phase, PlaybackPhase::Error);
        assert_eq!(snap.failure, Some(FailureReason::WatchdogTimeout));
        assert_eq!(h.history()[0].event, "watchdog_fired");
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_cancels_watchdog() {
        let (h, m) = handle(1, 5000);
        h.dispatch(h.id(), PlaybackEvent::Start { now: chrono::Utc::now() })
            .unwrap();
        fail(&h);

        let stream = crate::model::Stream::fallback_for(&m.sources[1]);
        let effects = h
            .dispatch(h.id(), PlaybackEvent::StreamArrived { stream })
            .unwrap();
        assert_eq!(effects[0], Effect::CancelWatchdog);
        assert!(!h.watchdog_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.snapshot().phase, PlaybackPhase::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cancels_pending_watchdog() {
        let (h, _) = handle(1, 5000);
        h.dispatch(h.id(), PlaybackEvent::Start { now: chrono::Utc::now() })
            .unwrap();
        fail(&h);
        h.dispatch(h.id(), PlaybackEvent::Retry { now: chrono::Utc::now() })
            .unwrap();
        assert!(!h.watchdog_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.snapshot().phase, PlaybackPhase::Loading);
    }

    #[tokio::test]
    async fn stale_session_and_closed_session_are_rejected() {
        let (h, _) = handle(2, 5000);
        let other = Uuid::new_v4();
        assert_eq!(
            h.dispatch(other, PlaybackEvent::Loaded { attempt: 1 }),
            Err(PlaybackError::StaleSession {
                current: h.id(),
                got: other
            })
        );

        h.close();
        assert!(h.is_closed());
        assert_eq!(
            h.dispatch(h.id(), PlaybackEvent::Loaded { attempt: 1 }),
            Err(PlaybackError::Closed(h.id()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_watchdog() {
        let (h, _) = handle(1, 5000);
        h.dispatch(h.id(), PlaybackEvent::Start { now: chrono::Utc::now() })
            .unwrap();
        fail(&h);
        h.close();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.snapshot().phase, PlaybackPhase::WaitingForFallback);
    }

    #[tokio::test]
    async fn history_records_transitions() {
        let (h, _) = handle(2, 5000);
        h.dispatch(h.id(), PlaybackEvent::Start { now: chrono::Utc::now() })
            .unwrap();
        let attempt = h.snapshot().attempt;
        h.dispatch(h.id(), PlaybackEvent::Loaded { attempt }).unwrap();
        // Stale duplicate does not add a record.
        h.dispatch(h.id(), PlaybackEvent::Loaded { attempt: 0 }).unwrap();

        let history = h.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event, "loaded");
        assert_eq!(history[0].to, PlaybackPhase::Playing);
        assert_eq!(history[1].from, PlaybackPhase::Idle);
    }
}
