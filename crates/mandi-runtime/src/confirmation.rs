//! Confirmation and OTP rendezvous
//!
//! Human-in-the-loop waits are one-shot typed channels, not callbacks: the
//! waiting stage registers under its run id, the transport delivers into the
//! channel, and a deadline converts absence into an implicit answer.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{oneshot, watch};

use mandi_core::pipeline::RunOutcome;
use mandi_core::types::{ConfirmationOutcome, RunId, SessionId};

/// One-shot confirmation channels keyed by run id.
///
/// Registering a second waiter for the same run replaces the first; the
/// orphaned receiver observes a drop and treats it as rejection.
#[derive(Default)]
pub struct ConfirmationRouter {
    waiting: Mutex<HashMap<RunId, oneshot::Sender<ConfirmationOutcome>>>,
}

impl ConfirmationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a run and get the receiving end.
    pub fn register(&self, run_id: &str) -> oneshot::Receiver<ConfirmationOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiting
            .lock()
            .expect("confirmation router lock")
            .insert(run_id.to_string(), tx);
        rx
    }

    /// Deliver the user's answer. False when nothing was waiting.
    pub fn deliver(&self, run_id: &str, outcome: ConfirmationOutcome) -> bool {
        let sender = self
            .waiting
            .lock()
            .expect("confirmation router lock")
            .remove(run_id);
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Whether a run currently has a registered waiter.
    pub fn is_waiting(&self, run_id: &str) -> bool {
        self.waiting
            .lock()
            .expect("confirmation router lock")
            .contains_key(run_id)
    }

    /// Drop a waiter without answering; the stage observes rejection.
    pub fn forget(&self, run_id: &str) {
        self.waiting
            .lock()
            .expect("confirmation router lock")
            .remove(run_id);
    }
}

/// One-shot OTP code channels keyed by transient token.
#[derive(Default)]
pub struct OtpRouter {
    waiting: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl OtpRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.waiting
            .lock()
            .expect("otp router lock")
            .insert(token.to_string(), tx);
        rx
    }

    pub fn deliver(&self, token: &str, code: String) -> bool {
        let sender = self.waiting.lock().expect("otp router lock").remove(token);
        match sender {
            Some(tx) => tx.send(code).is_ok(),
            None => false,
        }
    }

    pub fn forget(&self, token: &str) {
        self.waiting.lock().expect("otp router lock").remove(token);
    }
}

/// Where a run currently is, as seen by waiting transports.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Running,
    /// Blocked on a user confirmation (gate stage or high-risk re-confirm).
    AwaitingConfirmation,
    Finished(RunOutcome),
}

/// Per-session watch over the active run's phase.
///
/// A transport that started or confirmed a run subscribes here to learn when
/// the run either finishes or parks on a confirmation.
#[derive(Default)]
pub struct RunWatch {
    runs: Mutex<HashMap<SessionId, (RunId, watch::Sender<RunPhase>)>>,
}

impl RunWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new run for a session, replacing any previous entry.
    pub fn begin(&self, session_id: &str, run_id: &str) -> watch::Receiver<RunPhase> {
        let (tx, rx) = watch::channel(RunPhase::Running);
        self.runs
            .lock()
            .expect("run watch lock")
            .insert(session_id.to_string(), (run_id.to_string(), tx));
        rx
    }

    /// Update the phase; ignored when the run is no longer current.
    pub fn set(&self, session_id: &str, run_id: &str, phase: RunPhase) {
        let guard = self.runs.lock().expect("run watch lock");
        if let Some((current, tx)) = guard.get(session_id) {
            if current == run_id {
                let _ = tx.send(phase);
            }
        }
    }

    /// Subscribe to the session's current run, if one is tracked.
    pub fn subscribe(&self, session_id: &str) -> Option<(RunId, watch::Receiver<RunPhase>)> {
        let guard = self.runs.lock().expect("run watch lock");
        guard
            .get(session_id)
            .map(|(run_id, tx)| (run_id.clone(), tx.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_round_trip() {
        tokio_test::block_on(async {
            let router = ConfirmationRouter::new();
            let rx = router.register("r1");
            assert!(router.is_waiting("r1"));

            assert!(router.deliver("r1", ConfirmationOutcome::accepted(Some(0))));
            let outcome = rx.await.unwrap();
            assert!(outcome.accepted);
            assert_eq!(outcome.selected_index, Some(0));
            assert!(!router.is_waiting("r1"));
        });
    }

    #[test]
    fn test_deliver_without_waiter_is_false() {
        let router = ConfirmationRouter::new();
        assert!(!router.deliver("ghost", ConfirmationOutcome::rejected()));
    }

    #[test]
    fn test_reregistration_replaces_waiter() {
        tokio_test::block_on(async {
            let router = ConfirmationRouter::new();
            let first = router.register("r1");
            let second = router.register("r1");

            assert!(router.deliver("r1", ConfirmationOutcome::rejected()));
            assert!(first.await.is_err());
            assert!(!second.await.unwrap().accepted);
        });
    }

    #[test]
    fn test_otp_router_round_trip() {
        tokio_test::block_on(async {
            let router = OtpRouter::new();
            let rx = router.register("tok-1");
            assert!(router.deliver("tok-1", "4242".to_string()));
            assert_eq!(rx.await.unwrap(), "4242");
        });
    }

    #[test]
    fn test_run_watch_ignores_stale_run() {
        tokio_test::block_on(async {
            let watch = RunWatch::new();
            let mut rx = watch.begin("s1", "r2");

            watch.set("s1", "r1", RunPhase::Finished(RunOutcome::Completed));
            assert_eq!(*rx.borrow(), RunPhase::Running);

            watch.set("s1", "r2", RunPhase::AwaitingConfirmation);
            rx.changed().await.unwrap();
            assert_eq!(*rx.borrow(), RunPhase::AwaitingConfirmation);
        });
    }
}
