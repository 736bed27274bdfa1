//! SessionEventBus - per-session realtime fan-out
//!
//! Publishing never blocks on a slow subscriber: each subscriber owns a
//! bounded buffer and a laggard has its oldest queued events dropped, with a
//! `dropped` marker surfaced in-stream before delivery resumes. Subscribing
//! to a session that does not exist yet is valid; the subscriber simply
//! receives whatever is published later.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::RwLock;

use mandi_core::stage::StageUpdate;
use mandi_core::types::{RunId, SessionId};

use crate::StoreError;

/// Default per-subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 64;

/// Realtime event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A stage changed status.
    StageUpdate(StageUpdate),

    /// The active run was cancelled before finishing.
    RunCancelled {
        session_id: SessionId,
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },

    /// A connector needs an out-of-band code to continue an order.
    OtpRequired {
        session_id: SessionId,
        run_id: RunId,
        /// Transient token correlating the user's reply with the wait.
        token: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// The purchase executor needs a fresh user confirmation.
    ConfirmationRequired {
        session_id: SessionId,
        run_id: RunId,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// Marker that this subscriber lagged and lost `count` older events.
    Dropped { count: u64 },
}

impl Event {
    pub fn stage_update(update: StageUpdate) -> Self {
        Event::StageUpdate(update)
    }

    pub fn run_cancelled(session_id: impl Into<SessionId>, run_id: impl Into<RunId>) -> Self {
        Event::RunCancelled {
            session_id: session_id.into(),
            run_id: run_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn otp_required(
        session_id: impl Into<SessionId>,
        run_id: impl Into<RunId>,
        token: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Event::OtpRequired {
            session_id: session_id.into(),
            run_id: run_id.into(),
            token: token.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn confirmation_required(
        session_id: impl Into<SessionId>,
        run_id: impl Into<RunId>,
        detail: impl Into<String>,
    ) -> Self {
        Event::ConfirmationRequired {
            session_id: session_id.into(),
            run_id: run_id.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One subscriber's view of a session stream.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Next event, or None once the session channel is gone.
    ///
    /// A lagged subscriber observes `Event::Dropped { count }` in place of
    /// the events it lost, then resumes with newer ones.
    pub async fn recv(&mut self) -> Option<Event> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Event::Dropped { count })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking poll used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Event::Dropped { count })
            }
            Err(_) => None,
        }
    }
}

/// Per-session multi-subscriber pub/sub.
pub struct SessionEventBus {
    channels: RwLock<HashMap<SessionId, broadcast::Sender<Event>>>,
    capacity: usize,
}

impl SessionEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn sender(&self, session_id: &str) -> broadcast::Sender<Event> {
        if let Some(tx) = self.channels.read().await.get(session_id) {
            return tx.clone();
        }
        let mut guard = self.channels.write().await;
        guard
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish an event to all current subscribers of a session.
    ///
    /// Never blocks on a slow subscriber; "no receivers" is a non-error.
    pub async fn publish(&self, session_id: &str, event: Event) -> Result<(), StoreError> {
        let tx = self.sender(session_id).await;
        match tx.send(event) {
            Ok(_) | Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Subscribe to a session's future events. The session does not need to
    /// exist yet.
    pub async fn subscribe(&self, session_id: &str) -> Subscription {
        let tx = self.sender(session_id).await;
        Subscription { rx: tx.subscribe() }
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop a session's channel; called when the session is evicted.
    pub async fn remove_session(&self, session_id: &str) {
        self.channels.write().await.remove(session_id);
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandi_core::types::{StageId, StageStatus};

    fn update(stage: StageId, status: StageStatus) -> StageUpdate {
        StageUpdate::new("s1", "r1", stage, status)
    }

    #[test]
    fn test_subscriber_receives_events_in_publish_order() {
        tokio_test::block_on(async {
            let bus = SessionEventBus::default();
            let mut sub = bus.subscribe("s1").await;

            bus.publish(
                "s1",
                Event::stage_update(update(StageId::Search, StageStatus::Processing)),
            )
            .await
            .unwrap();
            bus.publish(
                "s1",
                Event::stage_update(update(StageId::Search, StageStatus::Complete)),
            )
            .await
            .unwrap();

            match sub.recv().await.unwrap() {
                Event::StageUpdate(u) => assert_eq!(u.status, StageStatus::Processing),
                other => panic!("unexpected event: {:?}", other),
            }
            match sub.recv().await.unwrap() {
                Event::StageUpdate(u) => assert_eq!(u.status, StageStatus::Complete),
                other => panic!("unexpected event: {:?}", other),
            }
        });
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        tokio_test::block_on(async {
            let bus = SessionEventBus::default();
            bus.publish("ghost", Event::run_cancelled("ghost", "r1"))
                .await
                .unwrap();
        });
    }

    #[test]
    fn test_subscribe_before_session_exists() {
        tokio_test::block_on(async {
            let bus = SessionEventBus::default();
            let mut sub = bus.subscribe("later").await;
            bus.publish("later", Event::run_cancelled("later", "r1"))
                .await
                .unwrap();
            assert!(matches!(
                sub.recv().await,
                Some(Event::RunCancelled { .. })
            ));
        });
    }

    #[test]
    fn test_sessions_are_isolated() {
        tokio_test::block_on(async {
            let bus = SessionEventBus::default();
            let mut sub_a = bus.subscribe("a").await;
            bus.publish("b", Event::run_cancelled("b", "r1"))
                .await
                .unwrap();
            assert!(sub_a.try_recv().is_none());
        });
    }

    #[test]
    fn test_slow_subscriber_gets_dropped_marker_then_newer_events() {
        tokio_test::block_on(async {
            let bus = SessionEventBus::new(4);
            let mut slow = bus.subscribe("s1").await;

            for _ in 0..10 {
                bus.publish(
                    "s1",
                    Event::stage_update(update(StageId::Search, StageStatus::Processing)),
                )
                .await
                .unwrap();
            }
            bus.publish(
                "s1",
                Event::stage_update(update(StageId::Search, StageStatus::Complete)),
            )
            .await
            .unwrap();

            match slow.recv().await.unwrap() {
                Event::Dropped { count } => assert!(count > 0),
                other => panic!("expected dropped marker, got {:?}", other),
            }

            // Later events still arrive after the marker.
            let mut saw_complete = false;
            while let Some(event) = slow.try_recv() {
                if let Event::StageUpdate(u) = event {
                    if u.status == StageStatus::Complete {
                        saw_complete = true;
                    }
                }
            }
            assert!(saw_complete);
        });
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::otp_required("s1", "r1", "tok-1", "enter the code");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "otp_required");
        assert_eq!(value["token"], "tok-1");

        let update = Event::stage_update(StageUpdate::new(
            "s1",
            "r1",
            StageId::Purchase,
            StageStatus::Complete,
        ));
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "stage_update");
        assert_eq!(value["stage_id"], "purchase");
    }
}
