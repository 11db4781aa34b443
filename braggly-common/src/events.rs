//! Event types for the COD import polling engine
//!
//! Every COD session owns an [`EventBus`]; the SSE endpoint subscribes to it
//! and forwards events to the browser.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::CodRecord;

/// COD polling events
///
/// `generation` identifies the query a given event belongs to. It increases
/// every time the session's query is replaced, so consumers can drop events
/// from a superseded query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CodEvent {
    /// A new query replaced the previous one; all collections were cleared
    QueryStarted {
        session_id: Uuid,
        generation: u64,
        query: String,
        formula: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Status poller received a progress value
    ProgressUpdated { generation: u64, progress: u8 },

    /// Status poller saw `completed && alreadyQueried`
    QueryCompleted { generation: u64 },

    /// Status poller gave up after a failure
    QueryFailed { generation: u64, message: String },

    /// New identifiers were unioned into the identifier set
    IdsDiscovered {
        generation: u64,
        new_ids: Vec<String>,
        total: usize,
    },

    /// Identifier polling reached its terminal state
    IdPollingComplete { generation: u64 },

    /// Detail fetch loop started or finished a pass
    FetchActivity { generation: u64, active: bool },

    /// A structural record was stored
    RecordFetched { generation: u64, record: CodRecord },

    /// Backend refused access to a record (403)
    RecordRejected { generation: u64, cod_id: String },

    /// Session torn down; no further events for this generation
    SessionClosed { session_id: Uuid, generation: u64 },
}

impl CodEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            CodEvent::QueryStarted { .. } => "QueryStarted",
            CodEvent::ProgressUpdated { .. } => "ProgressUpdated",
            CodEvent::QueryCompleted { .. } => "QueryCompleted",
            CodEvent::QueryFailed { .. } => "QueryFailed",
            CodEvent::IdsDiscovered { .. } => "IdsDiscovered",
            CodEvent::IdPollingComplete { .. } => "IdPollingComplete",
            CodEvent::FetchActivity { .. } => "FetchActivity",
            CodEvent::RecordFetched { .. } => "RecordFetched",
            CodEvent::RecordRejected { .. } => "RecordRejected",
            CodEvent::SessionClosed { .. } => "SessionClosed",
        }
    }

    /// Query generation the event belongs to
    pub fn generation(&self) -> u64 {
        match self {
            CodEvent::QueryStarted { generation, .. }
            | CodEvent::ProgressUpdated { generation, .. }
            | CodEvent::QueryCompleted { generation }
            | CodEvent::QueryFailed { generation, .. }
            | CodEvent::IdsDiscovered { generation, .. }
            | CodEvent::IdPollingComplete { generation }
            | CodEvent::FetchActivity { generation, .. }
            | CodEvent::RecordFetched { generation, .. }
            | CodEvent::RecordRejected { generation, .. }
            | CodEvent::SessionClosed { generation, .. } => *generation,
        }
    }
}

/// Broadcast channel for [`CodEvent`]s
///
/// Events emitted with no subscriber are dropped; late subscribers only
/// see events emitted after they subscribed.
///
/// # Examples
///
/// ```
/// use braggly_common::events::{CodEvent, EventBus};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(CodEvent::QueryCompleted { generation: 1 });
/// assert_eq!(rx.try_recv().unwrap().generation(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CodEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CodEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CodEvent) -> Result<usize, broadcast::error::SendError<CodEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: CodEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let sent = bus.emit(CodEvent::ProgressUpdated {
            generation: 3,
            progress: 40,
        });
        assert_eq!(sent.unwrap(), 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                CodEvent::ProgressUpdated { generation, progress } => {
                    assert_eq!(generation, 3);
                    assert_eq!(progress, 40);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(8);
        assert!(bus.emit(CodEvent::QueryCompleted { generation: 1 }).is_err());
        bus.emit_lossy(CodEvent::QueryCompleted { generation: 1 });
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 8);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CodEvent::RecordRejected {
            generation: 2,
            cod_id: "9999".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RecordRejected");
        assert_eq!(json["cod_id"], "9999");
        assert_eq!(event.event_type(), "RecordRejected");
    }
}
