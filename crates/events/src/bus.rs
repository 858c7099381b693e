//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` and doubles as the
//! [`ConversionNotifier`] handed to the conversion service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sheetflow_core::error::CoreError;
use sheetflow_core::status::ConversionStatus;
use sheetflow_core::store::{ConversionNotice, ConversionNotifier};
use sheetflow_core::types::{ConversionId, DbId};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// ConversionEvent
// ---------------------------------------------------------------------------

/// Event name published when a conversion completes.
pub const CONVERSION_COMPLETED: &str = "conversion.completed";
/// Event name published when a conversion fails.
pub const CONVERSION_FAILED: &str = "conversion.failed";

/// Something that happened to a conversion.
///
/// Built with [`ConversionEvent::new`] and the builder methods
/// [`with_owner`](ConversionEvent::with_owner) and
/// [`with_payload`](ConversionEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionEvent {
    /// Dot-separated event name, e.g. `"conversion.completed"`.
    pub event_type: String,

    pub conversion_id: ConversionId,

    /// User who owns the conversion, if known.
    pub owner_id: Option<DbId>,

    /// Event-specific JSON data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl ConversionEvent {
    pub fn new(event_type: impl Into<String>, conversion_id: ConversionId) -> Self {
        Self {
            event_type: event_type.into(),
            conversion_id,
            owner_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_owner(mut self, user_id: DbId) -> Self {
        self.owner_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Event for a terminal transition.
    pub fn from_notice(notice: &ConversionNotice) -> Self {
        let event_type = match notice.status {
            ConversionStatus::Failed => CONVERSION_FAILED,
            _ => CONVERSION_COMPLETED,
        };
        Self::new(event_type, notice.conversion_id)
            .with_owner(notice.owner_id)
            .with_payload(serde_json::json!({
                "status": notice.status,
                "error_message": notice.error_message,
            }))
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use sheetflow_events::bus::{ConversionEvent, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(ConversionEvent::new("conversion.completed", uuid::Uuid::nil()));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<ConversionEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: ConversionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConversionNotifier for EventBus {
    fn notify(&self, notice: ConversionNotice) -> Result<(), CoreError> {
        self.publish(ConversionEvent::from_notice(&notice));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = uuid::Uuid::new_v4();

        bus.publish(
            ConversionEvent::new("conversion.completed", id)
                .with_owner(7)
                .with_payload(serde_json::json!({"key": "value"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "conversion.completed");
        assert_eq!(received.conversion_id, id);
        assert_eq!(received.owner_id, Some(7));
        assert_eq!(received.payload["key"], "value");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ConversionEvent::new("conversion.failed", uuid::Uuid::nil()));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.event_type, "conversion.failed");
        assert_eq!(e2.event_type, "conversion.failed");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(ConversionEvent::new("orphan", uuid::Uuid::nil()));
    }

    #[tokio::test]
    async fn notify_maps_terminal_status_to_event_type() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = uuid::Uuid::new_v4();

        bus.notify(ConversionNotice {
            conversion_id: id,
            owner_id: 3,
            status: ConversionStatus::Failed,
            error_message: Some("Unreadable scan".into()),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, CONVERSION_FAILED);
        assert_eq!(event.owner_id, Some(3));
        assert_eq!(event.payload["status"], "failed");
        assert_eq!(event.payload["error_message"], "Unreadable scan");
    }
}
