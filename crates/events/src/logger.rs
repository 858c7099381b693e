//! Structured log sink for conversion events.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes one log line per event. It stops when cancelled or when the bus
//! is dropped.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::ConversionEvent;

pub struct EventLogger;

impl EventLogger {
    /// Run until `cancel` fires or the channel closes. Returns the number
    /// of events logged.
    pub async fn run(
        mut receiver: broadcast::Receiver<ConversionEvent>,
        cancel: CancellationToken,
    ) -> u64 {
        let mut logged = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event logger stopping");
                    break;
                }
                received = receiver.recv() => match received {
                    Ok(event) => {
                        tracing::info!(
                            event_type = %event.event_type,
                            conversion_id = %event.conversion_id,
                            owner_id = ?event.owner_id,
                            payload = %event.payload,
                            "Conversion event",
                        );
                        logged += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, event logger shutting down");
                        break;
                    }
                },
            }
        }
        logged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn stops_when_bus_is_dropped() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ConversionEvent::new("conversion.completed", uuid::Uuid::nil()));
        bus.publish(ConversionEvent::new("conversion.failed", uuid::Uuid::nil()));
        drop(bus);

        let logged = EventLogger::run(rx, CancellationToken::new()).await;
        assert_eq!(logged, 2);
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(EventLogger::run(bus.subscribe(), cancel.clone()));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
