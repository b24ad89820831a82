//! In-process event fan-out
//!
//! Best-effort delivery to any number of subscribers. An event emitted while
//! no subscriber is connected is dropped; slow subscribers lag and lose
//! events rather than applying backpressure to the pipeline.

use crate::events::DashboardEvent;
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out channel between the proxy pipeline and dashboard clients.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<DashboardEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Broadcast an event. Dropped silently when nobody is listening.
    pub fn broadcast(&self, event: DashboardEvent) {
        if self.tx.send(event).is_err() {
            trace!("Dashboard event dropped: no subscribers connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_silent() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.broadcast(DashboardEvent::response_received("r1", 200, None, None));
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let broadcaster = EventBroadcaster::new();
        let mut rx_a = broadcaster.subscribe();
        let mut rx_b = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.broadcast(DashboardEvent::chaos_injected("r2", "delay", "request", None));

        let event_a = rx_a.recv().await.unwrap();
        let event_b = rx_b.recv().await.unwrap();
        assert_eq!(event_a.request_id(), "r2");
        assert_eq!(event_b.request_id(), "r2");
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 50) {
            broadcaster.broadcast(DashboardEvent::response_received(
                format!("r{i}"),
                200,
                None,
                None,
            ));
        }

        // The oldest events were discarded for the lagging receiver.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
