//! Typed publish/subscribe channel for lifecycle events

use tokio::sync::broadcast;
use tracing::trace;

use super::Event;

/// Receiving half handed to each subscriber
pub type EventSubscription = broadcast::Receiver<Event>;

/// Event bus seam. Producers publish, the aggregator subscribes.
pub trait EventBus: Send + Sync {
    /// Publish an event, returning how many subscribers received it
    fn publish(&self, event: Event) -> usize;

    /// Open a new subscription
    fn subscribe(&self) -> EventSubscription;
}

/// In-process bus backed by a tokio broadcast channel
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> usize {
        let name = event.event_type.bus_name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for {}", name);
                0
            }
        }
    }

    fn subscribe(&self) -> EventSubscription {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = BroadcastEventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus.publish(Event::new(EventType::PageVisit, "s-1", Utc::now()));
        assert_eq!(delivered, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, "s-1");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = BroadcastEventBus::default();
        assert_eq!(bus.publish(Event::new(EventType::PageVisit, "s-1", Utc::now())), 0);
    }
}
