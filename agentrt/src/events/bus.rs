//! Central pub/sub bus for scheduler events.
//!
//! Built on a `tokio::sync::broadcast` channel: components emit, consumers
//! (the metrics collector, the event logger, an embedding application)
//! subscribe independently.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::SchedulerEvent;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Fire-and-forget: dropped silently if there are no subscribers.
    pub fn emit(&self, event: SchedulerEvent) {
        debug!(event_type = event.event_type(), subject = event.subject(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_count_tracks_subscriptions() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn emit_delivers_to_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        bus.emit(SchedulerEvent::LeaseIssued { lease_id: "l1".to_string(), task_id: "t1".to_string() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "LeaseIssued");
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(10);
        bus.emit(SchedulerEvent::LeaseReleased { lease_id: "l1".to_string() });
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.emit(SchedulerEvent::InstanceJoined { instance_id: "i1".to_string() });
        assert_eq!(rx1.recv().await.unwrap().event_type(), "InstanceJoined");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "InstanceJoined");
    }
}
