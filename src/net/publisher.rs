//! Fan-out of decoded events to any number of subscribers.
//!
//! Publishing never blocks. A subscriber that falls behind loses the oldest
//! events (and is told how many); dropping a [`Subscription`] unsubscribes
//! without affecting anyone else.

use crate::event::HeartRateEvent;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<HeartRateEvent>,
}

impl EventPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push one event to every current subscriber. Returns how many received
    /// it; events published with nobody listening are dropped.
    pub fn publish(&self, event: HeartRateEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of an [`EventPublisher`].
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<HeartRateEvent>,
}

impl Subscription {
    /// Next event, or `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<HeartRateEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let publisher = EventPublisher::new(8);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        assert_eq!(publisher.publish(HeartRateEvent::open(None, "hello")), 2);

        assert_eq!(a.recv().await.map(|e| e.kind()), Some("open"));
        assert_eq!(b.recv().await.map(|e| e.kind()), Some("open"));
    }

    #[tokio::test]
    async fn test_dropped_subscription_does_not_affect_others() {
        let publisher = EventPublisher::new(8);
        let a = publisher.subscribe();
        let mut b = publisher.subscribe();
        drop(a);
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(HeartRateEvent::close(None, "bye"));
        assert_eq!(b.recv().await.map(|e| e.kind()), Some("close"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let publisher = EventPublisher::new(2);
        let mut sub = publisher.subscribe();
        for i in 0..5 {
            publisher.publish(HeartRateEvent::open(None, format!("{i}")));
        }
        match sub.recv().await {
            Some(HeartRateEvent::Open(notice)) => assert_eq!(notice.message, "3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_publisher_ends_subscription() {
        let publisher = EventPublisher::new(2);
        let mut sub = publisher.subscribe();
        assert_eq!(publisher.publish(HeartRateEvent::open(None, "x")), 1);
        drop(publisher);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new(4);
        assert_eq!(publisher.publish(HeartRateEvent::open(None, "x")), 0);
    }
}
