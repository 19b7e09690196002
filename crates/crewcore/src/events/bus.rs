use super::{ExecutionEvent, Topic};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Best-effort, in-order-per-subscriber fan-out of execution events, keyed
/// by topic. No persistence or replay: an observer that subscribes after an
/// event was published never receives it.
pub struct NotificationBus {
    topics: RwLock<HashMap<Topic, Vec<mpsc::UnboundedSender<ExecutionEvent>>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Register an observer for a topic. Dropping the returned subscription
    /// unsubscribes; the dead sender is pruned on the next publish.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.write().expect("bus lock poisoned");
        topics.entry(topic).or_default().push(tx);
        tracing::debug!("subscriber added on {}", topic);
        Subscription { topic, rx }
    }

    /// Deliver an event to every current subscriber of the topic. A closed
    /// receiver is unsubscribed without affecting delivery to the rest, and
    /// nothing propagates back to the publisher.
    pub fn publish(&self, topic: Topic, event: ExecutionEvent) {
        let mut topics = self.topics.write().expect("bus lock poisoned");
        let Some(subscribers) = topics.get_mut(&topic) else {
            return;
        };

        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            topics.remove(&topic);
        }
    }

    /// Number of live subscribers on a topic (diagnostics).
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .read()
            .expect("bus lock poisoned")
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a topic subscription.
pub struct Subscription {
    topic: Topic,
    rx: mpsc::UnboundedReceiver<ExecutionEvent>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Await the next event; `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll for a pending event.
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        self.rx.try_recv().ok()
    }
}
