//! In-process, topic-addressed message bus.
//!
//! Every subscriber owns an unbounded FIFO queue, so delivery is reliable and
//! ordered per publisher→topic pair. Publishing never blocks, which keeps a
//! slow consumer from stalling unrelated sessions.

use conductor_core::{ConductorError, ConductorResult, Envelope};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Receiving end of a topic subscription.
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Wait for the next envelope. Returns `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Take an already-queued envelope without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Identifier usable with [`MessageBus::unsubscribe`].
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Publish/subscribe transport keyed by topic name.
pub struct MessageBus {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl MessageBus {
    /// Create a bus with no topics.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to `topic`. Several subscribers on one topic each get a copy.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(topic = %topic, subscriber = id, "Subscribed");
        Subscription { topic, id, rx }
    }

    /// Drop a subscription by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics.write();
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Deliver `envelope` to every live subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached, or a transport error if
    /// nobody is listening.
    pub fn publish(&self, topic: &str, envelope: Envelope) -> ConductorResult<usize> {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let topics = self.topics.read();
            if let Some(subs) = topics.get(topic) {
                for sub in subs {
                    if sub.tx.send(envelope.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(sub.id);
                    }
                }
            }
        }
        for id in dead {
            self.unsubscribe(topic, id);
        }

        if delivered == 0 {
            return Err(ConductorError::Transport(format!(
                "No active subscribers for topic '{topic}'"
            )));
        }
        debug!(
            topic = %topic,
            message_type = %envelope.message_type(),
            delivered,
            "Published"
        );
        Ok(delivered)
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
