//! Decoupled pub/sub internal to the process (spec.md §5 "Context Bus").
//! Grounded directly on `contextdb/bus.go`: per-topic bounded channels,
//! **drop-on-full** publish (a full subscriber channel silently loses the
//! message — a deliberate bias for liveness over completeness), and a
//! subscriber handle that can read blocking, non-blocking, or with a
//! timeout.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

pub type ContextData = serde_json::Value;

pub struct ContextSubscriber {
    pub id: String,
    receiver: mpsc::Receiver<ContextData>,
}

impl ContextSubscriber {
    /// `None` reads without blocking; `Some(Duration::ZERO)` behaves the
    /// same; any other `Some(d)` blocks up to `d`; `Some` with an
    /// unbounded wait is expressed by the caller passing a very large
    /// duration — there is no literal "block forever" sentinel here since
    /// Rust's channel API already separates `try_recv` from `recv`.
    pub async fn read_blocking(&mut self) -> Option<ContextData> {
        self.receiver.recv().await
    }

    pub fn read_nonblocking(&mut self) -> Option<ContextData> {
        self.receiver.try_recv().ok()
    }

    pub async fn read_timeout(&mut self, timeout: Duration) -> Option<ContextData> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }
}

struct TopicSender {
    subscriber_id: String,
    sender: mpsc::Sender<ContextData>,
}

pub struct ContextBus {
    channel_buffer_size: usize,
    topics: Mutex<HashMap<String, Vec<TopicSender>>>,
}

impl ContextBus {
    pub fn new(channel_buffer_size: usize) -> Self {
        ContextBus {
            channel_buffer_size,
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_topic(&self, topic: &str) {
        self.topics
            .lock()
            .expect("context bus mutex poisoned")
            .entry(topic.to_string())
            .or_default();
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .expect("context bus mutex poisoned")
            .contains_key(topic)
    }

    pub fn delete_topic(&self, topic: &str) {
        self.topics
            .lock()
            .expect("context bus mutex poisoned")
            .remove(topic);
    }

    pub fn is_subscribed(&self, subscriber_id: &str, topic: &str) -> bool {
        self.topics
            .lock()
            .expect("context bus mutex poisoned")
            .get(topic)
            .map(|subs| subs.iter().any(|s| s.subscriber_id == subscriber_id))
            .unwrap_or(false)
    }

    pub fn subscribe(&self, subscriber_id: &str, topic: &str) -> Option<ContextSubscriber> {
        let mut topics = self.topics.lock().expect("context bus mutex poisoned");
        let subs = topics.get_mut(topic)?;
        let (tx, rx) = mpsc::channel(self.channel_buffer_size);
        subs.push(TopicSender {
            subscriber_id: subscriber_id.to_string(),
            sender: tx,
        });
        Some(ContextSubscriber {
            id: subscriber_id.to_string(),
            receiver: rx,
        })
    }

    pub fn unsubscribe(&self, subscriber_id: &str, topic: &str) {
        if let Some(subs) = self
            .topics
            .lock()
            .expect("context bus mutex poisoned")
            .get_mut(topic)
        {
            subs.retain(|s| s.subscriber_id != subscriber_id);
        }
    }

    /// Non-blocking publish: if a subscriber's channel is full, the message
    /// is dropped for that subscriber rather than awaited.
    pub fn publish(&self, topic: &str, data: ContextData) {
        let topics = self.topics.lock().expect("context bus mutex poisoned");
        let Some(subs) = topics.get(topic) else {
            return;
        };
        for sub in subs {
            let _ = sub.sender.try_send(data.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = ContextBus::new(4);
        bus.create_topic("appd");
        let mut sub = bus.subscribe("s1", "appd").unwrap();
        bus.publish("appd", serde_json::json!({"a": 1}));
        let got = sub.read_blocking().await.unwrap();
        assert_eq!(got["a"], 1);
    }

    #[tokio::test]
    async fn publish_drops_when_channel_full() {
        let bus = ContextBus::new(1);
        bus.create_topic("appd");
        let mut sub = bus.subscribe("s1", "appd").unwrap();
        bus.publish("appd", serde_json::json!({"a": 1}));
        bus.publish("appd", serde_json::json!({"a": 2})); // dropped, channel full

        let first = sub.read_blocking().await.unwrap();
        assert_eq!(first["a"], 1);
        assert!(sub.read_nonblocking().is_none());
    }
}
