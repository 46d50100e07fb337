//! In-Process Broker
//!
//! A [`Broker`] that never leaves the process. Backend stand-ins register
//! responders for request subjects; anything can subscribe to what the
//! gateway publishes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::broker::topics::subject_matches;
use crate::broker::{Broker, BrokerError, BrokerMessage};

/// Default per-subscription buffer.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;

/// A request waiting for a reply from a responder.
#[derive(Debug)]
pub struct PendingRequest {
    /// Subject the request was sent on.
    pub topic: String,
    /// Request payload.
    pub payload: Bytes,
    reply: oneshot::Sender<Bytes>,
}

impl PendingRequest {
    /// Answer the request. Ignored if the requester already gave up.
    pub fn reply(self, payload: Bytes) {
        if self.reply.send(payload).is_err() {
            debug!(topic = %self.topic, "requester gone before reply");
        }
    }
}

struct Route<T> {
    pattern: String,
    tx: mpsc::Sender<T>,
}

/// In-process broker.
pub struct LocalBroker {
    subscribers: Mutex<Vec<Route<BrokerMessage>>>,
    responders: Mutex<Vec<Route<PendingRequest>>>,
    capacity: usize,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    /// Create a broker with the default subscription buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Create a broker with a given subscription buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            responders: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Serve requests on subjects matching `pattern`.
    pub fn respond(&self, pattern: &str) -> mpsc::Receiver<PendingRequest> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.responders.lock().push(Route {
            pattern: pattern.to_string(),
            tx,
        });
        rx
    }

    /// Live subscription count.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        let targets: Vec<mpsc::Sender<BrokerMessage>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| !s.tx.is_closed());
            subscribers
                .iter()
                .filter(|s| subject_matches(&s.pattern, topic))
                .map(|s| s.tx.clone())
                .collect()
        };
        trace!(topic, subscribers = targets.len(), "publish");

        for tx in targets {
            let msg = BrokerMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            // A subscriber dropping mid-publish is not the publisher's problem.
            let _ = tx.send(msg).await;
        }
        Ok(())
    }

    async fn request(&self, topic: &str, payload: Bytes, timeout: Duration) -> Result<Bytes, BrokerError> {
        let responder = {
            let mut responders = self.responders.lock();
            responders.retain(|r| !r.tx.is_closed());
            responders
                .iter()
                .find(|r| subject_matches(&r.pattern, topic))
                .map(|r| r.tx.clone())
        }
        .ok_or_else(|| BrokerError::NoResponders(topic.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingRequest {
            topic: topic.to_string(),
            payload,
            reply: reply_tx,
        };

        let exchange = async {
            responder
                .send(pending)
                .await
                .map_err(|_| BrokerError::NoResponders(topic.to_string()))?;
            reply_rx
                .await
                .map_err(|_| BrokerError::NoResponders(topic.to_string()))
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| BrokerError::Timeout)?
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(Route {
            pattern: pattern.to_string(),
            tx,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let broker = LocalBroker::new();
        let mut games = broker.subscribe("game.*").await.unwrap();
        let mut users = broker.subscribe("user.>").await.unwrap();

        broker.publish("game.abc", Bytes::from_static(b"move")).await.unwrap();

        let msg = games.recv().await.unwrap();
        assert_eq!(msg.topic, "game.abc");
        assert_eq!(msg.payload, Bytes::from_static(b"move"));
        assert!(users.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let broker = LocalBroker::new();
        let mut rx = broker.subscribe("lobby.>").await.unwrap();
        for i in 0..10u8 {
            broker.publish("lobby.seeks", Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(rx.recv().await.unwrap().payload[0], i);
        }
    }

    #[tokio::test]
    async fn test_request_reply() {
        let broker = std::sync::Arc::new(LocalBroker::new());
        let mut requests = broker.respond("ipc.request.*");

        tokio::spawn(async move {
            while let Some(req) = requests.recv().await {
                let mut answer = req.payload.to_vec();
                answer.reverse();
                req.reply(Bytes::from(answer));
            }
        });

        let reply = broker
            .request("ipc.request.echo", Bytes::from_static(b"abc"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"cba"));
    }

    #[tokio::test]
    async fn test_request_without_responder() {
        let broker = LocalBroker::new();
        let result = broker
            .request("ipc.request.nobody", Bytes::new(), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(BrokerError::NoResponders("ipc.request.nobody".into())));
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let broker = LocalBroker::new();
        // Held but never answered.
        let _requests = broker.respond("ipc.request.slow");
        let result = broker
            .request("ipc.request.slow", Bytes::new(), Duration::from_millis(20))
            .await;
        assert_eq!(result, Err(BrokerError::Timeout));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_pruned() {
        let broker = LocalBroker::new();
        let rx = broker.subscribe("a.>").await.unwrap();
        assert_eq!(broker.subscriber_count(), 1);
        drop(rx);
        assert_eq!(broker.subscriber_count(), 0);
    }
}
