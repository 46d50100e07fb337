//! Redis Broker
//!
//! [`Broker`] over Redis pub/sub. Subject patterns are translated to Redis
//! globs and then filtered exactly, since a glob `*` also spans dots.
//!
//! Requests are published wrapped in a [`RequestEnvelope`] naming a reply
//! channel under this gateway's inbox (`_INBOX.<gateway-id>.<request-id>`).
//! The responder publishes its raw reply there.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broker::topics::subject_matches;
use crate::broker::{ipc, Broker, BrokerError, BrokerMessage};

/// Per-subscription buffer.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Wire wrapper for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Channel the reply must be published on.
    pub reply_to: String,
    /// Request body.
    pub payload: Vec<u8>,
}

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Bytes>>>>;

/// Redis-backed broker.
pub struct RedisBroker {
    client: ::redis::Client,
    conn: ConnectionManager,
    inbox: String,
    pending: PendingReplies,
}

fn transport(e: ::redis::RedisError) -> BrokerError {
    BrokerError::Transport(e.to_string())
}

/// Redis glob covering a subject pattern.
fn to_glob(pattern: &str) -> String {
    pattern
        .split('.')
        .map(|token| match token {
            "*" | ">" => "*",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

impl RedisBroker {
    /// Connect and start listening on this gateway's reply inbox.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = ::redis::Client::open(url).map_err(transport)?;
        let conn = client.get_connection_manager().await.map_err(transport)?;

        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));

        let mut pubsub = client.get_async_pubsub().await.map_err(transport)?;
        pubsub.psubscribe(format!("{inbox}.*")).await.map_err(transport)?;

        let replies = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let channel = msg.get_channel_name();
                match replies.lock().remove(channel) {
                    Some(tx) => {
                        let _ = tx.send(Bytes::copy_from_slice(msg.get_payload_bytes()));
                    }
                    None => debug!(channel, "late or unknown reply"),
                }
            }
            warn!("reply inbox closed");
        });

        info!(inbox = %inbox, "connected to redis");
        Ok(Self {
            client,
            conn,
            inbox,
            pending,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(topic, &payload[..]).await.map_err(transport)?;
        Ok(())
    }

    async fn request(&self, topic: &str, payload: Bytes, timeout: Duration) -> Result<Bytes, BrokerError> {
        let reply_to = format!("{}.{}", self.inbox, uuid::Uuid::new_v4().simple());
        let envelope = ipc::encode(&RequestEnvelope {
            reply_to: reply_to.clone(),
            payload: payload.to_vec(),
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(reply_to.clone(), tx);

        let mut conn = self.conn.clone();
        let receivers: Result<i64, _> = conn.publish(topic, &envelope[..]).await;
        match receivers {
            Ok(0) => {
                self.pending.lock().remove(&reply_to);
                return Err(BrokerError::NoResponders(topic.to_string()));
            }
            Ok(_) => {}
            Err(e) => {
                self.pending.lock().remove(&reply_to);
                return Err(transport(e));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => {
                self.pending.lock().remove(&reply_to);
                Err(BrokerError::Timeout)
            }
        }
    }

    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(transport)?;
        pubsub.psubscribe(to_glob(pattern)).await.map_err(transport)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let topic = msg.get_channel_name();
                if !subject_matches(&pattern, topic) {
                    continue;
                }
                let delivered = tx
                    .send(BrokerMessage {
                        topic: topic.to_string(),
                        payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
                    })
                    .await;
                if delivered.is_err() {
                    break;
                }
            }
            debug!(pattern = %pattern, "redis subscription ended");
        });
        Ok(rx)
    }
}
