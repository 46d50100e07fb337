//! Broker Bridge
//!
//! Contract with the external publish/subscribe transport that connects the
//! gateway to backend services.
//!
//! ```text
//!  dispatcher ──publish/request──▶ Broker ◀──subscribe── bridge ──▶ hub
//! ```
//!
//! Backed by Redis pub/sub in production (feature `redis-broker`) and by
//! [`LocalBroker`] in tests and single-node deployments.

pub mod bridge;
pub mod ipc;
pub mod local;
#[cfg(feature = "redis-broker")]
pub mod redis;
pub mod topics;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub use bridge::spawn_bridge;
pub use local::LocalBroker;

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Request got no reply within its bound.
    #[error("request timed out")]
    Timeout,
    /// Nobody is listening on the request topic.
    #[error("no responders on {0}")]
    NoResponders(String),
    /// Broker connection is gone.
    #[error("broker closed")]
    Closed,
    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<bincode::Error> for BrokerError {
    fn from(e: bincode::Error) -> Self {
        BrokerError::Codec(e.to_string())
    }
}

/// A message delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Concrete subject the message was published on.
    pub topic: String,
    /// Opaque payload.
    pub payload: Bytes,
}

/// External publish/subscribe transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Reply-correlated request, bounded by `timeout`.
    async fn request(&self, topic: &str, payload: Bytes, timeout: Duration) -> Result<Bytes, BrokerError>;

    /// Subscribe to a subject pattern (`*` matches one token, a trailing `>`
    /// matches one or more). Messages arrive in publish order.
    async fn subscribe(&self, pattern: &str) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError>;
}
