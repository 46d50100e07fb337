//! Backend Payloads
//!
//! Binary messages exchanged with the backend over the broker. Encoded with
//! bincode.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::broker::BrokerError;
use crate::hub::realm::Realm;
use crate::network::session::{ConnId, UserId};

/// Ask the backend which realm a client path maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRealmRequest {
    /// Path as sent by the client.
    pub realm: String,
    /// Requesting user.
    pub user_id: UserId,
}

/// Backend answer to [`RegisterRealmRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRealmResponse {
    /// Realm to join; null when the user may not join anything.
    pub realm: Realm,
}

/// Ask the backend to push realm-initialization data to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRealmInfo {
    /// Realm the user is in.
    pub realm: Realm,
    /// User to push to.
    pub user_id: UserId,
}

/// A connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveTab {
    /// Realm the connection was in when it closed.
    pub realm: Realm,
    /// Owner of the connection.
    pub user_id: UserId,
    /// The connection.
    pub conn_id: ConnId,
}

/// A user's last connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveSite {
    /// The user.
    pub user_id: UserId,
}

/// Serialize a payload.
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, BrokerError> {
    Ok(Bytes::from(bincode::serialize(msg)?))
}

/// Deserialize a payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BrokerError> {
    Ok(bincode::deserialize(bytes)?)
}
