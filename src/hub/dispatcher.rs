//! Protocol Dispatcher
//!
//! Executes one decoded client frame at a time for a connection. The reader
//! task awaits each dispatch before decoding the next frame, which keeps a
//! connection's frames in arrival order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use crate::broker::ipc::{self, InitRealmInfo, RegisterRealmRequest, RegisterRealmResponse};
use crate::broker::topics::{forward_topic, INIT_REALM_INFO, REGISTER_REALM};
use crate::broker::{Broker, BrokerError};
use crate::hub::realm::{Realm, LOBBY_PATH};
use crate::hub::registry::HubHandle;
use crate::network::auth::{AuthError, TokenVerifier};
use crate::network::protocol::{decode_payload, JoinPath, MessageType, ProtocolError, RawFrame, TokenSocketLogin};
use crate::network::session::{Identity, Session};

/// Default bound on a realm resolution round trip.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Dispatch errors. Each is reported to the client as an error frame.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Frame or control payload could not be understood.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Token rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Broker call failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// Backend did not resolve the realm in time.
    #[error("realm resolution timed out")]
    RealmResolutionTimeout,
    /// Operation needs a verified identity.
    #[error("not authenticated")]
    NotIdentified,
    /// Registry task has stopped.
    #[error("hub unavailable")]
    HubUnavailable,
}

/// Routes client frames to the hub and the broker.
#[derive(Clone)]
pub struct Dispatcher {
    hub: HubHandle,
    broker: Arc<dyn Broker>,
    verifier: Arc<TokenVerifier>,
    resolve_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(hub: HubHandle, broker: Arc<dyn Broker>, verifier: Arc<TokenVerifier>) -> Self {
        Self {
            hub,
            broker,
            verifier,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Set the realm resolution bound.
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// The hub this dispatcher feeds.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Handle one frame.
    pub async fn dispatch(&self, session: &Arc<Session>, frame: RawFrame) -> Result<(), DispatchError> {
        let kind = frame.message_type()?;
        debug!(conn_id = %session.conn_id(), ?kind, len = frame.payload.len(), "dispatch");

        match kind {
            MessageType::TokenSocketLogin => {
                let login: TokenSocketLogin = decode_payload(&frame.payload)?;
                self.authenticate(session, &login.token).await
            }
            MessageType::JoinPath => {
                let join: JoinPath = decode_payload(&frame.payload)?;
                self.join_path(session, &join.path).await
            }
            MessageType::UnjoinRealm => {
                self.hub.leave_realm(session);
                Ok(())
            }
            other => match other.forward_kind() {
                Some(event) => self.forward(session, event, frame.payload).await,
                // Outbound-only tags.
                None => Err(ProtocolError::UnknownTag(frame.tag).into()),
            },
        }
    }

    /// Verify a token and make its identity the session's.
    ///
    /// A session already in a realm gets a fresh initialization push.
    pub async fn authenticate(&self, session: &Arc<Session>, token: &str) -> Result<(), DispatchError> {
        let claims = self.verifier.verify(token)?;
        let identity = Identity::from(claims);
        info!(
            conn_id = %session.conn_id(),
            user_id = %identity.user_id,
            authenticated = identity.authenticated,
            "session identified"
        );

        self.hub
            .identify(Arc::clone(session), identity)
            .await
            .map_err(|_| DispatchError::HubUnavailable)?;

        let realm = self.hub.realm_of(session);
        if !realm.is_null() {
            self.publish_init(session, realm).await?;
        }
        Ok(())
    }

    /// Join the realm behind `path`.
    ///
    /// The lobby is joined directly. Any other path is resolved by the
    /// backend, and only the realm it returns is joined; on failure the
    /// session stays where it was.
    pub async fn join_path(&self, session: &Arc<Session>, path: &str) -> Result<(), DispatchError> {
        if !session.is_identified() {
            return Err(DispatchError::NotIdentified);
        }

        let realm = if path == LOBBY_PATH {
            Realm::lobby()
        } else {
            self.resolve_realm(session, path).await?
        };

        if realm.is_null() {
            debug!(conn_id = %session.conn_id(), path, "backend resolved no realm");
        } else {
            self.hub.join_realm(&realm, session);
        }
        self.publish_init(session, realm).await
    }

    async fn resolve_realm(&self, session: &Session, path: &str) -> Result<Realm, DispatchError> {
        let request = ipc::encode(&RegisterRealmRequest {
            realm: path.to_string(),
            user_id: session.user_id(),
        })?;

        let reply = self
            .broker
            .request(REGISTER_REALM, request, self.resolve_timeout)
            .await
            .map_err(|e| match e {
                BrokerError::Timeout => DispatchError::RealmResolutionTimeout,
                other => DispatchError::Broker(other),
            })?;

        let response: RegisterRealmResponse = ipc::decode(&reply)?;
        Ok(response.realm)
    }

    async fn publish_init(&self, session: &Session, realm: Realm) -> Result<(), DispatchError> {
        let payload = ipc::encode(&InitRealmInfo {
            realm,
            user_id: session.user_id(),
        })?;
        self.broker.publish(INIT_REALM_INFO, payload).await?;
        Ok(())
    }

    /// Pass an application payload to the backend untouched.
    async fn forward(&self, session: &Session, event: &str, payload: Bytes) -> Result<(), DispatchError> {
        let identity = session.identity();
        if identity.user_id.is_anonymous() {
            return Err(DispatchError::NotIdentified);
        }
        let topic = forward_topic(event, &identity, session.conn_id());
        self.broker.publish(&topic, payload).await?;
        Ok(())
    }
}
