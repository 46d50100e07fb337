//! Connection Sessions
//!
//! One [`Session`] per live WebSocket connection: who is on the other end,
//! and the bounded queue the writer task drains. Realm membership is not
//! stored here; the realm table owns it under its own lock.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::auth::TokenClaims;
use crate::network::protocol::error_frame;

/// Opaque connection identifier, fixed at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnId(String);

impl ConnId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend user identifier. Empty means "not identified yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// The unidentified sentinel.
    pub const fn anonymous() -> Self {
        Self(String::new())
    }

    /// Wrap a backend identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether this is the unidentified sentinel.
    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a session belongs to, as established by its last verified token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Logged-in user rather than an anonymous visitor.
    pub authenticated: bool,
    /// Display name.
    pub username: String,
    /// Backend user id; the sentinel until a token is verified.
    pub user_id: UserId,
}

impl Identity {
    /// Broker topic segment for the authentication state.
    pub fn auth_state(&self) -> &'static str {
        if self.authenticated {
            "auth"
        } else {
            "anon"
        }
    }
}

impl From<TokenClaims> for Identity {
    fn from(claims: TokenClaims) -> Self {
        Self {
            authenticated: claims.authenticated,
            username: claims.username,
            user_id: UserId::new(claims.user_id),
        }
    }
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue at capacity: the reader on the other end is stalled.
    Full,
    /// Queue already closed.
    Closed,
}

/// A live client connection.
pub struct Session {
    conn_id: ConnId,
    connected_at: DateTime<Utc>,
    identity: RwLock<Identity>,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue.
    pub fn new(queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        Self::with_conn_id(ConnId::generate(), queue_capacity)
    }

    /// Create a session with a known connection id.
    pub fn with_conn_id(conn_id: ConnId, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let session = Arc::new(Self {
            conn_id,
            connected_at: Utc::now(),
            identity: RwLock::new(Identity::default()),
            outbound: Mutex::new(Some(tx)),
        });
        (session, rx)
    }

    /// Connection identifier.
    pub fn conn_id(&self) -> &ConnId {
        &self.conn_id
    }

    /// When the session was created.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Snapshot of the current identity.
    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// Current user id (the sentinel if unidentified).
    pub fn user_id(&self) -> UserId {
        self.identity.read().user_id.clone()
    }

    /// Whether a verified token has been presented.
    pub fn is_identified(&self) -> bool {
        !self.identity.read().user_id.is_anonymous()
    }

    /// Swap in a new identity, returning the previous one.
    ///
    /// Only the registry calls this, alongside its user index update.
    pub(crate) fn replace_identity(&self, identity: Identity) -> Identity {
        std::mem::replace(&mut *self.identity.write(), identity)
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<(), QueueError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(QueueError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Queue an error envelope. Dropped if the queue is full.
    pub fn send_error(&self, message: impl Into<String>) {
        if let Err(e) = self.try_send(error_frame(message)) {
            debug!(conn_id = %self.conn_id, ?e, "dropping error frame");
        }
    }

    /// Close the outbound queue. The writer drains what is queued, then stops.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.outbound.lock().take().is_some()
    }

    /// Whether the outbound queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("identity", &*self.identity.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_fifo_then_close() {
        let (session, mut rx) = Session::new(4);
        session.try_send(Bytes::from_static(b"one")).unwrap();
        session.try_send(Bytes::from_static(b"two")).unwrap();

        assert!(session.close());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_reports_full() {
        let (session, _rx) = Session::new(1);
        session.try_send(Bytes::from_static(b"a")).unwrap();
        assert_eq!(session.try_send(Bytes::from_static(b"b")), Err(QueueError::Full));
    }

    #[tokio::test]
    async fn test_close_only_once() {
        let (session, _rx) = Session::new(1);
        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
        assert_eq!(session.try_send(Bytes::new()), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_identity_starts_anonymous() {
        let (session, _rx) = Session::new(1);
        assert!(!session.is_identified());
        assert_eq!(session.identity().auth_state(), "anon");

        let previous = session.replace_identity(Identity {
            authenticated: true,
            username: "cesar".into(),
            user_id: UserId::new("u1"),
        });
        assert!(previous.user_id.is_anonymous());
        assert!(session.is_identified());
        assert_eq!(session.identity().auth_state(), "auth");
    }

    #[test]
    fn test_conn_ids_unique() {
        assert_ne!(ConnId::generate(), ConnId::generate());
    }
}
