//! Session Registry
//!
//! A single actor task owns the set of live sessions and the index of
//! sessions by user. Every change to either goes through [`HubCommand`], so
//! neither needs a lock. Realm membership lives in the shared
//! [`RealmTable`], which the dispatcher also mutates directly.
//!
//! Delivery is best effort: a session whose outbound queue is full is torn
//! down on the spot, exactly as if its connection had dropped.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::broker::ipc::{self, LeaveSite, LeaveTab};
use crate::broker::topics::{LEAVE_SITE, LEAVE_TAB};
use crate::broker::Broker;
use crate::game::history::GameHistory;
use crate::game::sanitizer::sanitize_history;
use crate::hub::realm::{Realm, RealmTable};
use crate::network::protocol::{encode_frame, MessageType};
use crate::network::session::{ConnId, Identity, QueueError, Session, UserId};

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The registry task has stopped.
    #[error("hub unavailable")]
    Unavailable,
    /// Broadcast aimed at a realm with no members.
    #[error("realm {0} is empty")]
    EmptyRealm(Realm),
}

/// Commands processed by the registry actor, in arrival order.
#[derive(Debug)]
pub enum HubCommand {
    /// Start tracking a session.
    Register(Arc<Session>),
    /// Tear a session down. Safe to send more than once.
    Unregister(Arc<Session>),
    /// Deliver a payload to every member of a realm.
    BroadcastToRealm {
        /// Target realm.
        realm: Realm,
        /// Encoded frame(s).
        payload: Bytes,
    },
    /// Deliver a payload to a user's sessions.
    BroadcastToUser {
        /// Target user.
        user_id: UserId,
        /// Encoded frame(s).
        payload: Bytes,
        /// Only sessions whose realm matches this channel.
        channel: Option<String>,
    },
    /// Deliver a game history to a realm, sanitized for each member.
    BroadcastHistory {
        /// Target realm.
        realm: Realm,
        /// Unsanitized snapshot.
        history: Box<GameHistory>,
    },
    /// Replace a session's identity and move it in the user index.
    Identify {
        /// The session.
        session: Arc<Session>,
        /// Identity from a verified token.
        identity: Identity,
        /// Signalled once the index reflects the new identity.
        ack: oneshot::Sender<()>,
    },
    /// Report current registry contents.
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Every registered connection.
    pub sessions: Vec<ConnId>,
    /// Connections per identified user.
    pub users: HashMap<UserId, Vec<ConnId>>,
    /// Members per non-empty realm.
    pub realms: HashMap<Realm, Vec<ConnId>>,
}

impl HubSnapshot {
    /// Connections indexed under `user_id`.
    pub fn user_connections(&self, user_id: &UserId) -> usize {
        self.users.get(user_id).map_or(0, Vec::len)
    }

    /// Members of `realm`.
    pub fn realm_members(&self, realm: &Realm) -> usize {
        self.realms.get(realm).map_or(0, Vec::len)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cheap, cloneable access to the registry.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    realms: Arc<RealmTable>,
}

impl HubHandle {
    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.sender.send(cmd).await.map_err(|_| HubError::Unavailable)
    }

    /// Start tracking a session.
    pub async fn register(&self, session: Arc<Session>) -> Result<(), HubError> {
        self.send(HubCommand::Register(session)).await
    }

    /// Tear a session down.
    pub async fn unregister(&self, session: Arc<Session>) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(session)).await
    }

    /// Deliver a payload to every member of `realm`.
    pub async fn broadcast_to_realm(&self, realm: Realm, payload: Bytes) -> Result<(), HubError> {
        self.send(HubCommand::BroadcastToRealm { realm, payload }).await
    }

    /// Deliver a payload to a user's sessions, optionally scoped to a channel.
    pub async fn broadcast_to_user(
        &self,
        user_id: UserId,
        payload: Bytes,
        channel: Option<String>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::BroadcastToUser {
            user_id,
            payload,
            channel,
        })
        .await
    }

    /// Deliver a game history to `realm`, sanitized per member.
    pub async fn broadcast_history(&self, realm: Realm, history: GameHistory) -> Result<(), HubError> {
        self.send(HubCommand::BroadcastHistory {
            realm,
            history: Box::new(history),
        })
        .await
    }

    /// Give a session a verified identity. Returns once the user index
    /// reflects it.
    pub async fn identify(&self, session: Arc<Session>, identity: Identity) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(HubCommand::Identify {
            session,
            identity,
            ack,
        })
        .await?;
        done.await.map_err(|_| HubError::Unavailable)
    }

    /// Current registry contents.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| HubError::Unavailable)
    }

    /// Move a session into `realm`.
    pub fn join_realm(&self, realm: &Realm, session: &Arc<Session>) {
        self.realms.join_realm(realm, session);
    }

    /// Take a session out of its realm.
    pub fn leave_realm(&self, session: &Session) {
        self.realms.leave_realm(session);
    }

    /// Current realm of a session.
    pub fn realm_of(&self, session: &Session) -> Realm {
        self.realms.realm_of(session.conn_id())
    }
}

/// Start the registry actor.
pub fn spawn_hub(broker: Arc<dyn Broker>, queue_capacity: usize) -> HubHandle {
    let (sender, mut receiver) = mpsc::channel(queue_capacity.max(1));
    let realms = Arc::new(RealmTable::new());

    let mut registry = Registry {
        sessions: HashMap::new(),
        users: HashMap::new(),
        realms: Arc::clone(&realms),
        broker,
    };

    tokio::spawn(async move {
        while let Some(cmd) = receiver.recv().await {
            registry.handle(cmd);
        }
        info!(sessions = registry.sessions.len(), "hub stopped");
    });

    HubHandle { sender, realms }
}

// =============================================================================
// ACTOR STATE
// =============================================================================

struct Registry {
    sessions: HashMap<ConnId, Arc<Session>>,
    users: HashMap<UserId, HashMap<ConnId, Arc<Session>>>,
    realms: Arc<RealmTable>,
    broker: Arc<dyn Broker>,
}

impl Registry {
    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(session) => self.register(session),
            HubCommand::Unregister(session) => self.remove_session(&session),
            HubCommand::BroadcastToRealm { realm, payload } => {
                let members = self.realms.members(&realm);
                if members.is_empty() {
                    debug!(error = %HubError::EmptyRealm(realm), "broadcast dropped");
                    return;
                }
                self.deliver_all(members.into_iter().map(|s| (s, payload.clone())));
            }
            HubCommand::BroadcastToUser {
                user_id,
                payload,
                channel,
            } => self.broadcast_to_user(&user_id, payload, channel.as_deref()),
            HubCommand::BroadcastHistory { realm, history } => self.broadcast_history(realm, &history),
            HubCommand::Identify {
                session,
                identity,
                ack,
            } => {
                self.identify(&session, identity);
                let _ = ack.send(());
            }
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn register(&mut self, session: Arc<Session>) {
        let conn_id = session.conn_id().clone();
        let user_id = session.user_id();
        if !user_id.is_anonymous() {
            self.users
                .entry(user_id.clone())
                .or_default()
                .insert(conn_id.clone(), Arc::clone(&session));
        }
        self.sessions.insert(conn_id.clone(), session);
        debug!(conn_id = %conn_id, user_id = %user_id, total = self.sessions.len(), "session registered");
    }

    /// Single teardown path for disconnects and evictions.
    fn remove_session(&mut self, session: &Arc<Session>) {
        let conn_id = session.conn_id();
        session.close();
        let realm = self.realms.remove(conn_id).unwrap_or_default();

        if self.sessions.remove(conn_id).is_none() {
            debug!(conn_id = %conn_id, "unregister for session not in registry");
            return;
        }

        let user_id = session.user_id();
        if user_id.is_anonymous() {
            debug!(conn_id = %conn_id, "anonymous session removed");
            return;
        }

        let mut last_connection = false;
        if let Some(conns) = self.users.get_mut(&user_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                self.users.remove(&user_id);
                last_connection = true;
            }
        }
        debug!(conn_id = %conn_id, user_id = %user_id, realm = %realm, last_connection, "session removed");

        self.announce_departure(
            LeaveTab {
                realm,
                user_id: user_id.clone(),
                conn_id: conn_id.clone(),
            },
            last_connection.then_some(LeaveSite { user_id }),
        );
    }

    /// Publish leave notices off the actor task, tab before site.
    fn announce_departure(&self, tab: LeaveTab, site: Option<LeaveSite>) {
        let tab = match ipc::encode(&tab) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode leaveTab");
                return;
            }
        };
        let site = match site.as_ref().map(ipc::encode).transpose() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode leaveSite");
                None
            }
        };

        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            if let Err(e) = broker.publish(LEAVE_TAB, tab).await {
                warn!(topic = LEAVE_TAB, error = %e, "publish failed");
            }
            if let Some(site) = site {
                if let Err(e) = broker.publish(LEAVE_SITE, site).await {
                    warn!(topic = LEAVE_SITE, error = %e, "publish failed");
                }
            }
        });
    }

    fn broadcast_to_user(&mut self, user_id: &UserId, payload: Bytes, channel: Option<&str>) {
        let Some(conns) = self.users.get(user_id) else {
            debug!(user_id = %user_id, "user has no sessions");
            return;
        };

        let targets: Vec<_> = conns
            .values()
            .filter(|s| match channel {
                Some(channel) => self.realms.realm_of(s.conn_id()).matches_channel(channel),
                None => true,
            })
            .map(|s| (Arc::clone(s), payload.clone()))
            .collect();

        if targets.is_empty() {
            debug!(user_id = %user_id, channel, "no session matched channel");
        }
        self.deliver_all(targets);
    }

    fn broadcast_history(&mut self, realm: Realm, history: &GameHistory) {
        let members = self.realms.members(&realm);
        if members.is_empty() {
            debug!(error = %HubError::EmptyRealm(realm), "history dropped");
            return;
        }

        let mut frames: HashMap<String, Bytes> = HashMap::new();
        let mut targets = Vec::with_capacity(members.len());
        for session in members {
            let viewer = session.identity().username;
            let frame = match frames.get(&viewer) {
                Some(frame) => frame.clone(),
                None => match history_frame(history, &viewer) {
                    Some(frame) => {
                        frames.insert(viewer, frame.clone());
                        frame
                    }
                    None => continue,
                },
            };
            targets.push((session, frame));
        }
        self.deliver_all(targets);
    }

    /// Non-blocking enqueue to each target; evict whoever cannot keep up.
    fn deliver_all(&mut self, targets: impl IntoIterator<Item = (Arc<Session>, Bytes)>) {
        let mut evicted = Vec::new();
        for (session, payload) in targets {
            match session.try_send(payload) {
                Ok(()) => {}
                Err(QueueError::Full) => {
                    warn!(conn_id = %session.conn_id(), user_id = %session.user_id(), "outbound queue full, evicting");
                    evicted.push(session);
                }
                Err(QueueError::Closed) => evicted.push(session),
            }
        }
        for session in evicted {
            self.remove_session(&session);
        }
    }

    fn identify(&mut self, session: &Arc<Session>, identity: Identity) {
        let conn_id = session.conn_id().clone();
        let previous = session.replace_identity(identity);
        let current = session.user_id();

        if !self.sessions.contains_key(&conn_id) {
            // Not registered yet (or already gone); registration indexes it.
            return;
        }

        if !previous.user_id.is_anonymous() {
            if let Some(conns) = self.users.get_mut(&previous.user_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    self.users.remove(&previous.user_id);
                }
            }
        }
        if !current.is_anonymous() {
            self.users
                .entry(current.clone())
                .or_default()
                .insert(conn_id.clone(), Arc::clone(session));
        }
        debug!(conn_id = %conn_id, from = %previous.user_id, to = %current, "identity migrated");
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            sessions: self.sessions.keys().cloned().collect(),
            users: self
                .users
                .iter()
                .map(|(user, conns)| (user.clone(), conns.keys().cloned().collect()))
                .collect(),
            realms: self.realms.snapshot(),
        }
    }
}

fn history_frame(history: &GameHistory, viewer: &str) -> Option<Bytes> {
    let view = sanitize_history(history, viewer);
    let json = match view.to_json_bytes() {
        Ok(json) => json,
        Err(e) => {
            error!(game = %history.uid, error = %e, "failed to serialize history");
            return None;
        }
    };
    match encode_frame(MessageType::GameHistoryRefresher, &json) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(game = %history.uid, error = %e, "history frame not sent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::broker::{BrokerMessage, LocalBroker};
    use crate::game::history::{GameTurn, PlayState, PlayerInfo, TurnEvent};
    use crate::network::protocol::{decode_frames, MessageType};

    fn identity(user: &str) -> Identity {
        Identity {
            authenticated: true,
            username: user.to_string(),
            user_id: UserId::new(user),
        }
    }

    fn setup() -> (HubHandle, Arc<LocalBroker>) {
        let broker = Arc::new(LocalBroker::new());
        let hub = spawn_hub(broker.clone(), 64);
        (hub, broker)
    }

    async fn connect(hub: &HubHandle, user: &str, capacity: usize) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
        let (session, rx) = Session::new(capacity);
        session.replace_identity(identity(user));
        hub.register(session.clone()).await.unwrap();
        (session, rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<BrokerMessage>) -> BrokerMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for publish")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_user_index_counts_connections() {
        let (hub, _broker) = setup();
        let mut sessions = Vec::new();
        for _ in 0..3 {
            sessions.push(connect(&hub, "u1", 8).await);
        }
        let user = UserId::new("u1");
        assert_eq!(hub.snapshot().await.unwrap().user_connections(&user), 3);

        hub.unregister(sessions[0].0.clone()).await.unwrap();
        assert_eq!(hub.snapshot().await.unwrap().user_connections(&user), 2);

        for (session, _) in &sessions[1..] {
            hub.unregister(session.clone()).await.unwrap();
        }
        let snapshot = hub.snapshot().await.unwrap();
        assert!(!snapshot.users.contains_key(&user));
        assert!(snapshot.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_join_after_teardown_is_ignored() {
        let (hub, _broker) = setup();
        let (session, _rx) = connect(&hub, "u1", 8).await;
        hub.unregister(session.clone()).await.unwrap();
        hub.snapshot().await.unwrap();

        // A join-path whose backend reply lands after the disconnect.
        hub.join_realm(&Realm::from("game-abc"), &session);

        let snapshot = hub.snapshot().await.unwrap();
        assert!(snapshot.sessions.is_empty());
        assert!(snapshot.realms.is_empty());
        assert!(hub.realm_of(&session).is_null());
    }

    #[tokio::test]
    async fn test_unregister_cleans_realm_and_closes_queue() {
        let (hub, _broker) = setup();
        let (session, mut rx) = connect(&hub, "u1", 8).await;
        hub.join_realm(&Realm::lobby(), &session);

        hub.unregister(session.clone()).await.unwrap();
        let snapshot = hub.snapshot().await.unwrap();
        assert!(snapshot.realms.is_empty());
        assert!(session.is_closed());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_leave_site_only_for_last_connection() {
        let (hub, broker) = setup();
        let mut tabs = broker.subscribe(LEAVE_TAB).await.unwrap();
        let mut sites = broker.subscribe(LEAVE_SITE).await.unwrap();

        let (a, _rx_a) = connect(&hub, "u1", 8).await;
        let (b, _rx_b) = connect(&hub, "u1", 8).await;
        hub.join_realm(&Realm::lobby(), &a);

        hub.unregister(a.clone()).await.unwrap();
        let tab: LeaveTab = ipc::decode(&next_message(&mut tabs).await.payload).unwrap();
        assert_eq!(tab.conn_id, *a.conn_id());
        assert_eq!(tab.realm, Realm::lobby());

        hub.unregister(b.clone()).await.unwrap();
        let tab: LeaveTab = ipc::decode(&next_message(&mut tabs).await.payload).unwrap();
        assert_eq!(tab.conn_id, *b.conn_id());
        assert!(tab.realm.is_null());

        let site: LeaveSite = ipc::decode(&next_message(&mut sites).await.payload).unwrap();
        assert_eq!(site.user_id, UserId::new("u1"));
        hub.snapshot().await.unwrap();
        assert!(sites.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_double_unregister_is_idempotent() {
        let (hub, broker) = setup();
        let mut tabs = broker.subscribe(LEAVE_TAB).await.unwrap();
        let (session, _rx) = connect(&hub, "u1", 8).await;

        hub.unregister(session.clone()).await.unwrap();
        hub.unregister(session.clone()).await.unwrap();
        hub.snapshot().await.unwrap();

        next_message(&mut tabs).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tabs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_realm_broadcast_reaches_members_only() {
        let (hub, _broker) = setup();
        let (a, mut rx_a) = connect(&hub, "u1", 8).await;
        let (b, mut rx_b) = connect(&hub, "u2", 8).await;
        let (_c, mut rx_c) = connect(&hub, "u3", 8).await;
        let game = Realm::from("game-abc");
        hub.join_realm(&game, &a);
        hub.join_realm(&game, &b);

        hub.broadcast_to_realm(game, Bytes::from_static(b"tick")).await.unwrap();
        hub.snapshot().await.unwrap();

        assert_eq!(rx_a.try_recv().unwrap(), Bytes::from_static(b"tick"));
        assert_eq!(rx_b.try_recv().unwrap(), Bytes::from_static(b"tick"));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_realm_broadcast_does_not_stop_hub() {
        let (hub, _broker) = setup();
        hub.broadcast_to_realm(Realm::from("game-gone"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(hub.snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_everywhere() {
        let (hub, _broker) = setup();
        let (slow, mut slow_rx) = connect(&hub, "u1", 1).await;
        let (fast, mut fast_rx) = connect(&hub, "u2", 8).await;
        hub.join_realm(&Realm::lobby(), &slow);
        hub.join_realm(&Realm::lobby(), &fast);

        slow.try_send(Bytes::from_static(b"backlog")).unwrap();
        hub.broadcast_to_realm(Realm::lobby(), Bytes::from_static(b"seek")).await.unwrap();

        let snapshot = hub.snapshot().await.unwrap();
        assert!(!snapshot.sessions.contains(slow.conn_id()));
        assert_eq!(snapshot.user_connections(&UserId::new("u1")), 0);
        assert_eq!(snapshot.realm_members(&Realm::lobby()), 1);
        assert!(slow.is_closed());
        assert!(!slow.close());

        assert_eq!(slow_rx.recv().await.unwrap(), Bytes::from_static(b"backlog"));
        assert!(slow_rx.recv().await.is_none());
        assert_eq!(fast_rx.try_recv().unwrap(), Bytes::from_static(b"seek"));
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_on_user_broadcast() {
        let (hub, _broker) = setup();
        let (slow, _slow_rx) = connect(&hub, "u1", 1).await;
        slow.try_send(Bytes::from_static(b"backlog")).unwrap();

        hub.broadcast_to_user(UserId::new("u1"), Bytes::from_static(b"dm"), None)
            .await
            .unwrap();
        let snapshot = hub.snapshot().await.unwrap();
        assert!(snapshot.sessions.is_empty());
        assert!(snapshot.users.is_empty());
    }

    #[tokio::test]
    async fn test_channel_scoped_user_broadcast() {
        let (hub, _broker) = setup();
        let (in_game, mut rx_game) = connect(&hub, "u1", 8).await;
        let (in_lobby, mut rx_lobby) = connect(&hub, "u1", 8).await;
        let (_nowhere, mut rx_nowhere) = connect(&hub, "u1", 8).await;
        hub.join_realm(&Realm::from("game-abc"), &in_game);
        hub.join_realm(&Realm::lobby(), &in_lobby);

        hub.broadcast_to_user(UserId::new("u1"), Bytes::from_static(b"chat"), Some("game.abc".into()))
            .await
            .unwrap();
        hub.snapshot().await.unwrap();

        assert_eq!(rx_game.try_recv().unwrap(), Bytes::from_static(b"chat"));
        assert!(rx_lobby.try_recv().is_err());
        assert!(rx_nowhere.try_recv().is_err());

        hub.broadcast_to_user(UserId::new("u1"), Bytes::from_static(b"all"), None)
            .await
            .unwrap();
        hub.snapshot().await.unwrap();
        assert!(rx_game.try_recv().is_ok());
        assert!(rx_lobby.try_recv().is_ok());
        assert!(rx_nowhere.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_identify_migrates_index() {
        let (hub, _broker) = setup();
        let (session, _rx) = Session::new(8);
        hub.register(session.clone()).await.unwrap();
        assert!(hub.snapshot().await.unwrap().users.is_empty());

        hub.identify(session.clone(), identity("u1")).await.unwrap();
        let snapshot = hub.snapshot().await.unwrap();
        assert_eq!(snapshot.user_connections(&UserId::new("u1")), 1);

        hub.identify(session.clone(), identity("u2")).await.unwrap();
        let snapshot = hub.snapshot().await.unwrap();
        assert!(!snapshot.users.contains_key(&UserId::new("u1")));
        assert_eq!(snapshot.user_connections(&UserId::new("u2")), 1);
    }

    #[tokio::test]
    async fn test_identify_after_unregister_leaves_no_entry() {
        let (hub, _broker) = setup();
        let (session, _rx) = Session::new(8);
        hub.register(session.clone()).await.unwrap();
        hub.unregister(session.clone()).await.unwrap();
        hub.identify(session.clone(), identity("u1")).await.unwrap();
        assert!(hub.snapshot().await.unwrap().users.is_empty());
    }

    #[tokio::test]
    async fn test_history_sanitized_per_viewer() {
        let (hub, _broker) = setup();
        let (alice, mut rx_alice) = connect(&hub, "alice", 8).await;
        let (carol, mut rx_carol) = connect(&hub, "carol", 8).await;
        let realm = Realm::from("game-g1");
        hub.join_realm(&realm, &alice);
        hub.join_realm(&realm, &carol);

        let history = GameHistory {
            uid: "g1".into(),
            players: vec![
                PlayerInfo { nickname: "alice".into(), ..Default::default() },
                PlayerInfo { nickname: "bob".into(), ..Default::default() },
            ],
            turns: vec![GameTurn {
                events: vec![TurnEvent {
                    nickname: "bob".into(),
                    rack: "QQUVVWX".into(),
                    ..Default::default()
                }],
            }],
            last_known_racks: vec!["AEINRST".into(), "QQUVVWX".into()],
            play_state: PlayState::Playing,
            ..Default::default()
        };
        hub.broadcast_history(realm, history).await.unwrap();
        hub.snapshot().await.unwrap();

        let decode = |bytes: Bytes| {
            let frames = decode_frames(bytes).unwrap();
            assert_eq!(frames[0].message_type().unwrap(), MessageType::GameHistoryRefresher);
            GameHistory::from_json_bytes(&frames[0].payload).unwrap()
        };
        let for_alice = decode(rx_alice.try_recv().unwrap());
        assert_eq!(for_alice.turns[0].events[0].rack, "");
        assert_eq!(for_alice.last_known_racks[1], "");

        let for_carol = decode(rx_carol.try_recv().unwrap());
        assert_eq!(for_carol.turns[0].events[0].rack, "QQUVVWX");
    }
}
