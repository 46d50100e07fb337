//! Realm Table
//!
//! Realm membership, guarded by one lock so a dispatcher task can join or
//! leave a realm directly instead of queueing behind the registry actor.
//!
//! The lock covers both the member sets and each session's current realm, so
//! the two can never disagree. It is never held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::network::session::{ConnId, Session};

/// Path a client sends to join the lobby.
pub const LOBBY_PATH: &str = "/";

/// A named multicast group. The empty name is the null realm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Realm(String);

impl Realm {
    /// The null realm: a session in it belongs to no group.
    pub const fn null() -> Self {
        Self(String::new())
    }

    /// The well-known lobby realm.
    pub fn lobby() -> Self {
        Self("lobby".to_string())
    }

    /// Wrap a realm name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Whether this is the null realm.
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    /// Realm name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a user-broadcast channel is scoped to this realm.
    ///
    /// Realm names separate with `-`, channels with `.`; `game-abc` matches
    /// `game.abc` and anything under `game.abc.`, but not `game.abcdef`.
    /// The null realm matches nothing.
    pub fn matches_channel(&self, channel: &str) -> bool {
        if self.is_null() {
            return false;
        }
        let prefix = self.0.replace('-', ".");
        match channel.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl From<&str> for Realm {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Realm {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
struct RealmState {
    members: HashMap<Realm, HashMap<ConnId, Arc<Session>>>,
    locations: HashMap<ConnId, Realm>,
}

impl RealmState {
    /// Remove `conn_id` from `realm`, dropping the entry once it is empty.
    fn detach(&mut self, realm: &Realm, conn_id: &ConnId) {
        if let Some(members) = self.members.get_mut(realm) {
            members.remove(conn_id);
            if members.is_empty() {
                self.members.remove(realm);
                debug!(realm = %realm, "realm emptied");
            }
        }
    }
}

/// Realm membership for every live session.
#[derive(Default)]
pub struct RealmTable {
    state: Mutex<RealmState>,
}

impl RealmTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `session` into `realm`, leaving its previous realm first.
    ///
    /// No-op when it is already there, or when the session is already
    /// closed. Joining the null realm is a leave.
    pub fn join_realm(&self, realm: &Realm, session: &Arc<Session>) {
        if realm.is_null() {
            self.leave_realm(session);
            return;
        }
        let conn_id = session.conn_id();
        let mut state = self.state.lock();

        // Teardown closes the session before it clears the table.
        if session.is_closed() {
            debug!(conn_id = %conn_id, realm = %realm, "join ignored for closed session");
            return;
        }

        if let Some(current) = state.locations.get(conn_id).cloned() {
            if &current == realm {
                return;
            }
            state.detach(&current, conn_id);
        }

        state
            .members
            .entry(realm.clone())
            .or_default()
            .insert(conn_id.clone(), Arc::clone(session));
        state.locations.insert(conn_id.clone(), realm.clone());
        debug!(conn_id = %conn_id, realm = %realm, "joined realm");
    }

    /// Take `session` out of its current realm.
    pub fn leave_realm(&self, session: &Session) {
        let conn_id = session.conn_id();
        let mut state = self.state.lock();
        match state.locations.remove(conn_id) {
            Some(current) => {
                state.detach(&current, conn_id);
                debug!(conn_id = %conn_id, realm = %current, "left realm");
            }
            None => warn!(conn_id = %conn_id, "leave requested but session is in no realm"),
        }
    }

    /// Drop `conn_id` from whatever realm it is in. Silent if it is in none.
    ///
    /// Returns the realm it was removed from.
    pub fn remove(&self, conn_id: &ConnId) -> Option<Realm> {
        let mut state = self.state.lock();
        let current = state.locations.remove(conn_id)?;
        state.detach(&current, conn_id);
        Some(current)
    }

    /// Current realm of a session; the null realm if it has none.
    pub fn realm_of(&self, conn_id: &ConnId) -> Realm {
        self.state.lock().locations.get(conn_id).cloned().unwrap_or_default()
    }

    /// Current members of `realm`.
    pub fn members(&self, realm: &Realm) -> Vec<Arc<Session>> {
        self.state
            .lock()
            .members
            .get(realm)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Realm names with their member connection ids.
    pub fn snapshot(&self) -> HashMap<Realm, Vec<ConnId>> {
        self.state
            .lock()
            .members
            .iter()
            .map(|(realm, members)| (realm.clone(), members.keys().cloned().collect()))
            .collect()
    }

    /// Number of non-empty realms.
    pub fn realm_count(&self) -> usize {
        self.state.lock().members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn session() -> Arc<Session> {
        Session::new(4).0
    }

    /// Every session appears under exactly the realm its location names.
    fn assert_consistent(table: &RealmTable) {
        let state = table.state.lock();
        for (realm, members) in &state.members {
            assert!(!members.is_empty(), "empty realm {realm} lingered");
            for conn_id in members.keys() {
                assert_eq!(state.locations.get(conn_id), Some(realm));
            }
        }
        for (conn_id, realm) in &state.locations {
            let count = state.members.values().filter(|m| m.contains_key(conn_id)).count();
            assert_eq!(count, 1);
            assert!(state.members[realm].contains_key(conn_id));
        }
    }

    #[test]
    fn test_join_moves_between_realms() {
        let table = RealmTable::new();
        let s = session();

        table.join_realm(&Realm::lobby(), &s);
        assert_eq!(table.realm_of(s.conn_id()), Realm::lobby());

        let game = Realm::from("game-abc");
        table.join_realm(&game, &s);
        assert_eq!(table.realm_of(s.conn_id()), game);
        assert!(table.members(&Realm::lobby()).is_empty());
        assert_eq!(table.realm_count(), 1);
        assert_consistent(&table);
    }

    #[test]
    fn test_join_same_realm_is_noop() {
        let table = RealmTable::new();
        let s = session();
        table.join_realm(&Realm::lobby(), &s);
        table.join_realm(&Realm::lobby(), &s);
        assert_eq!(table.members(&Realm::lobby()).len(), 1);
    }

    #[test]
    fn test_last_leave_deletes_realm() {
        let table = RealmTable::new();
        let (a, b) = (session(), session());
        table.join_realm(&Realm::lobby(), &a);
        table.join_realm(&Realm::lobby(), &b);

        table.leave_realm(&a);
        assert_eq!(table.realm_count(), 1);
        table.leave_realm(&b);
        assert_eq!(table.realm_count(), 0);
        assert!(table.realm_of(b.conn_id()).is_null());
    }

    #[test]
    fn test_leave_from_null_realm_is_harmless() {
        let table = RealmTable::new();
        let s = session();
        table.leave_realm(&s);
        assert!(table.remove(s.conn_id()).is_none());
        assert_eq!(table.realm_count(), 0);
    }

    #[test]
    fn test_channel_prefix_normalisation() {
        let realm = Realm::from("game-abc");
        assert!(realm.matches_channel("game.abc"));
        assert!(realm.matches_channel("game.abc.chat"));
        assert!(!realm.matches_channel("game.xyz"));
        assert!(!realm.matches_channel("game.abcdef"));
        assert!(!realm.matches_channel("game.ab"));
        assert!(!Realm::null().matches_channel("game.abc"));
        assert!(Realm::lobby().matches_channel("lobby.chat"));
    }

    #[test]
    fn test_closed_session_cannot_join() {
        let table = RealmTable::new();
        let s = session();
        s.close();

        table.join_realm(&Realm::from("game-abc"), &s);
        assert!(table.realm_of(s.conn_id()).is_null());
        assert_eq!(table.realm_count(), 0);
    }

    #[test]
    fn concurrent_joins_keep_table_consistent() {
        use rand::Rng;

        let table = Arc::new(RealmTable::new());
        let sessions: Arc<Vec<_>> = Arc::new((0..16).map(|_| session()).collect());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let sessions = sessions.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..500 {
                        let s = &sessions[rng.gen_range(0..sessions.len())];
                        match rng.gen_range(0..3) {
                            0 => table.leave_realm(s),
                            _ => table.join_realm(&Realm::new(format!("game-{}", rng.gen_range(0..4))), s),
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_consistent(&table);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(usize, u8),
        Leave(usize),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..3u8).prop_map(|(s, r)| Op::Join(s, r)),
            (0..4usize).prop_map(Op::Leave),
            (0..4usize).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_session_in_at_most_one_realm(ops in prop::collection::vec(op(), 0..64)) {
            let table = RealmTable::new();
            let sessions: Vec<_> = (0..4).map(|_| session()).collect();

            for op in ops {
                match op {
                    Op::Join(s, r) => table.join_realm(&Realm::new(format!("realm-{r}")), &sessions[s]),
                    Op::Leave(s) => table.leave_realm(&sessions[s]),
                    Op::Remove(s) => { table.remove(sessions[s].conn_id()); }
                }
                assert_consistent(&table);
            }

            for s in &sessions {
                table.remove(s.conn_id());
            }
            prop_assert_eq!(table.realm_count(), 0);
        }
    }
}
