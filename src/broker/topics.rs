//! Topic Names
//!
//! Subjects the gateway publishes on, the patterns it subscribes to, and the
//! mapping from an inbound subject to the registry command it becomes.

use crate::hub::realm::Realm;
use crate::network::session::{ConnId, Identity, UserId};

/// Realm resolution request/reply subject.
pub const REGISTER_REALM: &str = "ipc.request.registerRealm";
/// Ask the backend to push realm-initialization data to a user.
pub const INIT_REALM_INFO: &str = "ipc.pb.initRealmInfo";
/// A connection left.
pub const LEAVE_TAB: &str = "ipc.pb.leaveTab";
/// A user's last connection left.
pub const LEAVE_SITE: &str = "ipc.pb.leaveSite";

/// Subjects the bridge subscribes to.
pub const INBOUND_PATTERNS: &[&str] = &[
    "lobby.>",
    "game.*",
    "gametv.*",
    "tournament.*",
    "user.>",
    "history.*.*",
];

/// Realm-scoped subject namespaces mapped to `<namespace>-<id>` realms.
const REALM_NAMESPACES: &[&str] = &["game", "gametv", "tournament"];

/// Subject for a client message forwarded to the backend.
///
/// `ipc.pb.<kind>.<anon|auth>.<userID>.<connID>`
pub fn forward_topic(kind: &str, identity: &Identity, conn_id: &ConnId) -> String {
    format!(
        "ipc.pb.{}.{}.{}.{}",
        kind,
        identity.auth_state(),
        identity.user_id,
        conn_id
    )
}

/// Whether `subject` matches `pattern`.
///
/// `*` matches exactly one token; `>` as the last token matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// What an inbound subject asks the registry to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRoute {
    /// Deliver the payload to every member of a realm.
    Realm(Realm),
    /// Deliver the payload to a user's connections.
    User {
        /// Target user.
        user_id: UserId,
        /// Only sessions whose realm matches this channel.
        channel: Option<String>,
    },
    /// Payload is a game history; sanitize per viewer, then deliver to the realm.
    History(Realm),
}

/// Map an inbound subject to its route. `None` for subjects nobody handles.
pub fn route_inbound(subject: &str) -> Option<InboundRoute> {
    let (namespace, rest) = subject.split_once('.')?;
    if rest.is_empty() {
        return None;
    }

    match namespace {
        "lobby" => Some(InboundRoute::Realm(Realm::lobby())),
        "user" => {
            let (user_id, channel) = match rest.split_once('.') {
                Some((user_id, channel)) if !channel.is_empty() => (user_id, Some(channel.to_string())),
                Some((user_id, _)) => (user_id, None),
                None => (rest, None),
            };
            if user_id.is_empty() {
                return None;
            }
            Some(InboundRoute::User {
                user_id: UserId::new(user_id),
                channel,
            })
        }
        "history" => {
            let (kind, id) = rest.split_once('.')?;
            if kind.is_empty() || id.is_empty() || id.contains('.') {
                return None;
            }
            Some(InboundRoute::History(Realm::new(format!("{kind}-{id}"))))
        }
        ns if REALM_NAMESPACES.contains(&ns) && !rest.contains('.') => {
            Some(InboundRoute::Realm(Realm::new(format!("{ns}-{rest}"))))
        }
        _ => None,
    }
}
