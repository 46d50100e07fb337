//! Session Hub
//!
//! Connection bookkeeping: the registry actor, the shared realm table, and
//! the dispatcher that turns client frames into hub and broker operations.

pub mod dispatcher;
pub mod realm;
pub mod registry;

pub use dispatcher::{DispatchError, Dispatcher};
pub use realm::{Realm, RealmTable, LOBBY_PATH};
pub use registry::{spawn_hub, HubCommand, HubError, HubHandle, HubSnapshot};
