//! Inbound Bridge
//!
//! Pumps backend broadcasts from broker subscriptions into the registry.
//! Each subscription gets its own task, so messages on one subject reach the
//! hub in the order the broker delivered them; different subjects may
//! interleave.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::topics::{route_inbound, InboundRoute, INBOUND_PATTERNS};
use crate::broker::{Broker, BrokerError, BrokerMessage};
use crate::game::history::GameHistory;
use crate::hub::registry::{HubError, HubHandle};

/// Subscribe to every inbound pattern and start one pump per subscription.
pub async fn spawn_bridge(broker: Arc<dyn Broker>, hub: HubHandle) -> Result<Vec<JoinHandle<()>>, BrokerError> {
    let mut pumps = Vec::with_capacity(INBOUND_PATTERNS.len());
    for &pattern in INBOUND_PATTERNS {
        let rx = broker.subscribe(pattern).await?;
        info!(pattern, "subscribed");
        pumps.push(tokio::spawn(pump(pattern, rx, hub.clone())));
    }
    Ok(pumps)
}

async fn pump(pattern: &'static str, mut rx: mpsc::Receiver<BrokerMessage>, hub: HubHandle) {
    while let Some(msg) = rx.recv().await {
        match forward(&hub, msg).await {
            Ok(()) => {}
            Err(HubError::Unavailable) => {
                warn!(pattern, "hub gone, stopping pump");
                return;
            }
            Err(e) => debug!(pattern, error = %e, "inbound message dropped"),
        }
    }
    debug!(pattern, "subscription closed");
}

/// Turn one broker message into a registry command.
async fn forward(hub: &HubHandle, msg: BrokerMessage) -> Result<(), HubError> {
    let Some(route) = route_inbound(&msg.topic) else {
        warn!(topic = %msg.topic, "no route for subject");
        return Ok(());
    };

    match route {
        InboundRoute::Realm(realm) => hub.broadcast_to_realm(realm, msg.payload).await,
        InboundRoute::User { user_id, channel } => hub.broadcast_to_user(user_id, msg.payload, channel).await,
        InboundRoute::History(realm) => match GameHistory::from_json_bytes(&msg.payload) {
            Ok(history) => hub.broadcast_history(realm, history).await,
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "undecodable game history");
                Ok(())
            }
        },
    }
}
