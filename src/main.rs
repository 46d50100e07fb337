//! Realm Gateway
//!
//! WebSocket gateway between game clients and the backend message bus.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use realm_gateway::broker::spawn_bridge;
use realm_gateway::network::TokenVerifier;
use realm_gateway::{spawn_hub, Broker, Dispatcher, GatewayConfig, GatewayServer, LocalBroker, VERSION};

/// How long open connections get to close after ctrl-c.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    init_tracing(config.debug);

    info!("Realm Gateway v{}", VERSION);
    info!("Listen address: {}", config.ws_address);

    let auth = config.auth_config();
    if !auth.is_configured() {
        warn!("SECRET_KEY not set, every login will be rejected");
    }

    let broker = connect_broker(&config).await?;
    let hub = spawn_hub(broker.clone(), config.hub_queue_size);
    let _pumps = spawn_bridge(broker.clone(), hub.clone())
        .await
        .context("subscribing to backend subjects")?;

    let verifier = Arc::new(TokenVerifier::new(&auth));
    let dispatcher = Dispatcher::new(hub, broker, verifier).with_resolve_timeout(config.realm_resolve_timeout);
    let server = Arc::new(GatewayServer::new(config.server_config(), dispatcher));

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            stopper.shutdown();
        }
    });

    server.run().await?;

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while server.connection_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!(remaining = server.connection_count(), "Gateway stopped");
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_broker(config: &GatewayConfig) -> anyhow::Result<Arc<dyn Broker>> {
    match config.broker_url.as_deref() {
        #[cfg(feature = "redis-broker")]
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
            let broker = realm_gateway::broker::redis::RedisBroker::connect(url)
                .await
                .context("connecting to redis")?;
            Ok(Arc::new(broker))
        }
        Some(url) => {
            let scheme = url.split("://").next().unwrap_or_default();
            anyhow::bail!("unsupported BROKER_URL scheme {scheme:?}")
        }
        None => {
            warn!("BROKER_URL not set, using in-process broker");
            Ok(Arc::new(LocalBroker::new()))
        }
    }
}
