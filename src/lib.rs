//! # Realm Gateway
//!
//! Real-time gateway multiplexing client WebSocket connections onto a
//! backend message broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      REALM GATEWAY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/        - Client-facing transport                   │
//! │  ├── server.rs   - WebSocket server, reader/writer tasks     │
//! │  ├── protocol.rs - Frame envelope and routing tags           │
//! │  ├── session.rs  - Per-connection session and queue          │
//! │  └── auth.rs     - Socket token verification                 │
//! │                                                              │
//! │  hub/            - Connection bookkeeping                    │
//! │  ├── registry.rs - Registry actor: sessions, user index      │
//! │  ├── realm.rs    - Lock-guarded realm membership             │
//! │  └── dispatcher.rs - Client frame execution                  │
//! │                                                              │
//! │  broker/         - Backend bus                               │
//! │  ├── mod.rs      - Broker trait                              │
//! │  ├── topics.rs   - Subjects and inbound routing              │
//! │  ├── ipc.rs      - Backend payloads                          │
//! │  ├── bridge.rs   - Inbound subscriptions into the hub        │
//! │  ├── local.rs    - In-process broker                         │
//! │  └── redis.rs    - Redis pub/sub broker (feature)            │
//! │                                                              │
//! │  game/           - Shared game snapshots                     │
//! │  ├── history.rs  - Game history types                        │
//! │  └── sanitizer.rs- Per-viewer redaction                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! - The registry actor is the only writer of the session set and the
//!   user index.
//! - Realm membership sits behind one short-lived lock, so a connection
//!   can join a realm without queueing behind the actor.
//! - Outbound delivery never blocks: a full queue evicts its session.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod game;
pub mod hub;
pub mod network;

// Re-export commonly used types
pub use broker::{Broker, BrokerError, BrokerMessage, LocalBroker};
pub use config::GatewayConfig;
pub use hub::{spawn_hub, Dispatcher, HubHandle, Realm};
pub use network::{GatewayServer, ServerConfig, Session};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
