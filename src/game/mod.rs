//! Game Snapshots
//!
//! Shared game state that flows through the gateway, and the per-viewer
//! redaction applied before it reaches a client.

pub mod history;
pub mod sanitizer;

pub use history::{GameHistory, GameTurn, PlayState, PlayerInfo, TurnEvent, TurnEventKind};
pub use sanitizer::sanitize_history;
