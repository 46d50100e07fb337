//! Network Layer
//!
//! WebSocket transport, token verification, the frame envelope and the
//! per-connection session record.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims, TokenVerifier};
pub use protocol::{decode_frames, encode_frame, error_frame, MessageType, ProtocolError, RawFrame};
pub use session::{ConnId, Identity, QueueError, Session, UserId};
pub use server::{GatewayServer, GatewayServerError, ServerConfig};
