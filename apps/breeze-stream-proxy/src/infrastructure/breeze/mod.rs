//! Breeze Push Feed Adapter
//!
//! WebSocket client for the Breeze push bridge:
//!
//! - **Messages**: command and server frame types
//! - **Codec**: JSON framing, tick classification
//! - **Auth**: session handshake
//! - **Reconnect**: exponential backoff with jitter
//! - **Client**: the shared connection, implementing the feed transport port

pub mod auth;
pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;

pub use auth::{AuthError, AuthState};
pub use client::{BreezeClientConfig, BreezeClientError, BreezeFeedClient};
pub use codec::{CodecError, JsonCodec};
pub use messages::{BreezeCommand, BreezeMessage, ErrorMessage, SuccessMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
