//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SymbolLookupPort`: Interface for the remote symbol-mapping table
//! - `FeedTransportPort`: Interface for the shared Breeze push feed

mod feed_transport_port;
mod symbol_lookup_port;

#[cfg(test)]
pub use feed_transport_port::MockFeedTransportPort;
pub use feed_transport_port::{FeedError, FeedEvent, FeedTransportPort, SessionError};
#[cfg(test)]
pub use symbol_lookup_port::MockSymbolLookupPort;
pub use symbol_lookup_port::{IdentitySymbolLookup, LookupError, SymbolLookupPort};
