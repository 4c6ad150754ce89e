//! Domain Layer - Core watchlist types and business logic.
//!
//! This layer contains the core domain types for watchlist streaming
//! with no I/O. All types here are pure Rust with serialization support.

/// Watch lifecycle state machine and per-symbol outcomes.
pub mod lifecycle;

/// Feed session credential.
pub mod session;

/// Raw ticks, normalized quotes and the normalizer.
pub mod streaming;

/// Subscription tracking and fan-out registry.
pub mod subscription;

/// Symbol normalization, index aliases and the mapping cache.
pub mod symbol;
