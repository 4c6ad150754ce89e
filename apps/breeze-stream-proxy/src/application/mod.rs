//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (symbol lookup, feed transport).
pub mod ports;

/// Application services for resolution, fan-out and watch lifecycles.
pub mod services;
