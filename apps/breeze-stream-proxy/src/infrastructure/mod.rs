//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level servers.

/// Breeze push feed WebSocket adapter.
pub mod breeze;

/// Supabase symbol-mapping adapter.
pub mod supabase;

/// Client WebSocket and Breeze HTTP server.
pub mod server;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;
