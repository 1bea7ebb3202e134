//! Infrastructure Layer - Adapters and ambient concerns.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus configuration, metrics and
//! tracing setup.

/// Gateway transports (TCP socket, scripted in-memory).
pub mod gateway;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
