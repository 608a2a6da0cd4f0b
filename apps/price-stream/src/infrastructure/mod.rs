//! Infrastructure Layer
//!
//! Adapters for the application ports plus the ambient service concerns.

/// Server-sent-events transport.
pub mod sse;

/// Tokio scheduler and system clock.
pub mod runtime;

/// Environment configuration.
pub mod config;

/// Health check HTTP server.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
