#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Stream - Live Price Subscription Layer
//!
//! Lets many independent consumers watch a `(symbol, interval, count)` price
//! feed while keeping exactly one server-push connection per distinct key.
//! Frames from the upstream feed are normalized into a single immutable
//! [`ConnectionState`], failures are recovered with exponential backoff, and
//! the connection is torn down the moment its last consumer leaves.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `stream`: Connection keys, state snapshots, error tags
//!   - `frame`: Frame normalizer for the upstream wire shapes
//!   - `backoff`: Reconnection delay calculator
//!
//! - **Application**: Ports and the subscription services
//!   - `ports`: Transport, scheduler and clock capabilities
//!   - `services`: Connection state machine and registry
//!
//! - **Infrastructure**: Adapters and ambient concerns
//!   - `sse`: Server-sent-events transport over `reqwest`
//!   - `runtime`: Tokio scheduler and system clock
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐
//! consumer A ──┐       │              │      ┌────────────┐
//! consumer B ──┼──────►│  Registry    │─────►│ Connection │◄──── SSE frames
//! consumer C ──┘       │ (per key)    │      │  (1 / key) │───► snapshots to A, B, C
//!                      └──────────────┘      └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Ports and subscription services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::backoff::{ReconnectConfig, ReconnectPolicy, backoff_delay};
pub use domain::frame::{FrameError, PRICE_FIELDS, PriceFrame, parse_frame};
pub use domain::stream::{ConnectionKey, ConnectionState, ErrorCategory, ErrorTag, STREAM_PATH};

// Ports
pub use application::ports::{
    Clock, OpenError, ScheduledTask, Scheduler, TimerHandle, Transport, TransportEvents,
    TransportFactory, UnavailableTransportFactory,
};

// Services
pub use application::services::{
    ConnectionInfo, ConnectionPhase, DEFAULT_COUNT, DEFAULT_INTERVAL, RegistryConfig,
    RegistryStats, StreamCapabilities, StreamRegistry, SubscribeOptions, Subscription,
};

// Infrastructure adapters
pub use infrastructure::config::{ConfigError, ServerSettings, StreamClientConfig};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::runtime::{SystemClock, TokioScheduler, TokioTimer};
pub use infrastructure::sse::{
    DEFAULT_MAX_LINE_BYTES, DecodeError, EventStreamDecoder, SseError, SseSettings,
    SseTransportFactory,
};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
