//! Prometheus Metrics Module
//!
//! Exposes price stream metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Transports**: Opens, errors and scheduled reconnects
//! - **Frames**: Normalizer outcomes by kind
//! - **Registry**: Live connection and subscriber counts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::frame::{FrameError, PriceFrame};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent: later calls return the handle created by the first one. If
/// another global recorder is already installed, the returned handle renders
/// an empty registry.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();

            if let Err(e) = metrics::set_global_recorder(recorder) {
                tracing::warn!(error = %e, "Metrics recorder already installed");
            }

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Transport counters
    describe_counter!(
        "price_stream_transports_opened_total",
        "Total push transports that reported open"
    );
    describe_counter!(
        "price_stream_transport_errors_total",
        "Total push transport failures by kind"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Total reconnect attempts scheduled"
    );

    // Frame counters
    describe_counter!(
        "price_stream_frames_total",
        "Total frames received by normalizer outcome"
    );

    // Registry gauges
    describe_gauge!(
        "price_stream_connections",
        "Number of live multiplexed connections"
    );
    describe_gauge!(
        "price_stream_subscribers",
        "Number of active subscribers across all connections"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Capability absent in the host.
    Unavailable,
    /// Construction failed.
    InitFailed,
    /// Error or close event on a live transport.
    Connection,
}

impl TransportErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::InitFailed => "init_failed",
            Self::Connection => "connection",
        }
    }
}

/// Metric labels for normalizer outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Regular price.
    Price,
    /// Price from the secondary source.
    Fallback,
    /// Provider-reported error.
    ProviderError,
    /// Frame rejected by the normalizer.
    Rejected,
}

impl FrameOutcome {
    /// Classify a normalizer result.
    #[must_use]
    pub const fn of(frame: &Result<PriceFrame, FrameError>) -> Self {
        match frame {
            Ok(PriceFrame::Price { .. }) => Self::Price,
            Ok(PriceFrame::Fallback { .. }) => Self::Fallback,
            Ok(PriceFrame::ProviderError { .. }) => Self::ProviderError,
            Err(_) => Self::Rejected,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Fallback => "fallback",
            Self::ProviderError => "provider_error",
            Self::Rejected => "rejected",
        }
    }
}

/// Record a transport that reported open.
pub fn record_transport_opened() {
    counter!("price_stream_transports_opened_total").increment(1);
}

/// Record a transport failure.
pub fn record_transport_error(kind: TransportErrorKind) {
    counter!(
        "price_stream_transport_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("price_stream_reconnects_total").increment(1);
}

/// Record one normalized frame.
pub fn record_frame(outcome: FrameOutcome) {
    counter!(
        "price_stream_frames_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the live connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!("price_stream_connections").set(count as f64);
}

/// Adjust the subscriber count by `delta`.
pub fn adjust_subscribers(delta: f64) {
    gauge!("price_stream_subscribers").increment(delta);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_kind_as_str() {
        assert_eq!(TransportErrorKind::Unavailable.as_str(), "unavailable");
        assert_eq!(TransportErrorKind::InitFailed.as_str(), "init_failed");
        assert_eq!(TransportErrorKind::Connection.as_str(), "connection");
    }

    #[test]
    fn frame_outcome_classification() {
        assert_eq!(
            FrameOutcome::of(&Ok(PriceFrame::Price { price: 1.0 })),
            FrameOutcome::Price
        );
        assert_eq!(
            FrameOutcome::of(&Ok(PriceFrame::Fallback {
                price: 1.0,
                timestamp: None
            })),
            FrameOutcome::Fallback
        );
        assert_eq!(
            FrameOutcome::of(&Err(FrameError::InvalidPayload)),
            FrameOutcome::Rejected
        );
        assert_eq!(FrameOutcome::ProviderError.as_str(), "provider_error");
    }

    #[test]
    fn init_metrics_is_idempotent() {
        let first = init_metrics();
        record_frame(FrameOutcome::Price);
        let second = init_metrics();
        assert!(get_metrics_handle().is_some());
        assert_eq!(first.render().is_empty(), second.render().is_empty());
    }
}
