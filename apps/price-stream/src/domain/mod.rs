//! Domain Layer - Core price stream types and rules.
//!
//! Pure types with no I/O: connection keys and state snapshots, the frame
//! normalizer, and the reconnection backoff calculator.

/// Reconnection backoff calculator.
pub mod backoff;

/// Upstream frame normalizer.
pub mod frame;

/// Connection keys, state snapshots and error tags.
pub mod stream;
