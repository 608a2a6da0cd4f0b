//! Price Stream Types
//!
//! Core domain types for a live price subscription:
//!
//! - [`ConnectionKey`]: the `(symbol, interval, count)` triple a consumer
//!   asks to watch, and its serialized stream URL
//! - [`ConnectionState`]: the immutable snapshot delivered to consumers
//! - [`ErrorTag`]: the classified error markers carried by a snapshot

mod key;
mod state;

pub use key::{ConnectionKey, STREAM_PATH, normalize_base_url};
pub use state::{ConnectionState, ErrorCategory, ErrorTag};
