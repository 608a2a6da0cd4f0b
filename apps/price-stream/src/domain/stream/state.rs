//! Connection state snapshots and error tags.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::domain::frame::{FrameError, PriceFrame};

// =============================================================================
// Error Tags
// =============================================================================

/// Classified error marker carried by a [`ConnectionState`].
///
/// Each tag renders to the stable wire string consumers match on
/// (`connection_error`, `provider_error:<message>`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// Subscription was requested without a symbol.
    MissingSymbol,
    /// The host has no push-transport capability at all.
    EventSourceUnavailable,
    /// Constructing the push transport failed.
    EventSourceInitFailed,
    /// The push transport reported an error or closed.
    ConnectionError,
    /// The frame carried no recognizable price.
    InvalidPayload,
    /// The price field was present but not numeric.
    NonNumericPrice,
    /// The frame was not valid JSON.
    JsonParseError,
    /// A fallback frame carried no price.
    FallbackNoPrice,
    /// The upstream provider reported an error.
    ProviderError {
        /// Provider message.
        message: String,
        /// Provider error code, if any.
        code: Option<String>,
    },
    /// Price came from a degraded secondary source.
    Fallback,
}

/// Broad class of an [`ErrorTag`], which decides how it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad caller input; reported once, never retried.
    Input,
    /// Host lacks a required capability; terminal.
    Environment,
    /// Transport failure; retried with backoff.
    Transient,
    /// Bad frame; surfaced without touching the transport.
    Payload,
    /// Not a failure: data from a secondary source.
    Degraded,
}

impl ErrorTag {
    /// Classify this tag.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingSymbol => ErrorCategory::Input,
            Self::EventSourceUnavailable => ErrorCategory::Environment,
            Self::EventSourceInitFailed | Self::ConnectionError => ErrorCategory::Transient,
            Self::InvalidPayload
            | Self::NonNumericPrice
            | Self::JsonParseError
            | Self::FallbackNoPrice
            | Self::ProviderError { .. } => ErrorCategory::Payload,
            Self::Fallback => ErrorCategory::Degraded,
        }
    }

    /// Whether recovery is impossible without new input from the caller.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Input | ErrorCategory::Environment
        )
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSymbol => f.write_str("missing_symbol"),
            Self::EventSourceUnavailable => f.write_str("eventsource_unavailable"),
            Self::EventSourceInitFailed => f.write_str("eventsource_init_failed"),
            Self::ConnectionError => f.write_str("connection_error"),
            Self::InvalidPayload => f.write_str("invalid_payload"),
            Self::NonNumericPrice => f.write_str("non_numeric_price"),
            Self::JsonParseError => f.write_str("json_parse_error"),
            Self::FallbackNoPrice => f.write_str("fallback_no_price"),
            Self::ProviderError {
                message,
                code: Some(code),
            } => write!(f, "provider_error:{message}:{code}"),
            Self::ProviderError {
                message,
                code: None,
            } => write!(f, "provider_error:{message}"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

impl Serialize for ErrorTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Immutable snapshot of a price stream as seen by consumers.
///
/// Every transition builds a new value; consumers never observe a field
/// being changed in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Latest price, if one has been received.
    pub price: Option<f64>,
    /// Whether the stream is still waiting for its first signal.
    pub is_loading: bool,
    /// Current error marker, if any.
    pub error: Option<ErrorTag>,
    /// Time of the latest price.
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::connecting()
    }
}

impl ConnectionState {
    /// Initial state of a freshly created connection.
    #[must_use]
    pub const fn connecting() -> Self {
        Self {
            price: None,
            is_loading: true,
            error: None,
            last_update: None,
        }
    }

    /// State reported for a subscription without a symbol.
    #[must_use]
    pub const fn missing_symbol() -> Self {
        Self {
            price: None,
            is_loading: false,
            error: Some(ErrorTag::MissingSymbol),
            last_update: None,
        }
    }

    /// The wire string of the current error, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Transition for a transport that just opened.
    #[must_use]
    pub fn opened(&self) -> Self {
        Self {
            is_loading: false,
            error: None,
            ..self.clone()
        }
    }

    /// Transition that records `tag`, keeping the last price.
    #[must_use]
    pub fn with_error(&self, tag: ErrorTag) -> Self {
        Self {
            is_loading: false,
            error: Some(tag),
            ..self.clone()
        }
    }

    /// Transition for one normalized frame received at `now`.
    #[must_use]
    pub fn apply_frame(&self, frame: &Result<PriceFrame, FrameError>, now: DateTime<Utc>) -> Self {
        match frame {
            Ok(PriceFrame::Price { price }) => Self {
                price: Some(*price),
                is_loading: false,
                error: None,
                last_update: Some(now),
            },
            Ok(PriceFrame::Fallback { price, timestamp }) => Self {
                price: Some(*price),
                is_loading: false,
                error: Some(ErrorTag::Fallback),
                last_update: Some(timestamp.unwrap_or(now)),
            },
            Ok(PriceFrame::ProviderError { message, code }) => {
                self.with_error(ErrorTag::ProviderError {
                    message: message.clone(),
                    code: code.clone(),
                })
            }
            Err(error) => self.with_error(error.tag()),
        }
    }
}
