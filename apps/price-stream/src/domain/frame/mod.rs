//! Frame Normalizer
//!
//! Turns one raw text frame from the price feed into a tagged [`PriceFrame`]
//! or a classified [`FrameError`]. The feed has emitted several shapes over
//! time; they are recognized in priority order:
//!
//! 1. `{"type":"error","error":{"message":..,"code":..}}` - provider error
//! 2. `{"type":"fallback","data":{..},"timestamp":..}` - degraded source
//! 3. any other object - price read from `data` when present, else the root
//!
//! Within a price-bearing object the first non-null field of
//! [`PRICE_FIELDS`] wins.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::stream::ErrorTag;

/// Price fields, in the order they are tried.
pub const PRICE_FIELDS: [&str; 3] = ["price", "close", "last"];

/// Message used when a provider error carries none.
const UNKNOWN_PROVIDER_MESSAGE: &str = "unknown";

/// A successfully recognized frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceFrame {
    /// The upstream provider reported an error.
    ProviderError {
        /// Provider message, `"unknown"` when absent.
        message: String,
        /// Provider error code, if any.
        code: Option<String>,
    },
    /// A price from the degraded secondary source.
    Fallback {
        /// Extracted price.
        price: f64,
        /// Time the fallback quote was taken, when the frame says.
        timestamp: Option<DateTime<Utc>>,
    },
    /// A regular price update.
    Price {
        /// Extracted price.
        price: f64,
    },
}

/// Frame classification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    /// Fallback frame with no price field.
    #[error("fallback frame carried no price")]
    FallbackNoPrice,

    /// Price field present but not a finite number.
    #[error("price field is not numeric")]
    NonNumericPrice,

    /// Frame has no recognizable price.
    #[error("frame carried no recognizable price")]
    InvalidPayload,
}

impl FrameError {
    /// The error tag this failure surfaces as.
    #[must_use]
    pub const fn tag(&self) -> ErrorTag {
        match self {
            Self::Json(_) => ErrorTag::JsonParseError,
            Self::FallbackNoPrice => ErrorTag::FallbackNoPrice,
            Self::NonNumericPrice => ErrorTag::NonNumericPrice,
            Self::InvalidPayload => ErrorTag::InvalidPayload,
        }
    }
}

/// Normalize one raw frame.
///
/// # Errors
///
/// Returns a [`FrameError`] describing why no price could be taken from the
/// frame. Never panics on any input.
pub fn parse_frame(raw: &str) -> Result<PriceFrame, FrameError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| FrameError::Json(e.to_string()))?;

    let Value::Object(payload) = &value else {
        return Err(FrameError::InvalidPayload);
    };

    match payload.get("type").and_then(Value::as_str) {
        Some("error") => Ok(provider_error(payload.get("error"))),
        Some("fallback") => fallback(payload),
        _ => default_shape(payload),
    }
}

fn provider_error(error: Option<&Value>) -> PriceFrame {
    let (message, code) = match error {
        Some(Value::Object(body)) => (
            body.get("message").and_then(Value::as_str),
            body.get("code").and_then(code_string),
        ),
        Some(Value::String(message)) => (Some(message.as_str()), None),
        _ => (None, None),
    };

    PriceFrame::ProviderError {
        message: message
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_PROVIDER_MESSAGE)
            .to_string(),
        code,
    }
}

fn code_string(code: &Value) -> Option<String> {
    match code {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn fallback(payload: &Map<String, Value>) -> Result<PriceFrame, FrameError> {
    let Some(Value::Object(data)) = payload.get("data") else {
        return Err(FrameError::FallbackNoPrice);
    };

    let price = extract_price(data)?.ok_or(FrameError::FallbackNoPrice)?;
    Ok(PriceFrame::Fallback {
        price,
        timestamp: payload.get("timestamp").and_then(parse_timestamp),
    })
}

fn default_shape(payload: &Map<String, Value>) -> Result<PriceFrame, FrameError> {
    let target = match payload.get("data") {
        None | Some(Value::Null) => payload,
        Some(Value::Object(data)) => data,
        Some(_) => return Err(FrameError::InvalidPayload),
    };

    let price = extract_price(target)?.ok_or(FrameError::InvalidPayload)?;
    Ok(PriceFrame::Price { price })
}

/// First non-null price field, or `None` when every field is absent.
///
/// A present value that is not numeric stops the search.
fn extract_price(object: &Map<String, Value>) -> Result<Option<f64>, FrameError> {
    for field in PRICE_FIELDS {
        match object.get(field) {
            None | Some(Value::Null) => {}
            Some(value) => return numeric(value).map(Some).ok_or(FrameError::NonNumericPrice),
        }
    }
    Ok(None)
}

fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// RFC 3339 string or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn price(raw: &str) -> f64 {
        match parse_frame(raw) {
            Ok(PriceFrame::Price { price }) => price,
            other => panic!("expected price frame, got {other:?}"),
        }
    }

    #[test_case(r#"{"data":{"price":3000}}"#, 3000.0 ; "data price")]
    #[test_case(r#"{"data":{"close":12.5}}"#, 12.5 ; "data close")]
    #[test_case(r#"{"data":{"last":7}}"#, 7.0 ; "data last")]
    #[test_case(r#"{"price":259.48}"#, 259.48 ; "legacy root price")]
    #[test_case(r#"{"data":{"price":"101.25"}}"#, 101.25 ; "numeric string")]
    #[test_case(r#"{"data":{"price":null,"close":5}}"#, 5.0 ; "null falls through")]
    #[test_case(r#"{"data":null,"close":9}"#, 9.0 ; "null data uses root")]
    #[test_case(r#"{"type":"quote","data":{"last":1.5}}"#, 1.5 ; "unknown type is default shape")]
    fn extracts_price(raw: &str, expected: f64) {
        assert_eq!(price(raw), expected);
    }

    #[test]
    fn price_field_priority_is_price_close_last() {
        assert_eq!(price(r#"{"data":{"last":3,"close":2,"price":1}}"#), 1.0);
        assert_eq!(price(r#"{"data":{"last":3,"close":2}}"#), 2.0);
    }

    #[test_case("not json", &ErrorTag::JsonParseError ; "garbage")]
    #[test_case(r#"{"data":{"price":1"#, &ErrorTag::JsonParseError ; "truncated")]
    #[test_case("[1,2,3]", &ErrorTag::InvalidPayload ; "array")]
    #[test_case("42", &ErrorTag::InvalidPayload ; "bare number")]
    #[test_case("{}", &ErrorTag::InvalidPayload ; "empty object")]
    #[test_case(r#"{"data":{"volume":10}}"#, &ErrorTag::InvalidPayload ; "no price fields")]
    #[test_case(r#"{"data":[1,2]}"#, &ErrorTag::InvalidPayload ; "non object data")]
    #[test_case(r#"{"data":{"price":"abc"}}"#, &ErrorTag::NonNumericPrice ; "alphabetic string")]
    #[test_case(r#"{"data":{"price":true,"close":5}}"#, &ErrorTag::NonNumericPrice ; "present non numeric stops search")]
    #[test_case(r#"{"data":{"price":"NaN"}}"#, &ErrorTag::NonNumericPrice ; "nan string")]
    #[test_case(r#"{"type":"fallback","data":{}}"#, &ErrorTag::FallbackNoPrice ; "fallback without price")]
    #[test_case(r#"{"type":"fallback"}"#, &ErrorTag::FallbackNoPrice ; "fallback without data")]
    #[test_case(r#"{"type":"fallback","data":{"close":"x"}}"#, &ErrorTag::NonNumericPrice ; "fallback non numeric")]
    fn classifies_errors(raw: &str, expected: &ErrorTag) {
        let error = parse_frame(raw).unwrap_err();
        assert_eq!(&error.tag(), expected);
    }

    #[test]
    fn provider_error_with_code() {
        let frame = parse_frame(r#"{"type":"error","error":{"message":"rate limited","code":429}}"#)
            .unwrap();
        assert_eq!(
            frame,
            PriceFrame::ProviderError {
                message: "rate limited".to_string(),
                code: Some("429".to_string()),
            }
        );
    }

    #[test]
    fn provider_error_takes_priority_over_price() {
        let frame =
            parse_frame(r#"{"type":"error","error":{"message":"down"},"data":{"price":1}}"#)
                .unwrap();
        assert_eq!(
            frame,
            PriceFrame::ProviderError {
                message: "down".to_string(),
                code: None,
            }
        );
    }

    #[test]
    fn provider_error_without_message_is_unknown() {
        let frame = parse_frame(r#"{"type":"error"}"#).unwrap();
        assert_eq!(
            frame,
            PriceFrame::ProviderError {
                message: "unknown".to_string(),
                code: None,
            }
        );
    }

    #[test]
    fn fallback_with_rfc3339_timestamp() {
        let frame = parse_frame(
            r#"{"type":"fallback","data":{"close":187.2},"timestamp":"2024-03-15T14:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            PriceFrame::Fallback {
                price: 187.2,
                timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()),
            }
        );
    }

    #[test]
    fn fallback_with_epoch_millis_timestamp() {
        let frame =
            parse_frame(r#"{"type":"fallback","data":{"price":1},"timestamp":1710513000000}"#)
                .unwrap();
        let PriceFrame::Fallback { timestamp, .. } = frame else {
            panic!("expected fallback frame");
        };
        assert_eq!(
            timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap())
        );
    }

    #[test]
    fn fallback_with_bad_timestamp_has_none() {
        let frame =
            parse_frame(r#"{"type":"fallback","data":{"last":2},"timestamp":"yesterday"}"#)
                .unwrap();
        assert_eq!(
            frame,
            PriceFrame::Fallback {
                price: 2.0,
                timestamp: None,
            }
        );
    }
}
