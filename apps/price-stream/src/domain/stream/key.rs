//! Connection keys.

use std::fmt;

use reqwest::Url;
use serde::Serialize;

/// Path of the upstream price stream endpoint, relative to the base URL.
pub const STREAM_PATH: &str = "/market-price-stream";

/// Identity of a multiplexed price stream.
///
/// Two subscriptions with equal keys share one connection; keys differing in
/// any field get distinct connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionKey {
    symbol: String,
    interval: u32,
    count: u32,
}

impl ConnectionKey {
    /// Create a key. Surrounding whitespace in `symbol` is dropped.
    #[must_use]
    pub fn new(symbol: impl AsRef<str>, interval: u32, count: u32) -> Self {
        Self {
            symbol: symbol.as_ref().trim().to_string(),
            interval,
            count,
        }
    }

    /// Ticker symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Sampling interval requested from the feed.
    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    /// Number of samples requested (0 = unbounded stream).
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Whether the key names no symbol at all.
    #[must_use]
    pub fn is_missing_symbol(&self) -> bool {
        self.symbol.is_empty()
    }

    /// Build the stream URL for this key under `base_url`.
    ///
    /// The result doubles as the registry's cache key, so it must be a pure
    /// function of the base URL and the three key fields. A base that does not
    /// parse as a URL still yields a deterministic string; opening a transport
    /// for it then fails and is reported as an init failure.
    #[must_use]
    pub fn stream_url(&self, base_url: &str) -> String {
        let endpoint = format!("{}{STREAM_PATH}", normalize_base_url(base_url));
        let params = [
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.to_string()),
            ("count", self.count.to_string()),
        ];

        Url::parse_with_params(&endpoint, &params).map_or_else(
            |_| {
                format!(
                    "{endpoint}?symbol={}&interval={}&count={}",
                    self.symbol, self.interval, self.count
                )
            },
            |url| url.to_string(),
        )
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.interval, self.count)
    }
}

/// Strip surrounding whitespace and trailing slashes from a base URL.
#[must_use]
pub fn normalize_base_url(base_url: &str) -> &str {
    base_url.trim().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_contains_all_parameters() {
        let key = ConnectionKey::new("AAPL", 5, 0);
        assert_eq!(
            key.stream_url("http://localhost:8000"),
            "http://localhost:8000/market-price-stream?symbol=AAPL&interval=5&count=0"
        );
    }

    #[test]
    fn base_url_trailing_slashes_are_normalized() {
        let key = ConnectionKey::new("MSFT", 1, 100);
        assert_eq!(
            key.stream_url("http://localhost:8000/api//"),
            key.stream_url("http://localhost:8000/api")
        );
    }

    #[test]
    fn symbol_is_url_encoded() {
        let key = ConnectionKey::new("BRK B&X", 5, 0);
        let url = key.stream_url("http://localhost:8000");
        assert!(url.contains("symbol=BRK+B%26X"), "unexpected url: {url}");
    }

    #[test]
    fn keys_differing_in_any_field_serialize_differently() {
        let base = "http://localhost:8000";
        let a = ConnectionKey::new("AAPL", 5, 0).stream_url(base);
        assert_ne!(a, ConnectionKey::new("AAPL", 1, 0).stream_url(base));
        assert_ne!(a, ConnectionKey::new("AAPL", 5, 10).stream_url(base));
        assert_ne!(a, ConnectionKey::new("MSFT", 5, 0).stream_url(base));
    }

    #[test]
    fn unparseable_base_still_yields_deterministic_key() {
        let key = ConnectionKey::new("AAPL", 5, 0);
        let url = key.stream_url("not a url");
        assert_eq!(url, key.stream_url("not a url"));
        assert!(url.ends_with("?symbol=AAPL&interval=5&count=0"));
    }

    #[test]
    fn symbol_whitespace_is_trimmed() {
        let key = ConnectionKey::new("  AAPL ", 5, 0);
        assert_eq!(key.symbol(), "AAPL");
        assert!(!key.is_missing_symbol());
        assert!(ConnectionKey::new("   ", 5, 0).is_missing_symbol());
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(ConnectionKey::new("AAPL", 5, 0).to_string(), "AAPL/5/0");
    }
}
