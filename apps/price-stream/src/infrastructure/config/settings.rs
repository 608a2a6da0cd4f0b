//! Price Stream Configuration Settings
//!
//! Configuration types for the price stream client, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults.

use std::time::Duration;

use crate::application::services::{RegistryConfig, SubscribeOptions};
use crate::domain::backoff::ReconnectConfig;
use crate::infrastructure::sse::SseSettings;

/// Default price feed server.
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Symbol watched when none are configured.
const DEFAULT_SYMBOLS: &str = "AAPL";

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamClientConfig {
    /// Base URL of the price feed server.
    pub base_url: String,
    /// Symbols the binary subscribes to.
    pub symbols: Vec<String>,
    /// Interval and count for every subscription.
    pub subscribe: SubscribeOptions,
    /// Backoff parameters.
    pub reconnect: ReconnectConfig,
    /// SSE client settings.
    pub sse: SseSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl StreamClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or the symbol list is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or the symbol list is empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("PRICE_STREAM_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim()
            .to_string();
        if base_url.is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_STREAM_BASE_URL".to_string()));
        }

        let symbols: Vec<String> = lookup("PRICE_STREAM_SYMBOLS")
            .unwrap_or_else(|| DEFAULT_SYMBOLS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_uppercase)
            .collect();
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_STREAM_SYMBOLS".to_string()));
        }

        let subscribe = SubscribeOptions {
            interval: parse_u32(
                &lookup,
                "PRICE_STREAM_INTERVAL",
                SubscribeOptions::default().interval,
            ),
            count: parse_u32(
                &lookup,
                "PRICE_STREAM_COUNT",
                SubscribeOptions::default().count,
            ),
        };

        let defaults = ReconnectConfig::default();
        let initial_delay = parse_duration_millis(
            &lookup,
            "PRICE_STREAM_RECONNECT_DELAY_INITIAL_MS",
            defaults.initial_delay,
        );
        let max_delay = parse_duration_secs(
            &lookup,
            "PRICE_STREAM_RECONNECT_DELAY_MAX_SECS",
            defaults.max_delay,
        );
        let multiplier = parse_f64(
            &lookup,
            "PRICE_STREAM_RECONNECT_DELAY_MULTIPLIER",
            defaults.multiplier,
        );
        let reconnect = ReconnectConfig {
            initial_delay,
            // Cap may not undercut the first delay.
            max_delay: max_delay.max(initial_delay),
            multiplier: if multiplier < 1.0 {
                defaults.multiplier
            } else {
                multiplier
            },
            jitter_factor: parse_f64(
                &lookup,
                "PRICE_STREAM_RECONNECT_JITTER",
                defaults.jitter_factor,
            )
            .clamp(0.0, 1.0),
        };

        let sse_defaults = SseSettings::default();
        let sse = SseSettings {
            connect_timeout: parse_duration_secs(
                &lookup,
                "PRICE_STREAM_CONNECT_TIMEOUT_SECS",
                sse_defaults.connect_timeout,
            ),
            max_line_bytes: parse_usize(
                &lookup,
                "PRICE_STREAM_SSE_MAX_LINE_BYTES",
                sse_defaults.max_line_bytes,
            ),
        };

        let server = ServerSettings {
            health_port: parse_u16(
                &lookup,
                "PRICE_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            base_url,
            symbols,
            subscribe,
            reconnect,
            sse,
            server,
        })
    }

    /// Registry settings derived from this configuration.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(self.base_url.clone()).with_reconnect(self.reconnect.clone())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Zero is rejected along with unparseable values.
fn parse_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_f64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Zero is rejected along with unparseable values.
fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

/// Zero is rejected along with unparseable values.
fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map_or(default, Duration::from_millis)
}
