//! SSE Transport
//!
//! [`TransportFactory`] over HTTP server-sent events. Each transport is a
//! tokio task that issues one streaming `GET`, decodes the event stream and
//! reports through [`TransportEvents`]:
//!
//! - first 2xx response → `opened`
//! - every dispatched event → `message`
//! - non-2xx status, request error, body error, oversized line or end of
//!   stream → `failed`
//!
//! Reconnection is not handled here; the owning connection decides when to
//! open a new transport.

mod decoder;

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use decoder::{DEFAULT_MAX_LINE_BYTES, DecodeError, EventStreamDecoder};

use crate::application::ports::{OpenError, Transport, TransportEvents, TransportFactory};

/// SSE client errors.
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// SSE client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseSettings {
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Longest accepted line (and event payload) in bytes.
    pub max_line_bytes: usize,
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Opens SSE transports on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct SseTransportFactory {
    client: Client,
    max_line_bytes: usize,
}

impl SseTransportFactory {
    /// Create a factory.
    ///
    /// Only the connect phase is bounded by a timeout; the stream itself is
    /// expected to stay open indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &SseSettings) -> Result<Self, SseError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            max_line_bytes: settings.max_line_bytes,
        })
    }
}

impl TransportFactory for SseTransportFactory {
    fn open(&self, url: &str, events: TransportEvents) -> Result<Box<dyn Transport>, OpenError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| OpenError::Unavailable)?;
        let url = Url::parse(url).map_err(|e| OpenError::InitFailed(e.to_string()))?;

        let cancel = CancellationToken::new();
        runtime.spawn(read_stream(
            self.client.clone(),
            url,
            EventStreamDecoder::with_max_line(self.max_line_bytes),
            events,
            cancel.clone(),
        ));

        Ok(Box::new(SseTransport { cancel }))
    }
}

/// Handle to one running SSE reader task.
#[derive(Debug)]
pub struct SseTransport {
    cancel: CancellationToken,
}

impl Transport for SseTransport {
    fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_stream(
    client: Client,
    url: Url,
    mut decoder: EventStreamDecoder,
    events: TransportEvents,
    cancel: CancellationToken,
) {
    let request = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send();

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = request => result,
    };

    let response = match result {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!(url = %url, status = %response.status(), "SSE request rejected");
            events.failed();
            return;
        }
        Err(e) => {
            warn!(url = %url, error = %e, "SSE request failed");
            events.failed();
            return;
        }
    };

    debug!(url = %url, "SSE stream open");
    events.opened();

    let mut body = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                let dispatched = match decoder.feed(&bytes) {
                    Ok(dispatched) => dispatched,
                    Err(e) => {
                        warn!(url = %url, error = %e, "SSE stream rejected");
                        events.failed();
                        return;
                    }
                };
                for data in dispatched {
                    if cancel.is_cancelled() {
                        return;
                    }
                    events.message(&data);
                }
            }
            Some(Err(e)) => {
                warn!(url = %url, error = %e, "SSE stream error");
                events.failed();
                return;
            }
            None => {
                debug!(url = %url, "SSE stream ended");
                events.failed();
                return;
            }
        }
    }
}
