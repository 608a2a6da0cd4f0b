//! Transport Port (Driven Port)
//!
//! Interface for the long-lived server-push connection a price stream reads
//! from. A factory opens one transport per URL and reports everything that
//! happens on it through the [`TransportEvents`] it was handed.

use std::fmt;
use std::sync::Weak;

/// Why a transport could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    /// The host has no push-transport capability; retrying cannot help.
    #[error("push transport unavailable in this environment")]
    Unavailable,

    /// Construction failed for this attempt (bad URL, client setup).
    #[error("push transport init failed: {0}")]
    InitFailed(String),
}

/// A live push connection.
pub trait Transport: Send {
    /// Stop the connection. Events raised afterwards are ignored.
    fn close(&mut self);
}

/// Port for opening push connections.
pub trait TransportFactory: Send + Sync {
    /// Open a transport for `url`, reporting through `events`.
    ///
    /// Implementations must not raise events synchronously inside this call.
    ///
    /// # Errors
    ///
    /// Returns [`OpenError::Unavailable`] when the capability is absent and
    /// [`OpenError::InitFailed`] when this particular attempt failed.
    fn open(&self, url: &str, events: TransportEvents) -> Result<Box<dyn Transport>, OpenError>;
}

/// Receiver of transport events, tagged with the transport generation.
pub(crate) trait TransportListener: Send + Sync {
    fn on_open(&self, generation: u64);
    fn on_message(&self, generation: u64, data: &str);
    fn on_error(&self, generation: u64);
}

/// Event sink handed to a transport when it is opened.
///
/// Holds only a weak reference to its connection: events for a connection
/// that has been dropped, or for a transport that has since been replaced,
/// are discarded.
#[derive(Clone)]
pub struct TransportEvents {
    listener: Weak<dyn TransportListener>,
    generation: u64,
}

impl TransportEvents {
    pub(crate) fn new(listener: Weak<dyn TransportListener>, generation: u64) -> Self {
        Self {
            listener,
            generation,
        }
    }

    /// The transport is connected and streaming.
    pub fn opened(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_open(self.generation);
        }
    }

    /// One data frame arrived.
    pub fn message(&self, data: &str) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_message(self.generation, data);
        }
    }

    /// The transport failed or was closed by the remote end.
    pub fn failed(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_error(self.generation);
        }
    }

    /// Whether the owning connection no longer exists.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.listener.strong_count() == 0
    }

    /// Transport generation these events are tagged with.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// Factory for hosts without any push capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTransportFactory;

impl TransportFactory for UnavailableTransportFactory {
    fn open(&self, _url: &str, _events: TransportEvents) -> Result<Box<dyn Transport>, OpenError> {
        Err(OpenError::Unavailable)
    }
}
