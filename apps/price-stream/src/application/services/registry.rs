//! Connection Registry
//!
//! Keyed cache of connections and the multiplexing point for consumers.
//!
//! # Design
//!
//! The registry tracks:
//! - One connection per serialized stream URL
//! - The subscribers attached to each connection
//!
//! A connection is created and started by its first subscriber and destroyed
//! the moment its last subscriber leaves, so many consumers of the same key
//! share a single upstream transport and no transport outlives its consumers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::connection::{
    Connection, ConnectionInfo, ConnectionPhase, Listener, StreamContext, SubscriberId,
};
use crate::application::ports::{Clock, Scheduler, TransportFactory};
use crate::domain::backoff::ReconnectConfig;
use crate::domain::stream::{ConnectionKey, ConnectionState, normalize_base_url};
use crate::infrastructure::metrics;

/// Default sampling interval requested from the feed.
pub const DEFAULT_INTERVAL: u32 = 5;

/// Default sample count (0 = unbounded).
pub const DEFAULT_COUNT: u32 = 0;

// =============================================================================
// Configuration
// =============================================================================

/// Registry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Base URL of the price feed server.
    pub base_url: String,
    /// Backoff parameters for every connection.
    pub reconnect: ReconnectConfig,
}

impl RegistryConfig {
    /// Settings for `base_url` with default backoff.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Override the backoff parameters.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Host capabilities the registry drives.
#[derive(Clone)]
pub struct StreamCapabilities {
    /// Opens push transports.
    pub transports: Arc<dyn TransportFactory>,
    /// Runs reconnect timers.
    pub scheduler: Arc<dyn Scheduler>,
    /// Stamps price updates.
    pub clock: Arc<dyn Clock>,
}

impl StreamCapabilities {
    /// Bundle the three capabilities.
    #[must_use]
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transports,
            scheduler,
            clock,
        }
    }
}

impl fmt::Debug for StreamCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCapabilities").finish_non_exhaustive()
    }
}

/// Per-subscription stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscribeOptions {
    /// Sampling interval.
    pub interval: u32,
    /// Sample count (0 = unbounded).
    pub count: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            count: DEFAULT_COUNT,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of every live connection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// One entry per connection, ordered by URL.
    pub connections: Vec<ConnectionInfo>,
}

impl RegistryStats {
    /// Subscribers across all connections.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.connections.iter().map(|c| c.subscribers).sum()
    }

    /// Connections whose transport is open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.count_in(ConnectionPhase::Open)
    }

    /// Connections stuck in the terminal `Unavailable` phase.
    #[must_use]
    pub fn unavailable_count(&self) -> usize {
        self.count_in(ConnectionPhase::Unavailable)
    }

    fn count_in(&self, phase: ConnectionPhase) -> usize {
        self.connections.iter().filter(|c| c.phase == phase).count()
    }
}

// =============================================================================
// Registry
// =============================================================================

struct RegistryInner {
    base_url: String,
    context: Arc<StreamContext>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    next_subscriber: AtomicU64,
}

impl RegistryInner {
    /// Detach `id` from `connection`, tearing it down if it was the last one.
    ///
    /// Caller holds the connection's delivery guard, unless it is delivering
    /// for another connection and the guard was busy.
    fn release(&self, url: &str, connection: &Arc<Connection>, id: SubscriberId) {
        let mut connections = self.connections.lock();
        if connection.detach(id) > 0 {
            return;
        }

        if connections
            .get(url)
            .is_some_and(|current| Arc::ptr_eq(current, connection))
        {
            connections.remove(url);
            metrics::set_connections(connections.len());
        }

        // Still under the map lock: no replacement transport can open first.
        connection.destroy();
        debug!(key = %connection.key(), "Last subscriber left");
    }

    fn destroy_all(connections: &mut HashMap<String, Arc<Connection>>) -> usize {
        let count = connections.len();
        for (_, connection) in connections.drain() {
            connection.destroy();
        }
        metrics::set_connections(0);
        count
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        Self::destroy_all(self.connections.get_mut());
    }
}

/// Multiplexes price stream subscribers onto one connection per key.
///
/// Cloning is cheap and every clone shares the same connections. When the
/// last clone is dropped every connection is destroyed.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("base_url", &self.inner.base_url)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl StreamRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig, capabilities: StreamCapabilities) -> Self {
        let context = StreamContext {
            transports: capabilities.transports,
            scheduler: capabilities.scheduler,
            clock: capabilities.clock,
            reconnect: config.reconnect,
        };
        Self {
            inner: Arc::new(RegistryInner {
                base_url: normalize_base_url(&config.base_url).to_string(),
                context: Arc::new(context),
                connections: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Watch `symbol` with the given options.
    ///
    /// `on_update` is called once with the current state before this returns
    /// and again on every state change until the subscription ends.
    pub fn subscribe<F>(
        &self,
        symbol: &str,
        options: SubscribeOptions,
        on_update: F,
    ) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.subscribe_key(
            ConnectionKey::new(symbol, options.interval, options.count),
            on_update,
        )
    }

    /// Watch `key`.
    ///
    /// A key without a symbol creates no connection: `on_update` sees a single
    /// `missing_symbol` state and the returned subscription is inert.
    pub fn subscribe_key<F>(&self, key: ConnectionKey, on_update: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        if key.is_missing_symbol() {
            debug!("Subscribe without symbol");
            on_update(&ConnectionState::missing_symbol());
            return Subscription::inert(key);
        }

        let url = key.stream_url(&self.inner.base_url);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(on_update);

        loop {
            let (connection, created) = self.get_or_create(&key, &url);

            let _delivery = connection.nested_delivery_guard();
            if created {
                connection.connect();
            }

            // Destroyed between lookup and attach: retry with a fresh one.
            let Some(state) = connection.attach(id, Arc::clone(&listener)) else {
                continue;
            };

            listener(&state);
            return Subscription {
                key,
                url,
                id,
                registry: Arc::downgrade(&self.inner),
                connection: Arc::downgrade(&connection),
                active: AtomicBool::new(true),
            };
        }
    }

    fn get_or_create(&self, key: &ConnectionKey, url: &str) -> (Arc<Connection>, bool) {
        let mut connections = self.inner.connections.lock();
        if let Some(existing) = connections.get(url) {
            return (Arc::clone(existing), false);
        }

        let connection = Connection::new(
            key.clone(),
            url.to_string(),
            Arc::clone(&self.inner.context),
        );
        connections.insert(url.to_string(), Arc::clone(&connection));
        metrics::set_connections(connections.len());
        info!(key = %key, url = %url, "Price stream created");
        (connection, true)
    }

    fn connection(&self, key: &ConnectionKey) -> Option<Arc<Connection>> {
        let url = key.stream_url(&self.inner.base_url);
        self.inner.connections.lock().get(&url).cloned()
    }

    /// Latest state for `key`, if a connection exists.
    #[must_use]
    pub fn current_state(&self, key: &ConnectionKey) -> Option<ConnectionState> {
        self.connection(key).map(|c| c.state())
    }

    /// Subscribers attached to `key` (0 if none).
    #[must_use]
    pub fn subscriber_count(&self, key: &ConnectionKey) -> usize {
        self.connection(key).map_or(0, |c| c.subscriber_count())
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Snapshot of every live connection.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let connections: Vec<Arc<Connection>> =
            self.inner.connections.lock().values().cloned().collect();

        let mut infos: Vec<ConnectionInfo> = connections.iter().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.url.cmp(&b.url));
        RegistryStats { connections: infos }
    }

    /// Destroy every connection.
    ///
    /// Existing subscriptions stop receiving updates and their unsubscribe
    /// becomes a no-op. New subscriptions start fresh connections.
    pub fn shutdown(&self) {
        let count = RegistryInner::destroy_all(&mut self.inner.connections.lock());
        info!(connections = count, "Price stream registry shut down");
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle to one registered callback.
///
/// Dropping the handle unsubscribes. [`unsubscribe`] may be called any number
/// of times, including from inside the callback itself.
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    key: ConnectionKey,
    url: String,
    id: SubscriberId,
    registry: Weak<RegistryInner>,
    connection: Weak<Connection>,
    active: AtomicBool,
}

impl Subscription {
    fn inert(key: ConnectionKey) -> Self {
        Self {
            key,
            url: String::new(),
            id: 0,
            registry: Weak::new(),
            connection: Weak::new(),
            active: AtomicBool::new(false),
        }
    }

    /// The key this subscription watches.
    #[must_use]
    pub const fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has not run yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop receiving updates. Idempotent.
    ///
    /// Tears the connection down if this was its last subscriber.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Some(connection) = self.connection.upgrade() else {
            return;
        };

        let _delivery = connection.nested_delivery_guard();
        registry.release(&self.url, &connection, self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
