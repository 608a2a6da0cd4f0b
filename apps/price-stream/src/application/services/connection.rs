//! Connection State Machine
//!
//! One [`Connection`] per [`ConnectionKey`]. It owns at most one live
//! transport and at most one pending reconnect timer, keeps the latest
//! [`ConnectionState`], and fans every new snapshot out to its subscribers.
//!
//! # Phases
//!
//! ```text
//!            open         error/close
//! Connecting ────► Open ──────────────► Reconnecting
//!     ▲  │                                   │
//!     │  └── init failed ───────────────────►│
//!     └────────────── timer fired ───────────┘
//!
//! Connecting ── unavailable ──► Unavailable (terminal)
//! any ── destroy ──► Destroyed (terminal)
//! ```
//!
//! # Locking
//!
//! - `delivery` (reentrant) serializes every transition with the notification
//!   that follows it, so all subscribers see the same snapshot per event and a
//!   subscriber may unsubscribe from inside its own callback.
//! - `inner` guards the mutable fields and is never held across a capability
//!   call or a subscriber callback.
//! - Lock order is `delivery` → registry map → `inner`. `destroy` never takes
//!   `delivery`.
//! - A thread already inside some connection's `delivery` only try-locks
//!   another one. Two callbacks on different threads may each unsubscribe (or
//!   subscribe to) the other's key; when the try fails the call proceeds
//!   without `delivery`, and its update may interleave with the delivery
//!   running on the other thread.

use std::cell::Cell;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::ports::{
    Clock, OpenError, Scheduler, TimerHandle, Transport, TransportEvents, TransportFactory,
    TransportListener,
};
use crate::domain::backoff::{ReconnectConfig, ReconnectPolicy};
use crate::domain::frame::parse_frame;
use crate::domain::stream::{ConnectionKey, ConnectionState, ErrorTag};
use crate::infrastructure::metrics::{self, FrameOutcome, TransportErrorKind};

// =============================================================================
// Types
// =============================================================================

/// Identifier of one subscriber callback within the registry.
pub(crate) type SubscriberId = u64;

/// Subscriber callback.
pub(crate) type Listener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Capabilities and settings shared by every connection of a registry.
pub(crate) struct StreamContext {
    pub(crate) transports: Arc<dyn TransportFactory>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) reconnect: ReconnectConfig,
}

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// Opening a transport.
    Connecting,
    /// Transport open and streaming.
    Open,
    /// Waiting for the reconnect timer.
    Reconnecting,
    /// Host has no push capability. Terminal.
    Unavailable,
    /// Torn down by the registry. Terminal.
    Destroyed,
}

impl ConnectionPhase {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Unavailable => "unavailable",
            Self::Destroyed => "destroyed",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Unavailable | Self::Destroyed)
    }
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    /// Connection key.
    pub key: ConnectionKey,
    /// Stream URL (also the registry cache key).
    pub url: String,
    /// Lifecycle phase.
    pub phase: ConnectionPhase,
    /// Number of attached subscribers.
    pub subscribers: usize,
    /// Failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Latest state snapshot.
    pub state: ConnectionState,
}

struct ConnectionInner {
    phase: ConnectionPhase,
    state: ConnectionState,
    subscribers: Vec<(SubscriberId, Listener)>,
    policy: ReconnectPolicy,
    transport: Option<Box<dyn Transport>>,
    transport_generation: u64,
    timer: Option<Box<dyn TimerHandle>>,
    timer_generation: u64,
}

impl ConnectionInner {
    const fn is_destroyed(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Destroyed)
    }

    fn is_current_transport(&self, generation: u64) -> bool {
        !self.is_destroyed() && self.transport_generation == generation
    }
}

// =============================================================================
// Connection
// =============================================================================

thread_local! {
    /// Delivery guards held by the current thread, across all connections.
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A held `delivery` lock.
pub(crate) struct DeliveryGuard<'a> {
    _lock: ReentrantMutexGuard<'a, ()>,
}

impl<'a> DeliveryGuard<'a> {
    fn enter(lock: ReentrantMutexGuard<'a, ()>) -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self { _lock: lock }
    }
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether the current thread is inside any connection's delivery.
fn is_delivering() -> bool {
    DELIVERY_DEPTH.with(Cell::get) > 0
}

/// A multiplexed price stream for one key.
pub(crate) struct Connection {
    key: ConnectionKey,
    url: String,
    context: Arc<StreamContext>,
    me: Weak<Self>,
    delivery: ReentrantMutex<()>,
    inner: Mutex<ConnectionInner>,
}

impl Connection {
    /// Create a connection in the `Connecting` phase. Call [`connect`] to
    /// open its first transport.
    ///
    /// [`connect`]: Self::connect
    pub(crate) fn new(key: ConnectionKey, url: String, context: Arc<StreamContext>) -> Arc<Self> {
        let policy = ReconnectPolicy::new(context.reconnect.clone());
        Arc::new_cyclic(|me| Self {
            key,
            url,
            context,
            me: me.clone(),
            delivery: ReentrantMutex::new(()),
            inner: Mutex::new(ConnectionInner {
                phase: ConnectionPhase::Connecting,
                state: ConnectionState::connecting(),
                subscribers: Vec::new(),
                policy,
                transport: None,
                transport_generation: 0,
                timer: None,
                timer_generation: 0,
            }),
        })
    }

    pub(crate) const fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Hold this guard while attaching, detaching or transitioning.
    pub(crate) fn delivery_guard(&self) -> DeliveryGuard<'_> {
        DeliveryGuard::enter(self.delivery.lock())
    }

    /// [`delivery_guard`](Self::delivery_guard) for calls made from a
    /// subscriber callback.
    ///
    /// Blocks only when the thread holds no delivery guard. Otherwise the lock
    /// is tried once and `None` means another thread is delivering.
    pub(crate) fn nested_delivery_guard(&self) -> Option<DeliveryGuard<'_>> {
        if !is_delivering() {
            return Some(self.delivery_guard());
        }
        self.delivery.try_lock().map(DeliveryGuard::enter)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        let inner = self.inner.lock();
        ConnectionInfo {
            key: self.key.clone(),
            url: self.url.clone(),
            phase: inner.phase,
            subscribers: inner.subscribers.len(),
            reconnect_attempts: inner.policy.attempt_count(),
            state: inner.state.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Subscribers
    // -------------------------------------------------------------------------

    /// Add a subscriber and return the snapshot it should see first.
    ///
    /// Returns `None` once the connection is destroyed.
    pub(crate) fn attach(&self, id: SubscriberId, listener: Listener) -> Option<ConnectionState> {
        let state = {
            let mut inner = self.inner.lock();
            if inner.is_destroyed() {
                return None;
            }
            inner.subscribers.push((id, listener));
            inner.state.clone()
        };
        metrics::adjust_subscribers(1.0);
        Some(state)
    }

    /// Remove a subscriber and return how many remain.
    pub(crate) fn detach(&self, id: SubscriberId) -> usize {
        let (removed, remaining) = {
            let mut inner = self.inner.lock();
            let before = inner.subscribers.len();
            inner.subscribers.retain(|(existing, _)| *existing != id);
            (before - inner.subscribers.len(), inner.subscribers.len())
        };
        if removed > 0 {
            metrics::adjust_subscribers(-1.0);
        }
        remaining
    }

    fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner
            .lock()
            .subscribers
            .iter()
            .any(|(existing, _)| *existing == id)
    }

    /// Deliver the current snapshot to every subscriber.
    ///
    /// Caller holds `delivery`. A subscriber removed by an earlier callback in
    /// the same round is skipped.
    fn notify(&self) {
        let (state, subscribers) = {
            let inner = self.inner.lock();
            if inner.is_destroyed() {
                return;
            }
            let subscribers: Vec<(SubscriberId, Listener)> = inner
                .subscribers
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect();
            (inner.state.clone(), subscribers)
        };

        for (id, listener) in subscribers {
            if self.is_subscribed(id) {
                listener(&state);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Open a transport for this connection's URL.
    ///
    /// Caller holds `delivery`.
    pub(crate) fn connect(&self) {
        let (generation, previous) = {
            let mut inner = self.inner.lock();
            if inner.is_destroyed() {
                return;
            }
            inner.transport_generation += 1;
            inner.phase = ConnectionPhase::Connecting;
            (inner.transport_generation, inner.transport.take())
        };
        if let Some(mut previous) = previous {
            previous.close();
        }

        debug!(key = %self.key, url = %self.url, generation, "Opening price stream");

        let listener: Weak<dyn TransportListener> = self.me.clone();
        let events = TransportEvents::new(listener, generation);

        match self.context.transports.open(&self.url, events) {
            Ok(transport) => self.install_transport(transport, generation),
            Err(OpenError::Unavailable) => {
                warn!(key = %self.key, "Push transport unavailable, not retrying");
                metrics::record_transport_error(TransportErrorKind::Unavailable);
                {
                    let mut inner = self.inner.lock();
                    if !inner.is_current_transport(generation) {
                        return;
                    }
                    inner.phase = ConnectionPhase::Unavailable;
                    inner.state = inner.state.with_error(ErrorTag::EventSourceUnavailable);
                }
                self.notify();
            }
            Err(OpenError::InitFailed(reason)) => {
                warn!(key = %self.key, error = %reason, "Push transport init failed");
                metrics::record_transport_error(TransportErrorKind::InitFailed);
                {
                    let mut inner = self.inner.lock();
                    if !inner.is_current_transport(generation) {
                        return;
                    }
                    inner.phase = ConnectionPhase::Reconnecting;
                    inner.state = inner.state.with_error(ErrorTag::EventSourceInitFailed);
                }
                self.notify();
                self.schedule_reconnect();
            }
        }
    }

    fn install_transport(&self, transport: Box<dyn Transport>, generation: u64) {
        let stale = {
            let mut inner = self.inner.lock();
            if inner.is_current_transport(generation) {
                inner.transport = Some(transport);
                None
            } else {
                Some(transport)
            }
        };

        // Torn down or superseded while the open call was in flight.
        if let Some(mut stale) = stale {
            stale.close();
        }
    }

    /// Close the current transport and schedule a reconnect.
    ///
    /// Caller holds `delivery`.
    fn fail_transport(&self, generation: u64) {
        let transport = {
            let mut inner = self.inner.lock();
            if !inner.is_current_transport(generation) {
                return;
            }
            inner.transport_generation += 1;
            inner.phase = ConnectionPhase::Reconnecting;
            inner.state = inner.state.with_error(ErrorTag::ConnectionError);
            inner.transport.take()
        };
        if let Some(mut transport) = transport {
            transport.close();
        }

        warn!(key = %self.key, "Price stream connection error");
        metrics::record_transport_error(TransportErrorKind::Connection);

        self.notify();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let (delay, attempt, generation, previous) = {
            let mut inner = self.inner.lock();
            if inner.is_destroyed() {
                return;
            }
            let delay = inner.policy.next_delay();
            inner.timer_generation += 1;
            (
                delay,
                inner.policy.attempt_count(),
                inner.timer_generation,
                inner.timer.take(),
            )
        };
        if let Some(mut previous) = previous {
            previous.cancel();
        }

        let me = self.me.clone();
        let handle = self.context.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(connection) = me.upgrade() {
                    connection.on_timer(generation);
                }
            }),
        );

        let stale = {
            let mut inner = self.inner.lock();
            if !inner.is_destroyed() && inner.timer_generation == generation {
                inner.timer = Some(handle);
                None
            } else {
                Some(handle)
            }
        };
        if let Some(mut stale) = stale {
            stale.cancel();
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        info!(key = %self.key, attempt, delay_ms, "Reconnect scheduled");
        metrics::record_reconnect();
    }

    fn on_timer(&self, generation: u64) {
        let _delivery = self.delivery_guard();
        {
            let mut inner = self.inner.lock();
            if inner.is_destroyed() || inner.timer_generation != generation {
                return;
            }
            inner.timer_generation += 1;
            inner.timer = None;
        }

        info!(key = %self.key, "Reconnecting price stream");
        self.connect();
    }

    /// Tear the connection down. Idempotent.
    ///
    /// Cancels the pending timer, closes the live transport and drops every
    /// subscriber. Events that arrive afterwards are ignored.
    pub(crate) fn destroy(&self) {
        let (transport, timer, dropped) = {
            let mut inner = self.inner.lock();
            if inner.is_destroyed() {
                return;
            }
            inner.phase = ConnectionPhase::Destroyed;
            inner.transport_generation += 1;
            inner.timer_generation += 1;
            let dropped = inner.subscribers.len();
            inner.subscribers.clear();
            (inner.transport.take(), inner.timer.take(), dropped)
        };

        if let Some(mut timer) = timer {
            timer.cancel();
        }
        if let Some(mut transport) = transport {
            transport.close();
        }
        if dropped > 0 {
            #[allow(clippy::cast_precision_loss)]
            let delta = -(dropped as f64);
            metrics::adjust_subscribers(delta);
        }

        info!(key = %self.key, "Price stream closed");
    }
}

impl TransportListener for Connection {
    fn on_open(&self, generation: u64) {
        let _delivery = self.delivery_guard();
        {
            let mut inner = self.inner.lock();
            if !inner.is_current_transport(generation) {
                return;
            }
            inner.policy.reset();
            inner.phase = ConnectionPhase::Open;
            inner.state = inner.state.opened();
        }

        info!(key = %self.key, "Price stream open");
        metrics::record_transport_opened();
        self.notify();
    }

    fn on_message(&self, generation: u64, data: &str) {
        let _delivery = self.delivery_guard();
        if !self.inner.lock().is_current_transport(generation) {
            return;
        }

        let frame = parse_frame(data);
        let now = self.context.clock.now();
        {
            let mut inner = self.inner.lock();
            if !inner.is_current_transport(generation) {
                return;
            }
            inner.state = inner.state.apply_frame(&frame, now);
        }

        if let Err(e) = &frame {
            debug!(key = %self.key, error = %e, "Frame rejected");
        }
        metrics::record_frame(FrameOutcome::of(&frame));
        self.notify();
    }

    fn on_error(&self, generation: u64) {
        let _delivery = self.delivery_guard();
        self.fail_transport(generation);
    }
}
