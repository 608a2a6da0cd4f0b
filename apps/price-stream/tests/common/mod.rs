//! Shared fakes for registry integration tests.
//!
//! Everything here is deterministic: transports only raise events when the
//! test tells them to, and timers only fire when the test advances time.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use price_stream::{
    Clock, ConnectionKey, ConnectionState, OpenError, ReconnectConfig, RegistryConfig,
    ScheduledTask, Scheduler, StreamCapabilities, StreamRegistry, SubscribeOptions, TimerHandle,
    Transport, TransportEvents, TransportFactory,
};

pub const BASE_URL: &str = "http://feed.test";

// =============================================================================
// Scheduler
// =============================================================================

struct PendingTimer {
    due: Duration,
    task: Option<ScheduledTask>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct SchedulerState {
    now: Duration,
    timers: Vec<PendingTimer>,
    delays: Vec<Duration>,
}

/// Virtual-time scheduler driven by [`ManualScheduler::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<SchedulerState>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every delay ever requested, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.state.lock().delays.clone()
    }

    /// Timers that are neither cancelled nor fired.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|t| t.task.is_some() && !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move virtual time forward, firing every timer that comes due.
    ///
    /// Timers scheduled by a firing task are eligible in the same call.
    pub fn advance(&self, by: Duration) {
        let target = {
            let mut state = self.state.lock();
            state.now += by;
            state.now
        };

        while let Some(task) = self.take_due(target, false) {
            task();
        }
    }

    /// Run every pending task now, including cancelled ones.
    ///
    /// Models a timer that fires while its cancellation is in flight.
    pub fn fire_all_ignoring_cancel(&self) {
        while let Some(task) = self.take_due(Duration::MAX, true) {
            task();
        }
    }

    fn take_due(&self, until: Duration, include_cancelled: bool) -> Option<ScheduledTask> {
        let mut state = self.state.lock();
        let next = state
            .timers
            .iter_mut()
            .filter(|t| {
                t.task.is_some()
                    && t.due <= until
                    && (include_cancelled || !t.cancelled.load(Ordering::SeqCst))
            })
            .min_by_key(|t| t.due)?;
        next.task.take()
    }
}

struct ManualTimer {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle for ManualTimer {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Box<dyn TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        let due = state.now + delay;
        state.delays.push(delay);
        state.timers.push(PendingTimer {
            due,
            task: Some(task),
            cancelled: Arc::clone(&cancelled),
        });
        Box::new(ManualTimer { cancelled })
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Clock that returns a settable instant.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// Transports
// =============================================================================

/// Test-side handle to one transport opened by the registry.
#[derive(Clone)]
pub struct TransportHandle {
    pub url: String,
    events: TransportEvents,
    closed: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn open(&self) {
        self.events.opened();
    }

    pub fn message(&self, data: &str) {
        self.events.message(data);
    }

    pub fn fail(&self) {
        self.events.failed();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeTransport {
    closed: Arc<AtomicBool>,
}

impl Transport for FakeTransport {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FactoryState {
    attempts: usize,
    failure: Option<OpenError>,
    handles: Vec<TransportHandle>,
    max_live: usize,
}

/// Transport factory that records every transport it hands out.
#[derive(Default)]
pub struct RecordingTransportFactory {
    state: Mutex<FactoryState>,
}

impl RecordingTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent opens fail with `failure` (or succeed with `None`).
    pub fn set_failure(&self, failure: Option<OpenError>) {
        self.state.lock().failure = failure;
    }

    /// Open calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Transports successfully constructed.
    pub fn opened(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Transports constructed and not yet closed.
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .handles
            .iter()
            .filter(|h| !h.is_closed())
            .count()
    }

    /// Highest number of unclosed transports seen at any open.
    pub fn max_live(&self) -> usize {
        self.state.lock().max_live
    }

    pub fn handle(&self, index: usize) -> TransportHandle {
        self.state.lock().handles[index].clone()
    }

    pub fn latest(&self) -> TransportHandle {
        self.state.lock().handles.last().cloned().expect("no transport opened")
    }

    pub fn urls(&self) -> Vec<String> {
        self.state
            .lock()
            .handles
            .iter()
            .map(|h| h.url.clone())
            .collect()
    }
}

impl TransportFactory for RecordingTransportFactory {
    fn open(&self, url: &str, events: TransportEvents) -> Result<Box<dyn Transport>, OpenError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if let Some(failure) = state.failure.clone() {
            return Err(failure);
        }

        let closed = Arc::new(AtomicBool::new(false));
        state.handles.push(TransportHandle {
            url: url.to_string(),
            events,
            closed: Arc::clone(&closed),
        });
        let live = state.handles.iter().filter(|h| !h.is_closed()).count();
        state.max_live = state.max_live.max(live);

        Ok(Box::new(FakeTransport { closed }))
    }
}

// =============================================================================
// Subscribers
// =============================================================================

/// Collects every state a subscriber is handed.
#[derive(Clone, Default)]
pub struct Recorder {
    states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(&ConnectionState) + Send + Sync + 'static {
        let states = Arc::clone(&self.states);
        move |state| states.lock().push(state.clone())
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn last(&self) -> ConnectionState {
        self.states.lock().last().cloned().expect("no state delivered")
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A registry wired to the fakes above.
pub struct Harness {
    pub registry: StreamRegistry,
    pub transports: Arc<RecordingTransportFactory>,
    pub scheduler: Arc<ManualScheduler>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_reconnect(ReconnectConfig::default())
    }

    pub fn with_reconnect(reconnect: ReconnectConfig) -> Self {
        let transports = RecordingTransportFactory::new();
        let scheduler = ManualScheduler::new();
        let clock = FixedClock::new();
        let capabilities = StreamCapabilities::new(
            Arc::clone(&transports) as Arc<dyn TransportFactory>,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let registry = StreamRegistry::new(
            RegistryConfig::new(BASE_URL).with_reconnect(reconnect),
            capabilities,
        );
        Self {
            registry,
            transports,
            scheduler,
            clock,
        }
    }
}

pub fn aapl() -> ConnectionKey {
    ConnectionKey::new("AAPL", 5, 0)
}

pub fn options(interval: u32, count: u32) -> SubscribeOptions {
    SubscribeOptions { interval, count }
}
