//! Application Ports (Driven)
//!
//! Capabilities the subscription services need from the host:
//! - **Transport**: open and close a server-push connection for a URL
//! - **Scheduler**: run one deferred task after a delay, cancellably
//! - **Clock**: current wall-clock time for stamping updates
//!
//! Production adapters live in `infrastructure`; tests drive the services
//! through deterministic fakes.

mod clock_port;
mod scheduler_port;
mod transport_port;

pub use clock_port::Clock;
pub use scheduler_port::{ScheduledTask, Scheduler, TimerHandle};
pub(crate) use transport_port::TransportListener;
pub use transport_port::{
    OpenError, Transport, TransportEvents, TransportFactory, UnavailableTransportFactory,
};
