//! Application Layer - Ports and subscription services.
//!
//! This layer contains the capability interfaces the subscription layer
//! depends on and the services that multiplex consumers onto connections.

/// Port interfaces for external capabilities (transport, timers, time).
pub mod ports;

/// Connection state machine and registry.
pub mod services;
