//! Core relay logic for relaycast.
//!
//! The two central pieces are the [`ConnectionRegistry`] (the
//! authoritative set of open client connections) and the
//! [`BroadcastRelay`] (per-message fan-out to the current membership).
//! Everything else here is the surrounding stack: configuration,
//! logging, errors, and the Prometheus metrics sink the registry and
//! relay report into.

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod relay;

pub use config::Config;
pub use connection::{ClientConnection, ConnectionId};
pub use error::{Error, Result};
pub use registry::ConnectionRegistry;
pub use relay::BroadcastRelay;
