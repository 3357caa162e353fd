//! Prometheus metrics for relaycast
//!
//! Provides the four operational signals the relay reports: the active
//! connection gauge, total connections opened, and message
//! received/sent counters.

use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    METRICS
        .register_on(&registry)
        .expect("failed to register relay metrics");
    registry
});

/// Process-wide metric handles, wired into the global registry.
pub static METRICS: Lazy<Arc<RelayMetrics>> = Lazy::new(|| Arc::new(RelayMetrics::new()));

/// The metric handles the registry and relay report into.
///
/// A fresh instance is not attached to any Prometheus registry, which
/// lets tests observe counters in isolation; the process uses the
/// [`METRICS`] instance.
pub struct RelayMetrics {
    /// Number of active WebSocket connections, set to the registry
    /// cardinality on every register/unregister.
    pub active_connections: IntGauge,

    /// Total WebSocket connections opened.
    pub connections_total: IntCounter,

    /// Total messages received, incremented once per inbound message.
    pub messages_received: IntCounter,

    /// Total messages sent, incremented once per successful forward.
    pub messages_sent: IntCounter,
}

impl RelayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active_connections: IntGauge::with_opts(Opts::new(
                "websocket_active_connections",
                "Number of active WebSocket connections",
            ))
            .expect("failed to create websocket_active_connections"),
            connections_total: IntCounter::with_opts(Opts::new(
                "websocket_connections_total",
                "Total number of WebSocket connections opened",
            ))
            .expect("failed to create websocket_connections_total"),
            messages_received: IntCounter::with_opts(Opts::new(
                "websocket_messages_received_total",
                "Total number of messages received",
            ))
            .expect("failed to create websocket_messages_received_total"),
            messages_sent: IntCounter::with_opts(Opts::new(
                "websocket_messages_sent_total",
                "Total number of messages sent",
            ))
            .expect("failed to create websocket_messages_sent_total"),
        }
    }

    /// Register every metric with `registry`.
    pub fn register_on(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.active_connections.clone()))?;
        registry.register(Box::new(self.connections_total.clone()))?;
        registry.register(Box::new(self.messages_received.clone()))?;
        registry.register(Box::new(self.messages_sent.clone()))?;
        Ok(())
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics are not UTF-8: {e}")))
}
