use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::connection::{ClientConnection, ConnectionId};
use crate::metrics::RelayMetrics;

/// Authoritative set of currently-open connections.
///
/// Shared by every connection task; mutation and snapshot are safe under
/// concurrent invocation, and no lock is held while payloads are
/// delivered. The active-connection gauge tracks the cardinality at
/// every mutation.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ClientConnection>>,
    metrics: Arc<RelayMetrics>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Add a newly-established connection. Always succeeds.
    pub fn register(&self, connection: ClientConnection) {
        let id = connection.id().clone();
        self.connections.insert(id.clone(), connection);

        // One inc per insert keeps the gauge exact under concurrent
        // mutation; reading len() here could interleave with another
        // task's update.
        self.metrics.connections_total.inc();
        self.metrics.active_connections.inc();

        info!(
            connection_id = %id,
            active_connections = self.connections.len(),
            "Connection registered"
        );
    }

    /// Remove a connection and mark it closed.
    ///
    /// Idempotent: removing an already-absent handle is a no-op.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.mark_closed();
            self.metrics.active_connections.dec();

            info!(
                connection_id = %id,
                uptime = ?connection.uptime(),
                active_connections = self.connections.len(),
                "Connection unregistered"
            );
        } else {
            debug!(connection_id = %id, "Unregister of unknown connection ignored");
        }
    }

    /// Point-in-time copy of the membership, usable for delivery without
    /// holding any registry lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ClientConnection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
