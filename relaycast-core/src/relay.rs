use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::connection::{ConnectionId, ForwardError};
use crate::metrics::RelayMetrics;
use crate::registry::ConnectionRegistry;

/// Fans each inbound message out to the current registry membership.
///
/// Delivery is best-effort and unordered across destinations. By default
/// the sender receives its own message back, matching the behavior
/// clients already depend on; `echo_to_sender` turns that off.
#[derive(Clone)]
pub struct BroadcastRelay {
    registry: ConnectionRegistry,
    metrics: Arc<RelayMetrics>,
    echo_to_sender: bool,
}

impl BroadcastRelay {
    #[must_use]
    pub fn new(
        registry: ConnectionRegistry,
        metrics: Arc<RelayMetrics>,
        echo_to_sender: bool,
    ) -> Self {
        Self {
            registry,
            metrics,
            echo_to_sender,
        }
    }

    /// Handle one inbound message from `source`.
    ///
    /// Takes a registry snapshot, queues the payload on every connection
    /// still open at send time, and returns the number of successful
    /// sends. A destination that closed between the snapshot and the
    /// send is removed from the registry; its failure never aborts
    /// delivery to the rest and never surfaces to the caller.
    pub fn on_message(&self, source: &ConnectionId, payload: &Bytes) -> usize {
        self.metrics.messages_received.inc();

        let mut sent = 0;
        let mut stale = Vec::new();

        for connection in self.registry.snapshot() {
            if !self.echo_to_sender && connection.id() == source {
                continue;
            }
            if !connection.is_open() {
                continue;
            }

            match connection.forward(payload.clone()) {
                Ok(()) => {
                    sent += 1;
                    self.metrics.messages_sent.inc();
                }
                Err(ForwardError::Closed) => {
                    warn!(
                        connection_id = %connection.id(),
                        "Destination gone during broadcast, removing"
                    );
                    stale.push(connection.id().clone());
                }
                Err(ForwardError::QueueFull) => {
                    warn!(
                        connection_id = %connection.id(),
                        "Send queue full, dropping message for this destination"
                    );
                }
            }
        }

        // Clean up connections whose writer task is gone
        for id in stale {
            self.registry.unregister(&id);
        }

        debug!(source = %source, sent, "Broadcast complete");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::error::TryRecvError;

    fn new_relay(echo_to_sender: bool) -> (Arc<RelayMetrics>, ConnectionRegistry, BroadcastRelay) {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = ConnectionRegistry::new(metrics.clone());
        let relay = BroadcastRelay::new(registry.clone(), metrics.clone(), echo_to_sender);
        (metrics, registry, relay)
    }

    fn connect(
        registry: &ConnectionRegistry,
        capacity: usize,
    ) -> (ClientConnection, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        registry.register(conn.clone());
        (conn, rx)
    }

    #[tokio::test]
    async fn test_broadcast_echoes_to_sender() {
        let (metrics, registry, relay) = new_relay(true);
        let (conn_a, mut rx_a) = connect(&registry, 8);
        let (_conn_b, mut rx_b) = connect(&registry, 8);

        let sent = relay.on_message(conn_a.id(), &Bytes::from_static(b"hello"));
        assert_eq!(sent, 2);

        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"hello"));

        // Exactly once each
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(metrics.messages_received.get(), 1);
        assert_eq!(metrics.messages_sent.get(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_without_echo() {
        let (metrics, registry, relay) = new_relay(false);
        let (conn_a, mut rx_a) = connect(&registry, 8);
        let (_conn_b, mut rx_b) = connect(&registry, 8);

        let sent = relay.on_message(conn_a.id(), &Bytes::from_static(b"hi"));
        assert_eq!(sent, 1);

        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(metrics.messages_sent.get(), 1);
    }

    #[tokio::test]
    async fn test_dead_peer_is_swallowed_and_removed() {
        let (metrics, registry, relay) = new_relay(true);
        let (conn_a, mut rx_a) = connect(&registry, 8);
        let (conn_b, rx_b) = connect(&registry, 8);

        // B's writer task is gone
        drop(rx_b);

        let sent = relay.on_message(conn_a.id(), &Bytes::from_static(b"ping"));
        assert_eq!(sent, 1);
        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"ping"));

        // The stale connection is cleaned up, the gauge follows
        assert!(!registry.contains(conn_b.id()));
        assert_eq!(registry.len(), 1);
        assert_eq!(metrics.active_connections.get(), 1);
        assert_eq!(metrics.messages_sent.get(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_message_but_keeps_connection() {
        let (metrics, registry, relay) = new_relay(true);
        let (conn_a, mut rx_a) = connect(&registry, 8);
        let (conn_b, _rx_b) = connect(&registry, 1);

        let first = relay.on_message(conn_a.id(), &Bytes::from_static(b"one"));
        assert_eq!(first, 2);

        // B's queue is now full; the second message is dropped for B only
        let second = relay.on_message(conn_a.id(), &Bytes::from_static(b"two"));
        assert_eq!(second, 1);

        assert!(registry.contains(conn_b.id()));
        assert_eq!(registry.len(), 2);
        assert_eq!(metrics.messages_received.get(), 2);
        assert_eq!(metrics.messages_sent.get(), 3);

        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_closed_connection_is_skipped() {
        let (metrics, registry, relay) = new_relay(true);
        let (conn_a, mut rx_a) = connect(&registry, 8);
        let (conn_b, mut rx_b) = connect(&registry, 8);

        // B observed a transport close but has not been unregistered yet
        conn_b.mark_closed();

        let sent = relay.on_message(conn_a.id(), &Bytes::from_static(b"late"));
        assert_eq!(sent, 1);

        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"late"));
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(metrics.messages_sent.get(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_connection_is_ineligible() {
        let (_metrics, registry, relay) = new_relay(true);
        let (conn_a, mut rx_a) = connect(&registry, 8);
        let (conn_b, mut rx_b) = connect(&registry, 8);

        registry.unregister(conn_b.id());

        let sent = relay.on_message(conn_a.id(), &Bytes::from_static(b"bye"));
        assert_eq!(sent, 1);
        assert_eq!(rx_a.recv().await.unwrap(), Bytes::from_static(b"bye"));
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_broadcast_with_empty_registry() {
        let (metrics, registry, relay) = new_relay(true);
        let (conn_a, _rx_a) = connect(&registry, 8);
        registry.unregister(conn_a.id());

        let sent = relay.on_message(conn_a.id(), &Bytes::from_static(b"void"));
        assert_eq!(sent, 0);
        assert_eq!(metrics.messages_received.get(), 1);
        assert_eq!(metrics.messages_sent.get(), 0);
    }
}
