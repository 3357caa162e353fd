//! WebSocket relay endpoint.
//!
//! Each accepted socket splits into a writer task that drains the
//! connection's outbound queue and a read loop that feeds inbound
//! frames to the broadcast relay. The connection is registered after
//! the upgrade completes and unregistered when either side of the
//! transport goes away; an upgrade that never completes touches
//! nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relaycast_core::{ClientConnection, ConnectionId};

use crate::http::AppState;

/// WebSocket handler: upgrades the request and hands the socket to the relay.
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.config.relay.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();

    // Bounded queue between the relay and this connection's writer task;
    // broadcasts use try_send, so a slow client sheds messages instead
    // of stalling delivery to anyone else.
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.relay.send_buffer);
    let connection = ClientConnection::new(connection_id.clone(), tx);

    state.registry.register(connection.clone());
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (sink, mut stream) = socket.split();

    // The writer task gets only the id and the open flag. Handing it a
    // connection handle would keep a sender for its own queue alive and
    // the queue would never close.
    tokio::spawn(write_outbound(
        rx,
        sink,
        connection_id.clone(),
        connection.open_flag(),
    ));

    // Read loop: every data frame is one relay event, in transport order
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                state.relay.on_message(&connection_id, &Bytes::from(text));
            }
            Ok(Message::Binary(payload)) => {
                state.relay.on_message(&connection_id, &payload);
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "Client sent close frame");
                break;
            }
            Ok(_) => {
                // Ping/pong are answered by the protocol layer
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    connection.mark_closed();
    state.registry.unregister(&connection_id);

    // The registry's handle is gone and this one drops here; with no
    // sender left, the writer task flushes what is queued and exits,
    // closing the sink half of the socket.
    drop(connection);

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Drain queued payloads into the socket until the queue closes or the
/// sink fails. UTF-8 payloads leave as text frames so textual clients
/// see what they sent.
async fn write_outbound<S>(
    mut rx: mpsc::Receiver<Bytes>,
    mut sink: S,
    connection_id: ConnectionId,
    open: Arc<AtomicBool>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(payload) = rx.recv().await {
        let frame = match Utf8Bytes::try_from(payload.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(payload),
        };

        if let Err(e) = sink.send(frame).await {
            warn!(
                connection_id = %connection_id,
                error = %e,
                "Failed to send WebSocket message"
            );
            open.store(false, Ordering::Relaxed);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn new_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::new(), tx), rx)
    }

    #[tokio::test]
    async fn test_writer_exits_when_connection_handles_drop() {
        let (connection, rx) = new_connection(8);
        let (sink, _frames) = futures::channel::mpsc::unbounded::<Message>();

        let writer = tokio::spawn(write_outbound(
            rx,
            sink,
            connection.id().clone(),
            connection.open_flag(),
        ));

        // Unregister drops the registry's handle; dropping the local one
        // leaves no sender, so the writer must observe end-of-queue.
        drop(connection);

        tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("writer task did not terminate after handles dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn test_writer_flushes_queued_frames_before_exit() {
        let (connection, rx) = new_connection(8);
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();

        connection.forward(Bytes::from_static(b"hello")).unwrap();
        connection.forward(Bytes::from_static(&[0xff, 0xfe])).unwrap();

        let writer = tokio::spawn(write_outbound(
            rx,
            sink,
            connection.id().clone(),
            connection.open_flag(),
        ));
        drop(connection);
        writer.await.unwrap();

        // UTF-8 leaves as text, everything else as binary
        match frames.next().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "hello"),
            other => panic!("expected text frame, got {other:?}"),
        }
        match frames.next().await {
            Some(Message::Binary(payload)) => {
                assert_eq!(payload, Bytes::from_static(&[0xff, 0xfe]));
            }
            other => panic!("expected binary frame, got {other:?}"),
        }
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_marks_connection_closed_on_sink_error() {
        let (connection, rx) = new_connection(8);
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();

        // Peer is gone: every sink send fails
        drop(frames);

        let writer = tokio::spawn(write_outbound(
            rx,
            sink,
            connection.id().clone(),
            connection.open_flag(),
        ));

        connection.forward(Bytes::from_static(b"doomed")).unwrap();

        tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("writer task did not stop on sink error")
            .unwrap();
        assert!(!connection.is_open());
    }
}
