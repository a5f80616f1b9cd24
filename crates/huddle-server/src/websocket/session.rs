//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use huddle_core::{ConnectionId, HubError};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Frame};
use super::hub::Hub;
use crate::metrics as names;

/// How long the writer may take to flush a close frame after the reader ends.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(String::clone(&text).into()),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Ping => Message::Ping(Bytes::new()),
        Frame::Close => Message::Close(None),
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the hub (which broadcasts the roster)
/// 2. Forwards queued frames to the socket from a writer task
/// 3. Dispatches inbound text and binary frames to the hub
/// 4. Records transport pongs for the liveness sweep
/// 5. Unregisters on close, transport error, or termination
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    hub: Arc<Hub>,
    queue_capacity: usize,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Frame>(queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx));
    let terminated = connection.termination();

    let connection_start = Instant::now();
    info!("client connected");
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);

    hub.connect(connection.clone());

    let writer_token = terminated.clone();
    let outbound = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let closing = frame == Frame::Close;
                    if ws_tx.send(to_message(frame)).await.is_err() || closing {
                        break;
                    }
                }
                () = writer_token.cancelled() => break,
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = terminated.cancelled() => {
                debug!("connection terminated by liveness sweep");
                break;
            }
        };

        let frame = match msg {
            Some(Ok(Message::Text(text))) => Frame::from(text.to_string()),
            Some(Ok(Message::Binary(data))) => Frame::Binary(data),
            Some(Ok(Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Ping(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Err(e)) => {
                let err = HubError::Transport(e.to_string());
                warn!(code = err.code(), "{err}");
                break;
            }
            None => break,
        };

        let dispatch = hub.handle_frame(&connection, &frame);
        debug!(?dispatch, "frame handled");
    }

    let departed = hub.disconnect(&connection_id);
    info!(user = departed.as_ref().map(|u| u.name.as_str()), "client disconnected");
    counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(names::WS_CONNECTION_DURATION_SECONDS)
        .record(connection_start.elapsed().as_secs_f64());

    if terminated.is_cancelled() {
        outbound.abort();
    } else {
        // Let a queued close frame flush before the writer is dropped.
        connection.close();
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, outbound).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_map_to_messages() {
        assert!(matches!(to_message(Frame::from("hi".to_string())), Message::Text(t) if t.as_str() == "hi"));
        assert!(matches!(to_message(Frame::Binary(Bytes::from_static(b"x"))), Message::Binary(b) if &b[..] == b"x"));
        assert!(matches!(to_message(Frame::Ping), Message::Ping(_)));
        assert!(matches!(to_message(Frame::Close), Message::Close(None)));
    }
}
