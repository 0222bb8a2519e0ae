//! WebSocket push channel for notification events.
//!
//! The client authenticates with an access token (Bearer header or `?token=`)
//! and then only receives. Each connection runs a writer that drains the
//! subscriber buffer and pings, and a reader that enforces the pong deadline.
//! When either exits the other is aborted and the subscriber is unregistered.

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout, timeout_at};
use tracing::{debug, error, info};

use crate::auth::Auth;
use crate::hub::{Frame, Hub, MAX_MESSAGE_SIZE, SEND_BUFFER_SIZE, WsTimeouts};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

/// Separator between events coalesced into one text frame.
pub const FRAME_DELIMITER: char = '\n';

/// State for WebSocket endpoints.
#[derive(Clone)]
pub struct WsState {
    pub jwt: Arc<JwtConfig>,
    pub hub: Hub,
    pub timeouts: WsTimeouts,
}

impl_has_auth_backend!(WsState);

pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/ws/notifications", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    State(state): State<WsState>,
    Auth(auth): Auth,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Expected WebSocket upgrade").into_response();
        }
    };

    let user_id = auth.claims.sub;
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state.hub, state.timeouts, user_id))
}

async fn handle_socket(socket: WebSocket, hub: Hub, timeouts: WsTimeouts, user_id: String) {
    let subscription = match hub.register(&user_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to register subscriber");
            return;
        }
    };
    let id = subscription.id;
    let (sender, receiver) = socket.split();

    let mut write_task = tokio::spawn(write_pump(sender, subscription.receiver, timeouts));
    let mut read_task = tokio::spawn(read_pump(receiver, timeouts.pong_wait));

    // Wait for either side to finish (connection closed, error or eviction)
    tokio::select! {
        _ = &mut write_task => {},
        _ = &mut read_task => {},
    }

    write_task.abort();
    read_task.abort();

    hub.unregister(&user_id, id).await;
    info!(user_id = %user_id, id, "WebSocket closed");
}

/// Send one message, bounded by the write deadline. Returns false if the
/// connection should be torn down.
async fn send_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> bool {
    match timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "WebSocket write failed");
            false
        }
        Err(_) => {
            debug!("WebSocket write deadline exceeded");
            false
        }
    }
}

/// Drain the subscriber buffer onto the socket. Events already queued when
/// the writer wakes are joined into one frame, at most [`SEND_BUFFER_SIZE`]
/// per frame. A closed buffer means the hub dropped this subscriber, so the
/// writer sends a close frame and exits.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut buffer: mpsc::Receiver<Frame>,
    timeouts: WsTimeouts,
) {
    let write_wait = timeouts.write_wait;
    let mut ping = interval_at(Instant::now() + timeouts.ping_period, timeouts.ping_period);

    loop {
        tokio::select! {
            frame = buffer.recv() => {
                let Some(frame) = frame else {
                    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
                    return;
                };
                let text = coalesce(&frame, &mut buffer);
                if !send_with_deadline(&mut sink, Message::Text(text.into()), write_wait).await {
                    return;
                }
            }
            _ = ping.tick() => {
                let ping = Message::Ping(Default::default());
                if !send_with_deadline(&mut sink, ping, write_wait).await {
                    return;
                }
            }
        }
    }
}

/// Join `first` with whatever is already queued, up to [`SEND_BUFFER_SIZE`]
/// events. Anything left stays queued for the next frame.
fn coalesce(first: &str, buffer: &mut mpsc::Receiver<Frame>) -> String {
    let mut text = String::from(first);
    for _ in 1..SEND_BUFFER_SIZE {
        let Ok(next) = buffer.try_recv() else {
            break;
        };
        text.push(FRAME_DELIMITER);
        text.push_str(&next);
    }
    text
}

/// Discard inbound traffic while watching for liveness. Only pongs push the
/// read deadline forward; errors, close and oversize messages end the read.
async fn read_pump(mut stream: SplitStream<WebSocket>, pong_wait: Duration) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                debug!("WebSocket pong deadline exceeded");
                return;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "WebSocket read failed");
                return;
            }
            Ok(Some(Ok(Message::Pong(_)))) => deadline = Instant::now() + pong_wait,
            Ok(Some(Ok(_))) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_coalesce_joins_queued_frames() {
        let (tx, mut rx) = mpsc::channel::<Frame>(8);
        tx.send("b".into()).await.unwrap();
        tx.send("c".into()).await.unwrap();

        assert_eq!(coalesce("a", &mut rx), "a\nb\nc");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_coalesce_is_bounded() {
        let (tx, mut rx) = mpsc::channel::<Frame>(SEND_BUFFER_SIZE * 2);
        for _ in 0..SEND_BUFFER_SIZE + 10 {
            tx.send("x".into()).await.unwrap();
        }

        let text = coalesce("x", &mut rx);
        assert_eq!(text.split(FRAME_DELIMITER).count(), SEND_BUFFER_SIZE);

        // The remainder waits for the next frame
        let rest = coalesce("x", &mut rx);
        assert_eq!(rest.split(FRAME_DELIMITER).count(), 12);
    }
}
