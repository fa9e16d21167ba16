//! `WebSocket` delivery of feeds.
//!
//! A client connects to `GET {pathname}/{feed}`. The connection joins the
//! feed, receives the current tree as its first frame (the fresh seed when
//! this join started the feed), then one JSON text frame per published
//! snapshot. Closing the socket, or any failed send, leaves the feed.
//!
//! Slow clients skip snapshots rather than queueing them; a feed stopped
//! by a reload closes every socket attached to it.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::{AppState, Joined};

/// Upgrade to a `WebSocket` streaming `feed`.
///
/// # Route
///
/// `GET {pathname}/{feed}`
pub async fn ws_feed(
    Path(feed): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    if !state.documents.contains(&feed) {
        return Err(ApiError::NotFound(format!("no document named `{feed}`")));
    }
    match ws {
        Ok(ws) => Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, feed))),
        Err(rejection) => Ok(rejection.into_response()),
    }
}

fn frame(snapshot: &Value) -> Option<Message> {
    match serde_json::to_string(snapshot) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize feed snapshot: {e}");
            None
        }
    }
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>, feed: String) {
    debug!(feed = %feed, "WebSocket client connected");
    let (sink, incoming) = socket.split();
    connect(sink, incoming, &state, &feed).await;
}

/// Drive one connection from join to leave.
///
/// `sink` and `incoming` are the two halves of the socket. The feed is
/// left exactly once, whichever side ends the connection.
async fn connect<S, R, E>(mut sink: S, mut incoming: R, state: &AppState, feed: &str)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let Joined {
        id,
        mut stream,
        first,
    } = match state.join(feed).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(feed, error = %e, "failed to join feed");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    if let Some(msg) = frame(&first) {
        if sink.send(msg).await.is_err() {
            debug!(feed, "WebSocket client disconnected (send failed)");
            state.hub.unsubscribe(id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            snapshot = stream.next() => {
                let Some(snapshot) = snapshot else {
                    debug!(feed, "feed stopped, closing WebSocket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let Some(msg) = frame(&snapshot) else {
                    continue;
                };
                if sink.send(msg).await.is_err() {
                    debug!(feed, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            msg = incoming.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(feed, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            debug!(feed, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(feed, "WebSocket error: {e}");
                        break;
                    }
                    // Client text and binary frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(id).await;
}
