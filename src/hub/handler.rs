use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use utoipa::IntoParams;

use super::auth::{extract_bearer, Identity};
use super::broadcaster::Hub;
use super::messages::{encode, ClientMessage, Outbound, WsMessage};
use super::subscriber::{Delivery, Subscriber};
use crate::error::HubError;
use crate::tickstore::TickStore;

/// WebSocket connection state
pub struct WsState {
    pub hub: Arc<Hub>,
    pub store: Arc<TickStore>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct WsParams {
    /// Bearer token (alternative to the Authorization header)
    pub token: Option<String>,
}

/// Authenticate, then upgrade to a tick stream
///
/// The token is checked before the upgrade, so a rejected client never gets a websocket.
#[utoipa::path(
    get,
    path = "/ws",
    tag = "Stream",
    params(WsParams),
    responses(
        (status = 101, description = "Switching to the websocket tick stream"),
        (status = 400, description = "Not a websocket upgrade request"),
        (status = 401, description = "Missing or invalid bearer token")
    )
)]
pub async fn websocket_handler(
    State(state): State<Arc<WsState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(token) = extract_bearer(params.token.as_deref(), &headers) else {
        return reject(StatusCode::UNAUTHORIZED, "missing bearer token");
    };

    let identity = match state.hub.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("🚫 Websocket connection refused: {}", e);
            return reject(StatusCode::UNAUTHORIZED, &e.to_string());
        }
    };

    let Some(ws) = ws else {
        return reject(StatusCode::BAD_REQUEST, "expected a websocket upgrade");
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(WsMessage::error(message))).into_response()
}

/// Serve one subscriber until either side closes or the hub evicts it
async fn handle_socket(socket: WebSocket, state: Arc<WsState>, identity: Identity) {
    let (subscriber, rx, snapshot) = state.hub.register_with(identity, || WsMessage::Snapshot {
        ticks: state.store.latest_all(),
        timestamp: Utc::now(),
    });

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        snapshot,
        state.hub.config().ping_interval(),
        subscriber.closed().clone(),
    ));

    loop {
        select! {
            _ = subscriber.closed().cancelled() => break,

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    subscriber.touch();
                    let reply = reply_to(&subscriber, &text);
                    send_control(&subscriber, &reply);
                }
                Some(Ok(Message::Binary(_))) => {
                    send_control(&subscriber, &WsMessage::error("binary frames are not supported"));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => subscriber.touch(),
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Subscriber {} closed the connection", subscriber.id());
                    break;
                }
                Some(Err(e)) => {
                    debug!("Subscriber {} read error: {}", subscriber.id(), e);
                    break;
                }
            }
        }
    }

    state.hub.unregister(subscriber.id());
    subscriber.close();
    let _ = writer.await;
}

/// Drain the subscriber queue to the socket and ping on an interval
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    snapshot: WsMessage,
    ping_every: Duration,
    closed: CancellationToken,
) {
    let result: Result<(), axum::Error> = async {
        if let Ok(json) = encode(&snapshot) {
            sink.send(Message::Text(json.to_string())).await?;
        }

        let mut ping = interval(ping_every);
        ping.tick().await;

        loop {
            select! {
                _ = closed.cancelled() => break,

                next = rx.recv() => match next {
                    Some(json) => sink.send(Message::Text(json.to_string())).await?,
                    None => break,
                },

                _ = ping.tick() => {
                    if let Ok(json) = encode(&WsMessage::ping()) {
                        sink.send(Message::Text(json.to_string())).await?;
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        debug!("Websocket write failed: {}", e);
    }
    let _ = sink.close().await;
    closed.cancel();
}

/// Response to one client text frame
fn reply_to(subscriber: &Subscriber, text: &str) -> WsMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { symbols }) => {
            let symbols = subscriber.subscribe(&symbols);
            debug!("Subscriber {} now filtering {:?}", subscriber.id(), symbols);
            WsMessage::Subscribed { symbols }
        }
        Ok(ClientMessage::Unsubscribe { symbols }) => WsMessage::Unsubscribed {
            symbols: subscriber.unsubscribe(&symbols),
        },
        Ok(ClientMessage::Ping) => WsMessage::pong(),
        Err(e) => {
            let err = HubError::InvalidMessage(e.to_string());
            debug!("Subscriber {}: {}", subscriber.id(), err);
            WsMessage::error(err.to_string())
        }
    }
}

fn send_control(subscriber: &Subscriber, message: &WsMessage) {
    let Ok(json) = encode(message) else {
        return;
    };
    match subscriber.push(json) {
        Delivery::Closed => debug!("Subscriber {}: {}", subscriber.id(), HubError::QueueClosed),
        Delivery::Dropped { streak } => {
            debug!("Subscriber {} control reply dropped (streak {})", subscriber.id(), streak)
        }
        Delivery::Sent | Delivery::Filtered => {}
    }
}
