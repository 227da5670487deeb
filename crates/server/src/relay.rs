// crates/server/src/relay.rs
//! WebSocket relay: one client connection bridged to one job channel.
//!
//! Messages published on the channel go out to the client; text frames from
//! the client are published back onto the same channel through the registry,
//! so every other listener (local or on another instance) sees them. Client
//! frames shaped like service notices are dropped. The connection closes once
//! the registry has closed the channel and everything before that has been
//! forwarded.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        Path, State,
    },
    response::{IntoResponse, Response},
};
use evalhub_core::{is_valid_name, ChannelMessage, NameError, Notice};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;
use crate::state::{AppState, RelayConnection};

/// GET /ws/channel/{channel_name} - Upgrade to a relay connection.
///
/// The channel name is checked before the upgrade; a malformed name is
/// rejected with 400 and never reaches the registry.
pub async fn ws_handler(
    Path(channel_name): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !is_valid_name(&channel_name) {
        return ApiError::Name(NameError::Invalid(channel_name)).into_response();
    }
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, channel_name, state))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, channel: String, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    state.connections.insert(
        connection_id,
        RelayConnection {
            channel: channel.clone(),
            connected_at: Instant::now(),
        },
    );
    let mut subscription = state.bridge.subscribe(&channel);
    metrics::relay_opened();
    info!(connection = %connection_id, channel = %channel, "relay connected");

    let (mut sink, mut stream) = socket.split();

    // Channel -> client.
    let mut outbound = tokio::spawn(async move {
        while let Some(message) = subscription.next().await {
            if sink.send(Message::Text(message.payload.into())).await.is_err() {
                return;
            }
        }
        // The stream only ends when the registry closes the channel.
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "evaluation removed".into(),
            })))
            .await;
    });

    // Client -> channel.
    let registry = state.registry.clone();
    let inbound_channel = channel.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if Notice::parse(text.as_str()).is_some() {
                        warn!(channel = %inbound_channel, "dropping client frame shaped like a service notice");
                        continue;
                    }
                    let message = ChannelMessage::new(inbound_channel.clone(), text.as_str());
                    if let Err(e) = registry.publish(&message).await {
                        warn!(channel = %inbound_channel, error = %e, "failed to publish client message");
                        break;
                    }
                }
                Message::Close(_) => break,
                // Ping/pong are answered by axum; binary frames are ignored.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }

    state.connections.remove(&connection_id);
    metrics::relay_closed();
    debug!(subscribers = state.bridge.subscriber_count(&channel), "relay torn down");
    info!(connection = %connection_id, channel = %channel, "relay disconnected");
}
