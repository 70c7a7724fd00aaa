//! WebSocket channel transport
//!
//! Each websocket connection at `/ws` is one [`Channel`]. Frames are JSON
//! envelopes `{ "event": ..., "data": ... }`; the room is taken from the
//! `?room=` query parameter.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{
    Channel, ChannelEnvelope, DEFAULT_ROOM, EVENT_CALL, EVENT_CHAT, EVENT_MESSAGE,
};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::SignalMessage;

/// Query parameters of the websocket upgrade
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub room: Option<String>,
}

/// Outbound half of a websocket connection
pub struct WsChannel {
    id: String,
    room: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl WsChannel {
    fn new(room: String, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room,
            tx,
        }
    }
}

impl Channel for WsChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn room_id(&self) -> &str {
        &self.room
    }

    fn emit(&self, event: &str, data: Value) -> Result<()> {
        let json = serde_json::to_string(&ChannelEnvelope::new(event, data))?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| AppError::ChannelClosed(self.id.clone()))
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let room = params
        .room
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, room))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut outbound) = mpsc::unbounded_channel();
    let channel = Arc::new(WsChannel::new(room, tx));
    let channel_id = channel.id().to_string();

    state.rooms.join(channel.clone());
    let session_id = state.sessions.connect(channel.clone()).await;
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    info!(
        "Channel {} connected to room {} ({} members, session {})",
        channel_id,
        channel.room_id(),
        state.rooms.member_count(channel.room_id()),
        session_id
    );

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&state, channel.as_ref(), &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Channel {} disconnected", channel_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Channel {} receive error: {}", channel_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            out = outbound.recv() => {
                let Some(out) = out else { break };
                if sender.send(out).await.is_err() {
                    warn!("Failed to send to channel {}, disconnecting", channel_id);
                    break;
                }
            }

            _ = shutdown_rx.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.rooms.leave(channel.room_id(), &channel_id);
    state.sessions.disconnect(&channel_id).await;
    debug!("Channel {} handler exiting", channel_id);
}

/// Decode the `"message"` payload; clients may send it as a JSON string
fn parse_signal(data: Value) -> Result<SignalMessage> {
    match data {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

async fn dispatch(state: &AppState, channel: &dyn Channel, text: &str) {
    let envelope: ChannelEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Ignoring malformed frame from {}: {}", channel.id(), e);
            return;
        }
    };

    match envelope.event.as_str() {
        EVENT_MESSAGE => match parse_signal(envelope.data) {
            Ok(message) => state.sessions.handle_signal(channel.id(), message).await,
            Err(e) => warn!("Malformed signal from {}: {}", channel.id(), e),
        },
        EVENT_CHAT => {
            let delivered = state.rooms.broadcast_except(
                channel.room_id(),
                channel.id(),
                EVENT_CHAT,
                &envelope.data,
            );
            debug!("Chat from {} relayed to {} channels", channel.id(), delivered);
        }
        EVENT_CALL => {
            if let Err(e) = state.sessions.call(channel.id()).await {
                warn!("Call from {} failed: {}", channel.id(), e);
            }
        }
        event => {
            if !state.sessions.scene_event(channel.id(), event, &envelope.data).await {
                debug!("Unhandled event '{}' from {}", event, channel.id());
            }
        }
    }
}
