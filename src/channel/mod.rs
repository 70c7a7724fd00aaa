//! Channel transport seam
//!
//! A channel is one connected client. It delivers named events in order and
//! belongs to exactly one room. The websocket implementation lives in
//! [`crate::web::ws`]; sessions only see the [`Channel`] trait.

pub mod room;

pub use room::RoomRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::webrtc::signaling::SignalMessage;

/// Signaling messages
pub const EVENT_MESSAGE: &str = "message";
/// Chat relayed verbatim to the rest of the room
pub const EVENT_CHAT: &str = "chat message";
/// Explicit request for the server to place the call (send the offer)
pub const EVENT_CALL: &str = "call";

/// Room a channel joins when it does not name one
pub const DEFAULT_ROOM: &str = "lobby";

/// Wire envelope for every channel event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ChannelEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Outbound half of a connected client
pub trait Channel: Send + Sync {
    /// Transport-assigned channel id
    fn id(&self) -> &str;

    /// Room this channel belongs to
    fn room_id(&self) -> &str;

    /// Queue an event for delivery without blocking
    ///
    /// Fails with [`crate::AppError::ChannelClosed`] once the client is gone.
    fn emit(&self, event: &str, data: Value) -> Result<()>;
}

/// Send a signaling message on the `"message"` event
pub fn emit_signal(channel: &dyn Channel, message: &SignalMessage) -> Result<()> {
    channel.emit(EVENT_MESSAGE, serde_json::to_value(message)?)
}
