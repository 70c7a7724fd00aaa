//! Room membership owned by the transport layer

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::Channel;

/// Channels grouped by room id
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<String, Arc<dyn Channel>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel to its room
    pub fn join(&self, channel: Arc<dyn Channel>) {
        let room = channel.room_id().to_string();
        let id = channel.id().to_string();
        self.rooms
            .write()
            .entry(room.clone())
            .or_default()
            .insert(id.clone(), channel);
        debug!("Channel {} joined room {}", id, room);
    }

    /// Remove a channel; empty rooms are dropped
    pub fn leave(&self, room: &str, channel_id: &str) {
        let mut rooms = self.rooms.write();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(channel_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Emit `event` to every channel in `room` except `sender_id`
    ///
    /// Returns how many channels accepted the event.
    pub fn broadcast_except(&self, room: &str, sender_id: &str, event: &str, data: &Value) -> usize {
        let targets: Vec<Arc<dyn Channel>> = {
            let rooms = self.rooms.read();
            match rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter(|(id, _)| id.as_str() != sender_id)
                    .map(|(_, ch)| ch.clone())
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for channel in targets {
            match channel.emit(event, data.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Relay to {} failed: {}", channel.id(), e),
            }
        }
        delivered
    }

    /// Number of channels in `room`
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.read().get(room).map_or(0, |m| m.len())
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}
