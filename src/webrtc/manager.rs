//! Session manager
//!
//! Sole owner of the channel id → [`Session`] mapping. Each session sits
//! behind its own async mutex so messages of one channel are handled in
//! delivery order while other sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::negotiator::NegotiatorFactory;
use super::session::{Role, Session, SessionInfo};
use super::signaling::SignalMessage;
use crate::channel::Channel;
use crate::config::ConfigStore;
use crate::error::{AppError, Result};
use crate::video::renderer::{shared, SceneFactory};

/// Creates, routes to and tears down sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    negotiators: Arc<dyn NegotiatorFactory>,
    scenes: Arc<dyn SceneFactory>,
    config: ConfigStore,
}

impl SessionManager {
    pub fn new(
        config: ConfigStore,
        negotiators: Arc<dyn NegotiatorFactory>,
        scenes: Arc<dyn SceneFactory>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            negotiators,
            scenes,
            config,
        }
    }

    /// Allocate a session for a newly connected channel
    ///
    /// Returns the new session id. A stale session registered under the same
    /// channel id is closed first.
    pub async fn connect(&self, channel: Arc<dyn Channel>) -> String {
        let stream = self.config.get().stream.clone();
        let renderer = shared(self.scenes.create(stream.resolution()));
        let channel_id = channel.id().to_string();
        let session = Session::new(channel, renderer, self.negotiators.clone(), stream);
        let session_id = session.session_id().to_string();

        let previous = self
            .sessions
            .write()
            .await
            .insert(channel_id.clone(), Arc::new(Mutex::new(session)));
        if let Some(previous) = previous {
            warn!("Channel {} reconnected, closing stale session", channel_id);
            previous.lock().await.close().await;
        }

        info!("Session {} created for channel {}", session_id, channel_id);
        session_id
    }

    async fn get(&self, channel_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(channel_id).cloned()
    }

    /// Route an inbound signaling message to the channel's session
    pub async fn handle_signal(&self, channel_id: &str, message: SignalMessage) {
        let Some(session) = self.get(channel_id).await else {
            debug!("Signal for unknown channel {}", channel_id);
            return;
        };

        let result = session.lock().await.handle_signal(message).await;
        if let Err(e) = result {
            warn!("Channel {} lost during signaling: {}", channel_id, e);
            self.disconnect(channel_id).await;
        }
    }

    /// Start the channel's session as caller (sends the offer)
    pub async fn call(&self, channel_id: &str) -> Result<()> {
        let session = self
            .get(channel_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("No session for channel {}", channel_id)))?;

        let result = session.lock().await.start(Role::Caller).await;
        if let Err(ref e) = result {
            if e.is_disconnect() {
                self.disconnect(channel_id).await;
            }
        }
        result
    }

    /// Forward a scene-control event to the channel's renderer
    pub async fn scene_event(&self, channel_id: &str, event: &str, data: &Value) -> bool {
        match self.get(channel_id).await {
            Some(session) => session.lock().await.scene_event(event, data),
            None => false,
        }
    }

    /// Tear down and forget the channel's session
    ///
    /// Returns false when no session was registered.
    pub async fn disconnect(&self, channel_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(channel_id);
        match removed {
            Some(session) => {
                session.lock().await.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Summaries of all live sessions
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.lock().await.info());
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Close every session
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            session.lock().await.close().await;
        }
        if count > 0 {
            info!("Closed {} sessions", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StreamConfig};
    use crate::testing::{FakeNegotiatorFactory, RecordingChannel};
    use crate::video::scene::TestSceneFactory;
    use crate::webrtc::session::SignalingState;
    use crate::webrtc::signaling::SessionDescription;

    fn manager(factory: Arc<FakeNegotiatorFactory>) -> SessionManager {
        let config = AppConfig {
            stream: StreamConfig {
                width: 16,
                height: 12,
                ..Default::default()
            },
            ..Default::default()
        };
        SessionManager::new(
            ConfigStore::new(config).unwrap(),
            factory,
            Arc::new(TestSceneFactory),
        )
    }

    fn offer() -> SignalMessage {
        SignalMessage::description(SessionDescription::offer("v=0\r\n"), "remote")
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_allocates_nothing() {
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let manager = manager(factory.clone());
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));

        manager.connect(channel).await;
        assert_eq!(manager.session_count().await, 1);

        assert!(manager.disconnect("c1").await);
        assert!(!manager.disconnect("c1").await);
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_signal_routes_to_owning_session() {
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let manager = manager(factory.clone());
        let a = Arc::new(RecordingChannel::new("a", "lobby"));
        let b = Arc::new(RecordingChannel::new("b", "lobby"));
        manager.connect(a.clone()).await;
        manager.connect(b.clone()).await;

        manager.handle_signal("a", offer()).await;

        assert_eq!(a.signals().len(), 1);
        assert!(b.events().is_empty());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_closing_one_session_leaves_other_running() {
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let manager = manager(factory.clone());
        manager.connect(Arc::new(RecordingChannel::new("a", "lobby"))).await;
        manager.connect(Arc::new(RecordingChannel::new("b", "lobby"))).await;
        manager.handle_signal("a", offer()).await;
        manager.handle_signal("b", offer()).await;

        manager.disconnect("a").await;

        let (peer_a, peer_b) = (factory.peer(0), factory.peer(1));
        assert!(peer_a.is_closed());
        assert!(peer_a.video.is_stopped());
        assert!(!peer_b.is_closed());
        assert!(!peer_b.video.is_stopped());

        let written = peer_b.video.written();
        for _ in 0..200 {
            if peer_b.video.written() > written {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(peer_b.video.written() > written);

        let sessions = manager.list().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].channel_id, "b");
        assert_eq!(sessions[0].state, SignalingState::Connected);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn test_call_sends_offer() {
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let manager = manager(factory);
        let channel = Arc::new(RecordingChannel::new("a", "lobby"));
        manager.connect(channel.clone()).await;

        manager.call("a").await.unwrap();
        assert!(matches!(manager.call("missing").await, Err(AppError::NotFound(_))));

        let signals = channel.signals();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].sdp.is_some());
    }

    #[tokio::test]
    async fn test_disconnected_channel_is_dropped() {
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let manager = manager(factory.clone());
        let channel = Arc::new(RecordingChannel::new("a", "lobby"));
        manager.connect(channel.clone()).await;
        channel.close();

        manager.handle_signal("a", offer()).await;

        assert_eq!(manager.session_count().await, 0);
        assert!(factory.peer(0).is_closed());
    }

    #[tokio::test]
    async fn test_close_all() {
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let manager = manager(factory.clone());
        for id in ["a", "b", "c"] {
            manager.connect(Arc::new(RecordingChannel::new(id, "lobby"))).await;
            manager.handle_signal(id, offer()).await;
        }

        manager.close_all().await;
        assert_eq!(manager.session_count().await, 0);
        assert!((0..3).all(|i| factory.peer(i).is_closed()));
    }

    #[tokio::test]
    async fn test_scene_event_for_unknown_channel() {
        let manager = manager(Arc::new(FakeNegotiatorFactory::default()));
        assert!(!manager.scene_event("nobody", "test", &Value::Null).await);
    }
}
