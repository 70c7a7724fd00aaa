use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::channel::RoomRegistry;
use crate::config::ConfigStore;
use crate::webrtc::SessionManager;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Signaling sessions, one per connected channel
    pub sessions: Arc<SessionManager>,
    /// Room membership of connected channels
    pub rooms: Arc<RoomRegistry>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ConfigStore,
        sessions: Arc<SessionManager>,
        rooms: Arc<RoomRegistry>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            sessions,
            rooms,
            shutdown_tx,
            started_at: Instant::now(),
        })
    }

    /// Seconds since startup
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Ask every websocket handler to close its connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
