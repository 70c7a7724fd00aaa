use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;
use crate::webrtc::SessionInfo;

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub rooms: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        sessions: state.sessions.session_count().await,
        rooms: state.rooms.room_count(),
    })
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.list().await,
    })
}

// ============================================================================
// ICE servers
// ============================================================================

/// ICE server entry in the browser's `RTCIceServer` shape
#[derive(Serialize)]
pub struct IceServerInfo {
    pub urls: Vec<String>,
}

#[derive(Serialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServerInfo>,
}

pub async fn ice_servers(State(state): State<Arc<AppState>>) -> Json<IceServersResponse> {
    let config = state.config.get();
    Json(IceServersResponse {
        ice_servers: config
            .webrtc
            .ice_servers
            .iter()
            .map(|url| IceServerInfo {
                urls: vec![url.clone()],
            })
            .collect(),
    })
}
