use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::video::format::Resolution;
use crate::video::producer::FramePolicy;
use crate::webrtc::track::VideoTrackConfig;

pub use crate::webrtc::config::WebRtcConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// ICE settings
    pub webrtc: WebRtcConfig,
    /// Per-session rendering and encoding settings
    pub stream: StreamConfig,
}

impl AppConfig {
    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.web.bind_address.trim().is_empty() {
            return Err(AppError::Config("web.bind_address is empty".to_string()));
        }

        let invalid = self.webrtc.invalid_servers();
        if !invalid.is_empty() {
            return Err(AppError::Config(format!(
                "webrtc.ice_servers has invalid entries: {}",
                invalid.join(", ")
            )));
        }

        self.stream.validate()
    }
}

/// Web server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// Rendering and encoding settings applied to every new session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Framebuffer width
    pub width: u32,
    /// Framebuffer height
    pub height: u32,
    /// Frame timer policy
    pub frame_policy: FramePolicy,
    /// Target H.264 bitrate
    pub bitrate_kbps: u32,
    /// Frames between periodic IDRs, at least 1
    pub keyframe_interval: u32,
}

/// Frame rate assumed for encoder tuning when the timer is uncapped
const UNCAPPED_NOMINAL_FPS: u32 = 30;

/// Largest accepted framebuffer edge
const MAX_DIMENSION: u32 = 4096;

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_policy: FramePolicy::Uncapped,
            bitrate_kbps: 1000,
            keyframe_interval: 60,
        }
    }
}

impl StreamConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Expected frame rate
    pub fn nominal_fps(&self) -> u32 {
        match self.frame_policy {
            FramePolicy::Fixed { fps } => fps,
            FramePolicy::Uncapped => UNCAPPED_NOMINAL_FPS,
        }
    }

    /// Track settings for the session identified by `session_id`
    pub fn track_config(&self, session_id: &str) -> VideoTrackConfig {
        VideoTrackConfig {
            track_id: format!("video-{}", session_id),
            stream_id: format!("scene-{}", session_id),
            resolution: self.resolution(),
            nominal_fps: self.nominal_fps(),
            bitrate_kbps: self.bitrate_kbps,
            keyframe_interval: self.keyframe_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_DIMENSION || value % 2 != 0 {
                return Err(AppError::Config(format!(
                    "stream.{} must be even and in 2..={}, got {}",
                    name, MAX_DIMENSION, value
                )));
            }
        }
        if let FramePolicy::Fixed { fps } = self.frame_policy {
            if fps == 0 || fps > 240 {
                return Err(AppError::Config(format!(
                    "stream.frame_policy fps must be in 1..=240, got {}",
                    fps
                )));
            }
        }
        if self.bitrate_kbps == 0 {
            return Err(AppError::Config("stream.bitrate_kbps must be positive".to_string()));
        }
        if self.keyframe_interval == 0 {
            return Err(AppError::Config(
                "stream.keyframe_interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
