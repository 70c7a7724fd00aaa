//! Scenecast - server-rendered scenes streamed over WebRTC
//!
//! Each connected browser gets its own session: a signaling state machine
//! driving a peer connection, and a frame loop that renders a scene
//! off-screen and publishes it as H.264 on one outbound video track.

pub mod channel;
pub mod config;
pub mod error;
pub mod state;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, Result};
