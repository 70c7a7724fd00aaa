//! WebRTC signaling sessions and media publication
//!
//! Architecture:
//!
//! ```text
//! Channel ("message") ──▶ SessionManager ──▶ Session (state machine)
//!                                              │
//!                 ┌────────────────────────────┼───────────────────────┐
//!                 ▼                            ▼                       ▼
//!            FrameTimer ──▶ MediaPublisher ──▶ VideoSink        Negotiator
//!         (render+convert)   (latest frame)   (H.264 track)    (webrtc-rs)
//! ```

pub mod config;
pub mod manager;
pub mod negotiator;
pub mod peer;
pub mod publisher;
pub mod session;
pub mod signaling;
pub mod track;

pub use config::WebRtcConfig;
pub use manager::SessionManager;
pub use negotiator::{CandidateSink, Negotiator, NegotiatorFactory, VideoSink};
pub use peer::{WebRtcNegotiator, WebRtcNegotiatorFactory};
pub use publisher::MediaPublisher;
pub use session::{Role, Session, SessionInfo, SignalingState};
pub use signaling::{IceCandidate, SdpType, SessionDescription, SignalMessage};
pub use track::{H264VideoTrack, VideoTrackConfig};
