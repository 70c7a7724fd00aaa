//! Per-connection signaling session
//!
//! ```text
//!            start / first inbound message
//!   Idle ───────────────────────────────▶ Negotiating
//!                                              │ remote description applied
//!                                              ▼
//!                                          Connected
//!   any state ── close ──▶ Closed
//! ```
//!
//! A session owns at most one negotiation engine handle, and that handle
//! carries exactly one outbound video track fed by the session's frame timer.
//! The handle, track publisher and timer are created together and released
//! together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::negotiator::{CandidateSink, Negotiator, NegotiatorFactory};
use super::publisher::MediaPublisher;
use super::signaling::{SdpType, SessionDescription, SignalKind, SignalMessage};
use crate::channel::{emit_signal, Channel};
use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::video::producer::{FrameProducer, FrameTimer};
use crate::video::renderer::SharedRenderer;

/// Session signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

impl std::fmt::Display for SignalingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalingState::Idle => write!(f, "idle"),
            SignalingState::Negotiating => write!(f, "negotiating"),
            SignalingState::Connected => write!(f, "connected"),
            SignalingState::Closed => write!(f, "closed"),
        }
    }
}

/// Which side sends the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

/// Session summary for the API
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub channel_id: String,
    pub room_id: String,
    pub state: SignalingState,
    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
    pub frames_published: u64,
    pub frames_sent: u64,
    pub candidates_sent: u64,
}

/// Engine handle, publisher and frame timer of a started session
struct SessionMedia {
    negotiator: Box<dyn Negotiator>,
    candidates: CandidateSink,
    publisher: Arc<MediaPublisher>,
    timer: FrameTimer,
}

impl SessionMedia {
    /// Stop frames, then the publisher, then the engine
    async fn shutdown(mut self, session_id: &str) {
        self.timer.stop();
        self.publisher.stop();
        if let Err(e) = self.negotiator.close().await {
            warn!("Failed to close negotiator for {}: {}", session_id, e);
        }
    }
}

/// Signaling session for one channel
pub struct Session {
    session_id: String,
    channel: Arc<dyn Channel>,
    renderer: SharedRenderer,
    negotiators: Arc<dyn NegotiatorFactory>,
    stream: StreamConfig,
    state: SignalingState,
    role: Option<Role>,
    media: Option<SessionMedia>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create an idle session with a fresh id
    pub fn new(
        channel: Arc<dyn Channel>,
        renderer: SharedRenderer,
        negotiators: Arc<dyn NegotiatorFactory>,
        stream: StreamConfig,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        debug!("Session {} created for channel {}", session_id, channel.id());
        Self {
            session_id,
            channel,
            renderer,
            negotiators,
            stream,
            state: SignalingState::Idle,
            role: None,
            media: None,
            created_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn channel_id(&self) -> &str {
        self.channel.id()
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether a negotiation handle exists
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn info(&self) -> SessionInfo {
        let (frames_published, frames_sent, candidates_sent) = self
            .media
            .as_ref()
            .map(|m| {
                (
                    m.publisher.frames_published(),
                    m.publisher.frames_sent(),
                    m.candidates.sent(),
                )
            })
            .unwrap_or_default();

        SessionInfo {
            session_id: self.session_id.clone(),
            channel_id: self.channel.id().to_string(),
            room_id: self.channel.room_id().to_string(),
            state: self.state,
            role: self.role,
            created_at: self.created_at,
            frames_published,
            frames_sent,
            candidates_sent,
        }
    }

    /// Create the negotiation handle and start streaming
    ///
    /// No-op when a handle already exists. As caller, also sends the offer.
    pub async fn start(&mut self, role: Role) -> Result<()> {
        if self.state == SignalingState::Closed {
            return Err(AppError::BadRequest(format!(
                "Session {} is closed",
                self.session_id
            )));
        }
        if self.media.is_some() {
            debug!("Session {} already started", self.session_id);
            return Ok(());
        }

        let candidates = CandidateSink::new(self.session_id.clone(), self.channel.clone());
        let negotiator = self
            .negotiators
            .create(&self.session_id, candidates.clone())
            .await?;

        let video = match negotiator
            .add_video_track(&self.stream.track_config(&self.session_id))
            .await
        {
            Ok(video) => video,
            Err(e) => {
                if let Err(close_err) = negotiator.close().await {
                    debug!("Close after failed start: {}", close_err);
                }
                return Err(e);
            }
        };

        let publisher = MediaPublisher::start(self.session_id.clone(), video);
        let timer = FrameTimer::start(
            FrameProducer::new(self.renderer.clone()),
            publisher.clone(),
            self.stream.frame_policy,
            self.session_id.clone(),
        );

        self.media = Some(SessionMedia {
            negotiator,
            candidates,
            publisher,
            timer,
        });
        self.role = Some(role);
        self.state = SignalingState::Negotiating;
        info!("Session {} started as {:?}", self.session_id, role);

        if role == Role::Caller {
            if let Err(e) = self.send_offer().await {
                if e.is_disconnect() {
                    return Err(e);
                }
                warn!("Session {} failed to send offer: {}", self.session_id, e);
            }
        }
        Ok(())
    }

    /// Handle an inbound signaling message
    ///
    /// Engine failures are logged and leave the session open. Only a
    /// disconnected channel is reported as an error.
    pub async fn handle_signal(&mut self, message: SignalMessage) -> Result<()> {
        if self.state == SignalingState::Closed {
            debug!("Session {} closed, dropping signal", self.session_id);
            return Ok(());
        }
        if message.is_echo_of(&self.session_id) {
            debug!("Session {} ignoring own signal", self.session_id);
            return Ok(());
        }

        let result = self.process_signal(&message).await;
        match result {
            Err(e) if e.is_disconnect() => Err(e),
            Err(e) => {
                warn!(
                    "Session {} signal from {} failed: {}",
                    self.session_id, message.origin_id, e
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn process_signal(&mut self, message: &SignalMessage) -> Result<()> {
        if self.media.is_none() {
            self.start(Role::Callee).await?;
        }

        match message.kind() {
            Some(SignalKind::SessionDescription(description)) => {
                self.apply_remote_description(description.clone()).await
            }
            Some(SignalKind::IceCandidate(candidate)) => {
                if candidate.is_end_of_candidates() {
                    debug!("Session {} remote gathering complete", self.session_id);
                    return Ok(());
                }
                self.negotiator()?.add_ice_candidate(candidate.clone()).await
            }
            None => {
                debug!("Session {} got signal without payload", self.session_id);
                Ok(())
            }
        }
    }

    async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        let sdp_type = description.sdp_type;
        self.negotiator()?.set_remote_description(description).await?;
        debug!("Session {} applied remote {}", self.session_id, sdp_type);

        if sdp_type == SdpType::Offer {
            let answer = self.negotiator()?.create_answer().await?;
            self.send_local_description(answer).await?;
        }

        self.state = SignalingState::Connected;
        info!("Session {} connected", self.session_id);
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<()> {
        let offer = self.negotiator()?.create_offer().await?;
        self.send_local_description(offer).await
    }

    /// Apply `description` locally, then send what the engine reports as local
    ///
    /// Candidates gathered meanwhile are flushed only after the description.
    async fn send_local_description(&self, description: SessionDescription) -> Result<()> {
        let media = self.media()?;
        media
            .negotiator
            .set_local_description(description.clone())
            .await?;
        let local = media
            .negotiator
            .local_description()
            .await
            .unwrap_or(description);
        debug!("Session {} sending local {}", self.session_id, local.sdp_type);
        emit_signal(
            self.channel.as_ref(),
            &SignalMessage::description(local, self.session_id.clone()),
        )?;
        media.candidates.release();
        Ok(())
    }

    fn media(&self) -> Result<&SessionMedia> {
        self.media.as_ref().ok_or_else(|| {
            AppError::Internal(format!("Session {} has no negotiator", self.session_id))
        })
    }

    fn negotiator(&self) -> Result<&dyn Negotiator> {
        self.media().map(|m| m.negotiator.as_ref())
    }

    /// Apply a scene-control event; false when the scene ignores it
    pub fn scene_event(&self, event: &str, data: &Value) -> bool {
        self.renderer.lock().handle_event(event, data)
    }

    /// Release everything the session owns; idempotent
    pub async fn close(&mut self) {
        if self.state == SignalingState::Closed {
            return;
        }
        self.state = SignalingState::Closed;
        if let Some(media) = self.media.take() {
            media.shutdown(&self.session_id).await;
        }
        info!("Session {} closed", self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNegotiatorFactory, Journal, RecordingChannel};
    use crate::video::format::Resolution;
    use crate::video::renderer::shared;
    use crate::video::scene::{TestScene, EVENT_ADD_BOX};
    use crate::webrtc::signaling::IceCandidate;
    use serde_json::json;

    fn stream() -> StreamConfig {
        StreamConfig {
            width: 16,
            height: 12,
            ..Default::default()
        }
    }

    fn session_with(
        channel: Arc<RecordingChannel>,
        factory: Arc<FakeNegotiatorFactory>,
    ) -> Session {
        let renderer = shared(Box::new(TestScene::new(Resolution::new(16, 12))));
        Session::new(channel, renderer, factory, stream())
    }

    fn offer_from(origin: &str) -> SignalMessage {
        SignalMessage::description(SessionDescription::offer("v=0\r\n"), origin)
    }

    #[tokio::test]
    async fn test_self_echo_is_ignored() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory.clone());

        let echo = offer_from(session.session_id());
        session.handle_signal(echo).await.unwrap();

        assert_eq!(factory.created(), 0);
        assert!(!session.has_media());
        assert_eq!(session.state(), SignalingState::Idle);
        assert!(channel.events().is_empty());
    }

    #[tokio::test]
    async fn test_offer_produces_single_answer_after_local_set() {
        let journal = Journal::default();
        let channel = Arc::new(RecordingChannel::new("c1", "lobby").with_journal(journal.clone()));
        let factory = Arc::new(FakeNegotiatorFactory::with_journal(journal.clone()));
        let mut session = session_with(channel.clone(), factory.clone());

        session.handle_signal(offer_from("peer")).await.unwrap();

        let signals = channel.signals();
        assert_eq!(signals.len(), 1);
        let answer = signals[0].sdp.as_ref().unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert_eq!(signals[0].origin_id, session.session_id());

        assert_eq!(
            *journal.lock(),
            vec![
                "add_track",
                "set_remote:offer",
                "create_answer",
                "set_local:answer",
                "emit:sdp:answer",
            ]
        );
        assert_eq!(factory.peer(0).local().as_ref(), Some(answer));
        assert_eq!(session.role(), Some(Role::Callee));
        assert_eq!(session.state(), SignalingState::Connected);
    }

    #[tokio::test]
    async fn test_first_candidate_creates_handle() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory.clone());

        let message = SignalMessage::candidate(IceCandidate::new("candidate:1"), "peer");
        session.handle_signal(message).await.unwrap();

        // Handle exists even though the candidate was rejected (no remote yet)
        assert_eq!(factory.created(), 1);
        assert!(session.has_media());
        assert_eq!(session.state(), SignalingState::Negotiating);
        assert!(factory.peer(0).candidates().is_empty());
    }

    #[tokio::test]
    async fn test_remote_candidates_applied_after_offer() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory.clone());

        session.handle_signal(offer_from("peer")).await.unwrap();
        let candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host").with_mid("0", 0);
        session
            .handle_signal(SignalMessage::candidate(candidate.clone(), "peer"))
            .await
            .unwrap();
        session
            .handle_signal(SignalMessage::candidate(IceCandidate::new(""), "peer"))
            .await
            .unwrap();

        assert_eq!(factory.peer(0).candidates(), vec![candidate]);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_local_candidates_follow_answer() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory.clone());
        session.start(Role::Callee).await.unwrap();

        // Gathered before the answer exists: held back
        let peer = factory.peer(0);
        assert!(peer.gather(Some(IceCandidate::new("candidate:host"))));
        assert!(!peer.gather(Some(IceCandidate::new(""))));
        assert!(channel.events().is_empty());

        session.handle_signal(offer_from("peer")).await.unwrap();
        assert!(peer.gather(Some(IceCandidate::new("candidate:srflx"))));
        assert!(!peer.gather(None));

        let signals = channel.signals();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].sdp.as_ref().unwrap().sdp_type, SdpType::Answer);
        assert_eq!(signals[1].ice.as_ref().unwrap().candidate, "candidate:host");
        assert_eq!(signals[2].ice.as_ref().unwrap().candidate, "candidate:srflx");
        assert!(signals.iter().all(|s| s.origin_id == session.session_id()));
        assert_eq!(session.info().candidates_sent, 2);
    }

    #[tokio::test]
    async fn test_caller_candidates_follow_offer() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        factory.gather_on_set_local("candidate:early");
        let mut session = session_with(channel.clone(), factory.clone());

        session.start(Role::Caller).await.unwrap();

        let signals = channel.signals();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].sdp.as_ref().unwrap().sdp_type, SdpType::Offer);
        assert_eq!(signals[1].ice.as_ref().unwrap().candidate, "candidate:early");
    }

    #[tokio::test]
    async fn test_caller_sends_offer_once() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory.clone());

        session.start(Role::Caller).await.unwrap();
        session.start(Role::Caller).await.unwrap();

        assert_eq!(factory.created(), 1);
        let signals = channel.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].sdp.as_ref().unwrap().sdp_type, SdpType::Offer);
        assert_eq!(session.state(), SignalingState::Negotiating);
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_sessions() {
        let a_channel = Arc::new(RecordingChannel::new("a", "lobby"));
        let b_channel = Arc::new(RecordingChannel::new("b", "lobby"));
        let a_factory = Arc::new(FakeNegotiatorFactory::default());
        let b_factory = Arc::new(FakeNegotiatorFactory::default());
        let mut a = session_with(a_channel.clone(), a_factory.clone());
        let mut b = session_with(b_channel.clone(), b_factory.clone());

        a.start(Role::Caller).await.unwrap();
        let offer = a_channel.signals().remove(0);
        b.handle_signal(offer).await.unwrap();
        let answer = b_channel.signals().remove(0);
        a.handle_signal(answer).await.unwrap();

        assert_eq!(a.state(), SignalingState::Connected);
        assert_eq!(b.state(), SignalingState::Connected);
        assert_eq!(
            a_factory.peer(0).remote().unwrap().sdp_type,
            SdpType::Answer
        );
        assert_eq!(b_factory.peer(0).remote().unwrap().sdp_type, SdpType::Offer);
        // Each side emitted exactly one description
        assert_eq!(a_channel.signals().len(), 1);
        assert_eq!(b_channel.signals().len(), 1);
    }

    #[tokio::test]
    async fn test_negotiation_error_keeps_session_open() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory.clone());

        let bad = SignalMessage::description(SessionDescription::offer("malformed"), "peer");
        session.handle_signal(bad).await.unwrap();

        assert_eq!(session.state(), SignalingState::Negotiating);
        assert!(channel.signals().is_empty());

        session.handle_signal(offer_from("peer")).await.unwrap();
        assert_eq!(session.state(), SignalingState::Connected);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_leaves_session_idle() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        factory.fail_create(true);
        let mut session = session_with(channel.clone(), factory.clone());

        session.handle_signal(offer_from("peer")).await.unwrap();
        assert!(!session.has_media());
        assert_eq!(session.state(), SignalingState::Idle);

        factory.fail_create(false);
        session.handle_signal(offer_from("peer")).await.unwrap();
        assert_eq!(session.state(), SignalingState::Connected);
    }

    #[tokio::test]
    async fn test_disconnected_channel_is_reported() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel.clone(), factory);
        channel.close();

        let result = session.handle_signal(offer_from("peer")).await;
        assert!(matches!(result, Err(ref e) if e.is_disconnect()));
    }

    #[tokio::test]
    async fn test_close_releases_media() {
        let journal = Journal::default();
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::with_journal(journal.clone()));
        let mut session = session_with(channel.clone(), factory.clone());
        session.start(Role::Callee).await.unwrap();

        session.close().await;
        session.close().await;

        let peer = factory.peer(0);
        assert!(peer.is_closed());
        assert!(peer.video.is_stopped());
        assert!(!session.has_media());
        assert_eq!(session.state(), SignalingState::Closed);
        assert_eq!(journal.lock().iter().filter(|e| *e == "close").count(), 1);

        session.handle_signal(offer_from("peer")).await.unwrap();
        assert_eq!(factory.created(), 1);
        assert!(session.start(Role::Caller).await.is_err());
    }

    #[tokio::test]
    async fn test_frames_flow_after_start() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let mut session = session_with(channel, factory.clone());
        session.start(Role::Callee).await.unwrap();

        let video = factory.peer(0).video.clone();
        for _ in 0..200 {
            if video.written() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(video.written() > 0);
        assert!(session.info().frames_published > 0);
        session.close().await;
    }

    #[tokio::test]
    async fn test_scene_events_reach_renderer() {
        let channel = Arc::new(RecordingChannel::new("c1", "lobby"));
        let factory = Arc::new(FakeNegotiatorFactory::default());
        let session = session_with(channel, factory);

        assert!(session.scene_event(EVENT_ADD_BOX, &json!({})));
        assert!(!session.scene_event("unknown", &json!(null)));
    }
}
