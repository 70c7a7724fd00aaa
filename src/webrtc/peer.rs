//! webrtc-rs negotiation engine

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::packet::Packet;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::negotiator::{CandidateSink, Negotiator, NegotiatorFactory, VideoSink};
use super::signaling::{IceCandidate, SdpType, SessionDescription};
use super::track::{H264VideoTrack, VideoTrackConfig};
use crate::error::{AppError, Result};

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| AppError::Negotiation(format!("Invalid SDP {}: {}", description.sdp_type, e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(AppError::Negotiation(format!(
            "Unsupported description type: {}",
            other
        ))),
    }
}

/// Outbound track shared with the connection callbacks
type TrackSlot = Arc<Mutex<Option<Arc<H264VideoTrack>>>>;

/// True if the receiver asked for a fresh IDR (PLI or FIR)
fn wants_keyframe(packets: &[Box<dyn Packet + Send + Sync>]) -> bool {
    packets.iter().any(|packet| {
        let packet = packet.as_any();
        packet.is::<PictureLossIndication>() || packet.is::<FullIntraRequest>()
    })
}

/// React to a connection state change
///
/// A peer that just connected has missed the stream's first IDR, so the
/// next encoded frame is forced to be one. Returns whether a keyframe was
/// requested.
fn handle_state_change(slot: &TrackSlot, session_id: &str, state: RTCPeerConnectionState) -> bool {
    info!("Peer {} connection state: {}", session_id, state);
    if state != RTCPeerConnectionState::Connected {
        return false;
    }

    let track = slot.lock().clone();
    match track {
        Some(track) => {
            info!("Requesting keyframe for peer {} after connect", session_id);
            track.request_keyframe();
            true
        }
        None => false,
    }
}

/// Peer connection backed by webrtc-rs
pub struct WebRtcNegotiator {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    video_track: TrackSlot,
}

impl WebRtcNegotiator {
    /// Create a new peer connection
    pub async fn new(
        config: &WebRtcConfig,
        session_id: impl Into<String>,
        candidates: CandidateSink,
    ) -> Result<Self> {
        let session_id = session_id.into();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::Negotiation(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to create peer connection: {}", e))
        })?;

        let negotiator = Self {
            session_id,
            pc: Arc::new(pc),
            video_track: Arc::new(Mutex::new(None)),
        };
        negotiator.setup_event_handlers(candidates);

        Ok(negotiator)
    }

    fn setup_event_handlers(&self, candidates: CandidateSink) {
        let session_id = self.session_id.clone();
        let video_track = self.video_track.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                handle_state_change(&video_track, &session_id, s);
                Box::pin(async {})
            }));

        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidates = candidates.clone();
                Box::pin(async move {
                    let candidate = match candidate.map(|c| c.to_json()) {
                        Some(Ok(init)) => Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                        Some(Err(e)) => {
                            warn!("Failed to serialize ICE candidate: {}", e);
                            return;
                        }
                        None => None,
                    };
                    candidates.on_local_candidate(candidate);
                })
            }));

        let session_id = self.session_id.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let session_id = session_id.clone();
                Box::pin(async move {
                    info!(
                        "Peer {} got remote stream: {} ({})",
                        session_id,
                        track.id(),
                        track.kind()
                    );
                })
            },
        ));
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.pc.local_description().await?;
        from_rtc_description(description).ok()
    }

    async fn add_video_track(&self, config: &VideoTrackConfig) -> Result<Arc<dyn VideoSink>> {
        if self.video_track.lock().is_some() {
            return Err(AppError::Media(format!(
                "Session {} already has a video track",
                self.session_id
            )));
        }

        let track = Arc::new(H264VideoTrack::new(config.clone())?);
        let sender = self
            .pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| AppError::Media(format!("Failed to add video track: {}", e)))?;

        // Read RTCP so interceptors keep running and PLI/FIR reach the encoder
        let session_id = self.session_id.clone();
        let rtcp_track = track.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while let Ok((packets, _)) = sender.read(&mut buf).await {
                if wants_keyframe(&packets) {
                    debug!("Peer {} requested a keyframe", session_id);
                    rtcp_track.request_keyframe();
                }
            }
            debug!("RTCP reader for {} exited", session_id);
        });

        *self.video_track.lock() = Some(track.clone());
        info!("Video track added to peer {}", self.session_id);
        Ok(track)
    }

    async fn close(&self) -> Result<()> {
        let track = self.video_track.lock().take();
        if let Some(track) = track {
            track.stop();
        }
        self.pc
            .close()
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}

/// Builds [`WebRtcNegotiator`]s from the current WebRTC config
pub struct WebRtcNegotiatorFactory {
    config: WebRtcConfig,
}

impl WebRtcNegotiatorFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NegotiatorFactory for WebRtcNegotiatorFactory {
    async fn create(
        &self,
        session_id: &str,
        candidates: CandidateSink,
    ) -> Result<Box<dyn Negotiator>> {
        let negotiator = WebRtcNegotiator::new(&self.config, session_id, candidates).await?;
        Ok(Box::new(negotiator))
    }
}
