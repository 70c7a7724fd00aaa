//! Negotiation engine seam
//!
//! The engine performs ICE/SDP negotiation and media transport. Sessions
//! drive it only through these traits; [`super::peer`] implements them on
//! top of webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::signaling::{IceCandidate, SessionDescription, SignalMessage};
use super::track::VideoTrackConfig;
use crate::channel::{emit_signal, Channel};
use crate::error::Result;
use crate::video::frame::VideoFrame;

/// One peer connection
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Local description as currently applied (may differ from the one passed in)
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Register the single outbound video track and return its frame sink
    async fn add_video_track(&self, config: &VideoTrackConfig) -> Result<Arc<dyn VideoSink>>;

    async fn close(&self) -> Result<()>;
}

/// Creates negotiators for new sessions
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    /// `candidates` must receive every locally gathered ICE candidate
    async fn create(&self, session_id: &str, candidates: CandidateSink)
        -> Result<Box<dyn Negotiator>>;
}

/// Outbound video sample sink owned by the negotiation engine
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Encode and send one frame
    async fn write_frame(&self, frame: &VideoFrame) -> Result<()>;

    /// Release the track; later writes fail
    fn stop(&self);
}

#[derive(Default)]
struct CandidateQueue {
    /// Set once the local description has been sent
    released: bool,
    pending: Vec<IceCandidate>,
    sent: u64,
}

/// Forwards locally gathered ICE candidates to the peer
///
/// The engine starts gathering while the local description is being
/// applied, before the session has sent it. Candidates reported in that
/// window are held and flushed in gathering order by [`CandidateSink::release`],
/// so the peer never receives a candidate ahead of its description.
#[derive(Clone)]
pub struct CandidateSink {
    session_id: String,
    channel: Arc<dyn Channel>,
    queue: Arc<Mutex<CandidateQueue>>,
}

impl CandidateSink {
    pub fn new(session_id: impl Into<String>, channel: Arc<dyn Channel>) -> Self {
        Self {
            session_id: session_id.into(),
            channel,
            queue: Arc::new(Mutex::new(CandidateQueue::default())),
        }
    }

    /// Called by the engine for each gathered candidate
    ///
    /// `None` or an empty candidate is the end of gathering and is not
    /// signaled. Returns whether the candidate was sent or held for sending.
    pub fn on_local_candidate(&self, candidate: Option<IceCandidate>) -> bool {
        let Some(candidate) = candidate.filter(|c| !c.is_end_of_candidates()) else {
            debug!("ICE gathering complete for session {}", self.session_id);
            return false;
        };

        let mut queue = self.queue.lock();
        if !queue.released {
            debug!(
                "Holding ICE candidate for {} until the local description is sent",
                self.session_id
            );
            queue.pending.push(candidate);
            return true;
        }
        self.send(&mut queue, candidate)
    }

    /// Mark the local description as sent and flush held candidates
    ///
    /// Returns how many candidates were flushed; later calls flush nothing.
    pub fn release(&self) -> usize {
        let mut queue = self.queue.lock();
        if queue.released {
            return 0;
        }
        queue.released = true;

        let pending = std::mem::take(&mut queue.pending);
        let count = pending.len();
        for candidate in pending {
            self.send(&mut queue, candidate);
        }
        if count > 0 {
            debug!("Flushed {} held ICE candidates for {}", count, self.session_id);
        }
        count
    }

    fn send(&self, queue: &mut CandidateQueue, candidate: IceCandidate) -> bool {
        debug!("Local ICE candidate for {}: {}", self.session_id, candidate.candidate);
        let message = SignalMessage::candidate(candidate, self.session_id.clone());
        match emit_signal(self.channel.as_ref(), &message) {
            Ok(()) => {
                queue.sent += 1;
                true
            }
            Err(e) => {
                warn!("Failed to send ICE candidate for {}: {}", self.session_id, e);
                false
            }
        }
    }

    /// Candidates transmitted so far
    pub fn sent(&self) -> u64 {
        self.queue.lock().sent
    }
}
