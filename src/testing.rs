//! In-process fakes for unit tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::{Channel, EVENT_MESSAGE};
use crate::error::{AppError, Result};
use crate::video::format::Resolution;
use crate::video::frame::VideoFrame;
use crate::video::producer::FrameSink;
use crate::video::renderer::Renderer;
use crate::webrtc::negotiator::{CandidateSink, Negotiator, NegotiatorFactory, VideoSink};
use crate::webrtc::signaling::{IceCandidate, SdpType, SessionDescription, SignalMessage};
use crate::webrtc::track::VideoTrackConfig;

/// Ordered log of calls shared between fakes
pub type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Option<Journal>, entry: String) {
    if let Some(journal) = journal {
        journal.lock().push(entry);
    }
}

/// Channel that records every emitted event
pub struct RecordingChannel {
    id: String,
    room: String,
    events: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
    journal: Option<Journal>,
}

impl RecordingChannel {
    pub fn new(id: &str, room: &str) -> Self {
        Self {
            id: id.to_string(),
            room: room.to_string(),
            events: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            journal: None,
        }
    }

    /// Also log emissions to `journal`
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    /// Emitted `"message"` events decoded as signaling messages
    pub fn signals(&self) -> Vec<SignalMessage> {
        self.events
            .lock()
            .iter()
            .filter(|(event, _)| event == EVENT_MESSAGE)
            .map(|(_, data)| serde_json::from_value(data.clone()).unwrap())
            .collect()
    }

    /// Make further emits fail as if the client disconnected
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Channel for RecordingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn room_id(&self) -> &str {
        &self.room
    }

    fn emit(&self, event: &str, data: Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ChannelClosed(self.id.clone()));
        }
        let entry = if event == EVENT_MESSAGE {
            match (data.pointer("/sdp/type"), data.get("ice")) {
                (Some(Value::String(kind)), _) => format!("emit:sdp:{}", kind),
                (_, Some(_)) => "emit:ice".to_string(),
                _ => format!("emit:{}", event),
            }
        } else {
            format!("emit:{}", event)
        };
        note(&self.journal, entry);
        self.events.lock().push((event.to_string(), data));
        Ok(())
    }
}

/// Frame sink keeping the latest frame
#[derive(Default)]
pub struct RecordingSink {
    latest: Mutex<Option<VideoFrame>>,
    count: AtomicU64,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn latest(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl FrameSink for RecordingSink {
    fn publish(&self, frame: VideoFrame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::ChannelClosed("sink".to_string()));
        }
        *self.latest.lock() = Some(frame);
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Renderer whose read-back fails while its switch is on
pub struct FailingRenderer {
    resolution: Resolution,
    fail: Arc<AtomicBool>,
    renders: u8,
}

impl FailingRenderer {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            fail: Arc::new(AtomicBool::new(false)),
            renders: 0,
        }
    }

    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        self.fail.clone()
    }
}

impl Renderer for FailingRenderer {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn render(&mut self) -> Result<()> {
        self.renders = self.renders.wrapping_add(1);
        Ok(())
    }

    fn read_pixels(&mut self, out: &mut [u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Render("read-back failed".to_string()));
        }
        out.fill(self.renders.wrapping_mul(40));
        Ok(())
    }
}

/// Video sink counting written frames
#[derive(Default)]
pub struct FakeVideoSink {
    written: AtomicU64,
    last_sequence: Mutex<Option<u64>>,
    stopped: AtomicBool,
}

impl FakeVideoSink {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        *self.last_sequence.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSink for FakeVideoSink {
    async fn write_frame(&self, frame: &VideoFrame) -> Result<()> {
        if self.is_stopped() {
            return Err(AppError::Media("stopped".to_string()));
        }
        *self.last_sequence.lock() = Some(frame.sequence);
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Observable state of one fake peer connection
///
/// Descriptions whose SDP contains `"malformed"` are rejected.
pub struct FakePeer {
    pub session_id: String,
    pub video: Arc<FakeVideoSink>,
    journal: Option<Journal>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    candidate_sink: CandidateSink,
    /// Candidate reported from inside `set_local_description`
    gather_on_set_local: Option<String>,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn local(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the engine gathering a local candidate
    pub fn gather(&self, candidate: Option<IceCandidate>) -> bool {
        self.candidate_sink.on_local_candidate(candidate)
    }
}

struct FakeNegotiator {
    peer: Arc<FakePeer>,
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription> {
        note(&self.peer.journal, "create_offer".to_string());
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\n",
            self.peer.session_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        note(&self.peer.journal, "create_answer".to_string());
        match self.peer.remote() {
            Some(remote) if remote.sdp_type == SdpType::Offer => {
                Ok(SessionDescription::answer(format!(
                    "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\n",
                    self.peer.session_id
                )))
            }
            _ => Err(AppError::Negotiation("no remote offer".to_string())),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        note(&self.peer.journal, format!("set_local:{}", description.sdp_type));
        *self.peer.local.lock() = Some(description);
        if let Some(ref candidate) = self.peer.gather_on_set_local {
            self.peer.gather(Some(IceCandidate::new(candidate.clone())));
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp.contains("malformed") {
            return Err(AppError::Negotiation("malformed SDP".to_string()));
        }
        note(&self.peer.journal, format!("set_remote:{}", description.sdp_type));
        *self.peer.remote.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.peer.remote().is_none() {
            return Err(AppError::Negotiation("no remote description".to_string()));
        }
        note(&self.peer.journal, "add_ice".to_string());
        self.peer.candidates.lock().push(candidate);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer.local()
    }

    async fn add_video_track(&self, _config: &VideoTrackConfig) -> Result<Arc<dyn VideoSink>> {
        note(&self.peer.journal, "add_track".to_string());
        Ok(self.peer.video.clone())
    }

    async fn close(&self) -> Result<()> {
        note(&self.peer.journal, "close".to_string());
        self.peer.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`FakePeer`]-backed negotiators
#[derive(Default)]
pub struct FakeNegotiatorFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    journal: Option<Journal>,
    fail_create: AtomicBool,
    gather_on_set_local: Mutex<Option<String>>,
}

impl FakeNegotiatorFactory {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Default::default()
        }
    }

    /// Make subsequent `create` calls fail
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock()[index].clone()
    }

    /// Peers created from now on gather `candidate` while setting the local description
    pub fn gather_on_set_local(&self, candidate: &str) {
        *self.gather_on_set_local.lock() = Some(candidate.to_string());
    }
}

#[async_trait]
impl NegotiatorFactory for FakeNegotiatorFactory {
    async fn create(
        &self,
        session_id: &str,
        candidates: CandidateSink,
    ) -> Result<Box<dyn Negotiator>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Negotiation("engine unavailable".to_string()));
        }
        let peer = Arc::new(FakePeer {
            session_id: session_id.to_string(),
            video: Arc::new(FakeVideoSink::default()),
            journal: self.journal.clone(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            candidate_sink: candidates,
            gather_on_set_local: self.gather_on_set_local.lock().clone(),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(peer.clone());
        Ok(Box::new(FakeNegotiator { peer }))
    }
}
