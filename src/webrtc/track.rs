//! Outbound H.264 video track
//!
//! Each session carries exactly one of these. Raw YUV420P frames are encoded
//! with openh264 and written to a `TrackLocalStaticSample`, which handles
//! RTP packetization once a peer is bound.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use openh264::encoder::{
    BitRate, Encoder, EncoderConfig, FrameRate, FrameType, IntraFramePeriod, RateControlMode,
    SpsPpsStrategy, UsageType,
};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::negotiator::VideoSink;
use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

const H264_MIME: &str = "video/H264";
const H264_CLOCK_RATE: u32 = 90_000;
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Sample duration bounds when measured between frame captures
const MIN_SAMPLE_DURATION: Duration = Duration::from_millis(1);
const MAX_SAMPLE_DURATION: Duration = Duration::from_millis(200);

/// Video track configuration
#[derive(Debug, Clone)]
pub struct VideoTrackConfig {
    pub track_id: String,
    pub stream_id: String,
    pub resolution: Resolution,
    /// Rate hint for the encoder and the first sample's duration
    pub nominal_fps: u32,
    pub bitrate_kbps: u32,
    /// Frames between periodic IDRs; 0 leaves the period to the encoder
    pub keyframe_interval: u32,
}

impl Default for VideoTrackConfig {
    fn default() -> Self {
        Self {
            track_id: "video".to_string(),
            stream_id: "scenecast".to_string(),
            resolution: Resolution::VGA,
            nominal_fps: 30,
            bitrate_kbps: 1000,
            keyframe_interval: 60,
        }
    }
}

impl VideoTrackConfig {
    fn nominal_duration(&self) -> Duration {
        Duration::from_secs(1) / self.nominal_fps.max(1)
    }
}

/// Track statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct VideoTrackStats {
    pub frames_sent: u64,
    pub keyframes_sent: u64,
    pub bytes_sent: u64,
}

/// H.264 encoding track
pub struct H264VideoTrack {
    config: VideoTrackConfig,
    track: Arc<TrackLocalStaticSample>,
    encoder: Mutex<Encoder>,
    last_capture: Mutex<Option<Instant>>,
    running: AtomicBool,
    frames_sent: AtomicU64,
    keyframes_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl H264VideoTrack {
    /// Create the track and its encoder
    ///
    /// 4:2:0 encoding needs even dimensions.
    pub fn new(config: VideoTrackConfig) -> Result<Self> {
        let res = config.resolution;
        if !res.is_valid() || res.width % 2 != 0 || res.height % 2 != 0 {
            return Err(AppError::Media(format!(
                "H.264 track needs even, non-zero dimensions, got {}",
                res
            )));
        }

        let encoder_config = EncoderConfig::new()
            .usage_type(UsageType::ScreenContentRealTime)
            .max_frame_rate(FrameRate::from_hz(config.nominal_fps.max(1) as f32))
            .bitrate(BitRate::from_bps(config.bitrate_kbps.saturating_mul(1000)))
            .rate_control_mode(RateControlMode::Bitrate)
            .sps_pps_strategy(SpsPpsStrategy::ConstantId)
            .intra_frame_period(IntraFramePeriod::from_num_frames(config.keyframe_interval));

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), encoder_config)
            .map_err(|e| AppError::Media(format!("Failed to create H.264 encoder: {}", e)))?;

        let capability = RTCRtpCodecCapability {
            mime_type: H264_MIME.to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: H264_FMTP.to_string(),
            rtcp_feedback: vec![],
        };

        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            config.track_id.clone(),
            config.stream_id.clone(),
        ));

        debug!(
            "Created H.264 track {} ({}, {} kbps)",
            config.track_id, res, config.bitrate_kbps
        );

        Ok(Self {
            config,
            track,
            encoder: Mutex::new(encoder),
            last_capture: Mutex::new(None),
            running: AtomicBool::new(true),
            frames_sent: AtomicU64::new(0),
            keyframes_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        })
    }

    /// Track handle for `RTCPeerConnection::add_track`
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn config(&self) -> &VideoTrackConfig {
        &self.config
    }

    /// Make the next encoded frame an IDR
    pub fn request_keyframe(&self) {
        self.encoder.lock().force_intra_frame();
    }

    pub fn stats(&self) -> VideoTrackStats {
        VideoTrackStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            keyframes_sent: self.keyframes_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    fn encode(&self, frame: &VideoFrame) -> Result<(Bytes, bool)> {
        let res = self.config.resolution;
        if frame.format != PixelFormat::Yuv420 || frame.resolution != res {
            return Err(AppError::Media(format!(
                "Track expects {} {}, got {} {}",
                PixelFormat::Yuv420,
                res,
                frame.format,
                frame.resolution
            )));
        }

        let yuv = YUVBuffer::from_vec(
            frame.data().to_vec(),
            res.width as usize,
            res.height as usize,
        );

        let mut encoder = self.encoder.lock();
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| AppError::Media(format!("H.264 encoding failed: {}", e)))?;
        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        Ok((Bytes::from(bitstream.to_vec()), is_keyframe))
    }

    fn sample_duration(&self, captured: Instant) -> Duration {
        let mut last = self.last_capture.lock();
        match last.replace(captured) {
            Some(prev) => captured
                .saturating_duration_since(prev)
                .clamp(MIN_SAMPLE_DURATION, MAX_SAMPLE_DURATION),
            None => self.config.nominal_duration(),
        }
    }
}

#[async_trait]
impl VideoSink for H264VideoTrack {
    async fn write_frame(&self, frame: &VideoFrame) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(AppError::Media("Video track stopped".to_string()));
        }

        let (data, is_keyframe) = self.encode(frame)?;
        if data.is_empty() {
            // Encoder skipped the frame (rate control)
            return Ok(());
        }

        let len = data.len() as u64;
        let sample = Sample {
            data,
            duration: self.sample_duration(frame.capture_ts),
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| AppError::Transport(format!("Failed to write sample: {}", e)))?;

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes_sent.fetch_add(1, Ordering::Relaxed);
        }
        trace!(
            "Frame {} sent: {} bytes, keyframe={}",
            frame.sequence,
            len,
            is_keyframe
        );
        Ok(())
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("Video track {} stopped", self.config.track_id);
        }
    }
}
