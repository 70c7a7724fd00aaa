//! Per-session media publisher
//!
//! The frame timer hands each converted frame to [`MediaPublisher::publish`],
//! which never blocks: it replaces the latest-frame slot and returns. A pump
//! task drains the slot into the session's [`VideoSink`]. When encoding falls
//! behind, intermediate frames are overwritten and never sent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::negotiator::VideoSink;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::video::frame::VideoFrame;
use crate::video::producer::FrameSink;

/// Latest-frame publisher for one session
pub struct MediaPublisher {
    session_id: String,
    latest: watch::Sender<Option<VideoFrame>>,
    accepting: AtomicBool,
    sink: Arc<dyn VideoSink>,
    pump: Mutex<Option<JoinHandle<()>>>,
    frames_published: AtomicU64,
    frames_sent: Arc<AtomicU64>,
}

impl MediaPublisher {
    /// Create the publisher and spawn its pump
    pub fn start(session_id: impl Into<String>, sink: Arc<dyn VideoSink>) -> Arc<Self> {
        let session_id = session_id.into();
        let (latest, mut rx) = watch::channel::<Option<VideoFrame>>(None);
        let frames_sent = Arc::new(AtomicU64::new(0));

        let pump_sink = sink.clone();
        let pump_sent = frames_sent.clone();
        let pump_id = session_id.clone();
        let pump = tokio::spawn(async move {
            let throttler = LogThrottler::with_secs(5);
            while rx.changed().await.is_ok() {
                let frame = rx.borrow_and_update().clone();
                let Some(frame) = frame else {
                    continue;
                };
                match pump_sink.write_frame(&frame).await {
                    Ok(()) => {
                        pump_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        if throttler.should_log("write_frame") {
                            debug!("Session {} frame write failed: {}", pump_id, e);
                        }
                    }
                }
            }
            debug!("Publisher pump for {} exited", pump_id);
        });

        info!("Media publisher started for session {}", session_id);

        Arc::new(Self {
            session_id,
            latest,
            accepting: AtomicBool::new(true),
            sink,
            pump: Mutex::new(Some(pump)),
            frames_published: AtomicU64::new(0),
            frames_sent,
        })
    }

    /// Most recently published frame
    pub fn latest(&self) -> Option<VideoFrame> {
        self.latest.borrow().clone()
    }

    /// Frames accepted by [`FrameSink::publish`]
    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    /// Frames the sink accepted
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting frames and release the track; idempotent
    pub fn stop(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.sink.stop();
        info!(
            "Media publisher stopped for session {} ({} published, {} sent)",
            self.session_id,
            self.frames_published(),
            self.frames_sent()
        );
    }
}

impl FrameSink for MediaPublisher {
    fn publish(&self, frame: VideoFrame) -> Result<()> {
        if !self.is_accepting() {
            return Err(AppError::ChannelClosed(format!(
                "Publisher for {} stopped",
                self.session_id
            )));
        }
        self.latest.send_replace(Some(frame));
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MediaPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}
