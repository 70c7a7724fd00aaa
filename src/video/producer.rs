//! Frame production loop
//!
//! ```text
//! Renderer (bottom-up RGBA)
//!        |  render + read_pixels
//!        v
//! PixelConverter (flip → I420)
//!        |
//!        v
//! FrameSink (MediaPublisher)
//! ```
//!
//! One [`FrameTimer`] drives one [`FrameProducer`]. Each tick completes the
//! whole render → convert → publish sequence synchronously, so ticks of the
//! same session never overlap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::convert::PixelConverter;
use super::frame::VideoFrame;
use super::renderer::SharedRenderer;
use crate::error::Result;
use crate::utils::LogThrottler;

/// Interval between repeated render-failure log lines for one session
const RENDER_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How often the frame timer ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePolicy {
    /// Tick as fast as the scheduler allows, yielding between ticks
    Uncapped,
    /// Tick at a fixed rate, skipping missed ticks
    Fixed { fps: u32 },
}

impl Default for FramePolicy {
    fn default() -> Self {
        Self::Uncapped
    }
}

impl std::fmt::Display for FramePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramePolicy::Uncapped => write!(f, "uncapped"),
            FramePolicy::Fixed { fps } => write!(f, "{} fps", fps),
        }
    }
}

/// Receives produced frames
pub trait FrameSink: Send + Sync {
    /// Hand off one frame without blocking
    ///
    /// An error means the sink no longer accepts frames.
    fn publish(&self, frame: VideoFrame) -> Result<()>;
}

/// Producer counters
#[derive(Debug, Default)]
pub struct ProducerStats {
    frames_produced: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ProducerStats {
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Pulls frames from a renderer and converts them to I420
pub struct FrameProducer {
    renderer: SharedRenderer,
    converter: PixelConverter,
    readback: Vec<u8>,
    sequence: u64,
}

impl FrameProducer {
    pub fn new(renderer: SharedRenderer) -> Self {
        let (resolution, readback_len) = {
            let r = renderer.lock();
            (r.resolution(), r.readback_len())
        };

        Self {
            renderer,
            converter: PixelConverter::rgba_to_yuv420p(resolution),
            readback: vec![0u8; readback_len],
            sequence: 0,
        }
    }

    /// Render, read back, correct origin and convert one frame
    pub fn produce(&mut self) -> Result<VideoFrame> {
        {
            let mut renderer = self.renderer.lock();
            renderer.render()?;
            renderer.read_pixels(&mut self.readback)?;
        }

        let data = self.converter.convert(&self.readback)?.to_vec();
        self.sequence += 1;

        Ok(VideoFrame::from_vec(
            data,
            self.converter.resolution(),
            self.converter.output_format(),
            self.sequence,
        ))
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Published,
    Dropped,
    SinkClosed,
}

fn run_tick(
    producer: &mut FrameProducer,
    sink: &dyn FrameSink,
    stats: &ProducerStats,
    throttler: &LogThrottler,
    label: &str,
) -> Tick {
    match producer.produce() {
        Ok(frame) => match sink.publish(frame) {
            Ok(()) => {
                stats.frames_produced.fetch_add(1, Ordering::Relaxed);
                throttler.clear("render");
                Tick::Published
            }
            Err(e) => {
                debug!("Frame sink for {} closed: {}", label, e);
                Tick::SinkClosed
            }
        },
        Err(e) => {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            if throttler.should_log("render") {
                warn!("Frame dropped for {}: {}", label, e);
            }
            Tick::Dropped
        }
    }
}

/// Repeating timer driving a [`FrameProducer`]
///
/// Dropping the timer stops it.
pub struct FrameTimer {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stats: Arc<ProducerStats>,
}

impl FrameTimer {
    /// Spawn the frame loop
    pub fn start(
        mut producer: FrameProducer,
        sink: Arc<dyn FrameSink>,
        policy: FramePolicy,
        label: impl Into<String>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let stats = Arc::new(ProducerStats::default());
        let label = label.into();

        let task_cancel = cancel.clone();
        let task_stats = stats.clone();
        let handle = tokio::spawn(async move {
            let throttler = LogThrottler::new(RENDER_ERROR_LOG_INTERVAL);
            info!("Frame timer started for {} ({})", label, policy);

            let mut interval = match policy {
                FramePolicy::Fixed { fps } => {
                    let period = Duration::from_micros(1_000_000 / fps.max(1) as u64);
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    Some(interval)
                }
                FramePolicy::Uncapped => None,
            };

            loop {
                match interval.as_mut() {
                    Some(interval) => {
                        tokio::select! {
                            _ = task_cancel.cancelled() => break,
                            _ = interval.tick() => {}
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = task_cancel.cancelled() => break,
                            _ = tokio::task::yield_now() => {}
                        }
                    }
                }

                if task_cancel.is_cancelled() {
                    break;
                }
                let tick = run_tick(&mut producer, sink.as_ref(), &task_stats, &throttler, &label);
                if tick == Tick::SinkClosed {
                    break;
                }
            }

            info!(
                "Frame timer stopped for {} ({} produced, {} dropped)",
                label,
                task_stats.frames_produced(),
                task_stats.frames_dropped()
            );
        });

        Self {
            cancel,
            handle: Some(handle),
            stats,
        }
    }

    /// Stop the timer; no tick runs after this returns
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether the timer task is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }
}

impl Drop for FrameTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingRenderer, RecordingSink};
    use crate::video::format::{PixelFormat, Resolution};
    use crate::video::renderer::shared;
    use crate::video::scene::TestScene;

    #[test]
    fn test_produce_converts_to_i420() {
        let resolution = Resolution::new(8, 6);
        let mut producer = FrameProducer::new(shared(Box::new(TestScene::new(resolution))));
        let frame = producer.produce().unwrap();
        assert_eq!(frame.format, PixelFormat::Yuv420);
        assert_eq!(frame.len(), PixelFormat::Yuv420.frame_size(resolution));
        assert_eq!(frame.sequence, 1);
        assert_eq!(producer.produce().unwrap().sequence, 2);
    }

    #[test]
    fn test_failed_tick_leaves_previous_frame() {
        let renderer = FailingRenderer::new(Resolution::new(4, 4));
        let fail = renderer.fail_switch();
        let mut producer = FrameProducer::new(shared(Box::new(renderer)));
        let sink = RecordingSink::default();
        let stats = ProducerStats::default();
        let throttler = LogThrottler::with_secs(60);

        assert_eq!(
            run_tick(&mut producer, &sink, &stats, &throttler, "t"),
            Tick::Published
        );
        let before = sink.latest().unwrap();

        fail.store(true, Ordering::SeqCst);
        assert_eq!(
            run_tick(&mut producer, &sink, &stats, &throttler, "t"),
            Tick::Dropped
        );

        let after = sink.latest().unwrap();
        assert_eq!(after.sequence, before.sequence);
        assert_eq!(after.data(), before.data());
        assert_eq!(sink.count(), 1);
        assert_eq!(stats.frames_dropped(), 1);
    }

    #[tokio::test]
    async fn test_timer_stops_on_request() {
        let sink = Arc::new(RecordingSink::default());
        let producer = FrameProducer::new(shared(Box::new(TestScene::new(Resolution::new(4, 4)))));
        let mut timer = FrameTimer::start(producer, sink.clone(), FramePolicy::Uncapped, "t");

        while sink.count() < 3 {
            tokio::task::yield_now().await;
        }
        timer.stop();
        assert!(!timer.is_running());

        let count = sink.count();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.count(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_policy() {
        let sink = Arc::new(RecordingSink::default());
        let producer = FrameProducer::new(shared(Box::new(TestScene::new(Resolution::new(4, 4)))));
        let timer = FrameTimer::start(producer, sink.clone(), FramePolicy::Fixed { fps: 10 }, "t");

        tokio::time::sleep(Duration::from_millis(250)).await;
        let count = sink.count();
        assert!((2..=4).contains(&count), "got {} frames", count);
        drop(timer);
    }

    #[tokio::test]
    async fn test_timer_exits_when_sink_closes() {
        let sink = Arc::new(RecordingSink::default());
        let producer = FrameProducer::new(shared(Box::new(TestScene::new(Resolution::new(4, 4)))));
        let timer = FrameTimer::start(producer, sink.clone(), FramePolicy::Uncapped, "t");

        sink.close();
        for _ in 0..50 {
            if !timer.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!timer.is_running());
    }
}
