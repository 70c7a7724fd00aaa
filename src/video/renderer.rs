//! Renderer interface
//!
//! The renderer is an external collaborator: it draws the current scene state
//! into an off-screen framebuffer and reads it back as RGBA, 8 bits per
//! channel, with row 0 at the **bottom** (framebuffer convention).

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::format::{PixelFormat, Resolution};
use crate::error::Result;

/// Off-screen scene renderer
pub trait Renderer: Send {
    /// Framebuffer size
    fn resolution(&self) -> Resolution;

    /// Draw the current scene state into the framebuffer
    fn render(&mut self) -> Result<()>;

    /// Read back the full framebuffer as bottom-up RGBA into `out`
    ///
    /// `out` is exactly `width * height * 4` bytes.
    fn read_pixels(&mut self, out: &mut [u8]) -> Result<()>;

    /// Apply a scene-control event from the peer
    ///
    /// Returns false when the event is not understood.
    fn handle_event(&mut self, _event: &str, _data: &Value) -> bool {
        false
    }

    /// Size of a read-back buffer for this renderer
    fn readback_len(&self) -> usize {
        PixelFormat::Rgba.frame_size(self.resolution())
    }
}

/// Renderer shared between a session's event handling and its frame timer
pub type SharedRenderer = Arc<Mutex<Box<dyn Renderer>>>;

/// Wrap a renderer for sharing
pub fn shared(renderer: Box<dyn Renderer>) -> SharedRenderer {
    Arc::new(Mutex::new(renderer))
}

/// Creates one scene per connected peer
pub trait SceneFactory: Send + Sync {
    fn create(&self, resolution: Resolution) -> Box<dyn Renderer>;
}
