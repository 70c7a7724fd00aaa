//! Built-in software scene
//!
//! A flat-shaded test scene so the server streams something meaningful
//! without a GPU: a sky gradient, a scrolling ground checkerboard viewed
//! from a movable camera, and any number of orange boxes.

use serde_json::Value;
use tracing::debug;

use super::format::{PixelFormat, Resolution};
use super::renderer::{Renderer, SceneFactory};
use crate::error::{AppError, Result};

/// Moves the camera one step along the ground
pub const EVENT_MOVE_CAMERA: &str = "test";
/// Adds a box to the scene
pub const EVENT_ADD_BOX: &str = "BoxGeometry";
/// Canvas drag notification (logged only)
pub const EVENT_DRAG_CANVAS: &str = "drag-canvas";

/// Pixels the ground scrolls per camera step
const CAMERA_STEP_PX: i64 = 16;
/// Checkerboard tile size in pixels
const TILE_PX: i64 = 32;
/// Boxes kept in the scene; every pixel is tested against each one
const MAX_BOXES: usize = 32;

const SKY_TOP: [u8; 3] = [110, 160, 230];
const SKY_HORIZON: [u8; 3] = [200, 220, 245];
const GROUND_LIGHT: [u8; 3] = [235, 235, 235];
const GROUND_DARK: [u8; 3] = [170, 170, 170];
const BOX_COLOR: [u8; 3] = [255, 165, 0];

#[derive(Debug, Clone, Copy)]
struct SceneBox {
    /// World x position in pixels
    x: i64,
    size: u32,
}

/// Software test scene
pub struct TestScene {
    resolution: Resolution,
    camera_x: i64,
    boxes: Vec<SceneBox>,
    frames_rendered: u64,
    /// Bottom-up RGBA framebuffer
    framebuffer: Vec<u8>,
}

impl TestScene {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            camera_x: 0,
            boxes: Vec::new(),
            frames_rendered: 0,
            framebuffer: vec![0u8; PixelFormat::Rgba.frame_size(resolution)],
        }
    }

    /// Current camera position in steps
    pub fn camera_position(&self) -> i64 {
        self.camera_x / CAMERA_STEP_PX
    }

    /// Number of boxes in the scene
    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    fn shade(&self, x: i64, y: i64) -> [u8; 3] {
        let width = self.resolution.width as i64;
        let height = self.resolution.height as i64;
        let horizon = height / 2;

        for b in &self.boxes {
            let size = b.size as i64;
            let left = b.x - self.camera_x + width / 2 - size / 2;
            let bottom = horizon + size / 2;
            if x >= left && x < left + size && y >= bottom - size && y < bottom {
                return BOX_COLOR;
            }
        }

        if y < horizon {
            let t = y * 255 / horizon.max(1);
            let mut px = [0u8; 3];
            for c in 0..3 {
                let top = SKY_TOP[c] as i64;
                let bottom = SKY_HORIZON[c] as i64;
                px[c] = (top + (bottom - top) * t / 255) as u8;
            }
            px
        } else {
            let world_x = x + self.camera_x + self.frames_rendered as i64;
            let tile = world_x.div_euclid(TILE_PX) + (y - horizon).div_euclid(TILE_PX);
            if tile.rem_euclid(2) == 0 {
                GROUND_LIGHT
            } else {
                GROUND_DARK
            }
        }
    }
}

impl Renderer for TestScene {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn render(&mut self) -> Result<()> {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let mut framebuffer = std::mem::take(&mut self.framebuffer);

        for y in 0..height {
            // framebuffer row 0 is the bottom of the image
            let fb_row = height - 1 - y;
            let row = &mut framebuffer[fb_row * width * 4..(fb_row + 1) * width * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let [r, g, b] = self.shade(x as i64, y as i64);
                px.copy_from_slice(&[r, g, b, 255]);
            }
        }

        self.framebuffer = framebuffer;
        self.frames_rendered += 1;
        Ok(())
    }

    fn read_pixels(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.framebuffer.len() {
            return Err(AppError::Render(format!(
                "Read-back buffer is {} bytes, framebuffer is {}",
                out.len(),
                self.framebuffer.len()
            )));
        }
        out.copy_from_slice(&self.framebuffer);
        Ok(())
    }

    fn handle_event(&mut self, event: &str, data: &Value) -> bool {
        match event {
            EVENT_MOVE_CAMERA => {
                self.camera_x += CAMERA_STEP_PX;
                debug!("Camera moved to {}", self.camera_position());
                true
            }
            EVENT_ADD_BOX => {
                // Oldest box goes first once the scene is full
                if self.boxes.len() >= MAX_BOXES {
                    self.boxes.remove(0);
                }
                let size = (self.resolution.height / 6).max(1);
                self.boxes.push(SceneBox {
                    x: self.camera_x,
                    size,
                });
                debug!("Box added ({} in scene)", self.box_count());
                true
            }
            EVENT_DRAG_CANVAS => {
                debug!("Canvas drag: {}", data);
                true
            }
            _ => false,
        }
    }
}

/// Creates a fresh [`TestScene`] per session
#[derive(Debug, Default, Clone, Copy)]
pub struct TestSceneFactory;

impl SceneFactory for TestSceneFactory {
    fn create(&self, resolution: Resolution) -> Box<dyn Renderer> {
        Box::new(TestScene::new(resolution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel_at_top_left(scene: &mut TestScene) -> [u8; 4] {
        let mut out = vec![0u8; scene.readback_len()];
        scene.read_pixels(&mut out).unwrap();
        // top-left of the image is the first pixel of the last framebuffer row
        let width = scene.resolution().width as usize;
        let start = out.len() - width * 4;
        [out[start], out[start + 1], out[start + 2], out[start + 3]]
    }

    #[test]
    fn test_readback_is_bottom_up() {
        let mut scene = TestScene::new(Resolution::new(8, 8));
        scene.render().unwrap();
        let top = pixel_at_top_left(&mut scene);
        assert_eq!(top, [SKY_TOP[0], SKY_TOP[1], SKY_TOP[2], 255]);
    }

    #[test]
    fn test_events() {
        let mut scene = TestScene::new(Resolution::new(16, 16));
        assert!(scene.handle_event(EVENT_MOVE_CAMERA, &Value::Null));
        assert_eq!(scene.camera_position(), 1);
        assert!(scene.handle_event(EVENT_ADD_BOX, &Value::Null));
        assert_eq!(scene.box_count(), 1);
        assert!(scene.handle_event(EVENT_DRAG_CANVAS, &Value::Null));
        assert!(!scene.handle_event("unknown", &Value::Null));
    }

    #[test]
    fn test_box_count_is_capped() {
        let mut scene = TestScene::new(Resolution::new(16, 16));
        for _ in 0..MAX_BOXES + 10 {
            assert!(scene.handle_event(EVENT_ADD_BOX, &Value::Null));
        }
        assert_eq!(scene.box_count(), MAX_BOXES);

        // The newest box is kept
        scene.handle_event(EVENT_MOVE_CAMERA, &Value::Null);
        scene.handle_event(EVENT_ADD_BOX, &Value::Null);
        assert_eq!(scene.box_count(), MAX_BOXES);
        assert_eq!(scene.boxes.last().map(|b| b.x), Some(CAMERA_STEP_PX));
        assert_eq!(scene.boxes[0].x, 0);
    }

    #[test]
    fn test_read_pixels_rejects_wrong_size() {
        let mut scene = TestScene::new(Resolution::new(4, 4));
        let mut out = vec![0u8; 3];
        assert!(scene.read_pixels(&mut out).is_err());
    }
}
