//! Pixel format definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats flowing through the frame pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// RGBA 8 bits per channel, packed
    Rgba,
    /// YUV 4:2:0 planar (I420): full-resolution Y, quarter-resolution U then V
    Yuv420,
}

impl PixelFormat {
    /// Calculate expected frame size for a given resolution
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.pixels() as usize;
        match self {
            PixelFormat::Rgba => pixels * 4,
            PixelFormat::Yuv420 => {
                let chroma = resolution.chroma_width() as usize * resolution.chroma_height() as usize;
                pixels + chroma * 2
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Yuv420 => "YUV420",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RGBA" => Ok(PixelFormat::Rgba),
            "YUV420" | "I420" => Ok(PixelFormat::Yuv420),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if resolution is usable for streaming
    pub fn is_valid(&self) -> bool {
        self.width >= 2 && self.width <= 7680 && self.height >= 2 && self.height <= 4320
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width of a 2x2-subsampled chroma plane
    pub fn chroma_width(&self) -> u32 {
        self.width.div_ceil(2)
    }

    /// Height of a 2x2-subsampled chroma plane
    pub fn chroma_height(&self) -> u32 {
        self.height.div_ceil(2)
    }

    /// Common resolutions
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

impl Default for Resolution {
    fn default() -> Self {
        Self::VGA
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
