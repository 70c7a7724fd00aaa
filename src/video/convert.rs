//! Pixel layout and color space conversion
//!
//! Primary use case: bottom-up RGBA read-back from the renderer → top-down
//! RGBA → YUV420P (I420) for the outbound H.264 track.
//!
//! The color transform is BT.601 limited range with the same integer
//! coefficients as libyuv's `ABGRToI420`, which is what browser-side
//! WebRTC stacks expect for RGBA input.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

const RGBA_BPP: usize = 4;

/// YUV420P buffer with separate Y, U, V planes
pub struct Yuv420pBuffer {
    /// Raw buffer containing all planes
    data: Vec<u8>,
    /// Frame resolution
    resolution: Resolution,
    /// U plane offset
    u_offset: usize,
    /// V plane offset
    v_offset: usize,
}

impl Yuv420pBuffer {
    /// Create a new YUV420P buffer for the given resolution
    pub fn new(resolution: Resolution) -> Self {
        let y_size = resolution.pixels() as usize;
        let uv_size = resolution.chroma_width() as usize * resolution.chroma_height() as usize;

        Self {
            data: vec![0u8; y_size + uv_size * 2],
            resolution,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    /// Get the raw buffer as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get Y plane
    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    /// Get U plane
    pub fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    /// Get V plane
    pub fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }

    /// Split into mutable (Y, U, V) planes
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, uv) = self.data.split_at_mut(self.u_offset);
        let (u, v) = uv.split_at_mut(self.v_offset - self.u_offset);
        (y, u, v)
    }

    /// Get buffer length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get resolution
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// Copy `src` into `dst` with the row order reversed.
///
/// Row `r` of the output is row `height - 1 - r` of the input. Applying it
/// twice reproduces the input exactly.
pub fn flip_vertical(src: &[u8], dst: &mut [u8], row_bytes: usize, height: usize) -> Result<()> {
    let needed = row_bytes * height;
    if needed == 0 {
        return Ok(());
    }
    if src.len() < needed || dst.len() < needed {
        return Err(AppError::Render(format!(
            "Buffer too small for {} rows of {} bytes: src {} dst {}",
            height,
            row_bytes,
            src.len(),
            dst.len()
        )));
    }

    for (r, out_row) in dst[..needed].chunks_exact_mut(row_bytes).enumerate() {
        let src_start = (height - 1 - r) * row_bytes;
        out_row.copy_from_slice(&src[src_start..src_start + row_bytes]);
    }
    Ok(())
}

#[inline]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    ((66 * r + 129 * g + 25 * b + 0x1080) >> 8) as u8
}

#[inline]
fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    ((112 * b - 74 * g - 38 * r + 0x8080) >> 8) as u8
}

#[inline]
fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    ((112 * r - 94 * g - 18 * b + 0x8080) >> 8) as u8
}

/// Convert top-down RGBA into I420 planes.
///
/// Chroma is computed from the rounded average of each 2x2 block; the last
/// column/row is replicated when a dimension is odd. Alpha is ignored.
pub fn rgba_to_i420(rgba: &[u8], out: &mut Yuv420pBuffer) -> Result<()> {
    let resolution = out.resolution();
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let expected = width * height * RGBA_BPP;
    if rgba.len() < expected {
        return Err(AppError::Render(format!(
            "RGBA input too small: {} < {}",
            rgba.len(),
            expected
        )));
    }

    let chroma_width = resolution.chroma_width() as usize;
    let (y_plane, u_plane, v_plane) = out.planes_mut();

    let pixel = |x: usize, y: usize| -> (i32, i32, i32) {
        let i = (y * width + x) * RGBA_BPP;
        (rgba[i] as i32, rgba[i + 1] as i32, rgba[i + 2] as i32)
    };

    for y in 0..height {
        for x in 0..width {
            let (r, g, b) = pixel(x, y);
            y_plane[y * width + x] = rgb_to_y(r, g, b);
        }
    }

    for cy in 0..resolution.chroma_height() as usize {
        let y0 = cy * 2;
        let y1 = (y0 + 1).min(height - 1);
        for cx in 0..chroma_width {
            let x0 = cx * 2;
            let x1 = (x0 + 1).min(width - 1);

            let (mut r, mut g, mut b) = (0, 0, 0);
            for (px, py) in [(x0, y0), (x1, y0), (x0, y1), (x1, y1)] {
                let (pr, pg, pb) = pixel(px, py);
                r += pr;
                g += pg;
                b += pb;
            }
            let (r, g, b) = ((r + 2) >> 2, (g + 2) >> 2, (b + 2) >> 2);

            u_plane[cy * chroma_width + cx] = rgb_to_u(r, g, b);
            v_plane[cy * chroma_width + cx] = rgb_to_v(r, g, b);
        }
    }

    Ok(())
}

/// Pixel format converter for renderer output
///
/// Holds reusable scratch buffers, so one converter belongs to one producer.
pub struct PixelConverter {
    /// Source format
    src_format: PixelFormat,
    /// Destination format
    dst_format: PixelFormat,
    /// Frame resolution
    resolution: Resolution,
    /// Origin-corrected RGBA scratch buffer
    flipped: Vec<u8>,
    /// Output buffer (reused across conversions)
    output_buffer: Yuv420pBuffer,
}

impl PixelConverter {
    /// Create a converter for bottom-up RGBA → YUV420P
    pub fn rgba_to_yuv420p(resolution: Resolution) -> Self {
        Self {
            src_format: PixelFormat::Rgba,
            dst_format: PixelFormat::Yuv420,
            resolution,
            flipped: vec![0u8; PixelFormat::Rgba.frame_size(resolution)],
            output_buffer: Yuv420pBuffer::new(resolution),
        }
    }

    /// Convert a bottom-up RGBA read-back and return the I420 output
    pub fn convert(&mut self, input: &[u8]) -> Result<&[u8]> {
        match (self.src_format, self.dst_format) {
            (PixelFormat::Rgba, PixelFormat::Yuv420) => {
                let row_bytes = self.resolution.width as usize * RGBA_BPP;
                flip_vertical(
                    input,
                    &mut self.flipped,
                    row_bytes,
                    self.resolution.height as usize,
                )?;
                rgba_to_i420(&self.flipped, &mut self.output_buffer)?;
            }
            _ => {
                return Err(AppError::Render(format!(
                    "Unsupported conversion: {} → {}",
                    self.src_format, self.dst_format
                )));
            }
        }

        Ok(self.output_buffer.as_bytes())
    }

    /// Destination format
    pub fn output_format(&self) -> PixelFormat {
        self.dst_format
    }

    /// Get resolution
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// Calculate YUV420P buffer size for a given resolution
pub fn yuv420p_buffer_size(resolution: Resolution) -> usize {
    PixelFormat::Yuv420.frame_size(resolution)
}
