//! Core value types shared by the pipeline: frames, offsets and raster coordinates.

use crate::errors::RigError;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Rgb8 => "RGB8",
        }
    }
}

/// One captured image. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Frame {
    /// Build a frame, checking that `data` matches the declared geometry.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self, RigError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(RigError::InvalidConfig(format!(
                "frame data is {} bytes, {}x{} {} needs {}",
                data.len(),
                width,
                height,
                format.as_str(),
                expected
            )));
        }
        Ok(Self {
            sequence: 0,
            timestamp_us: 0,
            width,
            height,
            format,
            data,
        })
    }

    pub fn mono(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RigError> {
        Self::new(width, height, PixelFormat::Mono8, data)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_timestamp_us(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Luminance plane as f32, one value per pixel.
    pub fn luma(&self) -> Vec<f32> {
        match self.format {
            PixelFormat::Mono8 => self.data.iter().map(|&v| v as f32).collect(),
            PixelFormat::Rgb8 => self
                .data
                .chunks_exact(3)
                .map(|rgb| 0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32)
                .collect(),
        }
    }

    pub fn from_gray_image(image: &image::GrayImage) -> Self {
        Self {
            sequence: 0,
            timestamp_us: 0,
            width: image.width(),
            height: image.height(),
            format: PixelFormat::Mono8,
            data: image.as_raw().clone(),
        }
    }

    /// Convert to an 8-bit grayscale image (RGB frames are reduced to luma).
    pub fn to_gray_image(&self) -> image::GrayImage {
        let pixels = match self.format {
            PixelFormat::Mono8 => self.data.clone(),
            PixelFormat::Rgb8 => self.luma().into_iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect(),
        };
        image::GrayImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| image::GrayImage::new(self.width, self.height))
    }
}

/// 2D translation in pixels.
///
/// Measured as the displacement of scene content in the current frame
/// relative to the reference; compositing applies `-offset`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

impl Offset {
    pub const ZERO: Offset = Offset { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Nearest whole-pixel translation.
    pub fn rounded(&self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }
}

impl Add for Offset {
    type Output = Offset;
    fn add(self, rhs: Offset) -> Offset {
        Offset::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Offset {
    type Output = Offset;
    fn sub(self, rhs: Offset) -> Offset {
        Offset::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Scan coordinate within a `width x height` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RasterPosition {
    pub x: u32,
    pub y: u32,
}

impl RasterPosition {
    pub const ORIGIN: RasterPosition = RasterPosition { x: 0, y: 0 };

    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Row-major index of this position in a grid `width` cells wide.
    pub fn index(&self, width: u32) -> usize {
        self.y as usize * width as usize + self.x as usize
    }

    /// Next position in row-major order, or `None` past the last cell.
    pub fn next(&self, width: u32, height: u32) -> Option<RasterPosition> {
        if width == 0 || height == 0 {
            return None;
        }
        if self.x + 1 < width {
            Some(RasterPosition::new(self.x + 1, self.y))
        } else if self.y + 1 < height {
            Some(RasterPosition::new(0, self.y + 1))
        } else {
            None
        }
    }

    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.x < width && self.y < height
    }
}

/// Crop rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }

    /// Tile `(col, row)` of a frame split into `cols x rows` tiles.
    /// Remainder pixels go to the last column/row.
    pub fn tile(width: u32, height: u32, cols: u32, rows: u32, col: u32, row: u32) -> Self {
        let tile_w = width / cols.max(1);
        let tile_h = height / rows.max(1);
        let x = col * tile_w;
        let y = row * tile_h;
        let w = if col + 1 == cols { width - x } else { tile_w };
        let h = if row + 1 == rows { height - y } else { tile_h };
        Self::new(x, y, w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_validation() {
        assert!(Frame::mono(4, 4, vec![0; 16]).is_ok());
        assert!(Frame::mono(4, 4, vec![0; 15]).is_err());
        assert!(Frame::new(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_ok());
    }

    #[test]
    fn test_rgb_luma() {
        let frame = Frame::new(1, 1, PixelFormat::Rgb8, vec![255, 255, 255]).unwrap();
        assert!((frame.luma()[0] - 255.0).abs() < 0.01);
    }

    #[test]
    fn test_raster_row_major() {
        let mut pos = RasterPosition::ORIGIN;
        let mut visited = vec![pos];
        while let Some(next) = pos.next(3, 2) {
            visited.push(next);
            pos = next;
        }
        let indices: Vec<usize> = visited.iter().map(|p| p.index(3)).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(RasterPosition::ORIGIN.next(0, 0).is_none());
    }

    #[test]
    fn test_tiles_cover_frame() {
        let last = Region::tile(10, 7, 3, 2, 2, 1);
        assert_eq!(last.x + last.width, 10);
        assert_eq!(last.y + last.height, 7);
    }

    #[test]
    fn test_offset_arithmetic() {
        let a = Offset::new(3.0, 4.0);
        assert_eq!(a.magnitude(), 5.0);
        assert_eq!(a + a - a, a);
        assert_eq!(Offset::new(2.6, -1.4).rounded(), (3, -1));
    }

    #[test]
    fn test_gray_image_round_trip() {
        let frame = Frame::mono(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let back = Frame::from_gray_image(&frame.to_gray_image());
        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn test_offset_serializes() {
        let json = serde_json::to_string(&Offset::new(5.0, 0.0)).unwrap();
        assert_eq!(json, r#"{"x":5.0,"y":0.0}"#);
        let back: Offset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Offset::new(5.0, 0.0));
    }
}
