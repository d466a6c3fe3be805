//! Corrected output surface.

use crate::types::{Frame, Offset, PixelFormat, RasterPosition, Region};
use serde::Serialize;

/// A stabilised, optionally cropped frame ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Composite {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Offset the frame was corrected by
    pub offset: Offset,
    pub zoom: Option<Region>,
    /// Scan cursor at composite time, for the overlay
    pub raster: RasterPosition,
}

impl Composite {
    /// Translate `frame` by `-offset` (rounded to whole pixels, uncovered
    /// pixels black) and crop to `zoom` when it fits the frame.
    pub fn build(frame: &Frame, offset: Offset, zoom: Option<Region>, raster: RasterPosition) -> Self {
        let bpp = frame.format.bytes_per_pixel();
        let (w, h) = (frame.width as i64, frame.height as i64);
        let (ox, oy) = offset.rounded();

        let mut shifted = vec![0u8; frame.data.len()];
        // Source column range that lands inside the output
        let x0 = (-ox).clamp(0, w);
        let x1 = (w - ox).clamp(0, w);
        if x1 > x0 {
            for y in 0..h {
                let sy = y + oy;
                if sy < 0 || sy >= h {
                    continue;
                }
                let dst = ((y * w + x0) as usize) * bpp;
                let src = ((sy * w + x0 + ox) as usize) * bpp;
                let len = ((x1 - x0) as usize) * bpp;
                shifted[dst..dst + len].copy_from_slice(&frame.data[src..src + len]);
            }
        }

        let zoom = zoom.filter(|r| r.fits_within(frame.width, frame.height));
        let (width, height, data) = match zoom {
            Some(r) => (r.width, r.height, crop(&shifted, frame.width, bpp, r)),
            None => (frame.width, frame.height, shifted),
        };

        Self {
            sequence: frame.sequence,
            timestamp_us: frame.timestamp_us,
            width,
            height,
            format: frame.format,
            data,
            offset,
            zoom,
            raster,
        }
    }

    /// The composite's pixels as a frame, for analysis.
    pub fn to_frame(&self) -> Frame {
        Frame {
            sequence: self.sequence,
            timestamp_us: self.timestamp_us,
            width: self.width,
            height: self.height,
            format: self.format,
            data: self.data.clone(),
        }
    }
}

fn crop(data: &[u8], stride_px: u32, bpp: usize, r: Region) -> Vec<u8> {
    let row_len = r.width as usize * bpp;
    let mut out = Vec::with_capacity(row_len * r.height as usize);
    for y in r.y..r.y + r.height {
        let start = (y as usize * stride_px as usize + r.x as usize) * bpp;
        out.extend_from_slice(&data[start..start + row_len]);
    }
    out
}
