//! Focus quality scoring.
//!
//! Scores are relative: only comparisons between frames of the same scene
//! (the same cell at different focus positions) are meaningful.

use crate::types::{Frame, Region};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SharpnessMetric {
    /// Variance of the 4-connected Laplacian response
    #[default]
    VarianceOfLaplacian,
    /// Mean squared Sobel gradient magnitude
    Tenengrad,
    /// Mean squared difference between pixels two columns apart
    Brenner,
}

#[derive(Debug, Clone, Default)]
pub struct SharpnessAnalyzer {
    metric: SharpnessMetric,
}

impl SharpnessAnalyzer {
    pub fn new(metric: SharpnessMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> SharpnessMetric {
        self.metric
    }

    /// Score the whole frame.
    pub fn score(&self, frame: &Frame) -> f64 {
        self.score_region(frame, Region::full(frame.width, frame.height))
    }

    /// Score one region of the frame. Regions are clipped to the frame; a
    /// region too small for the kernel scores 0.
    pub fn score_region(&self, frame: &Frame, region: Region) -> f64 {
        let luma = frame.luma();
        self.score_luma(&luma, frame.width as usize, clip(region, frame.width, frame.height))
    }

    /// Row-major scores of a `cols x rows` tiling of the frame.
    pub fn score_grid(&self, frame: &Frame, cols: u32, rows: u32) -> Vec<f64> {
        if cols == 0 || rows == 0 {
            return Vec::new();
        }
        let luma = frame.luma();
        let mut scores = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let tile = Region::tile(frame.width, frame.height, cols, rows, col, row);
                scores.push(self.score_luma(&luma, frame.width as usize, tile));
            }
        }
        scores
    }

    fn score_luma(&self, luma: &[f32], stride: usize, region: Region) -> f64 {
        match self.metric {
            SharpnessMetric::VarianceOfLaplacian => laplacian_variance(luma, stride, region),
            SharpnessMetric::Tenengrad => tenengrad(luma, stride, region),
            SharpnessMetric::Brenner => brenner(luma, stride, region),
        }
    }
}

fn clip(region: Region, width: u32, height: u32) -> Region {
    let x = region.x.min(width);
    let y = region.y.min(height);
    let w = region.width.min(width - x);
    let h = region.height.min(height - y);
    Region::new(x, y, w, h)
}

fn laplacian_variance(luma: &[f32], stride: usize, r: Region) -> f64 {
    if r.width < 3 || r.height < 3 {
        return 0.0;
    }
    let (x0, y0) = (r.x as usize, r.y as usize);
    let (x1, y1) = (x0 + r.width as usize - 1, y0 + r.height as usize - 1);

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0usize;
    for y in (y0 + 1)..y1 {
        for x in (x0 + 1)..x1 {
            let idx = y * stride + x;
            let lap = luma[idx - stride] + luma[idx + stride] + luma[idx - 1] + luma[idx + 1]
                - 4.0 * luma[idx];
            let lap = lap as f64;
            sum += lap;
            sum_sq += lap * lap;
            n += 1;
        }
    }
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0)
}

fn tenengrad(luma: &[f32], stride: usize, r: Region) -> f64 {
    if r.width < 3 || r.height < 3 {
        return 0.0;
    }
    let (x0, y0) = (r.x as usize, r.y as usize);
    let (x1, y1) = (x0 + r.width as usize - 1, y0 + r.height as usize - 1);
    let px = |x: usize, y: usize| luma[y * stride + x] as f64;

    let mut energy = 0.0f64;
    let mut n = 0usize;
    for y in (y0 + 1)..y1 {
        for x in (x0 + 1)..x1 {
            let gx = px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1)
                - px(x - 1, y - 1)
                - 2.0 * px(x - 1, y)
                - px(x - 1, y + 1);
            let gy = px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1)
                - px(x - 1, y - 1)
                - 2.0 * px(x, y - 1)
                - px(x + 1, y - 1);
            energy += gx * gx + gy * gy;
            n += 1;
        }
    }
    energy / n as f64
}

fn brenner(luma: &[f32], stride: usize, r: Region) -> f64 {
    if r.width < 3 || r.height == 0 {
        return 0.0;
    }
    let (x0, y0) = (r.x as usize, r.y as usize);
    let mut total = 0.0f64;
    let mut n = 0usize;
    for y in y0..(y0 + r.height as usize) {
        for x in x0..(x0 + r.width as usize - 2) {
            let d = (luma[y * stride + x + 2] - luma[y * stride + x]) as f64;
            total += d * d;
            n += 1;
        }
    }
    total / n as f64
}
