/// Phase-correlation stabiliser
///
/// Measures the absolute translation of each frame against one fixed
/// reference. Frames are reduced by averaging `block_size x block_size`
/// blocks, mean-centred, Hann-windowed and zero-padded to a power of two; the
/// normalised cross-power spectrum of frame and reference is transformed back
/// and its peak, refined to sub-block precision, is the offset.
use super::fft::{fft_2d, Complex};
use super::BlendPolicy;
use crate::errors::{RigError, RigResult};
use crate::types::{Frame, Offset};
use std::f64::consts::PI;

/// Spectra weaker than this are treated as empty when normalising
const SPECTRUM_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct PhaseCorrStabiliser {
    block_size: u32,
    blend_factor: f64,
    reference: Option<Reference>,
}

#[derive(Debug, Clone)]
struct Reference {
    frame_dims: (u32, u32),
    spectrum: Vec<Complex>,
}

/// Block-reduced geometry for one frame size
#[derive(Debug, Clone, Copy)]
struct Grid {
    cols: usize,
    rows: usize,
    padded_cols: usize,
    padded_rows: usize,
}

impl PhaseCorrStabiliser {
    pub fn new(block_size: u32, blend_factor: f64) -> Self {
        Self {
            block_size: block_size.max(1),
            blend_factor: blend_factor.clamp(f64::EPSILON, 1.0),
            reference: None,
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn blend_factor(&self) -> f64 {
        self.blend_factor
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn blend_policy(&self) -> BlendPolicy {
        BlendPolicy::Absolute {
            blend_factor: self.blend_factor,
        }
    }

    /// Capture `frame` as the reference, replacing any existing one.
    pub fn set_reference(&mut self, frame: &Frame) -> RigResult<()> {
        let grid = self.grid_for(frame)?;
        self.reference = Some(Reference {
            frame_dims: frame.dimensions(),
            spectrum: self.spectrum(frame, grid),
        });
        Ok(())
    }

    /// Offset of `frame` relative to the reference. Without a reference the
    /// frame becomes the reference and the offset is zero.
    pub fn compute_offset(&mut self, frame: &Frame) -> RigResult<Offset> {
        let Some(reference) = &self.reference else {
            log::debug!("Phase correlation reference captured (seq {})", frame.sequence);
            self.set_reference(frame)?;
            return Ok(Offset::ZERO);
        };

        if reference.frame_dims != frame.dimensions() {
            return Err(RigError::DimensionMismatch {
                expected: reference.frame_dims,
                got: frame.dimensions(),
            });
        }

        let grid = self.grid_for(frame)?;
        let current = self.spectrum(frame, grid);

        let mut cross: Vec<Complex> = current
            .iter()
            .zip(&reference.spectrum)
            .map(|(c, r)| {
                let p = *c * r.conj();
                let mag = p.norm();
                if mag > SPECTRUM_FLOOR {
                    Complex::new(p.re / mag, p.im / mag)
                } else {
                    Complex::ZERO
                }
            })
            .collect();
        fft_2d(&mut cross, grid.padded_cols, grid.padded_rows, true);

        let (px, py) = peak(&cross, grid.padded_cols);
        let (w, h) = (grid.padded_cols, grid.padded_rows);
        let value = |x: usize, y: usize| cross[y * w + x].re;

        let sub_x = parabolic_vertex(
            value((px + w - 1) % w, py),
            value(px, py),
            value((px + 1) % w, py),
        );
        let sub_y = parabolic_vertex(
            value(px, (py + h - 1) % h),
            value(px, py),
            value(px, (py + 1) % h),
        );

        let scale = self.block_size as f64;
        let offset = Offset::new(
            (wrap(px, w) as f64 + sub_x) * scale,
            (wrap(py, h) as f64 + sub_y) * scale,
        );
        log::trace!("Phase correlation peak ({}, {}) -> ({:.2}, {:.2})", px, py, offset.x, offset.y);
        Ok(offset)
    }

    fn grid_for(&self, frame: &Frame) -> RigResult<Grid> {
        let cols = (frame.width / self.block_size) as usize;
        let rows = (frame.height / self.block_size) as usize;
        if cols < 2 || rows < 2 {
            return Err(RigError::InvalidConfig(format!(
                "block size {} is too large for a {}x{} frame",
                self.block_size, frame.width, frame.height
            )));
        }
        Ok(Grid {
            cols,
            rows,
            padded_cols: cols.next_power_of_two(),
            padded_rows: rows.next_power_of_two(),
        })
    }

    fn spectrum(&self, frame: &Frame, grid: Grid) -> Vec<Complex> {
        let reduced = block_average(&frame.luma(), frame.width as usize, self.block_size as usize, grid);
        let mean = reduced.iter().sum::<f64>() / reduced.len() as f64;

        let mut data = vec![Complex::ZERO; grid.padded_cols * grid.padded_rows];
        for y in 0..grid.rows {
            let wy = hann(y, grid.rows);
            for x in 0..grid.cols {
                let v = (reduced[y * grid.cols + x] - mean) * wy * hann(x, grid.cols);
                data[y * grid.padded_cols + x] = Complex::new(v, 0.0);
            }
        }
        fft_2d(&mut data, grid.padded_cols, grid.padded_rows, false);
        data
    }
}

fn block_average(luma: &[f32], stride: usize, block: usize, grid: Grid) -> Vec<f64> {
    let area = (block * block) as f64;
    let mut out = Vec::with_capacity(grid.cols * grid.rows);
    for by in 0..grid.rows {
        for bx in 0..grid.cols {
            let mut sum = 0.0f64;
            for y in by * block..(by + 1) * block {
                let row = &luma[y * stride + bx * block..y * stride + (bx + 1) * block];
                sum += row.iter().map(|&v| v as f64).sum::<f64>();
            }
            out.push(sum / area);
        }
    }
    out
}

fn hann(i: usize, n: usize) -> f64 {
    if n <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()
}

/// Column and row of the largest real value.
fn peak(surface: &[Complex], width: usize) -> (usize, usize) {
    let (idx, _) = surface
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |(bi, bv), (i, c)| {
            if c.re > bv {
                (i, c.re)
            } else {
                (bi, bv)
            }
        });
    (idx % width, idx / width)
}

/// Map a circular index to a signed shift.
fn wrap(i: usize, n: usize) -> i64 {
    if i > n / 2 {
        i as i64 - n as i64
    } else {
        i as i64
    }
}

fn parabolic_vertex(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f64::EPSILON {
        0.0
    } else {
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    }
}
