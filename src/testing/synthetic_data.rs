//! Synthetic frame generation
//!
//! Frames are cut from an infinite value-noise texture: half fine grain
//! (3x3 smoothed hash noise) and half coarse structure (bilinear noise on an
//! 8 pixel lattice). The fine grain gives sharpness metrics something to
//! measure, the coarse part gives the stabilisers an unambiguous match.

use crate::types::Frame;

/// Lattice spacing of the coarse component
const COARSE_CELL: i64 = 8;

fn hash(x: i64, y: i64, seed: u64) -> f64 {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ seed.wrapping_mul(0x1656_67B1_9E37_79F9);
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    (h & 0xFFFF) as f64 / 65535.0
}

fn fine(x: i64, y: i64, seed: u64) -> f64 {
    let mut sum = 0.0;
    for oy in -1..=1 {
        for ox in -1..=1 {
            sum += hash(x + ox, y + oy, seed);
        }
    }
    sum / 9.0
}

fn coarse(x: i64, y: i64, seed: u64) -> f64 {
    let cx = x.div_euclid(COARSE_CELL);
    let cy = y.div_euclid(COARSE_CELL);
    let fx = x.rem_euclid(COARSE_CELL) as f64 / COARSE_CELL as f64;
    let fy = y.rem_euclid(COARSE_CELL) as f64 / COARSE_CELL as f64;
    let s = seed ^ 0xA5A5;
    let top = hash(cx, cy, s) * (1.0 - fx) + hash(cx + 1, cy, s) * fx;
    let bottom = hash(cx, cy + 1, s) * (1.0 - fx) + hash(cx + 1, cy + 1, s) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Texture intensity at any integer coordinate, in 0..=255.
pub fn texture_value(x: i64, y: i64, seed: u64) -> u8 {
    // Smoothed noise clusters around 0.5, so stretch the contrast
    let v = 0.5 * (fine(x, y, seed) - 0.5) * 3.0 + 0.5 * (coarse(x, y, seed) - 0.5) * 1.5;
    (128.0 + v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Mono frame of the texture for `seed`.
pub fn textured_frame(width: u32, height: u32, seed: u64) -> Frame {
    shifted_frame(width, height, seed, 0, 0)
}

/// The same texture with its content moved by `(dx, dy)` pixels, so
/// `pixel(x, y) == texture(x - dx, y - dy)`.
pub fn shifted_frame(width: u32, height: u32, seed: u64, dx: i64, dy: i64) -> Frame {
    let mut data = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            data.push(texture_value(x - dx, y - dy, seed));
        }
    }
    Frame {
        sequence: 0,
        timestamp_us: 0,
        width,
        height,
        format: crate::types::PixelFormat::Mono8,
        data,
    }
}

/// Separable box blur of the frame's luma with edge clamping. Returns a mono
/// frame carrying the input's sequence and timestamp.
pub fn blurred_frame(frame: &Frame, radius: u32) -> Frame {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let luma = frame.luma();
    let r = radius as i64;
    let taps = (2 * r + 1) as f32;

    let mut horizontal = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            for o in -r..=r {
                let sx = (x as i64 + o).clamp(0, w as i64 - 1) as usize;
                sum += luma[y * w + sx];
            }
            horizontal[y * w + x] = sum / taps;
        }
    }

    let mut data = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            for o in -r..=r {
                let sy = (y as i64 + o).clamp(0, h as i64 - 1) as usize;
                sum += horizontal[sy * w + x];
            }
            data.push((sum / taps).round().clamp(0.0, 255.0) as u8);
        }
    }

    Frame {
        sequence: frame.sequence,
        timestamp_us: frame.timestamp_us,
        width: frame.width,
        height: frame.height,
        format: crate::types::PixelFormat::Mono8,
        data,
    }
}
