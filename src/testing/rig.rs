//! Simulated focus rig
//!
//! `SimulatedActuator` and `SimulatedFocusCamera` share the lens position:
//! the camera renders each grid tile blurred in proportion to how far the
//! lens is from that tile's in-focus depth.

use super::synthetic_data::{blurred_frame, textured_frame};
use crate::depth_map::{FocusActuator, SettledFrameSource};
use crate::errors::{RigError, RigResult};
use crate::types::{Frame, Region};
use std::sync::{Arc, Mutex, MutexGuard};

/// Blur radius per unit of focus error
const BLUR_PER_UNIT: f64 = 8.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ActuatorLog {
    moves: Vec<f64>,
    releases: usize,
    released: bool,
}

/// Focus drive that settles instantly, optionally off target by `drift`
/// or failing outright at a given move.
#[derive(Debug, Clone, Default)]
pub struct SimulatedActuator {
    position: Arc<Mutex<f64>>,
    log: Arc<Mutex<ActuatorLog>>,
    drift: f64,
    fail_at_move: Option<usize>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }

    /// Report `ActuatorTimeout` on the zero-based move `index`.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at_move = Some(index);
        self
    }

    /// Shared lens position for a simulated camera.
    pub fn position_handle(&self) -> Arc<Mutex<f64>> {
        Arc::clone(&self.position)
    }

    pub fn position(&self) -> f64 {
        *lock(&self.position)
    }

    /// Requested positions, in order.
    pub fn moves(&self) -> Vec<f64> {
        lock(&self.log).moves.clone()
    }

    pub fn release_count(&self) -> usize {
        lock(&self.log).releases
    }

    /// Released since the last move.
    pub fn is_released(&self) -> bool {
        lock(&self.log).released
    }
}

impl FocusActuator for SimulatedActuator {
    fn move_to(&mut self, position: f64) -> RigResult<f64> {
        let mut log = lock(&self.log);
        let index = log.moves.len();
        log.moves.push(position);
        log.released = false;
        if self.fail_at_move == Some(index) {
            return Err(RigError::ActuatorTimeout(format!(
                "simulated stall moving to {:.3}",
                position
            )));
        }
        let achieved = position + self.drift;
        *lock(&self.position) = achieved;
        Ok(achieved)
    }

    fn release(&mut self) {
        let mut log = lock(&self.log);
        log.releases += 1;
        log.released = true;
    }
}

/// Camera over a `cols x rows` scene whose tiles each have their own
/// in-focus depth.
#[derive(Debug, Clone)]
pub struct SimulatedFocusCamera {
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    depths: Vec<f64>,
    position: Arc<Mutex<f64>>,
    seed: u64,
    delivered: usize,
    disconnect_after: Option<usize>,
}

impl SimulatedFocusCamera {
    /// Depths default to a diagonal ramp from 0.0 at the top-left tile to
    /// 1.0 at the bottom-right.
    pub fn new(width: u32, height: u32, cols: u32, rows: u32, position: Arc<Mutex<f64>>) -> Self {
        let span = (cols + rows).saturating_sub(2).max(1) as f64;
        let depths = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (c + r) as f64 / span))
            .collect();
        Self {
            width,
            height,
            cols,
            rows,
            depths,
            position,
            seed: 17,
            delivered: 0,
            disconnect_after: None,
        }
    }

    /// Row-major in-focus depth per tile.
    pub fn with_depths(mut self, depths: Vec<f64>) -> Self {
        self.depths = depths;
        self
    }

    /// Fail with `SourceDisconnected` after `frames` successful frames.
    pub fn disconnect_after(mut self, frames: usize) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    pub fn frames_delivered(&self) -> usize {
        self.delivered
    }

    /// Frame as seen with the lens at `position`.
    pub fn render(&self, position: f64) -> Frame {
        let sharp = textured_frame(self.width, self.height, self.seed);
        let mut data = sharp.data.clone();
        let mut cache: Vec<(u32, Frame)> = Vec::new();

        for row in 0..self.rows {
            for col in 0..self.cols {
                let depth = self
                    .depths
                    .get((row * self.cols + col) as usize)
                    .copied()
                    .unwrap_or(0.0);
                let radius = ((position - depth).abs() * BLUR_PER_UNIT).round() as u32;
                if radius == 0 {
                    continue;
                }
                if !cache.iter().any(|(r, _)| *r == radius) {
                    cache.push((radius, blurred_frame(&sharp, radius)));
                }
                let Some((_, blurred)) = cache.iter().find(|(r, _)| *r == radius) else {
                    continue;
                };

                let tile = Region::tile(self.width, self.height, self.cols, self.rows, col, row);
                for y in tile.y..tile.y + tile.height {
                    let start = (y * self.width + tile.x) as usize;
                    let end = start + tile.width as usize;
                    data[start..end].copy_from_slice(&blurred.data[start..end]);
                }
            }
        }

        Frame { data, ..sharp }
    }
}

impl SettledFrameSource for SimulatedFocusCamera {
    fn settled_frame(&mut self) -> RigResult<Frame> {
        if self.disconnect_after.is_some_and(|limit| self.delivered >= limit) {
            return Err(RigError::SourceDisconnected("simulated camera unplugged".to_string()));
        }
        let position = *lock(&self.position);
        self.delivered += 1;
        Ok(self.render(position).with_sequence(self.delivered as u64))
    }
}
