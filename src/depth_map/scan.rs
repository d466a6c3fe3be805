/// Autofocus raster scan
///
/// Visits every cell of the grid once in row-major order. At each cell the
/// focus actuator sweeps the plan's positions; after each move a settled
/// frame is captured and the cell's tile scored. The best score and the
/// position the actuator actually reached are kept per cell.
use super::DepthMapData;
use crate::assert_invariant;
use crate::config::DepthMapConfig;
use crate::errors::{RigError, RigResult};
use crate::sharpness::SharpnessAnalyzer;
use crate::types::{Frame, RasterPosition, Region};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Lens focus drive. `move_to` blocks until the move settles and returns the
/// position reached.
pub trait FocusActuator: Send {
    fn move_to(&mut self, position: f64) -> RigResult<f64>;
    fn release(&mut self);
}

/// Provides a frame captured after the last actuator move has settled.
pub trait SettledFrameSource {
    fn settled_frame(&mut self) -> RigResult<Frame>;
}

/// Cooperative cancellation flag shared between a scan and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Focus positions swept at every cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPlan {
    pub focus_start: f64,
    pub focus_end: f64,
    pub focus_steps: u32,
    pub settle_tolerance: f64,
}

impl ScanPlan {
    pub fn from_config(config: &DepthMapConfig) -> Self {
        Self {
            focus_start: config.focus_start,
            focus_end: config.focus_end,
            focus_steps: config.focus_steps.max(1),
            settle_tolerance: config.settle_tolerance,
        }
    }

    /// Evenly spaced positions from start to end inclusive. A single step
    /// sweeps only `focus_start`.
    pub fn positions(&self) -> Vec<f64> {
        let steps = self.focus_steps.max(1);
        if steps == 1 {
            return vec![self.focus_start];
        }
        let step = (self.focus_end - self.focus_start) / (steps - 1) as f64;
        (0..steps)
            .map(|i| self.focus_start + step * i as f64)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Completed,
    /// Stopped before the cell with this row-major index was finished
    Cancelled { at_cell: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub status: ScanStatus,
    pub cells_visited: usize,
    pub moves: usize,
    pub duration_ms: u64,
}

pub struct DepthMapScanner {
    plan: ScanPlan,
    analyzer: SharpnessAnalyzer,
    raster: RasterPosition,
    map: DepthMapData,
}

impl DepthMapScanner {
    pub fn new(config: &DepthMapConfig, analyzer: SharpnessAnalyzer) -> Self {
        Self {
            plan: ScanPlan::from_config(config),
            analyzer,
            raster: RasterPosition::ORIGIN,
            map: DepthMapData::new(config.grid_width, config.grid_height),
        }
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    pub fn raster(&self) -> RasterPosition {
        self.raster
    }

    pub fn map(&self) -> &DepthMapData {
        &self.map
    }

    pub fn into_map(self) -> DepthMapData {
        self.map
    }

    /// Return the cursor to the origin and discard the previous map.
    pub fn reset_raster(&mut self) {
        self.raster = RasterPosition::ORIGIN;
        self.map = DepthMapData::new(self.map.width, self.map.height);
    }

    /// Run a full scan. `on_cell` is told each cell before it is swept,
    /// together with the map as filled so far.
    ///
    /// The actuator is released on every exit path. Cancellation and a
    /// disconnected frame source end the scan with `ScanStatus::Cancelled`;
    /// an actuator that fails to settle is returned as the error. Either
    /// way the map stays invalid with the cells scored so far retained.
    pub fn scan<A, S, F>(
        &mut self,
        actuator: &mut A,
        source: &mut S,
        cancel: &CancelToken,
        mut on_cell: F,
    ) -> RigResult<ScanReport>
    where
        A: FocusActuator + ?Sized,
        S: SettledFrameSource + ?Sized,
        F: FnMut(RasterPosition, &DepthMapData),
    {
        self.reset_raster();
        let (width, height) = (self.map.width, self.map.height);
        let positions = self.plan.positions();
        let started = Instant::now();
        let mut moves = 0usize;

        log::info!(
            "Starting depth scan: {}x{} cells, {} focus steps from {:.3} to {:.3}",
            width,
            height,
            positions.len(),
            self.plan.focus_start,
            self.plan.focus_end
        );

        let mut cursor = (width > 0 && height > 0).then_some(RasterPosition::ORIGIN);
        let outcome = loop {
            let Some(cell) = cursor else {
                break Ok(ScanStatus::Completed);
            };
            self.raster = cell;
            on_cell(cell, &self.map);

            let index = cell.index(width);
            match self.sweep_cell(cell, &positions, actuator, source, cancel, &mut moves) {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("Depth scan cancelled at cell {}", index);
                    break Ok(ScanStatus::Cancelled { at_cell: index });
                }
                Err(RigError::SourceDisconnected(reason)) => {
                    log::warn!("Frame source lost at cell {}: {}", index, reason);
                    break Ok(ScanStatus::Cancelled { at_cell: index });
                }
                Err(e) => {
                    log::error!("Depth scan failed at cell {}: {}", index, e);
                    break Err(e);
                }
            }

            self.map.cells_visited += 1;
            cursor = cell.next(width, height);
            assert_invariant!(
                cursor.map_or(true, |next| next.index(width) == index + 1),
                "Raster advances one cell in row-major order",
                "depth_map::scan"
            );
        };

        actuator.release();

        let status = outcome?;
        if status == ScanStatus::Completed {
            assert_invariant!(
                self.map.cells_visited == self.map.cell_count(),
                "Depth map is valid only after every cell is visited",
                "depth_map::scan"
            );
            self.map.mark_complete();
        }
        assert_invariant!(
            self.map.is_valid == (status == ScanStatus::Completed),
            "Cancelled scan leaves the depth map invalid",
            "depth_map::scan"
        );

        let report = ScanReport {
            status,
            cells_visited: self.map.cells_visited,
            moves,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        log::info!(
            "Depth scan finished: {:?}, {} cells, {} moves in {} ms",
            report.status,
            report.cells_visited,
            report.moves,
            report.duration_ms
        );
        Ok(report)
    }

    /// Sweep one cell. Returns `Ok(false)` if cancelled part way.
    fn sweep_cell<A, S>(
        &mut self,
        cell: RasterPosition,
        positions: &[f64],
        actuator: &mut A,
        source: &mut S,
        cancel: &CancelToken,
        moves: &mut usize,
    ) -> RigResult<bool>
    where
        A: FocusActuator + ?Sized,
        S: SettledFrameSource + ?Sized,
    {
        for &target in positions {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let achieved = actuator.move_to(target)?;
            *moves += 1;
            if (achieved - target).abs() > self.plan.settle_tolerance {
                return Err(RigError::ActuatorTimeout(format!(
                    "requested {:.4}, settled at {:.4}",
                    target, achieved
                )));
            }

            let frame = source.settled_frame()?;
            let tile = Region::tile(
                frame.width,
                frame.height,
                self.map.width,
                self.map.height,
                cell.x,
                cell.y,
            );
            let score = self.analyzer.score_region(&frame, tile);
            if self.map.record(cell, score, achieved) {
                log::trace!(
                    "Cell ({}, {}) best {:.2} at {:.3}",
                    cell.x,
                    cell.y,
                    score,
                    achieved
                );
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::testing::{SimulatedActuator, SimulatedFocusCamera};

    fn config(cols: u32, rows: u32, steps: u32) -> DepthMapConfig {
        DepthMapConfig {
            grid_width: cols,
            grid_height: rows,
            focus_steps: steps,
            ..RigConfig::default().depth_map
        }
    }

    #[test]
    fn test_plan_positions() {
        let plan = ScanPlan::from_config(&config(1, 1, 5));
        assert_eq!(plan.positions(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        let single = ScanPlan::from_config(&config(1, 1, 1));
        assert_eq!(single.positions(), vec![0.0]);
    }

    #[test]
    fn test_full_scan_visits_cells_in_order() {
        let mut actuator = SimulatedActuator::new();
        let mut camera = SimulatedFocusCamera::new(48, 36, 3, 2, actuator.position_handle());
        let mut scanner = DepthMapScanner::new(&config(3, 2, 1), SharpnessAnalyzer::default());

        let mut visited = Vec::new();
        let report = scanner
            .scan(&mut actuator, &mut camera, &CancelToken::new(), |p, _| visited.push(p))
            .unwrap();

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.cells_visited, 6);
        let indices: Vec<usize> = visited.iter().map(|p| p.index(3)).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(scanner.map().is_valid);
        assert!(scanner.map().completed_at.is_some());
        assert!(actuator.is_released());
    }

    #[test]
    fn test_best_focus_found_per_cell() {
        let mut actuator = SimulatedActuator::new();
        let depths = vec![0.0, 0.5, 1.0, 0.25];
        let mut camera = SimulatedFocusCamera::new(64, 64, 2, 2, actuator.position_handle())
            .with_depths(depths.clone());
        let mut scanner = DepthMapScanner::new(&config(2, 2, 5), SharpnessAnalyzer::default());

        scanner
            .scan(&mut actuator, &mut camera, &CancelToken::new(), |_, _| {})
            .unwrap();

        for (i, expected) in depths.iter().enumerate() {
            let pos = RasterPosition::new(i as u32 % 2, i as u32 / 2);
            let cell = scanner.map().cell(pos).unwrap();
            assert!(
                (cell.focus_position - expected).abs() < 1e-9,
                "cell {} focused at {}",
                i,
                cell.focus_position
            );
        }
    }

    #[test]
    fn test_cancel_leaves_map_invalid() {
        let mut actuator = SimulatedActuator::new();
        let mut camera = SimulatedFocusCamera::new(32, 32, 4, 4, actuator.position_handle());
        let mut scanner = DepthMapScanner::new(&config(4, 4, 2), SharpnessAnalyzer::default());
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        let report = scanner
            .scan(&mut actuator, &mut camera, &cancel, |p, _| {
                if p.index(4) == 5 {
                    trigger.cancel();
                }
            })
            .unwrap();

        assert_eq!(report.status, ScanStatus::Cancelled { at_cell: 5 });
        assert_eq!(report.cells_visited, 5);
        assert!(!scanner.map().is_valid);
        assert!(scanner.map().cell(RasterPosition::new(0, 1)).is_some());
        assert!(scanner.map().cell(RasterPosition::new(1, 1)).is_none());
        assert!(actuator.is_released());
    }

    #[test]
    fn test_unsettled_actuator_is_an_error() {
        let mut actuator = SimulatedActuator::new().with_drift(0.2);
        let mut camera = SimulatedFocusCamera::new(32, 32, 2, 2, actuator.position_handle());
        let mut scanner = DepthMapScanner::new(&config(2, 2, 3), SharpnessAnalyzer::default());

        let err = scanner
            .scan(&mut actuator, &mut camera, &CancelToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, RigError::ActuatorTimeout(_)));
        assert!(!scanner.map().is_valid);
        assert!(actuator.is_released());
    }

    #[test]
    fn test_disconnect_cancels_scan() {
        let mut actuator = SimulatedActuator::new();
        let mut camera = SimulatedFocusCamera::new(32, 32, 2, 2, actuator.position_handle())
            .disconnect_after(3);
        let mut scanner = DepthMapScanner::new(&config(2, 2, 2), SharpnessAnalyzer::default());

        let report = scanner
            .scan(&mut actuator, &mut camera, &CancelToken::new(), |_, _| {})
            .unwrap();
        assert_eq!(report.status, ScanStatus::Cancelled { at_cell: 1 });
        assert_eq!(report.cells_visited, 1);
        assert!(actuator.is_released());
    }

    #[test]
    fn test_cell_hook_sees_partial_map() {
        let mut actuator = SimulatedActuator::new();
        let mut camera = SimulatedFocusCamera::new(48, 36, 3, 2, actuator.position_handle());
        let mut scanner = DepthMapScanner::new(&config(3, 2, 2), SharpnessAnalyzer::default());

        let mut progress = Vec::new();
        scanner
            .scan(&mut actuator, &mut camera, &CancelToken::new(), |_, map| {
                progress.push((map.cells_visited, map.is_valid));
            })
            .unwrap();

        assert_eq!(progress, (0..6).map(|i| (i, false)).collect::<Vec<_>>());
        assert!(scanner.map().is_valid);
    }
}
