/// Depth map built by an autofocus raster scan
///
/// The grid holds, per cell, the highest sharpness seen during the scan and
/// the focus position at which it was seen. A map is only valid once every
/// cell has been visited without cancellation.
pub mod scan;

pub use scan::{
    CancelToken, DepthMapScanner, FocusActuator, ScanPlan, ScanReport, ScanStatus,
    SettledFrameSource,
};

use crate::types::RasterPosition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthCell {
    pub max_sharpness: f64,
    pub focus_position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthMapData {
    pub width: u32,
    pub height: u32,
    /// Row-major; `None` until the scan scores the cell
    pub cells: Vec<Option<DepthCell>>,
    pub is_valid: bool,
    pub cells_visited: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DepthMapData {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width as usize * height as usize],
            is_valid: false,
            cells_visited: 0,
            completed_at: None,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, position: RasterPosition) -> Option<&DepthCell> {
        if !position.is_within(self.width, self.height) {
            return None;
        }
        self.cells[position.index(self.width)].as_ref()
    }

    /// Keep `(sharpness, focus_position)` if it beats the cell's current
    /// maximum. Returns true when the cell changed.
    pub fn record(&mut self, position: RasterPosition, sharpness: f64, focus_position: f64) -> bool {
        if !position.is_within(self.width, self.height) {
            return false;
        }
        let slot = &mut self.cells[position.index(self.width)];
        if slot.is_some_and(|cell| cell.max_sharpness >= sharpness) {
            return false;
        }
        *slot = Some(DepthCell {
            max_sharpness: sharpness,
            focus_position,
        });
        true
    }

    pub(crate) fn mark_complete(&mut self) {
        self.is_valid = true;
        self.completed_at = Some(Utc::now());
    }

    /// Smallest and largest recorded focus positions.
    pub fn focus_range(&self) -> Option<(f64, f64)> {
        self.cells.iter().flatten().fold(None, |range, cell| {
            let p = cell.focus_position;
            Some(match range {
                None => (p, p),
                Some((lo, hi)) => (lo.min(p), hi.max(p)),
            })
        })
    }

    /// Render focus positions as grayscale, `cell_px` pixels per cell.
    /// Near positions are dark, far positions bright, unscored cells black.
    pub fn to_focus_image(&self, cell_px: u32) -> image::GrayImage {
        let cell_px = cell_px.max(1);
        let (lo, hi) = self.focus_range().unwrap_or((0.0, 1.0));
        let span = if hi > lo { hi - lo } else { 1.0 };

        image::GrayImage::from_fn(self.width * cell_px, self.height * cell_px, |x, y| {
            let pos = RasterPosition::new(x / cell_px, y / cell_px);
            let level = match self.cell(pos) {
                Some(cell) => 32.0 + 223.0 * ((cell.focus_position - lo) / span),
                None => 0.0,
            };
            image::Luma([level.round().clamp(0.0, 255.0) as u8])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_map_is_empty_and_invalid() {
        let map = DepthMapData::new(4, 3);
        assert_eq!(map.cell_count(), 12);
        assert!(!map.is_valid);
        assert!(map.cells.iter().all(Option::is_none));
        assert!(map.focus_range().is_none());
    }

    #[test]
    fn test_record_keeps_maximum() {
        let mut map = DepthMapData::new(2, 2);
        let pos = RasterPosition::new(1, 0);
        assert!(map.record(pos, 10.0, 0.2));
        assert!(!map.record(pos, 5.0, 0.4));
        assert!(map.record(pos, 12.0, 0.6));
        let cell = map.cell(pos).unwrap();
        assert_eq!(cell.max_sharpness, 12.0);
        assert_eq!(cell.focus_position, 0.6);
        assert!(!map.record(RasterPosition::new(5, 5), 1.0, 0.0));
    }

    #[test]
    fn test_focus_image_dimensions_and_levels() {
        let mut map = DepthMapData::new(2, 1);
        map.record(RasterPosition::new(0, 0), 1.0, 0.0);
        map.record(RasterPosition::new(1, 0), 1.0, 1.0);
        let img = map.to_focus_image(4);
        assert_eq!(img.dimensions(), (8, 4));
        assert!(img.get_pixel(0, 0)[0] < img.get_pixel(7, 3)[0]);
    }

    #[test]
    fn test_serializes_to_json() {
        let mut map = DepthMapData::new(1, 1);
        map.record(RasterPosition::ORIGIN, 3.5, 0.25);
        let json = serde_json::to_string(&map).unwrap();
        let back: DepthMapData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
