/// Template-matching stabiliser
///
/// Finds the whole-pixel translation that minimises the mean absolute
/// difference between the current frame and an accumulated template, then
/// refines it with a parabolic fit through the neighbouring costs. The
/// template follows the scene: after every measurement it is re-aligned by
/// the measured delta and blended with the new frame.
use super::BlendPolicy;
use crate::errors::{RigError, RigResult};
use crate::types::{Frame, Offset};

/// Fraction of the frame that must overlap for a candidate shift to count
const MIN_OVERLAP: f64 = 0.25;

/// Frames are sampled on a grid so the search stays near this many samples per side
const SAMPLES_PER_SIDE: usize = 128;

#[derive(Debug, Clone)]
pub struct CorrelationStabiliser {
    search_radius: i64,
    template_weight: f32,
    template: Option<Template>,
}

#[derive(Debug, Clone)]
struct Template {
    width: usize,
    height: usize,
    luma: Vec<f32>,
}

impl CorrelationStabiliser {
    pub fn new(search_radius: u32, template_weight: f64) -> Self {
        Self {
            search_radius: search_radius.max(1) as i64,
            template_weight: template_weight.clamp(f64::EPSILON, 1.0) as f32,
            template: None,
        }
    }

    pub fn reset(&mut self) {
        self.template = None;
    }

    pub fn has_template(&self) -> bool {
        self.template.is_some()
    }

    pub fn blend_policy(&self) -> BlendPolicy {
        BlendPolicy::Incremental
    }

    /// Motion of `frame` since the previous call. The first call after a
    /// reset seeds the template and reports no motion.
    pub fn compute_offset(&mut self, frame: &Frame) -> RigResult<Offset> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let luma = frame.luma();

        let template = match self.template.take() {
            None => {
                self.template = Some(Template { width, height, luma });
                return Ok(Offset::ZERO);
            }
            Some(t) if t.width != width || t.height != height => {
                let expected = (t.width as u32, t.height as u32);
                self.template = Some(t);
                return Err(RigError::DimensionMismatch {
                    expected,
                    got: frame.dimensions(),
                });
            }
            Some(t) => t,
        };

        let delta = self.search(&template, &luma);
        self.template = Some(update_template(template, &luma, delta, self.template_weight));

        log::trace!("Correlation delta ({:.2}, {:.2})", delta.x, delta.y);
        Ok(delta)
    }

    fn search(&self, template: &Template, current: &[f32]) -> Offset {
        let (w, h) = (template.width, template.height);
        let r = self.search_radius.min(w as i64 - 1).min(h as i64 - 1).max(0);
        let step = (w.min(h) / SAMPLES_PER_SIDE).max(1);
        let side = (2 * r + 1) as usize;

        let mut costs = vec![f64::INFINITY; side * side];
        let mut best = (0i64, 0i64);
        let mut best_cost = f64::INFINITY;

        for dy in -r..=r {
            for dx in -r..=r {
                let cost = mean_abs_diff(template, current, dx, dy, step);
                costs[((dy + r) as usize) * side + (dx + r) as usize] = cost;
                // Ties resolve toward the smaller shift
                let better = cost < best_cost
                    || (cost == best_cost && dx.abs() + dy.abs() < best.0.abs() + best.1.abs());
                if better {
                    best_cost = cost;
                    best = (dx, dy);
                }
            }
        }

        if !best_cost.is_finite() {
            return Offset::ZERO;
        }

        let at = |dx: i64, dy: i64| -> Option<f64> {
            if dx.abs() > r || dy.abs() > r {
                return None;
            }
            let c = costs[((dy + r) as usize) * side + (dx + r) as usize];
            c.is_finite().then_some(c)
        };

        let (bx, by) = best;
        let sub_x = parabolic_vertex(at(bx - 1, by), best_cost, at(bx + 1, by));
        let sub_y = parabolic_vertex(at(bx, by - 1), best_cost, at(bx, by + 1));
        Offset::new(bx as f64 + sub_x, by as f64 + sub_y)
    }
}

/// Cost of the hypothesis `current(x, y) == template(x - dx, y - dy)`.
fn mean_abs_diff(template: &Template, current: &[f32], dx: i64, dy: i64, step: usize) -> f64 {
    let (w, h) = (template.width as i64, template.height as i64);
    let x0 = dx.max(0);
    let x1 = (w + dx).min(w);
    let y0 = dy.max(0);
    let y1 = (h + dy).min(h);
    if x1 <= x0 || y1 <= y0 {
        return f64::INFINITY;
    }
    let overlap = ((x1 - x0) * (y1 - y0)) as f64 / (w * h) as f64;
    if overlap < MIN_OVERLAP {
        return f64::INFINITY;
    }

    let mut total = 0.0f64;
    let mut n = 0usize;
    for y in (y0..y1).step_by(step) {
        let row = (y * w) as usize;
        let src_row = ((y - dy) * w) as usize;
        for x in (x0..x1).step_by(step) {
            let a = current[row + x as usize];
            let b = template.luma[src_row + (x - dx) as usize];
            total += (a - b).abs() as f64;
            n += 1;
        }
    }
    if n == 0 {
        f64::INFINITY
    } else {
        total / n as f64
    }
}

fn parabolic_vertex(left: Option<f64>, centre: f64, right: Option<f64>) -> f64 {
    match (left, right) {
        (Some(l), Some(r)) => {
            let denom = l - 2.0 * centre + r;
            if denom.abs() < f64::EPSILON {
                0.0
            } else {
                (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
            }
        }
        _ => 0.0,
    }
}

/// Move the template into the current frame's coordinates and blend it.
fn update_template(template: Template, current: &[f32], delta: Offset, weight: f32) -> Template {
    if weight >= 1.0 {
        return Template {
            luma: current.to_vec(),
            ..template
        };
    }

    let (w, h) = (template.width as i64, template.height as i64);
    let (dx, dy) = delta.rounded();
    let mut luma = Vec::with_capacity(current.len());
    for y in 0..h {
        for x in 0..w {
            let cur = current[(y * w + x) as usize];
            let (sx, sy) = (x - dx, y - dy);
            let value = if sx >= 0 && sx < w && sy >= 0 && sy < h {
                let old = template.luma[(sy * w + sx) as usize];
                old + weight * (cur - old)
            } else {
                cur
            };
            luma.push(value);
        }
    }
    Template { luma, ..template }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shifted_frame;

    #[test]
    fn test_first_call_seeds_template() {
        let mut engine = CorrelationStabiliser::new(8, 1.0);
        assert!(!engine.has_template());
        let offset = engine.compute_offset(&shifted_frame(48, 48, 11, 0, 0)).unwrap();
        assert_eq!(offset, Offset::ZERO);
        assert!(engine.has_template());
    }

    #[test]
    fn test_measures_frame_to_frame_delta() {
        let mut engine = CorrelationStabiliser::new(8, 1.0);
        engine.compute_offset(&shifted_frame(64, 64, 5, 0, 0)).unwrap();
        let delta = engine.compute_offset(&shifted_frame(64, 64, 5, 3, -2)).unwrap();
        assert!((delta.x - 3.0).abs() < 0.5, "dx = {}", delta.x);
        assert!((delta.y + 2.0).abs() < 0.5, "dy = {}", delta.y);
    }

    #[test]
    fn test_blended_template_tracks_scene() {
        let mut engine = CorrelationStabiliser::new(8, 0.5);
        engine.compute_offset(&shifted_frame(64, 64, 9, 0, 0)).unwrap();
        let first = engine.compute_offset(&shifted_frame(64, 64, 9, 2, 0)).unwrap();
        let second = engine.compute_offset(&shifted_frame(64, 64, 9, 4, 0)).unwrap();
        assert!((first.x - 2.0).abs() < 0.5);
        assert!((second.x - 2.0).abs() < 0.5);
    }

    #[test]
    fn test_dimension_change_is_rejected() {
        let mut engine = CorrelationStabiliser::new(4, 1.0);
        engine.compute_offset(&shifted_frame(32, 32, 1, 0, 0)).unwrap();
        let err = engine.compute_offset(&shifted_frame(40, 32, 1, 0, 0)).unwrap_err();
        assert!(matches!(err, RigError::DimensionMismatch { .. }));
        assert!(engine.has_template());
    }

    #[test]
    fn test_reset_clears_template() {
        let mut engine = CorrelationStabiliser::new(4, 1.0);
        engine.compute_offset(&shifted_frame(32, 32, 1, 0, 0)).unwrap();
        engine.reset();
        assert!(!engine.has_template());
        assert_eq!(engine.blend_policy(), BlendPolicy::Incremental);
    }
}
