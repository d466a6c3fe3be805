//! Property-based tests for the queue, raster and offset blending.
//!
//! Run with: cargo test --test processor_props

use proptest::prelude::*;
use rigstream::depth_map::{DepthMapData, ScanPlan};
use rigstream::queue::FrameQueue;
use rigstream::stabilise::BlendPolicy;
use rigstream::types::{Offset, RasterPosition, Region};

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: Items leave an unbounded queue in the order they entered
    #[test]
    fn queue_preserves_fifo_order(items in prop::collection::vec(any::<u32>(), 0..200)) {
        let queue = FrameQueue::new();
        for &item in &items {
            prop_assert!(queue.push(item).is_ok());
        }
        let mut out = Vec::new();
        while let Ok(Some(item)) = queue.try_pop() {
            out.push(item);
        }
        prop_assert_eq!(out, items);
    }

    /// INVARIANT: A bounded queue keeps the newest `capacity` items and
    /// counts every item it evicted
    #[test]
    fn bounded_queue_keeps_newest(
        capacity in 1usize..16,
        count in 0usize..64,
    ) {
        let queue = FrameQueue::with_capacity(capacity);
        for i in 0..count {
            prop_assert!(queue.push(i).is_ok());
        }
        let kept = queue.drain();
        let expected: Vec<usize> = (count.saturating_sub(capacity)..count).collect();
        prop_assert_eq!(kept, expected);
        prop_assert_eq!(queue.dropped() as usize, count.saturating_sub(capacity));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RASTER INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: Walking `next` from the origin visits every cell once,
    /// in increasing row-major index
    #[test]
    fn raster_walk_visits_each_cell_once(width in 1u32..24, height in 1u32..24) {
        let mut cursor = Some(RasterPosition::ORIGIN);
        let mut expected = 0usize;
        while let Some(position) = cursor {
            prop_assert!(position.is_within(width, height));
            prop_assert_eq!(position.index(width), expected);
            expected += 1;
            cursor = position.next(width, height);
        }
        prop_assert_eq!(expected, (width * height) as usize);
    }

    /// INVARIANT: Tiles cover the frame exactly
    #[test]
    fn tiles_partition_frame(
        cols in 1u32..8,
        rows in 1u32..8,
        extra_w in 0u32..40,
        extra_h in 0u32..40,
    ) {
        let width = cols * 4 + extra_w;
        let height = rows * 4 + extra_h;
        let mut area = 0u64;
        for row in 0..rows {
            for col in 0..cols {
                let tile = Region::tile(width, height, cols, rows, col, row);
                prop_assert!(tile.fits_within(width, height));
                area += tile.width as u64 * tile.height as u64;
            }
        }
        prop_assert_eq!(area, width as u64 * height as u64);
    }

    /// INVARIANT: Recording keeps the best score per cell
    #[test]
    fn depth_cell_keeps_maximum(scores in prop::collection::vec(0.0f64..1000.0, 1..20)) {
        let mut map = DepthMapData::new(1, 1);
        for (i, &score) in scores.iter().enumerate() {
            map.record(RasterPosition::ORIGIN, score, i as f64);
        }
        let best = scores.iter().cloned().fold(f64::MIN, f64::max);
        let cell = map.cell(RasterPosition::ORIGIN).unwrap();
        prop_assert_eq!(cell.max_sharpness, best);
        prop_assert_eq!(scores[cell.focus_position as usize], best);
    }

    /// INVARIANT: A sweep has `focus_steps` positions bounded by the range
    #[test]
    fn scan_plan_spans_range(
        start in -5.0f64..5.0,
        span in 0.0f64..10.0,
        steps in 1u32..50,
    ) {
        let plan = ScanPlan {
            focus_start: start,
            focus_end: start + span,
            focus_steps: steps,
            settle_tolerance: 0.01,
        };
        let positions = plan.positions();
        prop_assert_eq!(positions.len(), steps as usize);
        prop_assert_eq!(positions[0], start);
        for pair in positions.windows(2) {
            prop_assert!(pair[1] >= pair[0]);
        }
        if steps > 1 {
            prop_assert!((positions[positions.len() - 1] - (start + span)).abs() < 1e-9);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFSET BLENDING
// ═══════════════════════════════════════════════════════════════════════════

fn offset() -> impl Strategy<Value = Offset> {
    (-200.0f64..200.0, -200.0f64..200.0).prop_map(|(x, y)| Offset::new(x, y))
}

proptest! {
    /// INVARIANT: Incremental blending sums the measured deltas
    #[test]
    fn incremental_blend_sums(deltas in prop::collection::vec(offset(), 0..30)) {
        let total = deltas
            .iter()
            .fold(Offset::ZERO, |running, &d| BlendPolicy::Incremental.apply(running, d));
        let x: f64 = deltas.iter().map(|d| d.x).sum();
        let y: f64 = deltas.iter().map(|d| d.y).sum();
        prop_assert!((total.x - x).abs() < 1e-6);
        prop_assert!((total.y - y).abs() < 1e-6);
    }

    /// INVARIANT: Absolute blending lands between the running and measured
    /// offsets, and a factor of one replaces the running offset
    #[test]
    fn absolute_blend_interpolates(
        running in offset(),
        measured in offset(),
        factor in 0.01f64..1.0,
    ) {
        let blended = BlendPolicy::Absolute { blend_factor: factor }.apply(running, measured);
        let lo_x = running.x.min(measured.x) - 1e-9;
        let hi_x = running.x.max(measured.x) + 1e-9;
        prop_assert!(blended.x >= lo_x && blended.x <= hi_x);

        let replaced = BlendPolicy::Absolute { blend_factor: 1.0 }.apply(running, measured);
        prop_assert_eq!(replaced, measured);
    }
}
