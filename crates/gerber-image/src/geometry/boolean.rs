//! Polygon boolean backend.
//!
//! Wraps `i_overlay` with the non-zero fill rule. Output rings come back with
//! fills counter-clockwise and holes clockwise, matching the rest of the
//! geometry module.

use std::sync::OnceLock;

use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use log::{debug, info};

use super::{Polygon, PolygonSet};
use crate::types::Point;

/// Outcome of a boolean operation.
///
/// On failure `polygons` is empty and callers keep their previous state.
#[derive(Debug, Clone, Default)]
pub struct BooleanResult {
    pub polygons: PolygonSet,
    pub success: bool,
}

impl BooleanResult {
    fn ok(polygons: PolygonSet) -> Self {
        Self {
            polygons,
            success: true,
        }
    }

    fn failed() -> Self {
        Self {
            polygons: Vec::new(),
            success: false,
        }
    }
}

/// Boolean operations over non-zero filled polygon sets.
pub trait BooleanOps {
    /// Union of `a` and `b`. Passing an empty `b` merges `a` with itself.
    fn union(&self, a: &[Polygon], b: &[Polygon]) -> BooleanResult;

    /// Area covered by `a` and not by `b`.
    fn difference(&self, a: &[Polygon], b: &[Polygon]) -> BooleanResult;
}

type Shapes = Vec<Vec<Vec<[f64; 2]>>>;

/// The process-wide boolean backend. Obtain it through [`initialize`].
#[derive(Debug)]
pub struct PolygonBackend {
    _private: (),
}

static BACKEND: OnceLock<PolygonBackend> = OnceLock::new();

/// Return the shared backend, setting it up on first use.
///
/// Safe to call any number of times; later calls return the same instance.
pub fn initialize() -> &'static PolygonBackend {
    BACKEND.get_or_init(|| {
        info!("Polygon boolean backend initialized (i_overlay, non-zero fill)");
        PolygonBackend { _private: () }
    })
}

impl PolygonBackend {
    fn run(&self, a: &[Polygon], b: &[Polygon], rule: OverlayRule) -> BooleanResult {
        if !all_finite(a) || !all_finite(b) {
            debug!("Rejecting boolean input with non-finite coordinates");
            return BooleanResult::failed();
        }
        let subject = to_shapes(a);
        let clip = to_shapes(b);
        let out = subject.overlay(&clip, rule, FillRule::NonZero);
        BooleanResult::ok(from_shapes(out))
    }
}

impl BooleanOps for PolygonBackend {
    fn union(&self, a: &[Polygon], b: &[Polygon]) -> BooleanResult {
        if a.is_empty() && b.is_empty() {
            return BooleanResult::ok(Vec::new());
        }
        self.run(a, b, OverlayRule::Union)
    }

    fn difference(&self, a: &[Polygon], b: &[Polygon]) -> BooleanResult {
        if a.is_empty() {
            return BooleanResult::ok(Vec::new());
        }
        if b.is_empty() {
            return BooleanResult::ok(a.to_vec());
        }
        self.run(a, b, OverlayRule::Difference)
    }
}

fn all_finite(set: &[Polygon]) -> bool {
    set.iter().all(|ring| ring.iter().all(Point::is_finite))
}

// The whole set goes in as a single shape; the fill rule decides coverage.
fn to_shapes(set: &[Polygon]) -> Shapes {
    let contours: Vec<Vec<[f64; 2]>> = set
        .iter()
        .filter(|ring| ring.len() >= 3)
        .map(|ring| ring.iter().map(|p| p.to_array()).collect())
        .collect();
    if contours.is_empty() {
        Vec::new()
    } else {
        vec![contours]
    }
}

fn from_shapes(shapes: Shapes) -> PolygonSet {
    shapes
        .into_iter()
        .flatten()
        .map(|contour| contour.into_iter().map(Point::from).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{as_hole, rectangle_polygon, signed_area};

    fn area(set: &[Polygon]) -> f64 {
        set.iter().map(|r| signed_area(r)).sum()
    }

    fn square(cx: f64, cy: f64, size: f64) -> Polygon {
        rectangle_polygon(Point::new(cx, cy), size, size)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let a = initialize() as *const PolygonBackend;
        let b = initialize() as *const PolygonBackend;
        assert_eq!(a, b);
    }

    #[test]
    fn test_union_overlapping_squares() {
        let backend = initialize();
        let result = backend.union(&[square(0.0, 0.0, 2.0)], &[square(1.0, 0.0, 2.0)]);
        assert!(result.success);
        assert!((area(&result.polygons) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_union_merges_overlaps() {
        let backend = initialize();
        let set = vec![square(0.0, 0.0, 2.0), square(1.0, 0.0, 2.0)];
        let result = backend.union(&set, &[]);
        assert!(result.success);
        assert_eq!(result.polygons.len(), 1);
        assert!((area(&result.polygons) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_difference_cuts_hole() {
        let backend = initialize();
        let result = backend.difference(&[square(0.0, 0.0, 4.0)], &[square(0.0, 0.0, 2.0)]);
        assert!(result.success);
        assert_eq!(result.polygons.len(), 2);
        assert!((area(&result.polygons) - 12.0).abs() < 1e-6);
        // Fill counter-clockwise, hole clockwise
        assert!(result.polygons.iter().any(|r| signed_area(r) > 0.0));
        assert!(result.polygons.iter().any(|r| signed_area(r) < 0.0));
    }

    #[test]
    fn test_difference_respects_input_holes() {
        let backend = initialize();
        let donut = vec![square(0.0, 0.0, 4.0), as_hole(square(0.0, 0.0, 2.0))];
        let result = backend.union(&donut, &[]);
        assert!(result.success);
        assert!((area(&result.polygons) - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_difference_with_empty_clip_is_identity() {
        let backend = initialize();
        let a = vec![square(0.0, 0.0, 1.0)];
        let result = backend.difference(&a, &[]);
        assert!(result.success);
        assert_eq!(result.polygons, a);
    }

    #[test]
    fn test_non_finite_input_fails() {
        let backend = initialize();
        let bad = vec![vec![
            Point::new(0.0, 0.0),
            Point::new(f64::NAN, 1.0),
            Point::new(1.0, 1.0),
        ]];
        let result = backend.union(&bad, &[square(0.0, 0.0, 1.0)]);
        assert!(!result.success);
        assert!(result.polygons.is_empty());
    }
}
