//! Planar geometry helpers: tessellation, aperture shapes, sweeps, winding
//! normalization, object transforms and thin-wire stitching.
//!
//! Rings are stored without a repeated closing vertex; the edge from the last
//! point back to the first is implied. Filled polygon sets use the non-zero
//! fill rule, so fills wind counter-clockwise and holes clockwise.

pub mod boolean;

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use crate::types::{BBox, Point};

/// Number of steps used to tessellate any arc or full circle.
pub const ARC_STEPS: usize = 40;

/// Coordinate equality and degeneracy tolerance, in millimeters.
pub const EPSILON: f64 = 1e-7;

/// A closed ring of vertices.
pub type Polygon = Vec<Point>;

/// A set of rings interpreted with the non-zero fill rule.
pub type PolygonSet = Vec<Polygon>;

/// An open chain of vertices.
pub type Polyline = Vec<Point>;

/// Which way an arc walks from its start angle to its end angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    /// Whichever way covers less than half a turn.
    Shortest,
    Clockwise,
    CounterClockwise,
}

/// Object mirroring, applied before rotation and scaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mirroring {
    #[default]
    None,
    /// Negates X coordinates.
    X,
    /// Negates Y coordinates.
    Y,
    XY,
}

impl Mirroring {
    pub fn as_f64(&self) -> [f64; 2] {
        match self {
            Mirroring::None => [1.0, 1.0],
            Mirroring::X => [-1.0, 1.0],
            Mirroring::Y => [1.0, -1.0],
            Mirroring::XY => [-1.0, -1.0],
        }
    }

    /// True when the mirror flips ring orientation.
    pub fn flips_winding(&self) -> bool {
        matches!(self, Mirroring::X | Mirroring::Y)
    }
}

// ─── Arcs and circles ────────────────────────────────────────────────

/// Signed sweep (radians) from `a0` to `a1` in the given direction.
///
/// Explicit directions return a sweep in `(0, 2π]` (counter-clockwise) or
/// `[-2π, 0)` (clockwise), so coincident angles yield a full turn.
pub fn arc_sweep(a0: f64, a1: f64, direction: ArcDirection) -> f64 {
    let mut d = (a1 - a0) % TAU;
    match direction {
        ArcDirection::CounterClockwise => {
            if d <= 0.0 {
                d += TAU;
            }
        }
        ArcDirection::Clockwise => {
            if d >= 0.0 {
                d -= TAU;
            }
        }
        ArcDirection::Shortest => {
            if d > PI {
                d -= TAU;
            } else if d <= -PI {
                d += TAU;
            }
        }
    }
    d
}

/// Tessellate the arc around `center` from `start` to `end`.
///
/// Only the `ARC_STEPS - 1` interior samples are produced unless
/// `close_start` / `close_end` ask for the exact endpoints to be included.
pub fn arc_points(
    center: Point,
    start: Point,
    end: Point,
    direction: ArcDirection,
    close_start: bool,
    close_end: bool,
) -> Vec<Point> {
    let radius = center.distance(start);
    let a0 = start.angle_from(center);
    let sweep = arc_sweep(a0, end.angle_from(center), direction);

    let mut points = Vec::with_capacity(ARC_STEPS + 1);
    if close_start {
        points.push(start);
    }
    for k in 1..ARC_STEPS {
        let a = a0 + sweep * (k as f64) / (ARC_STEPS as f64);
        points.push(polar(center, radius, a));
    }
    if close_end {
        points.push(end);
    }
    points
}

/// Sample `steps + 1` points (both ends included) along an arc given by
/// start angle and signed sweep, both in radians.
pub fn arc_by_angle(center: Point, radius: f64, start: f64, sweep: f64, steps: usize) -> Vec<Point> {
    let steps = steps.max(1);
    (0..=steps)
        .map(|k| polar(center, radius, start + sweep * (k as f64) / (steps as f64)))
        .collect()
}

fn polar(center: Point, radius: f64, angle: f64) -> Point {
    let (sin_a, cos_a) = angle.sin_cos();
    Point::new(center.x + radius * cos_a, center.y + radius * sin_a)
}

/// Counter-clockwise circle approximation.
///
/// `vertices` overrides the default [`ARC_STEPS`] (macro polygons use it for
/// exact vertex counts); `rotation` is in degrees.
pub fn circle_polygon(center: Point, radius: f64, vertices: Option<usize>, rotation: f64) -> Polygon {
    let n = vertices.unwrap_or(ARC_STEPS).max(3);
    let offset = rotation.to_radians();
    (0..n)
        .map(|k| polar(center, radius, offset + TAU * (k as f64) / (n as f64)))
        .collect()
}

// ─── Standard shapes ─────────────────────────────────────────────────

/// Axis-aligned rectangle centered on `center`, counter-clockwise.
pub fn rectangle_polygon(center: Point, width: f64, height: f64) -> Polygon {
    let hw = width / 2.0;
    let hh = height / 2.0;
    vec![
        Point::new(center.x - hw, center.y - hh),
        Point::new(center.x + hw, center.y - hh),
        Point::new(center.x + hw, center.y + hh),
        Point::new(center.x - hw, center.y + hh),
    ]
}

/// Stadium shape: a rectangle with semicircular caps on the shorter axis.
pub fn obround_polygon(center: Point, width: f64, height: f64) -> Polygon {
    if (width - height).abs() < EPSILON {
        return circle_polygon(center, width / 2.0, None, 0.0);
    }
    let segs = ARC_STEPS / 2;
    let mut pts = Vec::with_capacity(2 * (segs + 1));
    if width > height {
        // Caps on the left and right ends
        let r = height / 2.0;
        let half = width / 2.0 - r;
        pts.extend(arc_by_angle(Point::new(center.x + half, center.y), r, -FRAC_PI_2, PI, segs));
        pts.extend(arc_by_angle(Point::new(center.x - half, center.y), r, FRAC_PI_2, PI, segs));
    } else {
        // Caps on the top and bottom
        let r = width / 2.0;
        let half = height / 2.0 - r;
        pts.extend(arc_by_angle(Point::new(center.x, center.y + half), r, 0.0, PI, segs));
        pts.extend(arc_by_angle(Point::new(center.x, center.y - half), r, PI, PI, segs));
    }
    pts
}

/// Regular polygon with `vertices` corners on a circle of `diameter`.
pub fn regular_polygon(center: Point, diameter: f64, vertices: usize, rotation: f64) -> Polygon {
    circle_polygon(center, diameter / 2.0, Some(vertices), rotation)
}

// ─── Sweeps ──────────────────────────────────────────────────────────

/// Shape swept by a round pen of `radius` moving along a straight segment.
pub fn capsule(start: Point, end: Point, radius: f64) -> Polygon {
    if start.distance(end) < EPSILON {
        return circle_polygon(start, radius, None, 0.0);
    }
    let theta = end.angle_from(start);
    let segs = ARC_STEPS / 2;
    let mut pts = arc_by_angle(end, radius, theta - FRAC_PI_2, PI, segs);
    pts.extend(arc_by_angle(start, radius, theta + FRAC_PI_2, PI, segs));
    pts
}

/// Shape swept by a round pen of `pen_radius` along a circular arc.
pub fn arc_capsule(
    center: Point,
    start: Point,
    end: Point,
    direction: ArcDirection,
    pen_radius: f64,
) -> Polygon {
    let radius = center.distance(start);
    let a0 = start.angle_from(center);
    let sweep = arc_sweep(a0, end.angle_from(center), direction);
    let a1 = a0 + sweep;
    if pen_radius >= radius {
        return wide_arc_sweep(center, radius, a0.min(a1), sweep.abs(), pen_radius);
    }
    let sign = sweep.signum();
    let outer = radius + pen_radius;
    let inner = (radius - pen_radius).max(0.0);
    let segs = ARC_STEPS / 2;

    let mut pts = arc_by_angle(center, outer, a0, sweep, ARC_STEPS);
    pts.extend(arc_by_angle(end, pen_radius, a1, sign * PI, segs).into_iter().skip(1));
    pts.extend(arc_by_angle(center, inner, a1, -sweep, ARC_STEPS).into_iter().skip(1));
    let mut start_cap = arc_by_angle(start, pen_radius, a0 + PI, sign * PI, segs);
    start_cap.pop();
    pts.extend(start_cap.into_iter().skip(1));
    normalize_winding(pts)
}

/// Sweep of a pen at least as wide as the arc radius. Every pen position
/// covers the center, so the outline is traced in polar form around it: the
/// farthest reach along each direction comes from the nearest arc angle.
fn wide_arc_sweep(center: Point, radius: f64, lo: f64, width: f64, pen_radius: f64) -> Polygon {
    let steps = 2 * ARC_STEPS;
    let slack = pen_radius * pen_radius - radius * radius;
    (0..steps)
        .map(|k| {
            let phi = lo + TAU * (k as f64) / (steps as f64);
            let delta = (phi - lo).rem_euclid(TAU);
            let off = if delta <= width {
                0.0
            } else {
                (delta - width).min(TAU - delta)
            };
            let d = radius * off.cos();
            let reach = d + (slack + d * d).max(0.0).sqrt();
            center + Point::new(reach * phi.cos(), reach * phi.sin())
        })
        .collect()
}

/// A filled ring between two radii; a disk when `inner` is not positive.
pub fn annulus(center: Point, outer: f64, inner: f64) -> PolygonSet {
    let mut set = vec![circle_polygon(center, outer, None, 0.0)];
    if inner > EPSILON {
        set.push(as_hole(circle_polygon(center, inner, None, 0.0)));
    }
    set
}

/// Shape swept by a convex pen (given relative to its own origin) moving
/// along a straight segment: the hull of the pen at both ends.
pub fn convex_sweep(pen: &[Point], start: Point, end: Point) -> Polygon {
    let mut cloud: Vec<Point> = pen.iter().map(|p| *p + start).collect();
    cloud.extend(pen.iter().map(|p| *p + end));
    convex_hull(cloud)
}

/// Counter-clockwise convex hull (monotone chain).
pub fn convex_hull(mut points: Vec<Point>) -> Polygon {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup_by(|a, b| a.distance_squared(*b) < EPSILON * EPSILON);
    if points.len() < 3 {
        return points;
    }

    fn cross(o: Point, a: Point, b: Point) -> f64 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }

    let mut hull: Vec<Point> = Vec::with_capacity(points.len() * 2);
    for &p in &points {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

// ─── Winding ─────────────────────────────────────────────────────────

/// Shoelace area; positive for counter-clockwise rings.
pub fn signed_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, p) in ring.iter().enumerate() {
        let q = ring[(i + 1) % ring.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

/// Reverse a clockwise ring so it winds counter-clockwise.
pub fn normalize_winding(mut ring: Polygon) -> Polygon {
    if signed_area(&ring) < 0.0 {
        ring.reverse();
    }
    ring
}

/// Orient a ring clockwise so it cuts a hole under the non-zero rule.
pub fn as_hole(mut ring: Polygon) -> Polygon {
    if signed_area(&ring) > 0.0 {
        ring.reverse();
    }
    ring
}

/// Close a traced contour into a counter-clockwise ring.
///
/// A trailing vertex that repeats the first one is dropped (the closing edge
/// is implicit); otherwise the closing edge is implied from last to first.
pub fn close_ring(mut points: Vec<Point>) -> Polygon {
    if points.len() > 1 {
        let first = points[0];
        if let Some(last) = points.last() {
            if first.distance(*last) < EPSILON {
                points.pop();
            }
        }
    }
    normalize_winding(points)
}

// ─── Transforms ──────────────────────────────────────────────────────

/// Apply object transforms to a polygon set: mirror, then rotate (degrees),
/// then scale, then translate to `offset`.
pub fn transform_set(
    set: &[Polygon],
    mirroring: Mirroring,
    rotation: f64,
    scale: f64,
    offset: Point,
) -> PolygonSet {
    let [mx, my] = mirroring.as_f64();
    set.iter()
        .map(|ring| {
            let mut out: Polygon = ring
                .iter()
                .map(|p| Point::new(p.x * mx, p.y * my).rotated(rotation) * scale + offset)
                .collect();
            if mirroring.flips_winding() {
                out.reverse();
            }
            out
        })
        .collect()
}

pub fn translate_set(set: &[Polygon], offset: Point) -> PolygonSet {
    set.iter()
        .map(|ring| ring.iter().map(|p| *p + offset).collect())
        .collect()
}

/// Bounding box over every vertex of every ring.
pub fn bounds_of<'a>(rings: impl IntoIterator<Item = &'a Vec<Point>>) -> BBox {
    let mut bbox = BBox::empty();
    for ring in rings {
        for p in ring {
            bbox.expand(*p);
        }
    }
    bbox
}

// ─── Thin wires ──────────────────────────────────────────────────────

/// Merge consecutive polylines whose end meets the next one's start.
///
/// A single left-to-right pass: only neighbours in emission order are
/// joined, contiguous wires emitted out of order stay separate.
pub fn connect_wires(polylines: Vec<Polyline>) -> Vec<Polyline> {
    let mut out: Vec<Polyline> = Vec::with_capacity(polylines.len());
    for line in polylines {
        let Some(&start) = line.first() else {
            continue;
        };
        if let Some(prev) = out.last_mut() {
            if let Some(end) = prev.last() {
                if end.distance_squared(start) < EPSILON * EPSILON {
                    prev.extend(line.into_iter().skip(1));
                    continue;
                }
            }
        }
        out.push(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_arc_sweep_directions() {
        assert_abs_diff_eq!(arc_sweep(0.0, FRAC_PI_2, ArcDirection::CounterClockwise), FRAC_PI_2, epsilon = 1e-12);
        assert_abs_diff_eq!(arc_sweep(0.0, FRAC_PI_2, ArcDirection::Clockwise), FRAC_PI_2 - TAU, epsilon = 1e-12);
        assert_abs_diff_eq!(arc_sweep(0.0, -FRAC_PI_2, ArcDirection::Shortest), -FRAC_PI_2, epsilon = 1e-12);
        // Coincident angles with an explicit direction are a full turn
        assert_abs_diff_eq!(arc_sweep(1.0, 1.0, ArcDirection::CounterClockwise), TAU, epsilon = 1e-12);
    }

    #[test]
    fn test_arc_points_interior_only() {
        let pts = arc_points(p(0.0, 0.0), p(1.0, 0.0), p(0.0, 1.0), ArcDirection::CounterClockwise, false, false);
        assert_eq!(pts.len(), ARC_STEPS - 1);
        for pt in &pts {
            assert_abs_diff_eq!(pt.distance(p(0.0, 0.0)), 1.0, epsilon = 1e-12);
            assert!(pt.x > 0.0 && pt.y > 0.0);
        }
    }

    #[test]
    fn test_arc_points_with_exact_ends() {
        let start = p(1.0, 0.0);
        let end = p(0.0, 1.0);
        let pts = arc_points(p(0.0, 0.0), start, end, ArcDirection::Shortest, true, true);
        assert_eq!(pts.len(), ARC_STEPS + 1);
        assert_eq!(pts[0], start);
        assert_eq!(*pts.last().unwrap(), end);
    }

    #[test]
    fn test_clockwise_arc_walks_the_long_way() {
        // CW from (1,0) to (0,1) goes through the lower half plane
        let pts = arc_points(p(0.0, 0.0), p(1.0, 0.0), p(0.0, 1.0), ArcDirection::Clockwise, false, false);
        assert!(pts.iter().any(|pt| pt.y < -0.5));
    }

    #[test]
    fn test_circle_polygon_vertex_override_and_rotation() {
        let square = circle_polygon(p(0.0, 0.0), 1.0, Some(4), 45.0);
        assert_eq!(square.len(), 4);
        assert_abs_diff_eq!(square[0].x, 0.5f64.sqrt(), epsilon = 1e-12);
        assert!(signed_area(&square) > 0.0);
    }

    #[test]
    fn test_obround_bounds() {
        let ob = obround_polygon(p(1.0, 1.0), 0.6, 0.3);
        let bbox = bounds_of([&ob]);
        assert_abs_diff_eq!(bbox.min_x, 0.7, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox.max_x, 1.3, epsilon = 1e-9);
        assert_abs_diff_eq!(bbox.max_y, 1.15, epsilon = 1e-9);
        assert!(signed_area(&ob) > 0.0);
    }

    #[test]
    fn test_capsule_area() {
        let cap = capsule(p(0.0, 0.0), p(2.0, 0.0), 0.5);
        let expected = 2.0 * 1.0 + PI * 0.25;
        assert_abs_diff_eq!(signed_area(&cap), expected, epsilon = 0.01);
    }

    #[test]
    fn test_arc_capsule_is_counter_clockwise() {
        let shape = arc_capsule(p(0.0, 0.0), p(1.0, 0.0), p(0.0, 1.0), ArcDirection::Clockwise, 0.1);
        assert!(signed_area(&shape) > 0.0);
        // Three quarter ring of width 0.2 plus two half caps
        let expected = 0.75 * PI * (1.1f64.powi(2) - 0.9f64.powi(2)) + PI * 0.01;
        assert_abs_diff_eq!(signed_area(&shape), expected, epsilon = 0.02);
    }

    #[test]
    fn test_arc_capsule_with_pen_wider_than_radius() {
        let c = p(0.0, 0.0);
        let shape = arc_capsule(c, p(1.0, 0.0), p(0.0, 1.0), ArcDirection::CounterClockwise, 1.5);
        // Every edge turns the same way around the center, so the ring is simple
        for (i, a) in shape.iter().enumerate() {
            let b = shape[(i + 1) % shape.len()];
            assert!((a.x - c.x) * (b.y - c.y) - (a.y - c.y) * (b.x - c.x) > 0.0);
        }
        let far = shape.iter().map(|q| q.distance(c)).fold(0.0, f64::max);
        assert_abs_diff_eq!(far, 2.5, epsilon = 1e-9);
        // Opposite the arc the reach is the start/end pen disc past the center
        let near = shape.iter().map(|q| q.distance(c)).fold(f64::MAX, f64::min);
        assert!(near > 0.4 && near < 1.5);
        let area = signed_area(&shape);
        assert!(area > 0.25 * PI * 2.5 * 2.5);
        assert!(area < PI * 2.5 * 2.5);
    }

    #[test]
    fn test_annulus_has_hole() {
        let ring = annulus(p(0.0, 0.0), 2.0, 1.0);
        assert_eq!(ring.len(), 2);
        assert!(signed_area(&ring[0]) > 0.0);
        assert!(signed_area(&ring[1]) < 0.0);
        assert_eq!(annulus(p(0.0, 0.0), 2.0, 0.0).len(), 1);
    }

    #[test]
    fn test_convex_sweep_of_square() {
        let pen = rectangle_polygon(p(0.0, 0.0), 1.0, 1.0);
        let hull = convex_sweep(&pen, p(0.0, 0.0), p(3.0, 0.0));
        assert_eq!(hull.len(), 4);
        assert_abs_diff_eq!(signed_area(&hull), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_convex_sweep_diagonal() {
        let pen = rectangle_polygon(p(0.0, 0.0), 1.0, 1.0);
        let hull = convex_sweep(&pen, p(0.0, 0.0), p(2.0, 2.0));
        assert_eq!(hull.len(), 6);
        // Square area plus the swept band: 1 + 2 * (2 * 1)
        assert_abs_diff_eq!(signed_area(&hull), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_winding_normalization() {
        let ccw = vec![p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)];
        let mut cw = ccw.clone();
        cw.reverse();
        assert!(signed_area(&cw) < 0.0);
        assert!(signed_area(&normalize_winding(cw.clone())) > 0.0);
        assert!(signed_area(&as_hole(ccw.clone())) < 0.0);
        assert_eq!(normalize_winding(ccw.clone()), ccw);
    }

    #[test]
    fn test_close_ring_drops_repeated_vertex() {
        let ring = close_ring(vec![p(0.0, 0.0), p(0.0, 1.0), p(1.0, 1.0), p(1.0, 0.0), p(0.0, 0.0)]);
        assert_eq!(ring.len(), 4);
        assert!(signed_area(&ring) > 0.0);
    }

    #[test]
    fn test_transform_order_mirror_rotate_scale_translate() {
        let set = vec![vec![p(1.0, 0.0), p(2.0, 0.0), p(2.0, 1.0)]];
        let out = transform_set(&set, Mirroring::X, 90.0, 2.0, p(10.0, 0.0));
        // (1,0) -> mirror (-1,0) -> rotate (0,-1) -> scale (0,-2) -> translate (10,-2)
        assert_abs_diff_eq!(out[0].last().unwrap().x, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[0].last().unwrap().y, -2.0, epsilon = 1e-12);
        // Single-axis mirroring keeps the ring counter-clockwise
        assert!(signed_area(&out[0]) > 0.0);
    }

    #[test]
    fn test_connect_wires_single_pass() {
        let wires = vec![
            vec![p(0.0, 0.0), p(1.0, 0.0)],
            vec![p(1.0, 0.0), p(1.0, 1.0)],
            vec![p(5.0, 5.0), p(6.0, 5.0)],
            // Contiguous with the first chain, but out of emission order
            vec![p(1.0, 1.0), p(0.0, 1.0)],
        ];
        let joined = connect_wires(wires);
        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0], vec![p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)]);
    }

    #[test]
    fn test_connect_wires_skips_empty() {
        let joined = connect_wires(vec![vec![], vec![p(0.0, 0.0), p(1.0, 0.0)]]);
        assert_eq!(joined.len(), 1);
    }
}
