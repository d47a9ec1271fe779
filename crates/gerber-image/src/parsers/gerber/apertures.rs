use std::cell::OnceCell;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::rc::Rc;

use log::warn;

use crate::error::GerberError;
use crate::geometry::boolean::BooleanOps;
use crate::geometry::{
    annulus, arc_by_angle, arc_capsule, arc_points, as_hole, capsule, circle_polygon,
    convex_sweep, obround_polygon, rectangle_polygon, regular_polygon, transform_set,
    ArcDirection, Polygon, PolygonSet, ARC_STEPS, EPSILON,
};
use crate::types::Point;

use super::commands::ApertureTemplate;
use super::coord::Units;
use super::macros::ApertureMacro;
use super::primitives::{GraphicsObject, ObjectState};

/// What an aperture is made of.
#[derive(Debug, Clone)]
pub enum ApertureKind {
    /// Circle, rectangle, obround or polygon template.
    Standard(ApertureTemplate),
    /// Instance of an aperture macro with its modifier values.
    Macro {
        definition: Rc<ApertureMacro>,
        params: Vec<f64>,
    },
    /// Objects captured between `AB<id>` and `AB`, in millimeters.
    Block(Vec<GraphicsObject>),
}

/// An aperture in the aperture table.
///
/// The realized shape is computed on first use and then shared by every
/// flash of this aperture.
#[derive(Debug)]
pub struct Aperture {
    pub id: u32,
    pub kind: ApertureKind,
    /// Units in force when the aperture was defined.
    pub units: Units,
    objects: OnceCell<Rc<Vec<GraphicsObject>>>,
}

impl Aperture {
    pub fn new(id: u32, kind: ApertureKind, units: Units) -> Self {
        Self {
            id,
            kind,
            units,
            objects: OnceCell::new(),
        }
    }

    fn mm(&self, value: f64) -> f64 {
        self.units.to_mm(value)
    }

    /// Circles and rectangles without a hole can be swept along a path.
    pub fn is_drawable(&self) -> bool {
        matches!(
            &self.kind,
            ApertureKind::Standard(
                ApertureTemplate::Circle { hole, .. } | ApertureTemplate::Rectangle { hole, .. }
            ) if hole.is_empty()
        )
    }

    /// Pen radius in millimeters for a drawable circle, after scaling.
    fn pen_radius(&self, state: &ObjectState) -> Option<f64> {
        match &self.kind {
            ApertureKind::Standard(ApertureTemplate::Circle { diameter, .. }) => {
                Some(self.mm(*diameter) * state.scale / 2.0)
            }
            _ => None,
        }
    }

    /// True when draws with this aperture produce zero-width strokes.
    pub fn is_thin(&self, state: &ObjectState) -> bool {
        self.pen_radius(state).is_some_and(|r| r < EPSILON)
    }

    /// Rectangle pen in millimeters, transformed by the object state.
    fn rect_pen(&self, state: &ObjectState) -> Option<Polygon> {
        match &self.kind {
            ApertureKind::Standard(ApertureTemplate::Rectangle { x_size, y_size, .. }) => {
                let rect = rectangle_polygon(Point::ORIGIN, self.mm(*x_size), self.mm(*y_size));
                transform_set(&[rect], state.mirroring, state.rotation, state.scale, Point::ORIGIN)
                    .into_iter()
                    .next()
            }
            _ => None,
        }
    }

    /// Untransformed objects of this aperture, centered on its origin.
    pub fn objects(
        &self,
        backend: &dyn BooleanOps,
        line: usize,
    ) -> Result<Rc<Vec<GraphicsObject>>, GerberError> {
        if let Some(objects) = self.objects.get() {
            return Ok(Rc::clone(objects));
        }
        let computed = match &self.kind {
            ApertureKind::Standard(template) => {
                vec![GraphicsObject::dark(self.standard_shape(template))]
            }
            ApertureKind::Macro { definition, params } => {
                let set = definition.evaluate(params, backend, line)?;
                let k = self.mm(1.0);
                let set = set
                    .into_iter()
                    .map(|ring| ring.into_iter().map(|p| p * k).collect())
                    .collect();
                vec![GraphicsObject::dark(set)]
            }
            ApertureKind::Block(objects) => objects.clone(),
        };
        Ok(Rc::clone(self.objects.get_or_init(|| Rc::new(computed))))
    }

    fn standard_shape(&self, template: &ApertureTemplate) -> PolygonSet {
        let (mut set, hole) = match template {
            ApertureTemplate::Circle { diameter, hole } => {
                let d = self.mm(*diameter);
                if d < EPSILON {
                    return Vec::new();
                }
                (vec![circle_polygon(Point::ORIGIN, d / 2.0, None, 0.0)], hole)
            }
            ApertureTemplate::Rectangle { x_size, y_size, hole } => (
                vec![rectangle_polygon(Point::ORIGIN, self.mm(*x_size), self.mm(*y_size))],
                hole,
            ),
            ApertureTemplate::Obround { x_size, y_size, hole } => (
                vec![obround_polygon(Point::ORIGIN, self.mm(*x_size), self.mm(*y_size))],
                hole,
            ),
            ApertureTemplate::Polygon {
                outer_diameter,
                vertices,
                rotation,
                hole,
            } => (
                vec![regular_polygon(
                    Point::ORIGIN,
                    self.mm(*outer_diameter),
                    *vertices as usize,
                    *rotation,
                )],
                hole,
            ),
            ApertureTemplate::Macro { .. } => return Vec::new(),
        };
        let hole: Vec<f64> = hole.iter().map(|v| self.mm(*v)).collect();
        if let Some(cut) = hole_polygon(Point::ORIGIN, &hole) {
            set.push(cut);
        }
        set
    }

    /// Shape swept by this aperture along a straight segment (millimeters).
    pub fn line_sweep(&self, start: Point, end: Point, state: &ObjectState) -> PolygonSet {
        if let Some(radius) = self.pen_radius(state) {
            return vec![capsule(start, end, radius)];
        }
        match self.rect_pen(state) {
            Some(pen) => vec![convex_sweep(&pen, start, end)],
            None => Vec::new(),
        }
    }

    /// Shape swept along a circular arc. Rectangle pens are swept one
    /// tessellation step at a time and the pieces unioned.
    pub fn arc_sweep(
        &self,
        center: Point,
        start: Point,
        end: Point,
        direction: ArcDirection,
        state: &ObjectState,
        backend: &dyn BooleanOps,
    ) -> PolygonSet {
        if let Some(radius) = self.pen_radius(state) {
            return vec![arc_capsule(center, start, end, direction, radius)];
        }
        let path = arc_points(center, start, end, direction, true, true);
        self.sweep_path(&path, state, backend)
    }

    /// Shape swept along a full circle of `radius` starting at `start`.
    pub fn circle_sweep(
        &self,
        center: Point,
        start: Point,
        state: &ObjectState,
        backend: &dyn BooleanOps,
    ) -> PolygonSet {
        let radius = center.distance(start);
        if let Some(pen) = self.pen_radius(state) {
            return annulus(center, radius + pen, radius - pen);
        }
        let path = arc_by_angle(center, radius, start.angle_from(center), TAU, ARC_STEPS);
        self.sweep_path(&path, state, backend)
    }

    fn sweep_path(&self, path: &[Point], state: &ObjectState, backend: &dyn BooleanOps) -> PolygonSet {
        let Some(pen) = self.rect_pen(state) else {
            return Vec::new();
        };
        let pieces: PolygonSet = path
            .windows(2)
            .map(|w| convex_sweep(&pen, w[0], w[1]))
            .collect();
        let merged = backend.union(&pieces, &[]);
        if merged.success {
            merged.polygons
        } else {
            warn!("Union of swept arc pieces failed for D{}; keeping raw pieces", self.id);
            pieces
        }
    }
}

/// Cut-out for a standard aperture: one value is a round hole, two a
/// rectangular one. Returned clockwise.
pub fn hole_polygon(center: Point, hole: &[f64]) -> Option<Polygon> {
    match hole {
        [d] if *d > 0.0 => Some(as_hole(circle_polygon(center, d / 2.0, None, 0.0))),
        [w, h] if *w > 0.0 && *h > 0.0 => Some(as_hole(rectangle_polygon(center, *w, *h))),
        _ => None,
    }
}

/// Aperture table built from %AD commands and block apertures.
#[derive(Debug, Default)]
pub struct ApertureTable {
    apertures: HashMap<u32, Rc<Aperture>>,
}

impl ApertureTable {
    /// Insert an aperture; returns true when it replaced an earlier one.
    pub fn define(&mut self, aperture: Aperture) -> bool {
        self.apertures
            .insert(aperture.id, Rc::new(aperture))
            .is_some()
    }

    pub fn get(&self, code: u32) -> Option<Rc<Aperture>> {
        self.apertures.get(&code).cloned()
    }

    pub fn len(&self) -> usize {
        self.apertures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apertures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::boolean::initialize;
    use crate::geometry::{signed_area, Mirroring};
    use crate::parsers::gerber::primitives::Polarity;

    fn area(set: &[Polygon]) -> f64 {
        set.iter().map(|r| signed_area(r)).sum()
    }

    fn standard(id: u32, template: ApertureTemplate) -> Aperture {
        Aperture::new(id, ApertureKind::Standard(template), Units::Millimeters)
    }

    fn circle(d: f64) -> ApertureTemplate {
        ApertureTemplate::Circle {
            diameter: d,
            hole: vec![],
        }
    }

    fn rect(w: f64, h: f64) -> ApertureTemplate {
        ApertureTemplate::Rectangle {
            x_size: w,
            y_size: h,
            hole: vec![],
        }
    }

    #[test]
    fn test_define_and_get() {
        let mut table = ApertureTable::default();
        assert!(!table.define(standard(10, circle(0.5))));
        let ap = table.get(10).unwrap();
        assert!(
            matches!(&ap.kind, ApertureKind::Standard(ApertureTemplate::Circle { diameter, .. }) if (diameter - 0.5).abs() < 1e-9)
        );
        // Redefinition replaces and reports it
        assert!(table.define(standard(10, circle(0.7))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let table = ApertureTable::default();
        assert!(table.get(10).is_none());
    }

    #[test]
    fn test_drawable() {
        assert!(standard(10, circle(0.2)).is_drawable());
        assert!(standard(11, rect(0.2, 0.1)).is_drawable());
        let holed = ApertureTemplate::Circle {
            diameter: 1.0,
            hole: vec![0.3],
        };
        assert!(!standard(12, holed).is_drawable());
        let ob = ApertureTemplate::Obround {
            x_size: 1.0,
            y_size: 0.5,
            hole: vec![],
        };
        assert!(!standard(13, ob).is_drawable());
    }

    #[test]
    fn test_inch_aperture_scaled_to_mm() {
        let ap = Aperture::new(10, ApertureKind::Standard(rect(1.0, 1.0)), Units::Inches);
        let objects = ap.objects(initialize(), 1).unwrap();
        assert!((area(&objects[0].polygons) - 25.4 * 25.4).abs() < 1e-6);
    }

    #[test]
    fn test_hole_appended_reversed() {
        let template = ApertureTemplate::Rectangle {
            x_size: 2.0,
            y_size: 2.0,
            hole: vec![1.0, 1.0],
        };
        let objects = standard(10, template).objects(initialize(), 1).unwrap();
        let set = &objects[0].polygons;
        assert_eq!(set.len(), 2);
        assert!((area(set) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_objects_memoized() {
        let ap = standard(10, circle(1.0));
        let a = ap.objects(initialize(), 1).unwrap();
        let b = ap.objects(initialize(), 1).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a[0].polarity, Polarity::Dark);
    }

    #[test]
    fn test_zero_circle_is_thin() {
        let state = ObjectState::default();
        assert!(standard(10, circle(0.0)).is_thin(&state));
        assert!(!standard(10, circle(0.1)).is_thin(&state));
        assert!(!standard(10, rect(0.0, 0.0)).is_thin(&state));
    }

    #[test]
    fn test_rect_line_sweep_rotated() {
        let ap = standard(10, rect(1.0, 1.0));
        let state = ObjectState {
            rotation: 45.0,
            ..ObjectState::default()
        };
        let swept = ap.line_sweep(Point::new(0.0, 0.0), Point::new(4.0, 0.0), &state);
        // Diamond of diagonal sqrt(2) swept 4 units: 1 + 4 * sqrt(2)
        let expected = 1.0 + 4.0 * 2f64.sqrt();
        assert!((area(&swept) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_mirrored_rect_pen_stays_counter_clockwise() {
        let ap = standard(10, rect(2.0, 1.0));
        let state = ObjectState {
            mirroring: Mirroring::Y,
            ..ObjectState::default()
        };
        let pen = ap.rect_pen(&state).unwrap();
        assert!(signed_area(&pen) > 0.0);
    }

    #[test]
    fn test_circle_sweep_is_ring() {
        let ap = standard(10, circle(0.2));
        let set = ap.circle_sweep(Point::ORIGIN, Point::new(1.0, 0.0), &ObjectState::default(), initialize());
        assert_eq!(set.len(), 2);
        let expected = std::f64::consts::PI * (1.1f64.powi(2) - 0.9f64.powi(2));
        assert!((area(&set) - expected).abs() < 0.01);
    }

    #[test]
    fn test_rect_arc_sweep_unions_pieces() {
        let ap = standard(10, rect(0.2, 0.2));
        let set = ap.arc_sweep(
            Point::ORIGIN,
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            ArcDirection::CounterClockwise,
            &ObjectState::default(),
            initialize(),
        );
        assert_eq!(set.len(), 1);
        assert!(area(&set) > 0.0);
    }
}
