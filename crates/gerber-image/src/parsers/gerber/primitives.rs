//! Graphics primitives emitted by the interpreter.
//!
//! Every primitive captures the object state by value when it is created and
//! derives its realized objects on first request. The derivation is pure, so
//! repeated calls return the same cached objects.

use std::cell::OnceCell;
use std::rc::Rc;

use crate::geometry::boolean::PolygonBackend;
use crate::geometry::{
    arc_points, circle_polygon, close_ring, transform_set, translate_set, ArcDirection,
    Mirroring, PolygonSet,
};
use crate::types::Point;

use super::apertures::Aperture;
use super::coord::{CoordinateFormat, Units};
use super::writer::GerberWriter;

/// Whether an object adds material, removes it, or is a zero-width stroke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Polarity {
    #[default]
    Dark,
    Clear,
    Thin,
}

impl Polarity {
    /// Dark and clear swap; thin strokes stay thin.
    pub fn inverted(self) -> Self {
        match self {
            Polarity::Dark => Polarity::Clear,
            Polarity::Clear => Polarity::Dark,
            Polarity::Thin => Polarity::Thin,
        }
    }
}

/// Transform and polarity state captured by each primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectState {
    pub polarity: Polarity,
    pub mirroring: Mirroring,
    pub scale: f64,
    /// Degrees, counter-clockwise.
    pub rotation: f64,
    pub units: Units,
}

impl Default for ObjectState {
    fn default() -> Self {
        Self {
            polarity: Polarity::Dark,
            mirroring: Mirroring::None,
            scale: 1.0,
            rotation: 0.0,
            units: Units::Millimeters,
        }
    }
}

impl ObjectState {
    /// Extended commands that re-establish this state from any prior one.
    /// Thin strokes load dark; the pen they use keeps them thin.
    pub fn to_gerber(&self) -> String {
        let lp = if self.polarity == Polarity::Clear { "C" } else { "D" };
        let lm = match self.mirroring {
            Mirroring::None => "N",
            Mirroring::X => "X",
            Mirroring::Y => "Y",
            Mirroring::XY => "XY",
        };
        format!(
            "%LP{lp}*%\n%LM{lm}*%\n%LR{}*%\n%LS{}*%\n",
            self.rotation, self.scale
        )
    }
}

/// A realized polygon set tagged with its polarity.
///
/// For [`Polarity::Thin`] the rings are open polylines.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsObject {
    pub polygons: PolygonSet,
    pub polarity: Polarity,
}

impl GraphicsObject {
    pub fn dark(polygons: PolygonSet) -> Self {
        Self {
            polygons,
            polarity: Polarity::Dark,
        }
    }

    pub fn thin(polyline: Vec<Point>) -> Self {
        Self {
            polygons: vec![polyline],
            polarity: Polarity::Thin,
        }
    }

    pub fn translated(&self, offset: Point) -> Self {
        Self {
            polygons: translate_set(&self.polygons, offset),
            polarity: self.polarity,
        }
    }

    /// Place this object with the given state at `at`: mirror, rotate,
    /// scale, then translate. A clear state swaps dark and clear.
    pub fn placed(&self, state: &ObjectState, at: Point) -> Self {
        let mut polygons =
            transform_set(&self.polygons, state.mirroring, state.rotation, state.scale, at);
        if self.polarity == Polarity::Thin && state.mirroring.flips_winding() {
            // Polylines keep their drawing direction
            for line in &mut polygons {
                line.reverse();
            }
        }
        let polarity = if state.polarity == Polarity::Clear {
            self.polarity.inverted()
        } else {
            self.polarity
        };
        Self { polygons, polarity }
    }
}

/// One piece of a region contour.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Line {
        start: Point,
        end: Point,
    },
    Arc {
        center: Point,
        start: Point,
        end: Point,
        direction: ArcDirection,
    },
    /// A full circle beginning and ending at `start`.
    Circle { center: Point, start: Point },
}

impl Segment {
    pub fn start(&self) -> Point {
        match self {
            Segment::Line { start, .. }
            | Segment::Arc { start, .. }
            | Segment::Circle { start, .. } => *start,
        }
    }

    pub fn end(&self) -> Point {
        match self {
            Segment::Line { end, .. } | Segment::Arc { end, .. } => *end,
            Segment::Circle { start, .. } => *start,
        }
    }

    /// Points of this segment; the start point only for the first segment.
    fn push_points(&self, first: bool, out: &mut Vec<Point>) {
        if first {
            out.push(self.start());
        }
        match self {
            Segment::Line { end, .. } => out.push(*end),
            Segment::Arc {
                center,
                start,
                end,
                direction,
            } => out.extend(arc_points(*center, *start, *end, *direction, false, true)),
            Segment::Circle { center, start } => {
                let radius = center.distance(*start);
                let a0 = start.angle_from(*center).to_degrees();
                let ring = circle_polygon(*center, radius, None, a0);
                out.extend(ring.into_iter().skip(1));
                out.push(*start);
            }
        }
    }
}

/// A closed contour inside a region.
pub type Contour = Vec<Segment>;

fn arc_mode(direction: ArcDirection) -> &'static str {
    match direction {
        ArcDirection::Clockwise => "G02",
        _ => "G03",
    }
}

// ─── Primitives ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LinePrimitive {
    pub start: Point,
    pub end: Point,
    pub aperture: Rc<Aperture>,
    pub state: ObjectState,
    objects: OnceCell<Vec<GraphicsObject>>,
}

#[derive(Debug, Clone)]
pub struct ArcPrimitive {
    pub center: Point,
    pub start: Point,
    pub end: Point,
    pub direction: ArcDirection,
    pub aperture: Rc<Aperture>,
    pub state: ObjectState,
    backend: &'static PolygonBackend,
    objects: OnceCell<Vec<GraphicsObject>>,
}

/// A full-circle draw: an arc whose start and end coincide.
#[derive(Debug, Clone)]
pub struct CirclePrimitive {
    pub center: Point,
    pub start: Point,
    pub direction: ArcDirection,
    pub aperture: Rc<Aperture>,
    pub state: ObjectState,
    backend: &'static PolygonBackend,
    objects: OnceCell<Vec<GraphicsObject>>,
}

#[derive(Debug, Clone)]
pub struct FlashPrimitive {
    pub at: Point,
    pub aperture: Rc<Aperture>,
    pub state: ObjectState,
    base: Rc<Vec<GraphicsObject>>,
    objects: OnceCell<Vec<GraphicsObject>>,
}

#[derive(Debug, Clone)]
pub struct RegionPrimitive {
    pub contours: Vec<Contour>,
    pub state: ObjectState,
    objects: OnceCell<Vec<GraphicsObject>>,
}

/// A block of primitives replicated over an `x_count` by `y_count` grid.
#[derive(Debug, Clone)]
pub struct RepeatPrimitive {
    pub block: Vec<GraphicsPrimitive>,
    pub x_count: u32,
    pub y_count: u32,
    /// Grid pitch in millimeters.
    pub x_step: f64,
    pub y_step: f64,
    pub origin: Point,
    objects: OnceCell<Vec<GraphicsObject>>,
}

#[derive(Debug, Clone)]
pub enum GraphicsPrimitive {
    Line(LinePrimitive),
    Arc(ArcPrimitive),
    Circle(CirclePrimitive),
    Flash(FlashPrimitive),
    Region(RegionPrimitive),
    Repeat(RepeatPrimitive),
}

impl GraphicsPrimitive {
    pub fn line(start: Point, end: Point, aperture: Rc<Aperture>, state: ObjectState) -> Self {
        GraphicsPrimitive::Line(LinePrimitive {
            start,
            end,
            aperture,
            state,
            objects: OnceCell::new(),
        })
    }

    pub fn arc(
        center: Point,
        start: Point,
        end: Point,
        direction: ArcDirection,
        aperture: Rc<Aperture>,
        state: ObjectState,
        backend: &'static PolygonBackend,
    ) -> Self {
        GraphicsPrimitive::Arc(ArcPrimitive {
            center,
            start,
            end,
            direction,
            aperture,
            state,
            backend,
            objects: OnceCell::new(),
        })
    }

    pub fn circle(
        center: Point,
        start: Point,
        direction: ArcDirection,
        aperture: Rc<Aperture>,
        state: ObjectState,
        backend: &'static PolygonBackend,
    ) -> Self {
        GraphicsPrimitive::Circle(CirclePrimitive {
            center,
            start,
            direction,
            aperture,
            state,
            backend,
            objects: OnceCell::new(),
        })
    }

    /// `base` is the aperture's untransformed objects.
    pub fn flash(
        at: Point,
        aperture: Rc<Aperture>,
        base: Rc<Vec<GraphicsObject>>,
        state: ObjectState,
    ) -> Self {
        GraphicsPrimitive::Flash(FlashPrimitive {
            at,
            aperture,
            state,
            base,
            objects: OnceCell::new(),
        })
    }

    pub fn region(contours: Vec<Contour>, state: ObjectState) -> Self {
        GraphicsPrimitive::Region(RegionPrimitive {
            contours,
            state,
            objects: OnceCell::new(),
        })
    }

    pub fn repeat(
        block: Vec<GraphicsPrimitive>,
        x_count: u32,
        y_count: u32,
        x_step: f64,
        y_step: f64,
    ) -> Self {
        GraphicsPrimitive::Repeat(RepeatPrimitive {
            block,
            x_count,
            y_count,
            x_step,
            y_step,
            origin: Point::ORIGIN,
            objects: OnceCell::new(),
        })
    }

    /// Realized objects, computed once and cached.
    pub fn objects(&self) -> &[GraphicsObject] {
        match self {
            GraphicsPrimitive::Line(p) => p.objects.get_or_init(|| p.realize()),
            GraphicsPrimitive::Arc(p) => p.objects.get_or_init(|| p.realize()),
            GraphicsPrimitive::Circle(p) => p.objects.get_or_init(|| p.realize()),
            GraphicsPrimitive::Flash(p) => p.objects.get_or_init(|| p.realize()),
            GraphicsPrimitive::Region(p) => p.objects.get_or_init(|| p.realize()),
            GraphicsPrimitive::Repeat(p) => p.objects.get_or_init(|| p.realize()),
        }
    }

    /// Canonical Gerber for this primitive as a complete file: format,
    /// `%MOMM*%` and every definition it uses, then the primitive itself.
    pub fn to_gerber(&self, fmt: &CoordinateFormat) -> String {
        let mut writer = GerberWriter::new(fmt);
        let body = self.write(&mut writer);
        writer.finish(&body)
    }

    /// Body commands for this primitive, in millimeters. Apertures are
    /// defined through `w` on first use.
    pub fn write(&self, w: &mut GerberWriter) -> String {
        let mut out = String::new();
        match self {
            GraphicsPrimitive::Line(p) => {
                out.push_str(&p.state.to_gerber());
                out.push_str(&format!("D{}*\nG01*\n", pen_code(w, &p.aperture, &p.state)));
                out.push_str(&format!("{}D02*\n", w.xy(p.start)));
                out.push_str(&format!("{}D01*\n", w.xy(p.end)));
            }
            GraphicsPrimitive::Arc(p) => {
                out.push_str(&p.state.to_gerber());
                out.push_str(&format!("D{}*\n", pen_code(w, &p.aperture, &p.state)));
                out.push_str(&format!("G75*\n{}*\n", arc_mode(p.direction)));
                out.push_str(&format!("{}D02*\n", w.xy(p.start)));
                out.push_str(&format!("{}{}D01*\n", w.xy(p.end), w.ij(p.center - p.start)));
            }
            GraphicsPrimitive::Circle(p) => {
                out.push_str(&p.state.to_gerber());
                out.push_str(&format!("D{}*\n", pen_code(w, &p.aperture, &p.state)));
                out.push_str(&format!("G75*\n{}*\n", arc_mode(p.direction)));
                out.push_str(&format!("{}D02*\n", w.xy(p.start)));
                out.push_str(&format!("{}{}D01*\n", w.xy(p.start), w.ij(p.center - p.start)));
            }
            GraphicsPrimitive::Flash(p) => {
                out.push_str(&p.state.to_gerber());
                out.push_str(&format!("D{}*\n", w.aperture_code(&p.aperture)));
                out.push_str(&format!("{}D03*\n", w.xy(p.at)));
            }
            GraphicsPrimitive::Region(p) => {
                out.push_str(&p.state.to_gerber());
                out.push_str("G36*\nG75*\n");
                for contour in &p.contours {
                    let Some(first) = contour.first() else {
                        continue;
                    };
                    out.push_str(&format!("{}D02*\n", w.xy(first.start())));
                    for segment in contour {
                        match segment {
                            Segment::Line { end, .. } => {
                                out.push_str(&format!("G01*\n{}D01*\n", w.xy(*end)));
                            }
                            Segment::Arc {
                                center,
                                start,
                                end,
                                direction,
                            } => {
                                out.push_str(&format!(
                                    "{}*\n{}{}D01*\n",
                                    arc_mode(*direction),
                                    w.xy(*end),
                                    w.ij(*center - *start)
                                ));
                            }
                            Segment::Circle { center, start } => {
                                out.push_str(&format!(
                                    "G03*\n{}{}D01*\n",
                                    w.xy(*start),
                                    w.ij(*center - *start)
                                ));
                            }
                        }
                    }
                }
                out.push_str("G37*\n");
            }
            GraphicsPrimitive::Repeat(p) => {
                out.push_str(&format!(
                    "%SRX{}Y{}I{}J{}*%\n",
                    p.x_count, p.y_count, p.x_step, p.y_step
                ));
                for prim in &p.block {
                    out.push_str(&prim.write(w));
                }
                out.push_str("%SR*%\n");
            }
        }
        out
    }
}

/// Pen for a draw: thin strokes get the zero-size aperture so they read
/// back as thin whatever aperture produced them.
fn pen_code(w: &mut GerberWriter, aperture: &Rc<Aperture>, state: &ObjectState) -> u32 {
    if state.polarity == Polarity::Thin {
        w.thin_code()
    } else {
        w.aperture_code(aperture)
    }
}

impl LinePrimitive {
    fn realize(&self) -> Vec<GraphicsObject> {
        if self.state.polarity == Polarity::Thin || self.aperture.is_thin(&self.state) {
            return vec![GraphicsObject::thin(vec![self.start, self.end])];
        }
        vec![GraphicsObject {
            polygons: self.aperture.line_sweep(self.start, self.end, &self.state),
            polarity: self.state.polarity,
        }]
    }
}

impl ArcPrimitive {
    fn realize(&self) -> Vec<GraphicsObject> {
        if self.state.polarity == Polarity::Thin || self.aperture.is_thin(&self.state) {
            let path = arc_points(self.center, self.start, self.end, self.direction, true, true);
            return vec![GraphicsObject::thin(path)];
        }
        vec![GraphicsObject {
            polygons: self.aperture.arc_sweep(
                self.center,
                self.start,
                self.end,
                self.direction,
                &self.state,
                self.backend,
            ),
            polarity: self.state.polarity,
        }]
    }
}

impl CirclePrimitive {
    fn realize(&self) -> Vec<GraphicsObject> {
        if self.state.polarity == Polarity::Thin || self.aperture.is_thin(&self.state) {
            let mut path = Vec::new();
            Segment::Circle {
                center: self.center,
                start: self.start,
            }
            .push_points(true, &mut path);
            return vec![GraphicsObject::thin(path)];
        }
        vec![GraphicsObject {
            polygons: self
                .aperture
                .circle_sweep(self.center, self.start, &self.state, self.backend),
            polarity: self.state.polarity,
        }]
    }
}

impl FlashPrimitive {
    fn realize(&self) -> Vec<GraphicsObject> {
        self.base
            .iter()
            .map(|obj| obj.placed(&self.state, self.at))
            .collect()
    }
}

impl RegionPrimitive {
    fn realize(&self) -> Vec<GraphicsObject> {
        let rings: PolygonSet = self
            .contours
            .iter()
            .filter_map(|contour| {
                let mut points = Vec::new();
                for (i, segment) in contour.iter().enumerate() {
                    segment.push_points(i == 0, &mut points);
                }
                let ring = close_ring(points);
                (ring.len() >= 3).then_some(ring)
            })
            .collect();
        let polarity = match self.state.polarity {
            Polarity::Thin => Polarity::Dark,
            other => other,
        };
        vec![GraphicsObject {
            polygons: rings,
            polarity,
        }]
    }
}

impl RepeatPrimitive {
    /// Grid offsets in emission order: X outer, Y inner.
    pub fn offsets(&self) -> Vec<Point> {
        let mut offsets = Vec::with_capacity(self.x_count as usize * self.y_count as usize);
        for i in 0..self.x_count {
            for j in 0..self.y_count {
                offsets.push(
                    self.origin + Point::new(i as f64 * self.x_step, j as f64 * self.y_step),
                );
            }
        }
        offsets
    }

    fn realize(&self) -> Vec<GraphicsObject> {
        let mut out = Vec::new();
        for offset in self.offsets() {
            for prim in &self.block {
                out.extend(prim.objects().iter().map(|obj| obj.translated(offset)));
            }
        }
        out
    }
}
