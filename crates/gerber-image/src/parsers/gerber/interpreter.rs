use std::collections::HashMap;
use std::f64::consts::FRAC_PI_2;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::error::GerberError;
use crate::geometry::boolean::PolygonBackend;
use crate::geometry::{arc_sweep, ArcDirection, EPSILON};
use crate::types::Point;

use super::apertures::{Aperture, ApertureKind, ApertureTable};
use super::commands::{ApertureTemplate, Command, Interpolation, QuadrantMode};
use super::coord::{CoordinateFormat, CoordinateMode, Units};
use super::macros::ApertureMacro;
use super::primitives::{Contour, GraphicsPrimitive, ObjectState, Polarity, Segment};

/// What a block sink is collecting for.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Aperture(u32),
    Repeat {
        x_count: u32,
        y_count: u32,
        x_step: f64,
        y_step: f64,
    },
}

/// Where drawing operations currently land.
#[derive(Debug)]
enum Sink {
    TopLevel(Vec<GraphicsPrimitive>),
    Region {
        contours: Vec<Contour>,
        current: Contour,
    },
    Block {
        kind: BlockKind,
        primitives: Vec<GraphicsPrimitive>,
    },
}

impl Sink {
    fn name(&self) -> &'static str {
        match self {
            Sink::TopLevel(_) => "top level",
            Sink::Region { .. } => "region",
            Sink::Block {
                kind: BlockKind::Aperture(_),
                ..
            } => "block aperture",
            Sink::Block { .. } => "step-and-repeat",
        }
    }
}

/// Interpreter context for one Gerber file.
///
/// Mutated only by [`Command::execute`]; once [`GerberState::finish`] runs
/// the primitive list is handed over and the state is spent.
#[derive(Debug)]
pub struct GerberState {
    backend: &'static PolygonBackend,
    format: Option<CoordinateFormat>,
    units: Option<Units>,
    current_point: Point,
    current_aperture: Option<Rc<Aperture>>,
    interpolation: Interpolation,
    quadrant: QuadrantMode,
    object_state: ObjectState,
    apertures: ApertureTable,
    macros: HashMap<String, Rc<ApertureMacro>>,
    /// Bottom entry is always the top-level sink.
    sinks: Vec<Sink>,
    ended: bool,
}

impl GerberState {
    pub fn new(backend: &'static PolygonBackend) -> Self {
        Self {
            backend,
            format: None,
            units: None,
            current_point: Point::ORIGIN,
            current_aperture: None,
            interpolation: Interpolation::Linear,
            quadrant: QuadrantMode::Multi,
            object_state: ObjectState::default(),
            apertures: ApertureTable::default(),
            macros: HashMap::new(),
            sinks: vec![Sink::TopLevel(Vec::new())],
            ended: false,
        }
    }

    pub fn format(&self) -> Option<&CoordinateFormat> {
        self.format.as_ref()
    }

    pub fn units(&self) -> Option<Units> {
        self.units
    }

    pub fn current_point(&self) -> Point {
        self.current_point
    }

    pub fn apertures(&self) -> &ApertureTable {
        &self.apertures
    }

    /// True once M02 has been executed.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Units for converting file values, defaulting to millimeters.
    fn file_units(&mut self, line: usize) -> Units {
        match self.units {
            Some(units) => units,
            None => {
                warn!("Line {line}: no unit mode set, assuming millimeters");
                self.units = Some(Units::Millimeters);
                Units::Millimeters
            }
        }
    }

    fn state_snapshot(&mut self, line: usize) -> ObjectState {
        let units = self.file_units(line);
        ObjectState {
            units,
            ..self.object_state
        }
    }

    fn in_region(&self) -> bool {
        matches!(self.sinks.last(), Some(Sink::Region { .. }))
    }

    fn emit(&mut self, primitive: GraphicsPrimitive) {
        match self.sinks.last_mut() {
            Some(Sink::TopLevel(primitives)) | Some(Sink::Block { primitives, .. }) => {
                primitives.push(primitive)
            }
            // Region sinks receive segments, never primitives
            Some(Sink::Region { .. }) | None => {}
        }
    }

    fn push_segment(&mut self, segment: Segment) {
        if let Some(Sink::Region { current, .. }) = self.sinks.last_mut() {
            current.push(segment);
        }
    }

    fn close_contour(&mut self) {
        if let Some(Sink::Region { contours, current }) = self.sinks.last_mut() {
            if !current.is_empty() {
                contours.push(std::mem::take(current));
            }
        }
    }

    /// Resolve an operation target in millimeters. Missing axes keep the
    /// current coordinate.
    fn target(&mut self, x: Option<f64>, y: Option<f64>, line: usize) -> Result<Point, GerberError> {
        let units = self.file_units(line);
        let incremental = self
            .format
            .as_ref()
            .is_some_and(|f| f.mode == CoordinateMode::Incremental);
        let resolve = |value: Option<f64>, current: f64| match value {
            Some(v) if incremental => current + units.to_mm(v),
            Some(v) => units.to_mm(v),
            None => current,
        };
        let point = Point::new(
            resolve(x, self.current_point.x),
            resolve(y, self.current_point.y),
        );
        if !point.is_finite() {
            return Err(GerberError::execution(line, "non-finite coordinate"));
        }
        Ok(point)
    }

    fn selected_aperture(&self, line: usize) -> Result<Rc<Aperture>, GerberError> {
        self.current_aperture
            .clone()
            .ok_or_else(|| GerberError::execution(line, "draw or flash with no aperture selected"))
    }

    // ─── Definitions ─────────────────────────────────────────────────

    fn set_format(&mut self, format: &CoordinateFormat, line: usize) {
        if self.format.is_some() {
            warn!("Line {line}: format specification redefined, keeping the first");
            return;
        }
        self.format = Some(format.clone());
    }

    fn set_units(&mut self, units: Units, line: usize) {
        if let Some(previous) = self.units {
            if previous != units {
                warn!("Line {line}: unit mode changed from {} to {}", previous.code(), units.code());
            }
        }
        self.units = Some(units);
    }

    fn define_aperture(
        &mut self,
        code: u32,
        template: &ApertureTemplate,
        line: usize,
    ) -> Result<(), GerberError> {
        let units = self.file_units(line);
        let kind = match template {
            ApertureTemplate::Macro { name, params } => {
                let definition = self.macros.get(name).cloned().ok_or_else(|| {
                    GerberError::execution(line, format!("aperture D{code} uses undefined macro {name}"))
                })?;
                ApertureKind::Macro {
                    definition,
                    params: params.clone(),
                }
            }
            standard => ApertureKind::Standard(standard.clone()),
        };
        if self.apertures.define(Aperture::new(code, kind, units)) {
            warn!("Line {line}: aperture D{code} redefined");
        }
        Ok(())
    }

    fn define_macro(&mut self, mac: &ApertureMacro, line: usize) {
        if self
            .macros
            .insert(mac.name.clone(), Rc::new(mac.clone()))
            .is_some()
        {
            warn!("Line {line}: aperture macro {} redefined", mac.name);
        }
    }

    fn select_aperture(&mut self, code: u32, line: usize) -> Result<(), GerberError> {
        let aperture = self
            .apertures
            .get(code)
            .ok_or_else(|| GerberError::execution(line, format!("aperture D{code} is not defined")))?;
        self.current_aperture = Some(aperture);
        Ok(())
    }

    // ─── Regions, blocks and repeats ─────────────────────────────────

    fn begin_region(&mut self, line: usize) -> Result<(), GerberError> {
        if self.in_region() {
            return Err(GerberError::execution(line, "G36 inside an open region"));
        }
        self.sinks.push(Sink::Region {
            contours: Vec::new(),
            current: Vec::new(),
        });
        Ok(())
    }

    fn end_region(&mut self, line: usize) -> Result<(), GerberError> {
        self.close_contour();
        let contours = match self.sinks.pop() {
            Some(Sink::Region { contours, .. }) => contours,
            Some(other) => {
                let name = other.name();
                self.sinks.push(other);
                return Err(GerberError::execution(line, format!("G37 while in {name}")));
            }
            None => return Err(GerberError::execution(line, "G37 without an open region")),
        };
        if contours.is_empty() {
            warn!("Line {line}: region has no contours");
            return Ok(());
        }
        let state = self.state_snapshot(line);
        self.emit(GraphicsPrimitive::region(contours, state));
        Ok(())
    }

    fn open_block(&mut self, kind: BlockKind, line: usize) -> Result<(), GerberError> {
        if self.in_region() {
            return Err(GerberError::execution(line, "block opened inside a region"));
        }
        self.sinks.push(Sink::Block {
            kind,
            primitives: Vec::new(),
        });
        Ok(())
    }

    /// Pop the innermost block, which must be of the expected sort.
    fn pop_block(&mut self, repeat: bool, line: usize) -> Result<(BlockKind, Vec<GraphicsPrimitive>), GerberError> {
        let what = if repeat { "step-and-repeat" } else { "block aperture" };
        match self.sinks.pop() {
            Some(Sink::Block { kind, primitives })
                if matches!(kind, BlockKind::Repeat { .. }) == repeat =>
            {
                Ok((kind, primitives))
            }
            Some(Sink::TopLevel(primitives)) => {
                self.sinks.push(Sink::TopLevel(primitives));
                Err(GerberError::execution(line, format!("{what} close without an open {what}")))
            }
            Some(other) => {
                let name = other.name();
                self.sinks.push(other);
                Err(GerberError::execution(line, format!("{what} close while in {name}")))
            }
            None => Err(GerberError::execution(line, format!("{what} close without an open {what}"))),
        }
    }

    fn close_aperture_block(&mut self, line: usize) -> Result<(), GerberError> {
        let (kind, primitives) = self.pop_block(false, line)?;
        let BlockKind::Aperture(id) = kind else {
            return Err(GerberError::execution(line, "block aperture close mismatch"));
        };
        let objects = primitives
            .iter()
            .flat_map(|p| p.objects().iter().cloned())
            .collect();
        debug!("Line {line}: block aperture D{id} with {} primitives", primitives.len());
        if self
            .apertures
            .define(Aperture::new(id, ApertureKind::Block(objects), Units::Millimeters))
        {
            warn!("Line {line}: aperture D{id} redefined");
        }
        Ok(())
    }

    fn close_repeat(&mut self, line: usize) -> Result<(), GerberError> {
        let (kind, block) = self.pop_block(true, line)?;
        let BlockKind::Repeat {
            x_count,
            y_count,
            x_step,
            y_step,
        } = kind
        else {
            return Err(GerberError::execution(line, "step-and-repeat close mismatch"));
        };
        self.emit(GraphicsPrimitive::repeat(block, x_count, y_count, x_step, y_step));
        Ok(())
    }

    // ─── Operations ──────────────────────────────────────────────────

    fn interpolate(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        i: Option<f64>,
        j: Option<f64>,
        line: usize,
    ) -> Result<(), GerberError> {
        let start = self.current_point;
        let end = self.target(x, y, line)?;
        self.current_point = end;

        let direction = match self.interpolation {
            Interpolation::Linear => {
                return self.draw_line(start, end, line);
            }
            Interpolation::Clockwise => ArcDirection::Clockwise,
            Interpolation::CounterClockwise => ArcDirection::CounterClockwise,
        };
        let units = self.file_units(line);
        let offset = Point::new(
            units.to_mm(i.unwrap_or(0.0)),
            units.to_mm(j.unwrap_or(0.0)),
        );
        if !offset.is_finite() {
            return Err(GerberError::execution(line, "non-finite arc offset"));
        }

        let full_circle = start.distance(end) < EPSILON;
        let center = match self.quadrant {
            QuadrantMode::Single => {
                if full_circle {
                    return Err(GerberError::execution(
                        line,
                        "zero-length arc in single-quadrant mode",
                    ));
                }
                single_quadrant_center(start, end, offset, direction)
            }
            QuadrantMode::Multi => multi_quadrant_center(start, end, offset),
        };

        if center.distance(start) < EPSILON {
            warn!("Line {line}: degenerate arc radius, drawing a thin segment");
            return self.draw_thin(start, end, line);
        }

        if self.in_region() {
            self.push_segment(if full_circle {
                Segment::Circle { center, start }
            } else {
                Segment::Arc {
                    center,
                    start,
                    end,
                    direction,
                }
            });
            return Ok(());
        }

        let aperture = self.drawing_aperture(line)?;
        let state = self.state_snapshot(line);
        let primitive = if full_circle {
            GraphicsPrimitive::circle(center, start, direction, aperture, state, self.backend)
        } else {
            GraphicsPrimitive::arc(center, start, end, direction, aperture, state, self.backend)
        };
        self.emit(primitive);
        Ok(())
    }

    fn drawing_aperture(&self, line: usize) -> Result<Rc<Aperture>, GerberError> {
        let aperture = self.selected_aperture(line)?;
        if !aperture.is_drawable() {
            return Err(GerberError::execution(
                line,
                format!("aperture D{} cannot be used for drawing", aperture.id),
            ));
        }
        Ok(aperture)
    }

    fn draw_line(&mut self, start: Point, end: Point, line: usize) -> Result<(), GerberError> {
        if self.in_region() {
            self.push_segment(Segment::Line { start, end });
            return Ok(());
        }
        let aperture = self.drawing_aperture(line)?;
        let state = self.state_snapshot(line);
        self.emit(GraphicsPrimitive::line(start, end, aperture, state));
        Ok(())
    }

    fn draw_thin(&mut self, start: Point, end: Point, line: usize) -> Result<(), GerberError> {
        if self.in_region() {
            self.push_segment(Segment::Line { start, end });
            return Ok(());
        }
        let aperture = self.selected_aperture(line)?;
        let state = ObjectState {
            polarity: Polarity::Thin,
            ..self.state_snapshot(line)
        };
        self.emit(GraphicsPrimitive::line(start, end, aperture, state));
        Ok(())
    }

    fn move_to(&mut self, x: Option<f64>, y: Option<f64>, line: usize) -> Result<(), GerberError> {
        self.close_contour();
        self.current_point = self.target(x, y, line)?;
        Ok(())
    }

    fn flash(&mut self, x: Option<f64>, y: Option<f64>, line: usize) -> Result<(), GerberError> {
        if self.in_region() {
            return Err(GerberError::execution(line, "flash inside a region"));
        }
        let at = self.target(x, y, line)?;
        self.current_point = at;
        let aperture = self.selected_aperture(line)?;
        let base = aperture.objects(self.backend, line)?;
        let state = self.state_snapshot(line);
        self.emit(GraphicsPrimitive::flash(at, aperture, base, state));
        Ok(())
    }

    // ─── End of file ─────────────────────────────────────────────────

    fn end_of_file(&mut self, line: usize) -> Result<(), GerberError> {
        while self.sinks.len() > 1 {
            match self.sinks.last() {
                Some(Sink::Region { .. }) => {
                    warn!("Line {line}: region still open at end of file, closing it");
                    self.end_region(line)?;
                }
                Some(Sink::Block {
                    kind: BlockKind::Repeat { .. },
                    ..
                }) => {
                    warn!("Line {line}: step-and-repeat still open at end of file, closing it");
                    self.close_repeat(line)?;
                }
                Some(Sink::Block {
                    kind: BlockKind::Aperture(id),
                    ..
                }) => {
                    return Err(GerberError::execution(
                        line,
                        format!("block aperture D{id} not closed at end of file"),
                    ));
                }
                Some(Sink::TopLevel(_)) | None => break,
            }
        }
        self.ended = true;
        Ok(())
    }

    /// Close anything still open and hand over the primitive list.
    pub fn finish(mut self, line: usize) -> Result<Vec<GraphicsPrimitive>, GerberError> {
        if !self.ended {
            warn!("Line {line}: missing end-of-file command");
            self.end_of_file(line)?;
        }
        match self.sinks.pop() {
            Some(Sink::TopLevel(primitives)) => Ok(primitives),
            _ => Err(GerberError::execution(line, "unbalanced graphics state at end of file")),
        }
    }
}

/// Pick the single-quadrant center: the one of the four sign choices for
/// the unsigned offsets whose arc spans at most 90 degrees and whose radii
/// to start and end agree best.
fn single_quadrant_center(start: Point, end: Point, offset: Point, direction: ArcDirection) -> Point {
    let (di, dj) = (offset.x.abs(), offset.y.abs());
    let mut best: Option<(f64, Point)> = None;
    for (sx, sy) in [(1.0, 1.0), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)] {
        let center = start + Point::new(sx * di, sy * dj);
        let sweep = arc_sweep(start.angle_from(center), end.angle_from(center), direction);
        if sweep.abs() > FRAC_PI_2 + 1e-6 {
            continue;
        }
        let error = (center.distance(start) - center.distance(end)).abs();
        if best.map_or(true, |(e, _)| error < e) {
            best = Some((error, center));
        }
    }
    best.map_or(start + offset, |(_, c)| c)
}

/// Multi-quadrant center: of the two points at the offset's radius from
/// both endpoints, take the one closest to `start + offset`.
fn multi_quadrant_center(start: Point, end: Point, offset: Point) -> Point {
    let naive = start + offset;
    let radius = offset.distance(Point::ORIGIN);
    let chord = start.distance(end);
    if chord < EPSILON || radius < EPSILON {
        return naive;
    }
    let mid = start.midpoint(end);
    let half = chord / 2.0;
    if radius <= half {
        return mid;
    }
    let h = (radius * radius - half * half).sqrt();
    let perp = Point::new(-(end.y - start.y) / chord, (end.x - start.x) / chord);
    let a = mid + perp * h;
    let b = mid - perp * h;
    if a.distance_squared(naive) <= b.distance_squared(naive) {
        a
    } else {
        b
    }
}

impl Command {
    /// Apply this command to the interpreter context.
    pub fn execute(&self, state: &mut GerberState, line: usize) -> Result<(), GerberError> {
        if state.ended {
            warn!("Line {line}: command after end of file ignored");
            return Ok(());
        }
        trace!("Line {line}: execute {self:?}");
        match self {
            Command::Comment(text) => {
                trace!("Line {line}: comment {text:?}");
            }
            Command::FormatSpec(format) => state.set_format(format, line),
            Command::Units(units) | Command::LegacyUnits(units) => state.set_units(*units, line),
            Command::ApertureDefine { code, template } => {
                state.define_aperture(*code, template, line)?;
            }
            Command::MacroDefine(mac) => state.define_macro(mac, line),
            Command::ApertureBlockOpen(id) => state.open_block(BlockKind::Aperture(*id), line)?,
            Command::ApertureBlockClose => state.close_aperture_block(line)?,
            Command::StepRepeatOpen {
                x_count,
                y_count,
                x_step,
                y_step,
            } => {
                let units = state.file_units(line);
                let kind = BlockKind::Repeat {
                    x_count: *x_count,
                    y_count: *y_count,
                    x_step: units.to_mm(*x_step),
                    y_step: units.to_mm(*y_step),
                };
                state.open_block(kind, line)?;
            }
            Command::StepRepeatClose => state.close_repeat(line)?,
            Command::LoadPolarity(polarity) => state.object_state.polarity = *polarity,
            Command::LoadMirroring(mirroring) => state.object_state.mirroring = *mirroring,
            Command::LoadRotation(degrees) => state.object_state.rotation = *degrees,
            Command::LoadScaling(scale) => state.object_state.scale = *scale,
            Command::Attribute { kind, name, values } => {
                debug!("Line {line}: attribute {kind:?} {name} {values:?}");
            }
            Command::InterpolationMode(mode) => state.interpolation = *mode,
            Command::QuadrantMode(mode) => state.quadrant = *mode,
            Command::RegionBegin => state.begin_region(line)?,
            Command::RegionEnd => state.end_region(line)?,
            Command::Interpolate { x, y, i, j } => state.interpolate(*x, *y, *i, *j, line)?,
            Command::Move { x, y } => state.move_to(*x, *y, line)?,
            Command::Flash { x, y } => state.flash(*x, *y, line)?,
            Command::SelectAperture(code) => state.select_aperture(*code, line)?,
            Command::EndOfFile => state.end_of_file(line)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::boolean::initialize;
    use crate::parsers::gerber::commands::CommandParser;

    fn run(source: &str) -> Result<Vec<GraphicsPrimitive>, GerberError> {
        let mut parser = CommandParser::new();
        let mut state = GerberState::new(initialize());
        let mut last_line = 1;
        for token in crate::parsers::gerber::lexer::tokenize(source) {
            last_line = token.line;
            if let Some(cmd) = parser.parse(&token.text, token.line)? {
                cmd.execute(&mut state, token.line)?;
            }
        }
        state.finish(last_line)
    }

    const HEADER: &str = "%FSLAX23Y23*%\n%MOMM*%\n%ADD10C,0.1*%\nD10*\n";

    #[test]
    fn test_simple_line() {
        let prims = run(&format!("{HEADER}X1000Y2000D02*\nX3000Y2000D01*\nM02*\n")).unwrap();
        assert_eq!(prims.len(), 1);
        match &prims[0] {
            GraphicsPrimitive::Line(l) => {
                assert_eq!(l.start, Point::new(1.0, 2.0));
                assert_eq!(l.end, Point::new(3.0, 2.0));
            }
            other => panic!("expected Line, got: {other:?}"),
        }
    }

    #[test]
    fn test_inch_units_convert() {
        let src = "%FSLAX24Y24*%\n%MOIN*%\n%ADD10C,0.01*%\nD10*\nX10000Y0D03*\nM02*\n";
        let prims = run(src).unwrap();
        match &prims[0] {
            GraphicsPrimitive::Flash(f) => assert!((f.at.x - 25.4).abs() < 1e-9),
            other => panic!("expected Flash, got: {other:?}"),
        }
    }

    #[test]
    fn test_incremental_coordinates() {
        let src = "%FSLIX23Y23*%\n%MOMM*%\n%ADD10C,0.1*%\nD10*\nX1000Y1000D02*\nX1000D01*\nY500D01*\nM02*\n";
        let prims = run(src).unwrap();
        assert_eq!(prims.len(), 2);
        match &prims[1] {
            GraphicsPrimitive::Line(l) => {
                assert_eq!(l.start, Point::new(2.0, 1.0));
                assert_eq!(l.end, Point::new(2.0, 1.5));
            }
            other => panic!("expected Line, got: {other:?}"),
        }
    }

    #[test]
    fn test_multi_quadrant_arc_center() {
        // Quarter arc from (1,0) to (0,1) around the origin, CCW
        let src = format!("{HEADER}G75*\nG03*\nX1000Y0D02*\nX0Y1000I-1000J0D01*\nM02*\n");
        let prims = run(&src).unwrap();
        match &prims[0] {
            GraphicsPrimitive::Arc(a) => {
                assert!(a.center.distance(Point::ORIGIN) < 1e-9);
                assert_eq!(a.direction, ArcDirection::CounterClockwise);
            }
            other => panic!("expected Arc, got: {other:?}"),
        }
    }

    #[test]
    fn test_multi_quadrant_picks_closest_valid_center() {
        // Offset slightly off: the true center keeps equal radii
        let center = multi_quadrant_center(Point::new(1.0, 0.0), Point::new(0.0, 1.0), Point::new(-1.01, 0.0));
        assert!((center.distance(Point::new(1.0, 0.0)) - center.distance(Point::new(0.0, 1.0))).abs() < 1e-9);
        assert!(center.distance(Point::ORIGIN) < 0.02);
    }

    #[test]
    fn test_single_quadrant_uses_unsigned_offsets() {
        // CW quarter from (0,1) to (1,0): center (0,0), offsets given unsigned
        let c = single_quadrant_center(
            Point::new(0.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            ArcDirection::Clockwise,
        );
        assert!(c.distance(Point::ORIGIN) < 1e-9);
    }

    #[test]
    fn test_full_circle_in_multi_quadrant() {
        let src = format!("{HEADER}G75*\nG02*\nX1000Y0D02*\nX1000Y0I-1000J0D01*\nM02*\n");
        let prims = run(&src).unwrap();
        assert!(matches!(prims[0], GraphicsPrimitive::Circle(_)));
    }

    #[test]
    fn test_zero_length_single_quadrant_arc_fails() {
        let src = format!("{HEADER}G74*\nG02*\nX1000Y0D02*\nX1000Y0I1000J0D01*\nM02*\n");
        assert!(matches!(run(&src), Err(GerberError::Execution { .. })));
    }

    #[test]
    fn test_degenerate_arc_becomes_thin() {
        let src = format!("{HEADER}G75*\nG02*\nX0Y0D02*\nX1000Y0I0J0D01*\nM02*\n");
        let prims = run(&src).unwrap();
        let objects = prims[0].objects();
        assert_eq!(objects[0].polarity, Polarity::Thin);
    }

    #[test]
    fn test_region_collects_contours() {
        let src = format!(
            "{HEADER}G36*\nX0Y0D02*\nX1000Y0D01*\nX1000Y1000D01*\nX0Y1000D01*\nX0Y0D01*\n\
             X2000Y0D02*\nX3000Y0D01*\nX3000Y1000D01*\nX2000Y0D01*\nG37*\nM02*\n"
        );
        let prims = run(&src).unwrap();
        assert_eq!(prims.len(), 1);
        match &prims[0] {
            GraphicsPrimitive::Region(r) => assert_eq!(r.contours.len(), 2),
            other => panic!("expected Region, got: {other:?}"),
        }
    }

    #[test]
    fn test_flash_inside_region_fails() {
        let src = format!("{HEADER}G36*\nX0Y0D03*\nG37*\nM02*\n");
        assert!(matches!(run(&src), Err(GerberError::Execution { .. })));
    }

    #[test]
    fn test_undefined_aperture_fails() {
        let err = run("%FSLAX23Y23*%\n%MOMM*%\nD11*\n").unwrap_err();
        match err {
            GerberError::Execution { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("D11"));
            }
            other => panic!("expected Execution error, got: {other:?}"),
        }
    }

    #[test]
    fn test_undefined_macro_fails() {
        assert!(matches!(
            run("%FSLAX23Y23*%\n%MOMM*%\n%ADD10Z,1*%\n"),
            Err(GerberError::Execution { .. })
        ));
    }

    #[test]
    fn test_draw_without_aperture_fails() {
        assert!(run("%FSLAX23Y23*%\n%MOMM*%\nX0Y0D02*\nX1000Y0D01*\n").is_err());
    }

    #[test]
    fn test_obround_cannot_draw() {
        let src = "%FSLAX23Y23*%\n%MOMM*%\n%ADD10O,1X0.5*%\nD10*\nX0Y0D02*\nX1000Y0D01*\nM02*\n";
        assert!(matches!(run(src), Err(GerberError::Execution { .. })));
    }

    #[test]
    fn test_state_is_captured_by_value() {
        let src = format!("{HEADER}X0Y0D03*\n%LPC*%\nX1000Y0D03*\nM02*\n");
        let prims = run(&src).unwrap();
        match (&prims[0], &prims[1]) {
            (GraphicsPrimitive::Flash(a), GraphicsPrimitive::Flash(b)) => {
                assert_eq!(a.state.polarity, Polarity::Dark);
                assert_eq!(b.state.polarity, Polarity::Clear);
            }
            other => panic!("expected two flashes, got: {other:?}"),
        }
    }

    #[test]
    fn test_step_repeat_expands_grid() {
        let src = format!("{HEADER}%SRX2Y3I5J7*%\nX0Y0D03*\n%SR*%\nM02*\n");
        let prims = run(&src).unwrap();
        assert_eq!(prims.len(), 1);
        match &prims[0] {
            GraphicsPrimitive::Repeat(r) => {
                assert_eq!(r.offsets().len(), 6);
                assert_eq!(prims[0].objects().len(), 6);
            }
            other => panic!("expected Repeat, got: {other:?}"),
        }
    }

    #[test]
    fn test_open_repeat_is_force_closed() {
        let src = format!("{HEADER}%SRX2Y1I5J0*%\nX0Y0D03*\nM02*\n");
        let prims = run(&src).unwrap();
        assert!(matches!(prims[0], GraphicsPrimitive::Repeat(_)));
    }

    #[test]
    fn test_missing_end_of_file_closes_region() {
        let src = format!("{HEADER}G36*\nX0Y0D02*\nX1000Y0D01*\nX1000Y1000D01*\n");
        let prims = run(&src).unwrap();
        assert!(matches!(prims[0], GraphicsPrimitive::Region(_)));
    }

    #[test]
    fn test_repeat_close_without_open_fails() {
        assert!(matches!(run(&format!("{HEADER}%SR*%\n")), Err(GerberError::Execution { .. })));
        assert!(matches!(run(&format!("{HEADER}%AB*%\n")), Err(GerberError::Execution { .. })));
    }

    #[test]
    fn test_mismatched_nesting_fails() {
        let src = format!("{HEADER}%ABD20*%\n%SRX2Y2I1J1*%\n%AB*%\n");
        assert!(matches!(run(&src), Err(GerberError::Execution { .. })));
    }

    #[test]
    fn test_unclosed_block_aperture_fails() {
        let src = format!("{HEADER}%ABD20*%\nX0Y0D03*\nM02*\n");
        assert!(matches!(run(&src), Err(GerberError::Execution { .. })));
    }

    #[test]
    fn test_block_aperture_flash() {
        let src = format!(
            "{HEADER}%ABD20*%\nX0Y0D03*\nX1000Y0D03*\n%AB*%\nD20*\nX5000Y5000D03*\nM02*\n"
        );
        let prims = run(&src).unwrap();
        assert_eq!(prims.len(), 1);
        let objects = prims[0].objects();
        assert_eq!(objects.len(), 2);
        let first = objects[0].polygons[0][0];
        // The block's first flash lands on the flash point
        assert!(first.distance(Point::new(5.0, 5.0)) < 0.051);
    }

    #[test]
    fn test_commands_after_end_are_ignored() {
        let src = format!("{HEADER}M02*\nX0Y0D03*\n");
        assert!(run(&src).unwrap().is_empty());
    }

    #[test]
    fn test_aperture_redefinition_warns_and_overrides() {
        let src = "%FSLAX23Y23*%\n%MOMM*%\n%ADD10C,0.1*%\n%ADD10C,0.5*%\nD10*\nX0Y0D03*\nM02*\n";
        let prims = run(src).unwrap();
        match &prims[0] {
            GraphicsPrimitive::Flash(f) => assert!(matches!(
                &f.aperture.kind,
                ApertureKind::Standard(ApertureTemplate::Circle { diameter, .. }) if *diameter == 0.5
            )),
            other => panic!("expected Flash, got: {other:?}"),
        }
    }
}
