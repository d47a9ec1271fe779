use std::f64::consts::FRAC_PI_2;

use log::warn;

use crate::error::GerberError;
use crate::geometry::boolean::BooleanOps;
use crate::geometry::{
    annulus, arc_by_angle, circle_polygon, close_ring, rectangle_polygon, regular_polygon,
    Polygon, PolygonSet, ARC_STEPS, EPSILON,
};
use crate::types::Point;

use super::expr::{parse_expr, Expr, MacroMemory};

/// Primitive codes accepted inside an aperture macro.
const PRIMITIVE_CODES: [u32; 9] = [1, 2, 4, 5, 6, 7, 20, 21, 22];

/// Most rings a single moire primitive may draw.
const MAX_MOIRE_RINGS: usize = 1000;

/// One statement of an aperture macro body.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroContent {
    /// Code 0: comment text, kept for re-serialization.
    Comment(String),
    /// `$n=<expr>`
    Assignment { variable: u32, expr: Expr },
    /// `<code>,<modifier>,...`
    Primitive { code: u32, modifiers: Vec<Expr> },
}

impl MacroContent {
    pub fn to_gerber(&self) -> String {
        match self {
            MacroContent::Comment(text) if text.is_empty() => "0".to_string(),
            MacroContent::Comment(text) => format!("0 {text}"),
            MacroContent::Assignment { variable, expr } => format!("${variable}={expr}"),
            MacroContent::Primitive { code, modifiers } => {
                let mut out = code.to_string();
                for m in modifiers {
                    out.push(',');
                    out.push_str(&m.to_string());
                }
                out
            }
        }
    }
}

/// An aperture macro definition (from %AM...% blocks).
#[derive(Debug, Clone, PartialEq)]
pub struct ApertureMacro {
    pub name: String,
    pub content: Vec<MacroContent>,
}

impl ApertureMacro {
    /// Parse a whole macro block, e.g. `AMDONUT*1,1,$1,0,0*1,0,$2,0,0`.
    pub fn parse(text: &str, line: usize) -> Result<Self, GerberError> {
        let mut statements = text.split('*');
        let header = statements.next().unwrap_or_default().trim();
        let name = header.strip_prefix("AM").unwrap_or_default().trim();
        if name.is_empty() {
            return Err(GerberError::unparsable(line, text, "aperture macro without a name"));
        }

        let mut content = Vec::new();
        for statement in statements {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            content.push(parse_statement(statement, line)?);
        }

        Ok(ApertureMacro {
            name: name.to_string(),
            content,
        })
    }

    /// Macro block text without `%` delimiters.
    pub fn to_gerber(&self) -> String {
        let mut out = format!("AM{}", self.name);
        for item in &self.content {
            out.push('*');
            out.push_str(&item.to_gerber());
        }
        out
    }

    /// Copy named `name` whose length modifiers are multiplied by `k`, so
    /// the same shape comes out in another unit system.
    pub fn scaled(&self, name: &str, k: f64) -> ApertureMacro {
        let content = self
            .content
            .iter()
            .map(|item| match item {
                MacroContent::Primitive { code, modifiers } => MacroContent::Primitive {
                    code: *code,
                    modifiers: modifiers
                        .iter()
                        .enumerate()
                        .map(|(i, m)| {
                            if is_length(*code, i, modifiers.len()) {
                                scale_expr(m, k)
                            } else {
                                m.clone()
                            }
                        })
                        .collect(),
                },
                other => other.clone(),
            })
            .collect();
        ApertureMacro {
            name: name.to_string(),
            content,
        }
    }

    /// Evaluate the macro for one aperture instance.
    ///
    /// `params` seed `$1..$n`. The result is in file units, centered on the
    /// macro origin: every exposed primitive minus every cleared one.
    pub fn evaluate(
        &self,
        params: &[f64],
        backend: &dyn BooleanOps,
        line: usize,
    ) -> Result<PolygonSet, GerberError> {
        let mut memory: MacroMemory = params
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u32 + 1, *v))
            .collect();
        let mut positives: PolygonSet = Vec::new();
        let mut negatives: PolygonSet = Vec::new();

        for item in &self.content {
            match item {
                MacroContent::Comment(_) => {}
                MacroContent::Assignment { variable, expr } => {
                    let value = expr.eval(&memory);
                    memory.insert(*variable, value);
                }
                MacroContent::Primitive { code, modifiers } => {
                    let values: Vec<f64> = modifiers.iter().map(|e| e.eval(&memory)).collect();
                    let (exposed, shape) = build_primitive(*code, &values, &self.name, line)?;
                    if exposed {
                        positives.extend(shape);
                    } else {
                        negatives.extend(shape);
                    }
                }
            }
        }

        if negatives.is_empty() {
            return Ok(positives);
        }
        let result = backend.difference(&positives, &negatives);
        if result.success {
            Ok(result.polygons)
        } else {
            warn!(
                "Boolean difference failed for macro {}; cleared primitives ignored",
                self.name
            );
            Ok(positives)
        }
    }
}

// ─── Statement parser ────────────────────────────────────────────────

fn parse_statement(statement: &str, line: usize) -> Result<MacroContent, GerberError> {
    if let Some(assignment) = statement.strip_prefix('$') {
        let Some((var, expr)) = assignment.split_once('=') else {
            return Err(GerberError::unparsable(line, statement, "bad macro statement"));
        };
        let variable: u32 = var
            .trim()
            .parse()
            .map_err(|_| GerberError::unparsable(line, statement, "bad macro variable"))?;
        return Ok(MacroContent::Assignment {
            variable,
            expr: parse_expr(expr, line)?,
        });
    }

    // Comment lines start with "0 "
    if statement == "0" {
        return Ok(MacroContent::Comment(String::new()));
    }
    if let Some(text) = statement.strip_prefix("0 ") {
        return Ok(MacroContent::Comment(text.trim().to_string()));
    }

    let mut parts = statement.split(',');
    let code_text = parts.next().unwrap_or_default().trim();
    let code: u32 = code_text
        .parse()
        .map_err(|_| GerberError::unparsable(line, statement, "bad macro primitive code"))?;
    if !PRIMITIVE_CODES.contains(&code) {
        return Err(GerberError::unparsable(
            line,
            statement,
            &format!("invalid macro primitive code {code}"),
        ));
    }
    let modifiers = parts
        .map(|p| parse_expr(p, line))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MacroContent::Primitive { code, modifiers })
}

// ─── Primitive evaluation ────────────────────────────────────────────

fn need(values: &[f64], count: usize, what: &str, name: &str, line: usize) -> Result<(), GerberError> {
    if values.len() < count {
        return Err(GerberError::execution(
            line,
            format!(
                "macro {name}: {what} needs {count} modifiers, got {}",
                values.len()
            ),
        ));
    }
    Ok(())
}

/// Whether modifier `index` of a primitive with `code` is a length.
fn is_length(code: u32, index: usize, count: usize) -> bool {
    match code {
        1 => (1..=3).contains(&index),
        2 | 20 => (1..=5).contains(&index),
        21 | 22 => (1..=4).contains(&index),
        // Vertex pairs; an odd count ends in the rotation
        4 => index >= 2 && index < count - count % 2,
        5 => (2..=4).contains(&index),
        6 => index <= 4 || index == 6 || index == 7,
        7 => index <= 4,
        _ => false,
    }
}

fn scale_expr(expr: &Expr, k: f64) -> Expr {
    match expr {
        Expr::Literal(v) => Expr::Literal(v * k),
        other => Expr::Mul(Box::new(other.clone()), Box::new(Expr::Literal(k))),
    }
}

fn rotate_set(set: PolygonSet, degrees: f64) -> PolygonSet {
    if degrees.abs() < 1e-12 {
        return set;
    }
    set.into_iter()
        .map(|ring| ring.into_iter().map(|p| p.rotated(degrees)).collect())
        .collect()
}

/// Rectangle from its four corners, rotated about the macro origin.
fn rotated_rect(corners: [Point; 4], degrees: f64) -> PolygonSet {
    rotate_set(vec![close_ring(corners.to_vec())], degrees)
}

/// Realize a single macro primitive; returns `(exposed, shape)`.
fn build_primitive(
    code: u32,
    v: &[f64],
    name: &str,
    line: usize,
) -> Result<(bool, PolygonSet), GerberError> {
    if let Some(bad) = v.iter().position(|x| !x.is_finite()) {
        return Err(GerberError::execution(
            line,
            format!("macro {name}: modifier {} of primitive {code} is not finite", bad + 1),
        ));
    }
    let exposed = |v: &[f64]| v[0] != 0.0;
    match code {
        1 => {
            // Circle: exposure, diameter, center_x, center_y [, rotation]
            need(v, 4, "circle", name, line)?;
            let circle = circle_polygon(Point::new(v[2], v[3]), v[1].abs() / 2.0, None, 0.0);
            let rotation = v.get(4).copied().unwrap_or(0.0);
            Ok((exposed(v), rotate_set(vec![circle], rotation)))
        }
        2 | 20 => {
            // Vector line: exposure, width, start_x, start_y, end_x, end_y, rotation
            need(v, 6, "vector line", name, line)?;
            let start = Point::new(v[2], v[3]);
            let end = Point::new(v[4], v[5]);
            let rotation = v.get(6).copied().unwrap_or(0.0);
            let len = start.distance(end);
            if len < EPSILON || v[1].abs() < EPSILON {
                return Ok((exposed(v), Vec::new()));
            }
            let half = v[1].abs() / 2.0;
            let normal = Point::new(-(end.y - start.y) / len, (end.x - start.x) / len) * half;
            let corners = [start - normal, end - normal, end + normal, start + normal];
            Ok((exposed(v), rotated_rect(corners, rotation)))
        }
        21 => {
            // Center line: exposure, width, height, center_x, center_y, rotation
            need(v, 5, "center line", name, line)?;
            let rect = rectangle_polygon(Point::new(v[3], v[4]), v[1].abs(), v[2].abs());
            let rotation = v.get(5).copied().unwrap_or(0.0);
            Ok((exposed(v), rotate_set(vec![rect], rotation)))
        }
        22 => {
            // Lower-left line: exposure, width, height, x, y, rotation
            need(v, 5, "lower-left line", name, line)?;
            let (w, h) = (v[1].abs(), v[2].abs());
            let ll = Point::new(v[3], v[4]);
            let corners = [
                ll,
                ll + Point::new(w, 0.0),
                ll + Point::new(w, h),
                ll + Point::new(0.0, h),
            ];
            let rotation = v.get(5).copied().unwrap_or(0.0);
            Ok((exposed(v), rotated_rect(corners, rotation)))
        }
        4 => {
            // Outline: exposure, n, x0, y0, ..., xn, yn, rotation
            need(v, 2, "outline", name, line)?;
            let n = v[1].round();
            if n < 1.0 {
                return Err(GerberError::execution(
                    line,
                    format!("macro {name}: outline needs at least 1 vertex, got {n}"),
                ));
            }
            // Start point plus n vertices, each an x,y pair after exposure and n
            let pairs = (v.len() - 2) / 2;
            if n >= pairs as f64 {
                return Err(GerberError::execution(
                    line,
                    format!("macro {name}: outline declares {n} vertices but carries {pairs} points"),
                ));
            }
            let n = n as usize;
            let points: Vec<Point> = (0..=n)
                .map(|k| Point::new(v[2 + 2 * k], v[3 + 2 * k]))
                .collect();
            let rotation = v.get(4 + 2 * n).copied().unwrap_or(0.0);
            Ok((exposed(v), rotate_set(vec![close_ring(points)], rotation)))
        }
        5 => {
            // Polygon: exposure, n, center_x, center_y, diameter, rotation
            need(v, 5, "polygon", name, line)?;
            let n = v[1].round();
            if !(3.0..=12.0).contains(&n) {
                return Err(GerberError::execution(
                    line,
                    format!("macro {name}: polygon vertex count {n} outside 3..=12"),
                ));
            }
            let poly = regular_polygon(Point::new(v[2], v[3]), v[4].abs(), n as usize, 0.0);
            let rotation = v.get(5).copied().unwrap_or(0.0);
            Ok((exposed(v), rotate_set(vec![poly], rotation)))
        }
        6 => {
            // Moire: center_x, center_y, outer_d, ring_thickness, gap, max_rings,
            // crosshair_thickness, crosshair_length, rotation
            need(v, 8, "moire", name, line)?;
            let center = Point::new(v[0], v[1]);
            let (outer, thickness, gap) = (v[2], v[3], v[4]);
            let mut max_rings = v[5].max(0.0).round();
            if max_rings > MAX_MOIRE_RINGS as f64 {
                warn!("Macro {name}: moire with {max_rings} rings clamped to {MAX_MOIRE_RINGS}");
                max_rings = MAX_MOIRE_RINGS as f64;
            }
            // Without a positive pitch every ring lands on the first
            if thickness + gap <= EPSILON {
                max_rings = max_rings.min(1.0);
            }
            let mut set = PolygonSet::new();
            for k in 0..max_rings as usize {
                let ring_outer = outer - 2.0 * k as f64 * (thickness + gap);
                if ring_outer <= 0.0 {
                    break;
                }
                let ring_inner = ring_outer - 2.0 * thickness;
                set.extend(annulus(center, ring_outer / 2.0, ring_inner / 2.0));
            }
            let (cross_t, cross_len) = (v[6], v[7]);
            if cross_t > 0.0 && cross_len > 0.0 {
                set.push(rectangle_polygon(center, cross_len, cross_t));
                set.push(rectangle_polygon(center, cross_t, cross_len));
            }
            let rotation = v.get(8).copied().unwrap_or(0.0);
            Ok((true, rotate_set(set, rotation)))
        }
        7 => {
            // Thermal: center_x, center_y, outer_d, inner_d, gap, rotation
            need(v, 5, "thermal", name, line)?;
            let (outer, inner, gap) = (v[2], v[3], v[4]);
            if outer <= 0.0 || inner < 0.0 || inner >= outer || gap < 0.0 {
                return Err(GerberError::execution(
                    line,
                    format!("macro {name}: invalid thermal (outer {outer}, inner {inner}, gap {gap})"),
                ));
            }
            let set = thermal(Point::new(v[0], v[1]), outer / 2.0, inner / 2.0, gap);
            if set.is_empty() {
                warn!("Macro {name}: thermal gap {gap} covers the whole ring");
            }
            let rotation = v.get(5).copied().unwrap_or(0.0);
            Ok((true, rotate_set(set, rotation)))
        }
        _ => Err(GerberError::execution(
            line,
            format!("macro {name}: invalid primitive code {code}"),
        )),
    }
}

/// Thermal relief: a ring cut by two perpendicular gaps of width `gap`.
///
/// Without a gap the ring is a single annulus. With a gap each quadrant is a
/// separate polygon: an annular sector while the inner radius clears the gap,
/// otherwise a wedge closed at the gap corner.
fn thermal(center: Point, outer_r: f64, inner_r: f64, gap: f64) -> PolygonSet {
    if gap < EPSILON {
        return annulus(center, outer_r, inner_r);
    }
    let half_gap = gap / 2.0;
    if half_gap >= outer_r {
        return Vec::new();
    }
    let steps = (ARC_STEPS / 4).max(1);
    let outer_a0 = (half_gap / outer_r).asin();
    let sector = inner_r > half_gap;
    let inner_a0 = if sector { (half_gap / inner_r).asin() } else { 0.0 };

    (0..4)
        .map(|q| {
            let base = q as f64 * FRAC_PI_2;
            let mut ring: Polygon = arc_by_angle(
                center,
                outer_r,
                base + outer_a0,
                FRAC_PI_2 - 2.0 * outer_a0,
                steps,
            );
            if sector {
                ring.extend(arc_by_angle(
                    center,
                    inner_r,
                    base + FRAC_PI_2 - inner_a0,
                    -(FRAC_PI_2 - 2.0 * inner_a0),
                    steps,
                ));
            } else {
                ring.push(center + Point::new(half_gap, half_gap).rotated(base.to_degrees()));
            }
            close_ring(ring)
        })
        .collect()
}
