//! Self-contained Gerber output.
//!
//! Primitives hold their apertures by reference. The writer gives each one a
//! D code on first use and collects its definition, converted to
//! millimeters, into a prologue that precedes the body. The result always
//! declares its own format and `%MOMM*%`, whatever units the source used.

use std::collections::HashSet;
use std::rc::Rc;

use log::debug;

use crate::types::Point;

use super::apertures::{Aperture, ApertureKind};
use super::commands::ApertureTemplate;
use super::coord::{Axis, CoordinateFormat, CoordinateMode, Units};
use super::macros::ApertureMacro;
use super::primitives::{GraphicsObject, ObjectState, Polarity};

/// Lowest D code that may name an aperture.
const FIRST_CODE: u32 = 10;

/// Collects aperture, macro and block definitions while a body is written.
pub struct GerberWriter {
    format: CoordinateFormat,
    prologue: String,
    apertures: Vec<(Rc<Aperture>, u32)>,
    macros: Vec<(Rc<ApertureMacro>, Units, String)>,
    used: HashSet<u32>,
    thin: Option<u32>,
}

impl GerberWriter {
    /// Writer emitting coordinates with `format`, forced to absolute mode
    /// and widened to four integer digits for millimeter values.
    pub fn new(format: &CoordinateFormat) -> Self {
        let mut format = format.clone();
        format.mode = CoordinateMode::Absolute;
        format.x_integer = format.x_integer.clamp(4, 9);
        format.y_integer = format.y_integer.clamp(4, 9);
        Self {
            format,
            prologue: String::new(),
            apertures: Vec::new(),
            macros: Vec::new(),
            used: HashSet::new(),
            thin: None,
        }
    }

    pub fn xy(&self, p: Point) -> String {
        format!(
            "X{}Y{}",
            self.format.encode(p.x, Axis::X),
            self.format.encode(p.y, Axis::Y)
        )
    }

    pub fn ij(&self, offset: Point) -> String {
        format!(
            "I{}J{}",
            self.format.encode(offset.x, Axis::X),
            self.format.encode(offset.y, Axis::Y)
        )
    }

    /// Keep the aperture's own code when it is still free.
    fn claim(&mut self, preferred: Option<u32>) -> u32 {
        if let Some(code) = preferred.filter(|c| *c >= FIRST_CODE && !self.used.contains(c)) {
            self.used.insert(code);
            return code;
        }
        let mut code = FIRST_CODE;
        while self.used.contains(&code) {
            code += 1;
        }
        self.used.insert(code);
        code
    }

    /// D code for `aperture`, defining it in the prologue on first use.
    pub fn aperture_code(&mut self, aperture: &Rc<Aperture>) -> u32 {
        if let Some((_, code)) = self.apertures.iter().find(|(a, _)| Rc::ptr_eq(a, aperture)) {
            return *code;
        }
        let code = self.claim(Some(aperture.id));
        if code != aperture.id {
            debug!("Aperture D{} written as D{code}", aperture.id);
        }
        let k = aperture.units.to_mm(1.0);
        match &aperture.kind {
            ApertureKind::Standard(template) => {
                self.prologue
                    .push_str(&format!("%ADD{code}{}*%\n", template.scaled(k).to_gerber()));
            }
            ApertureKind::Macro { definition, params } => {
                let name = self.macro_name(definition, aperture.units);
                let template = ApertureTemplate::Macro {
                    name,
                    params: params.clone(),
                };
                self.prologue
                    .push_str(&format!("%ADD{code}{}*%\n", template.to_gerber()));
            }
            ApertureKind::Block(objects) => {
                // Body first: it may define the zero-size pen it draws with
                let body = self.objects_to_gerber(objects);
                self.prologue
                    .push_str(&format!("%ABD{code}*%\n{body}%AB*%\n"));
            }
        }
        self.apertures.push((Rc::clone(aperture), code));
        code
    }

    /// Zero-size circle used for strokes that must read back as thin.
    pub fn thin_code(&mut self) -> u32 {
        if let Some(code) = self.thin {
            return code;
        }
        let code = self.claim(None);
        self.prologue.push_str(&format!("%ADD{code}C,0*%\n"));
        self.thin = Some(code);
        code
    }

    /// Name of the millimeter copy of `definition` as used with `units`.
    fn macro_name(&mut self, definition: &Rc<ApertureMacro>, units: Units) -> String {
        if let Some((_, _, name)) = self
            .macros
            .iter()
            .find(|(d, u, _)| Rc::ptr_eq(d, definition) && *u == units)
        {
            return name.clone();
        }
        let mut name = definition.name.clone();
        let mut n = 1;
        while self.macros.iter().any(|(_, _, taken)| *taken == name) {
            n += 1;
            name = format!("{}_{n}", definition.name);
        }
        let scaled = definition.scaled(&name, units.to_mm(1.0));
        self.prologue.push_str(&format!("%{}*%\n", scaled.to_gerber()));
        self.macros.push((Rc::clone(definition), units, name.clone()));
        name
    }

    /// Realized objects as regions, one per object, and zero-width draws.
    pub fn objects_to_gerber(&mut self, objects: &[GraphicsObject]) -> String {
        let mut out = String::new();
        for object in objects {
            let state = ObjectState {
                polarity: object.polarity,
                ..ObjectState::default()
            };
            if object.polarity == Polarity::Thin {
                let code = self.thin_code();
                out.push_str(&state.to_gerber());
                out.push_str(&format!("D{code}*\nG01*\n"));
                for path in &object.polygons {
                    for (i, p) in path.iter().enumerate() {
                        let op = if i == 0 { "D02" } else { "D01" };
                        out.push_str(&format!("{}{op}*\n", self.xy(*p)));
                    }
                }
                continue;
            }

            let rings: Vec<_> = object.polygons.iter().filter(|r| r.len() >= 3).collect();
            if rings.is_empty() {
                continue;
            }
            out.push_str(&state.to_gerber());
            out.push_str("G36*\nG01*\n");
            for ring in rings {
                out.push_str(&format!("{}D02*\n", self.xy(ring[0])));
                for p in ring[1..].iter().chain(std::iter::once(&ring[0])) {
                    out.push_str(&format!("{}D01*\n", self.xy(*p)));
                }
            }
            out.push_str("G37*\n");
        }
        out
    }

    /// Complete file: format, units, collected definitions, then `body`.
    pub fn finish(self, body: &str) -> String {
        format!(
            "%{}*%\n%MOMM*%\n{}{body}M02*\n",
            self.format.to_gerber(),
            self.prologue
        )
    }
}
