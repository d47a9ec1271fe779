//! Command dispatcher.
//!
//! Every command string from the tokenizer is matched against an ordered
//! table of grammar rules. The first rule whose pattern matches builds the
//! command; earlier rules are the narrower ones. Unmatched text is a fatal
//! parse error.

use lazy_regex::{lazy_regex, Lazy};
use log::{debug, trace, warn};
use regex::{Captures, Regex};

use crate::error::GerberError;
use crate::geometry::Mirroring;

use super::coord::{Axis, CoordinateFormat, CoordinateMode, Units, ZeroSuppression};
use super::macros::ApertureMacro;
use super::primitives::Polarity;

/// Aperture shape template from an %AD command. Sizes are in file units.
#[derive(Debug, Clone, PartialEq)]
pub enum ApertureTemplate {
    Circle {
        diameter: f64,
        hole: Vec<f64>,
    },
    Rectangle {
        x_size: f64,
        y_size: f64,
        hole: Vec<f64>,
    },
    Obround {
        x_size: f64,
        y_size: f64,
        hole: Vec<f64>,
    },
    Polygon {
        outer_diameter: f64,
        vertices: u32,
        rotation: f64,
        hole: Vec<f64>,
    },
    /// Reference to a user-defined aperture macro.
    Macro { name: String, params: Vec<f64> },
}

fn join_modifiers(values: impl IntoIterator<Item = f64>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("X")
}

impl ApertureTemplate {
    /// Copy with every length multiplied by `k`; counts, rotations and
    /// macro modifiers are left alone.
    pub fn scaled(&self, k: f64) -> Self {
        let hole_of = |hole: &[f64]| -> Vec<f64> { hole.iter().map(|v| v * k).collect() };
        match self {
            ApertureTemplate::Circle { diameter, hole } => ApertureTemplate::Circle {
                diameter: diameter * k,
                hole: hole_of(hole),
            },
            ApertureTemplate::Rectangle { x_size, y_size, hole } => ApertureTemplate::Rectangle {
                x_size: x_size * k,
                y_size: y_size * k,
                hole: hole_of(hole),
            },
            ApertureTemplate::Obround { x_size, y_size, hole } => ApertureTemplate::Obround {
                x_size: x_size * k,
                y_size: y_size * k,
                hole: hole_of(hole),
            },
            ApertureTemplate::Polygon {
                outer_diameter,
                vertices,
                rotation,
                hole,
            } => ApertureTemplate::Polygon {
                outer_diameter: outer_diameter * k,
                vertices: *vertices,
                rotation: *rotation,
                hole: hole_of(hole),
            },
            ApertureTemplate::Macro { .. } => self.clone(),
        }
    }

    /// Template part of an %AD command, e.g. `C,0.5X0.2`.
    pub fn to_gerber(&self) -> String {
        match self {
            ApertureTemplate::Circle { diameter, hole } => {
                format!("C,{}", join_modifiers(std::iter::once(*diameter).chain(hole.iter().copied())))
            }
            ApertureTemplate::Rectangle { x_size, y_size, hole } => format!(
                "R,{}",
                join_modifiers([*x_size, *y_size].into_iter().chain(hole.iter().copied()))
            ),
            ApertureTemplate::Obround { x_size, y_size, hole } => format!(
                "O,{}",
                join_modifiers([*x_size, *y_size].into_iter().chain(hole.iter().copied()))
            ),
            ApertureTemplate::Polygon {
                outer_diameter,
                vertices,
                rotation,
                hole,
            } => {
                let mut values = vec![*outer_diameter, *vertices as f64];
                if *rotation != 0.0 || !hole.is_empty() {
                    values.push(*rotation);
                }
                values.extend(hole.iter().copied());
                format!("P,{}", join_modifiers(values))
            }
            ApertureTemplate::Macro { name, params } if params.is_empty() => name.clone(),
            ApertureTemplate::Macro { name, params } => {
                format!("{name},{}", join_modifiers(params.iter().copied()))
            }
        }
    }
}

/// Interpolation mode set by G01/G02/G03.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Linear,
    Clockwise,
    CounterClockwise,
}

/// Arc center disambiguation mode set by G74/G75.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuadrantMode {
    Single,
    #[default]
    Multi,
}

/// X2 attribute family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    File,
    Aperture,
    Object,
    Delete,
}

impl AttributeKind {
    fn code(&self) -> char {
        match self {
            AttributeKind::File => 'F',
            AttributeKind::Aperture => 'A',
            AttributeKind::Object => 'O',
            AttributeKind::Delete => 'D',
        }
    }
}

/// A fully parsed Gerber command. Coordinates are in file units.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// G04 comment
    Comment(String),
    /// %FS - Format specification
    FormatSpec(CoordinateFormat),
    /// %MO - Unit mode
    Units(Units),
    /// G70 / G71 - Legacy unit selection
    LegacyUnits(Units),
    /// %AD - Aperture definition
    ApertureDefine {
        code: u32,
        template: ApertureTemplate,
    },
    /// %AM - Aperture macro definition
    MacroDefine(ApertureMacro),
    /// %ABD<n> - Open block aperture
    ApertureBlockOpen(u32),
    /// %AB - Close block aperture
    ApertureBlockClose,
    /// %SR with a grid - Open step-and-repeat block
    StepRepeatOpen {
        x_count: u32,
        y_count: u32,
        x_step: f64,
        y_step: f64,
    },
    /// Bare %SR (or a 1x1 grid) - Close step-and-repeat block
    StepRepeatClose,
    /// %LP - Load polarity
    LoadPolarity(Polarity),
    /// %LM - Load mirroring
    LoadMirroring(Mirroring),
    /// %LR - Load rotation (degrees)
    LoadRotation(f64),
    /// %LS - Load scaling
    LoadScaling(f64),
    /// %TF / %TA / %TO / %TD - Attributes
    Attribute {
        kind: AttributeKind,
        name: String,
        values: Vec<String>,
    },
    /// G01 / G02 / G03
    InterpolationMode(Interpolation),
    /// G74 / G75
    QuadrantMode(QuadrantMode),
    /// G36 - Begin region
    RegionBegin,
    /// G37 - End region
    RegionEnd,
    /// D01 - Interpolate (draw)
    Interpolate {
        x: Option<f64>,
        y: Option<f64>,
        i: Option<f64>,
        j: Option<f64>,
    },
    /// D02 - Move
    Move { x: Option<f64>, y: Option<f64> },
    /// D03 - Flash
    Flash { x: Option<f64>, y: Option<f64> },
    /// Dnn (n >= 10) - Select aperture
    SelectAperture(u32),
    /// M02 (or M00) - End of file
    EndOfFile,
}

fn encode_fields(fmt: &CoordinateFormat, fields: &[(char, Option<f64>, Axis)]) -> String {
    let mut out = String::new();
    for (letter, value, axis) in fields {
        if let Some(v) = value {
            out.push(*letter);
            out.push_str(&fmt.encode(*v, *axis));
        }
    }
    out
}

impl Command {
    /// Canonical Gerber text for this command, delimiters included.
    pub fn format_output(&self, fmt: &CoordinateFormat) -> String {
        match self {
            Command::Comment(text) if text.is_empty() => "G04*".to_string(),
            Command::Comment(text) => format!("G04 {text}*"),
            Command::FormatSpec(spec) => format!("%{}*%", spec.to_gerber()),
            Command::Units(units) => format!("%MO{}*%", units.code()),
            Command::LegacyUnits(Units::Inches) => "G70*".to_string(),
            Command::LegacyUnits(Units::Millimeters) => "G71*".to_string(),
            Command::ApertureDefine { code, template } => {
                format!("%ADD{code}{}*%", template.to_gerber())
            }
            Command::MacroDefine(mac) => format!("%{}*%", mac.to_gerber()),
            Command::ApertureBlockOpen(id) => format!("%ABD{id}*%"),
            Command::ApertureBlockClose => "%AB*%".to_string(),
            Command::StepRepeatOpen {
                x_count,
                y_count,
                x_step,
                y_step,
            } => format!("%SRX{x_count}Y{y_count}I{x_step}J{y_step}*%"),
            Command::StepRepeatClose => "%SR*%".to_string(),
            Command::LoadPolarity(Polarity::Clear) => "%LPC*%".to_string(),
            Command::LoadPolarity(_) => "%LPD*%".to_string(),
            Command::LoadMirroring(m) => {
                let code = match m {
                    Mirroring::None => "N",
                    Mirroring::X => "X",
                    Mirroring::Y => "Y",
                    Mirroring::XY => "XY",
                };
                format!("%LM{code}*%")
            }
            Command::LoadRotation(deg) => format!("%LR{deg}*%"),
            Command::LoadScaling(scale) => format!("%LS{scale}*%"),
            Command::Attribute { kind, name, values } => {
                let mut out = format!("%T{}{name}", kind.code());
                for v in values {
                    out.push(',');
                    out.push_str(v);
                }
                out.push_str("*%");
                out
            }
            Command::InterpolationMode(Interpolation::Linear) => "G01*".to_string(),
            Command::InterpolationMode(Interpolation::Clockwise) => "G02*".to_string(),
            Command::InterpolationMode(Interpolation::CounterClockwise) => "G03*".to_string(),
            Command::QuadrantMode(QuadrantMode::Single) => "G74*".to_string(),
            Command::QuadrantMode(QuadrantMode::Multi) => "G75*".to_string(),
            Command::RegionBegin => "G36*".to_string(),
            Command::RegionEnd => "G37*".to_string(),
            Command::Interpolate { x, y, i, j } => format!(
                "{}D01*",
                encode_fields(
                    fmt,
                    &[('X', *x, Axis::X), ('Y', *y, Axis::Y), ('I', *i, Axis::X), ('J', *j, Axis::Y)]
                )
            ),
            Command::Move { x, y } => format!(
                "{}D02*",
                encode_fields(fmt, &[('X', *x, Axis::X), ('Y', *y, Axis::Y)])
            ),
            Command::Flash { x, y } => format!(
                "{}D03*",
                encode_fields(fmt, &[('X', *x, Axis::X), ('Y', *y, Axis::Y)])
            ),
            Command::SelectAperture(id) => format!("D{id}*"),
            Command::EndOfFile => "M02*".to_string(),
        }
    }
}

// ─── Grammar table ───────────────────────────────────────────────────

static RE_COMMENT: Lazy<Regex> = lazy_regex!(r"(?s)^G0?4((?:[^0-9].*)?)$");
static RE_FORMAT_SPEC: Lazy<Regex> = lazy_regex!(r"^FS([LTD]?)([AI]?)X(\d)(\d)Y(\d)(\d)$");
static RE_UNITS: Lazy<Regex> = lazy_regex!(r"^MO(MM|IN)$");
static RE_APERTURE: Lazy<Regex> =
    lazy_regex!(r"^ADD(\d+)([._$a-zA-Z][._$a-zA-Z0-9]*)(?:,(.*))?$");
static RE_MACRO: Lazy<Regex> = lazy_regex!(r"(?s)^AM.*$");
static RE_APERTURE_BLOCK: Lazy<Regex> = lazy_regex!(r"^AB(?:D(\d+))?$");
static RE_STEP_REPEAT: Lazy<Regex> =
    lazy_regex!(r"^SR(?:X(\d+))?(?:Y(\d+))?(?:I([+-]?[\d.]+))?(?:J([+-]?[\d.]+))?$");
static RE_LOAD_POLARITY: Lazy<Regex> = lazy_regex!(r"^LP([DC])$");
static RE_LOAD_MIRRORING: Lazy<Regex> = lazy_regex!(r"^LM(N|XY|X|Y)$");
static RE_LOAD_ROTATION: Lazy<Regex> = lazy_regex!(r"^LR([+-]?[\d.]+)$");
static RE_LOAD_SCALING: Lazy<Regex> = lazy_regex!(r"^LS([+-]?[\d.]+)$");
static RE_ATTRIBUTE: Lazy<Regex> = lazy_regex!(r"(?s)^T([FAOD])([^,]*)(?:,(.*))?$");
static RE_INTERPOLATION: Lazy<Regex> = lazy_regex!(r"^G0?([123])$");
static RE_REGION: Lazy<Regex> = lazy_regex!(r"^G3([67])$");
static RE_QUADRANT: Lazy<Regex> = lazy_regex!(r"^G7([45])$");
static RE_LEGACY_UNITS: Lazy<Regex> = lazy_regex!(r"^G7([01])$");
static RE_IGNORED: Lazy<Regex> = lazy_regex!(r"(?s)^(?:G5[45]|G9[01]|M01|N\d+|IN.*|LN.*|AS.*|IPPOS)$");
static RE_IMAGE_POLARITY_NEG: Lazy<Regex> = lazy_regex!(r"^IPNEG$");
static RE_IMAGE_MIRROR: Lazy<Regex> = lazy_regex!(r"^MI(?:A([01]))?(?:B([01]))?$");
static RE_IMAGE_SCALE: Lazy<Regex> = lazy_regex!(r"^SF(?:A([\d.]+))?(?:B([\d.]+))?$");
static RE_IMAGE_OFFSET: Lazy<Regex> = lazy_regex!(r"^OF(?:A([+-]?[\d.]+))?(?:B([+-]?[\d.]+))?$");
static RE_IMAGE_ROTATION: Lazy<Regex> = lazy_regex!(r"^IR(\d+)$");
static RE_END_OF_FILE: Lazy<Regex> = lazy_regex!(r"^M0[02]$");
static RE_OPERATION: Lazy<Regex> = lazy_regex!(
    r"^(?:X([+-]?[\d.]+))?(?:Y([+-]?[\d.]+))?(?:I([+-]?[\d.]+))?(?:J([+-]?[\d.]+))?(?:D0*([123]))?$"
);
static RE_SELECT_APERTURE: Lazy<Regex> = lazy_regex!(r"^(?:G5[45])?D(\d+)$");

type Builder = fn(&mut CommandParser, &Captures, &str, usize) -> Result<Option<Command>, GerberError>;

struct Rule {
    name: &'static str,
    regex: &'static Lazy<Regex>,
    build: Builder,
}

static RULES: &[Rule] = &[
    Rule { name: "comment", regex: &RE_COMMENT, build: build_comment },
    Rule { name: "format", regex: &RE_FORMAT_SPEC, build: build_format_spec },
    Rule { name: "units", regex: &RE_UNITS, build: build_units },
    Rule { name: "aperture", regex: &RE_APERTURE, build: build_aperture_define },
    Rule { name: "macro", regex: &RE_MACRO, build: build_macro },
    Rule { name: "block", regex: &RE_APERTURE_BLOCK, build: build_aperture_block },
    Rule { name: "step-repeat", regex: &RE_STEP_REPEAT, build: build_step_repeat },
    Rule { name: "polarity", regex: &RE_LOAD_POLARITY, build: build_load_polarity },
    Rule { name: "mirroring", regex: &RE_LOAD_MIRRORING, build: build_load_mirroring },
    Rule { name: "rotation", regex: &RE_LOAD_ROTATION, build: build_load_rotation },
    Rule { name: "scaling", regex: &RE_LOAD_SCALING, build: build_load_scaling },
    Rule { name: "attribute", regex: &RE_ATTRIBUTE, build: build_attribute },
    Rule { name: "interpolation", regex: &RE_INTERPOLATION, build: build_interpolation },
    Rule { name: "region", regex: &RE_REGION, build: build_region },
    Rule { name: "quadrant", regex: &RE_QUADRANT, build: build_quadrant },
    Rule { name: "legacy-units", regex: &RE_LEGACY_UNITS, build: build_legacy_units },
    Rule { name: "ignored", regex: &RE_IGNORED, build: build_ignored },
    Rule { name: "image-polarity", regex: &RE_IMAGE_POLARITY_NEG, build: build_image_polarity },
    Rule { name: "image-mirror", regex: &RE_IMAGE_MIRROR, build: build_image_mirror },
    Rule { name: "image-scale", regex: &RE_IMAGE_SCALE, build: build_image_scale },
    Rule { name: "image-offset", regex: &RE_IMAGE_OFFSET, build: build_image_offset },
    Rule { name: "image-rotation", regex: &RE_IMAGE_ROTATION, build: build_image_rotation },
    Rule { name: "end", regex: &RE_END_OF_FILE, build: build_end_of_file },
    Rule { name: "operation", regex: &RE_OPERATION, build: build_operation },
    Rule { name: "select", regex: &RE_SELECT_APERTURE, build: build_select_aperture },
];

/// Which D operation coordinate-only lines repeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Operation {
    #[default]
    Interpolate,
    Move,
    Flash,
}

/// Turns command strings into [`Command`]s.
///
/// Holds the coordinate format (the first %FS wins) and the last D
/// operation, which coordinate-only continuation lines repeat.
#[derive(Debug, Default)]
pub struct CommandParser {
    format: Option<CoordinateFormat>,
    last_operation: Operation,
}

impl CommandParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The coordinate format in force, if any %FS has been seen.
    pub fn format(&self) -> Option<&CoordinateFormat> {
        self.format.as_ref()
    }

    /// Parse one command. `Ok(None)` means the command is recognized but
    /// has no effect (ignored legacy codes, or coordinates before %FS).
    pub fn parse(&mut self, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
        for rule in RULES {
            if let Some(caps) = rule.regex.captures(text) {
                trace!("line {line}: {} <- {text:?}", rule.name);
                return (rule.build)(self, &caps, text, line);
            }
        }
        Err(GerberError::unparsable(line, text, "unknown command"))
    }
}

/// Parse a complete command list; convenient for tests and tools.
pub fn parse_commands(tokens: &[super::lexer::Token]) -> Result<Vec<(Command, usize)>, GerberError> {
    let mut parser = CommandParser::new();
    let mut commands = Vec::new();
    for token in tokens {
        if let Some(cmd) = parser.parse(&token.text, token.line)? {
            commands.push((cmd, token.line));
        }
    }
    Ok(commands)
}

// ─── Builders ────────────────────────────────────────────────────────

fn cap<'t>(caps: &Captures<'t>, i: usize) -> Option<&'t str> {
    caps.get(i).map(|m| m.as_str())
}

fn number(text: &str, whole: &str, line: usize) -> Result<f64, GerberError> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GerberError::unparsable(line, whole, &format!("bad number {text:?}")))
}

fn build_comment(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    Ok(Some(Command::Comment(cap(caps, 1).unwrap_or_default().trim().to_string())))
}

fn build_format_spec(
    parser: &mut CommandParser,
    caps: &Captures,
    _: &str,
    line: usize,
) -> Result<Option<Command>, GerberError> {
    let digit = |i: usize| cap(caps, i).and_then(|d| d.parse::<u8>().ok()).unwrap_or(0);
    let spec = CoordinateFormat {
        x_integer: digit(3),
        x_decimal: digit(4),
        y_integer: digit(5),
        y_decimal: digit(6),
        zero_suppression: ZeroSuppression::from_code(cap(caps, 1).unwrap_or_default()),
        mode: if cap(caps, 2) == Some("I") {
            CoordinateMode::Incremental
        } else {
            CoordinateMode::Absolute
        },
    };
    if let Some(existing) = &parser.format {
        warn!(
            "Line {line}: format redefined as {}; keeping {}",
            spec.to_gerber(),
            existing.to_gerber()
        );
        return Ok(None);
    }
    parser.format = Some(spec.clone());
    Ok(Some(Command::FormatSpec(spec)))
}

fn build_units(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let units = Units::from_code(cap(caps, 1).unwrap_or_default())
        .ok_or_else(|| GerberError::unparsable(line, text, "bad unit"))?;
    Ok(Some(Command::Units(units)))
}

fn build_aperture_define(
    _: &mut CommandParser,
    caps: &Captures,
    text: &str,
    line: usize,
) -> Result<Option<Command>, GerberError> {
    let code: u32 = cap(caps, 1)
        .unwrap_or_default()
        .parse()
        .map_err(|_| GerberError::unparsable(line, text, "bad aperture code"))?;
    if code < 10 {
        return Err(GerberError::unparsable(line, text, "aperture code must be 10 or above"));
    }
    let name = cap(caps, 2).unwrap_or_default();
    let params: Vec<f64> = match cap(caps, 3).map(str::trim) {
        None | Some("") => Vec::new(),
        Some(list) => list
            .split('X')
            .map(|p| number(p.trim(), text, line))
            .collect::<Result<Vec<_>, _>>()?,
    };
    let template = aperture_template(name, params, text, line)?;
    Ok(Some(Command::ApertureDefine { code, template }))
}

fn aperture_template(
    name: &str,
    params: Vec<f64>,
    text: &str,
    line: usize,
) -> Result<ApertureTemplate, GerberError> {
    let count_err = |range: &str| {
        GerberError::unparsable(line, text, &format!("{name} aperture takes {range} modifiers"))
    };
    let holes_ok = |hole: &[f64]| hole.iter().all(|v| *v >= 0.0);
    match name {
        "C" => {
            if !(1..=3).contains(&params.len()) {
                return Err(count_err("1 to 3"));
            }
            if params[0] < 0.0 || !holes_ok(&params[1..]) {
                return Err(GerberError::unparsable(line, text, "negative circle size"));
            }
            Ok(ApertureTemplate::Circle {
                diameter: params[0],
                hole: params[1..].to_vec(),
            })
        }
        "R" | "O" => {
            if !(2..=4).contains(&params.len()) {
                return Err(count_err("2 to 4"));
            }
            if params[0] <= 0.0 || params[1] <= 0.0 || !holes_ok(&params[2..]) {
                return Err(GerberError::unparsable(line, text, "aperture sizes must be positive"));
            }
            let (x_size, y_size, hole) = (params[0], params[1], params[2..].to_vec());
            Ok(if name == "R" {
                ApertureTemplate::Rectangle { x_size, y_size, hole }
            } else {
                ApertureTemplate::Obround { x_size, y_size, hole }
            })
        }
        "P" => {
            if !(2..=5).contains(&params.len()) {
                return Err(count_err("2 to 5"));
            }
            let vertices = params[1];
            if params[0] <= 0.0 || vertices.fract() != 0.0 || !(3.0..=12.0).contains(&vertices) {
                return Err(GerberError::unparsable(
                    line,
                    text,
                    "polygon needs a positive diameter and 3 to 12 vertices",
                ));
            }
            if !holes_ok(params.get(3..).unwrap_or_default()) {
                return Err(GerberError::unparsable(line, text, "negative hole size"));
            }
            Ok(ApertureTemplate::Polygon {
                outer_diameter: params[0],
                vertices: vertices as u32,
                rotation: params.get(2).copied().unwrap_or(0.0),
                hole: params.get(3..).unwrap_or_default().to_vec(),
            })
        }
        _ => Ok(ApertureTemplate::Macro {
            name: name.to_string(),
            params,
        }),
    }
}

fn build_macro(_: &mut CommandParser, _: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    Ok(Some(Command::MacroDefine(ApertureMacro::parse(text, line)?)))
}

fn build_aperture_block(
    _: &mut CommandParser,
    caps: &Captures,
    text: &str,
    line: usize,
) -> Result<Option<Command>, GerberError> {
    match cap(caps, 1) {
        None => Ok(Some(Command::ApertureBlockClose)),
        Some(id) => {
            let id: u32 = id
                .parse()
                .map_err(|_| GerberError::unparsable(line, text, "bad block aperture code"))?;
            if id < 10 {
                return Err(GerberError::unparsable(line, text, "aperture code must be 10 or above"));
            }
            Ok(Some(Command::ApertureBlockOpen(id)))
        }
    }
}

/// Upper bound on the copies one step-and-repeat block may expand to.
pub const MAX_REPEAT_COPIES: u32 = 100_000;

fn build_step_repeat(
    _: &mut CommandParser,
    caps: &Captures,
    text: &str,
    line: usize,
) -> Result<Option<Command>, GerberError> {
    let count = |i: usize| -> Result<u32, GerberError> {
        match cap(caps, i) {
            None => Ok(1),
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| GerberError::unparsable(line, text, "repeat counts must be 1 or more")),
        }
    };
    let x_count = count(1)?;
    let y_count = count(2)?;
    if x_count == 1 && y_count == 1 {
        return Ok(Some(Command::StepRepeatClose));
    }
    if x_count
        .checked_mul(y_count)
        .map_or(true, |copies| copies > MAX_REPEAT_COPIES)
    {
        return Err(GerberError::unparsable(
            line,
            text,
            &format!("repeat grid {x_count}x{y_count} exceeds {MAX_REPEAT_COPIES} copies"),
        ));
    }
    let step = |i: usize| -> Result<f64, GerberError> {
        let value = cap(caps, i).map_or(Ok(0.0), |v| number(v, text, line))?;
        if value < 0.0 {
            return Err(GerberError::unparsable(line, text, "repeat steps must not be negative"));
        }
        Ok(value)
    };
    Ok(Some(Command::StepRepeatOpen {
        x_count,
        y_count,
        x_step: step(3)?,
        y_step: step(4)?,
    }))
}

fn build_load_polarity(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    let polarity = if cap(caps, 1) == Some("C") {
        Polarity::Clear
    } else {
        Polarity::Dark
    };
    Ok(Some(Command::LoadPolarity(polarity)))
}

fn build_load_mirroring(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    let mirroring = match cap(caps, 1) {
        Some("X") => Mirroring::X,
        Some("Y") => Mirroring::Y,
        Some("XY") => Mirroring::XY,
        _ => Mirroring::None,
    };
    Ok(Some(Command::LoadMirroring(mirroring)))
}

fn build_load_rotation(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let degrees = number(cap(caps, 1).unwrap_or_default(), text, line)?;
    Ok(Some(Command::LoadRotation(degrees)))
}

fn build_load_scaling(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let scale = number(cap(caps, 1).unwrap_or_default(), text, line)?;
    if scale <= 0.0 {
        return Err(GerberError::unparsable(line, text, "scale must be positive"));
    }
    Ok(Some(Command::LoadScaling(scale)))
}

fn build_attribute(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    let kind = match cap(caps, 1) {
        Some("F") => AttributeKind::File,
        Some("A") => AttributeKind::Aperture,
        Some("O") => AttributeKind::Object,
        _ => AttributeKind::Delete,
    };
    let values = cap(caps, 3)
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    Ok(Some(Command::Attribute {
        kind,
        name: cap(caps, 2).unwrap_or_default().to_string(),
        values,
    }))
}

fn build_interpolation(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    let mode = match cap(caps, 1) {
        Some("2") => Interpolation::Clockwise,
        Some("3") => Interpolation::CounterClockwise,
        _ => Interpolation::Linear,
    };
    Ok(Some(Command::InterpolationMode(mode)))
}

fn build_region(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    Ok(Some(if cap(caps, 1) == Some("6") {
        Command::RegionBegin
    } else {
        Command::RegionEnd
    }))
}

fn build_quadrant(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    Ok(Some(Command::QuadrantMode(if cap(caps, 1) == Some("4") {
        QuadrantMode::Single
    } else {
        QuadrantMode::Multi
    })))
}

fn build_legacy_units(_: &mut CommandParser, caps: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    Ok(Some(Command::LegacyUnits(if cap(caps, 1) == Some("0") {
        Units::Inches
    } else {
        Units::Millimeters
    })))
}

fn build_ignored(_: &mut CommandParser, _: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    debug!("Line {line}: ignoring legacy command {text:?}");
    Ok(None)
}

fn ignore_deprecated(text: &str, line: usize, identity: bool) -> Result<Option<Command>, GerberError> {
    if identity {
        debug!("Line {line}: ignoring identity image transform {text:?}");
    } else {
        warn!("Line {line}: deprecated image transform {text:?} is not applied");
    }
    Ok(None)
}

fn build_image_polarity(_: &mut CommandParser, _: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    ignore_deprecated(text, line, false)
}

fn build_image_mirror(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let identity = cap(caps, 1) != Some("1") && cap(caps, 2) != Some("1");
    ignore_deprecated(text, line, identity)
}

fn build_image_scale(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let is_one = |i: usize| cap(caps, i).map_or(true, |v| v.parse::<f64>().ok() == Some(1.0));
    ignore_deprecated(text, line, is_one(1) && is_one(2))
}

fn build_image_offset(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let is_zero = |i: usize| cap(caps, i).map_or(true, |v| v.parse::<f64>().ok() == Some(0.0));
    ignore_deprecated(text, line, is_zero(1) && is_zero(2))
}

fn build_image_rotation(_: &mut CommandParser, caps: &Captures, text: &str, line: usize) -> Result<Option<Command>, GerberError> {
    let identity = cap(caps, 1).and_then(|v| v.parse::<u32>().ok()) == Some(0);
    ignore_deprecated(text, line, identity)
}

fn build_end_of_file(_: &mut CommandParser, _: &Captures, _: &str, _: usize) -> Result<Option<Command>, GerberError> {
    Ok(Some(Command::EndOfFile))
}

fn build_operation(
    parser: &mut CommandParser,
    caps: &Captures,
    text: &str,
    line: usize,
) -> Result<Option<Command>, GerberError> {
    let has_coords = (1..=4).any(|i| caps.get(i).is_some());
    let operation = match cap(caps, 5) {
        Some("1") => Operation::Interpolate,
        Some("2") => Operation::Move,
        Some("3") => Operation::Flash,
        _ if has_coords => parser.last_operation,
        _ => return Err(GerberError::unparsable(line, text, "empty command")),
    };
    parser.last_operation = operation;

    let mut fields = [None; 4];
    if has_coords {
        let Some(fmt) = &parser.format else {
            warn!("Line {line}: coordinates before the format specification, skipped: {text:?}");
            return Ok(None);
        };
        for (slot, (group, axis)) in fields
            .iter_mut()
            .zip([(1, Axis::X), (2, Axis::Y), (3, Axis::X), (4, Axis::Y)])
        {
            if let Some(raw) = cap(caps, group) {
                let value = fmt
                    .decode(raw, axis)
                    .ok_or_else(|| GerberError::unparsable(line, text, "bad coordinate"))?;
                *slot = Some(value);
            }
        }
    }
    let [x, y, i, j] = fields;

    Ok(Some(match operation {
        Operation::Interpolate => Command::Interpolate { x, y, i, j },
        Operation::Move | Operation::Flash if i.is_some() || j.is_some() => {
            return Err(GerberError::unparsable(line, text, "arc offsets on a move or flash"));
        }
        Operation::Move => Command::Move { x, y },
        Operation::Flash => Command::Flash { x, y },
    }))
}

fn build_select_aperture(
    _: &mut CommandParser,
    caps: &Captures,
    text: &str,
    line: usize,
) -> Result<Option<Command>, GerberError> {
    let id: u32 = cap(caps, 1)
        .unwrap_or_default()
        .parse()
        .map_err(|_| GerberError::unparsable(line, text, "bad aperture code"))?;
    if id < 10 {
        return Err(GerberError::unparsable(line, text, "invalid D code"));
    }
    Ok(Some(Command::SelectAperture(id)))
}
