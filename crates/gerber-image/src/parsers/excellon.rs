use std::collections::HashMap;

use log::{debug, warn};

use crate::types::{BBox, DrillFile, DrillHole, Point};

/// Units used in the drill file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExcellonUnits {
    Metric,
    Inches,
}

impl ExcellonUnits {
    fn to_mm(self, value: f64) -> f64 {
        match self {
            ExcellonUnits::Metric => value,
            ExcellonUnits::Inches => value * 25.4,
        }
    }
}

/// Zero suppression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZeroSuppression {
    Trailing,
    Leading,
}

/// Coordinate format: how many integer and decimal digits.
#[derive(Debug, Clone, Copy)]
struct CoordFormat {
    integer: u8,
    decimal: u8,
}

/// Running state of the drill program.
#[derive(Debug)]
struct DrillState {
    units: ExcellonUnits,
    zero_sup: ZeroSuppression,
    format: CoordFormat,
    /// Tool number to diameter in millimeters.
    tools: HashMap<u32, f64>,
    current_tool: Option<u32>,
    position: Point,
    holes: Vec<DrillHole>,
}

impl Default for DrillState {
    fn default() -> Self {
        Self {
            units: ExcellonUnits::Metric,
            zero_sup: ZeroSuppression::Trailing,
            format: CoordFormat {
                integer: 3,
                decimal: 3,
            },
            tools: HashMap::new(),
            current_tool: None,
            position: Point::ORIGIN,
            holes: Vec::new(),
        }
    }
}

/// Parse an Excellon drill file into drill hits and their bounds.
///
/// Returns None if the content has no `M48` header.
pub fn parse_excellon(content: &str) -> Option<DrillFile> {
    if !content.contains("M48") {
        return None;
    }

    let mut state = DrillState::default();
    let mut in_header = false;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        // Header start
        if line == "M48" {
            in_header = true;
            continue;
        }

        // Header end markers
        if line == "%" || line == "M95" {
            in_header = false;
            continue;
        }

        // End of file
        if line == "M30" || line == "M00" {
            break;
        }

        if in_header {
            state.header_line(line);
        } else {
            state.body_line(line, index + 1);
        }
    }

    let mut bounds = BBox::empty();
    for hole in &state.holes {
        let r = hole.diameter / 2.0;
        bounds.expand_point(hole.x - r, hole.y - r);
        bounds.expand_point(hole.x + r, hole.y + r);
    }
    debug!("Excellon: {} holes, {} tools", state.holes.len(), state.tools.len());

    Some(DrillFile {
        holes: state.holes,
        bounds: bounds.or_zero(),
    })
}

impl DrillState {
    fn header_line(&mut self, line: &str) {
        // Units and format: "METRIC,TZ,000.000" or "INCH,LZ" or "M71" / "M72"
        let upper = line.to_uppercase();

        if upper.starts_with("METRIC") || upper == "M71" {
            self.units = ExcellonUnits::Metric;
            self.format_options(&upper);
            return;
        }
        if upper.starts_with("INCH") || upper == "M72" {
            self.units = ExcellonUnits::Inches;
            self.format_options(&upper);
            return;
        }

        // Tool definitions: T01C0.300 or T1C0.3
        if let Some(rest) = upper.strip_prefix('T') {
            if let Some(c_pos) = rest.find('C') {
                let number = rest[..c_pos].parse::<u32>();
                // Trailing tool parameters (feeds, speeds) follow the diameter
                let diameter: String = rest[c_pos + 1..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                match (number, diameter.parse::<f64>()) {
                    (Ok(number), Ok(diameter)) => {
                        let diameter_mm = self.units.to_mm(diameter);
                        if self.tools.insert(number, diameter_mm).is_some() {
                            warn!("Excellon: tool T{number} redefined");
                        }
                    }
                    _ => warn!("Excellon: bad tool definition {line:?}"),
                }
            }
        }
    }

    fn format_options(&mut self, line: &str) {
        // Comma-separated options like "METRIC,TZ,000.000"
        for part in line.split(',').map(str::trim) {
            match part {
                "TZ" => self.zero_sup = ZeroSuppression::Trailing,
                "LZ" => self.zero_sup = ZeroSuppression::Leading,
                _ if part.contains('.') && part.chars().all(|c| c == '0' || c == '.') => {
                    if let Some(dot_pos) = part.find('.') {
                        let integer = dot_pos as u8;
                        let decimal = (part.len() - dot_pos - 1) as u8;
                        if integer > 0 && decimal > 0 {
                            self.format = CoordFormat { integer, decimal };
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn body_line(&mut self, line: &str, line_number: usize) {
        let upper = line.to_uppercase();

        // Tool selection: T01 or T1 (without C parameter = selection, not definition)
        if let Some(rest) = upper.strip_prefix('T') {
            if !rest.contains('C') {
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                match digits.parse::<u32>() {
                    Ok(0) => self.current_tool = None,
                    Ok(number) => self.current_tool = Some(number),
                    Err(_) => warn!("Excellon line {line_number}: bad tool selection {line:?}"),
                }
                return;
            }
        }

        // Coordinate line: X14.478Y10.541, X14478Y10541, or a single axis
        if upper.starts_with('X') || upper.starts_with('Y') {
            let Some(position) = self.coordinate_line(&upper) else {
                warn!("Excellon line {line_number}: bad coordinates {line:?}");
                return;
            };
            self.position = position;
            let diameter = self.current_tool.and_then(|t| self.tools.get(&t).copied());
            match diameter {
                Some(diameter) => self.holes.push(DrillHole {
                    x: position.x,
                    y: position.y,
                    diameter,
                }),
                None => warn!(
                    "Excellon line {line_number}: hit with unknown tool {:?}, skipped",
                    self.current_tool
                ),
            }
        }
    }

    /// Target of a coordinate line; a missing axis keeps its last value.
    fn coordinate_line(&self, line: &str) -> Option<Point> {
        let mut position = self.position;
        let mut rest = line;
        while let Some(axis) = rest.chars().next() {
            let body = &rest[axis.len_utf8()..];
            let end = body
                .find(|c: char| c.is_ascii_alphabetic())
                .unwrap_or(body.len());
            let value = &body[..end];
            match axis {
                'X' => position.x = self.coord_value(value)?,
                'Y' => position.y = self.coord_value(value)?,
                _ => {}
            }
            rest = &body[end..];
        }
        Some(position)
    }

    fn coord_value(&self, s: &str) -> Option<f64> {
        if s.is_empty() {
            return None;
        }

        let value = if s.contains('.') {
            // Explicit decimal point, parse directly
            s.parse::<f64>().ok()?
        } else {
            let negative = s.starts_with('-');
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return None;
            }
            if digits.len() > (self.format.integer + self.format.decimal) as usize {
                warn!("Excellon: coordinate {s:?} is wider than the declared format");
            }
            let raw: i64 = match self.zero_sup {
                // Eagle (and most real-world tools) declare TZ but omit leading
                // zeros too, so digits are right-aligned against the decimal point.
                ZeroSuppression::Trailing | ZeroSuppression::Leading => digits.parse().ok()?,
            };
            let val = raw as f64 / 10f64.powi(self.format.decimal as i32);
            if negative {
                -val
            } else {
                val
            }
        };

        Some(self.units.to_mm(value))
    }
}
