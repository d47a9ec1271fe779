/// How zeros are dropped from fixed-point coordinate fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroSuppression {
    /// Every digit is present.
    None,
    /// Leading zeros omitted (`L`); digits are right-aligned.
    #[default]
    Leading,
    /// Trailing zeros omitted (`T`); digits are left-aligned.
    Trailing,
    /// Explicit decimal point (`D`).
    Explicit,
}

impl ZeroSuppression {
    pub fn from_code(code: &str) -> Self {
        match code {
            "L" => ZeroSuppression::Leading,
            "T" => ZeroSuppression::Trailing,
            "D" => ZeroSuppression::Explicit,
            _ => ZeroSuppression::None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ZeroSuppression::None => "",
            ZeroSuppression::Leading => "L",
            ZeroSuppression::Trailing => "T",
            ZeroSuppression::Explicit => "D",
        }
    }
}

/// Absolute or incremental coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordinateMode {
    #[default]
    Absolute,
    Incremental,
}

impl CoordinateMode {
    pub fn code(&self) -> &'static str {
        match self {
            CoordinateMode::Absolute => "A",
            CoordinateMode::Incremental => "I",
        }
    }
}

/// Unit system from the %MO command (or legacy G70/G71).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
}

impl Units {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "MM" => Some(Units::Millimeters),
            "IN" => Some(Units::Inches),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Units::Millimeters => "MM",
            Units::Inches => "IN",
        }
    }

    /// Convert a length in these units to millimeters.
    pub fn to_mm(&self, value: f64) -> f64 {
        match self {
            Units::Millimeters => value,
            Units::Inches => value * 25.4,
        }
    }

    /// Convert a length in millimeters to these units.
    pub fn from_mm(&self, value: f64) -> f64 {
        match self {
            Units::Millimeters => value,
            Units::Inches => value / 25.4,
        }
    }
}

/// Which digit widths a coordinate field uses. `I` follows `X`, `J` follows `Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Coordinate format from the %FS (Format Specification) command.
///
/// Example: `%FSLAX24Y24*%` means leading-zero suppression, absolute mode,
/// 2 integer digits + 4 decimal digits for both X and Y.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateFormat {
    pub x_integer: u8,
    pub x_decimal: u8,
    pub y_integer: u8,
    pub y_decimal: u8,
    pub zero_suppression: ZeroSuppression,
    pub mode: CoordinateMode,
}

impl Default for CoordinateFormat {
    fn default() -> Self {
        // Common default: 2.4 format (FSLAX24Y24)
        Self {
            x_integer: 2,
            x_decimal: 4,
            y_integer: 2,
            y_decimal: 4,
            zero_suppression: ZeroSuppression::Leading,
            mode: CoordinateMode::Absolute,
        }
    }
}

impl CoordinateFormat {
    fn digits(&self, axis: Axis) -> (usize, usize) {
        match axis {
            Axis::X => (self.x_integer as usize, self.x_decimal as usize),
            Axis::Y => (self.y_integer as usize, self.y_decimal as usize),
        }
    }

    /// Decode a coordinate field into a value in file units.
    ///
    /// Fields carrying a decimal point are read as-is regardless of the
    /// declared zero suppression.
    pub fn decode(&self, raw: &str, axis: Axis) -> Option<f64> {
        let raw = raw.trim();
        let (negative, digits) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };
        if digits.is_empty() {
            return None;
        }
        if digits.contains('.') {
            return raw.parse::<f64>().ok().filter(|v| v.is_finite());
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let (int, dec) = self.digits(axis);
        let (field, decimals) = match self.zero_suppression {
            ZeroSuppression::Trailing => {
                let mut padded = digits.to_string();
                while padded.len() < int + dec {
                    padded.push('0');
                }
                let decimals = padded.len().saturating_sub(int);
                (padded, decimals)
            }
            _ => (digits.to_string(), dec),
        };
        let magnitude = field.parse::<u64>().ok()? as f64 / 10f64.powi(decimals as i32);
        Some(if negative { -magnitude } else { magnitude })
    }

    /// Encode a value in file units as a coordinate field.
    pub fn encode(&self, value: f64, axis: Axis) -> String {
        let (int, dec) = self.digits(axis);
        let scaled = (value.abs() * 10f64.powi(dec as i32)).round() as u64;
        let sign = if value < 0.0 && scaled != 0 { "-" } else { "" };

        let body = match self.zero_suppression {
            ZeroSuppression::Explicit => format!("{:.*}", dec, scaled as f64 / 10f64.powi(dec as i32)),
            ZeroSuppression::None => format!("{:0width$}", scaled, width = int + dec),
            ZeroSuppression::Leading => scaled.to_string(),
            ZeroSuppression::Trailing => {
                let full = format!("{:0width$}", scaled, width = int + dec);
                let trimmed = full.trim_end_matches('0');
                if trimmed.is_empty() {
                    "0".to_string()
                } else {
                    trimmed.to_string()
                }
            }
        };
        format!("{sign}{body}")
    }

    /// Canonical body of the %FS command, without delimiters.
    pub fn to_gerber(&self) -> String {
        format!(
            "FS{}{}X{}{}Y{}{}",
            self.zero_suppression.code(),
            self.mode.code(),
            self.x_integer,
            self.x_decimal,
            self.y_integer,
            self.y_decimal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(int: u8, dec: u8, zeros: ZeroSuppression) -> CoordinateFormat {
        CoordinateFormat {
            x_integer: int,
            x_decimal: dec,
            y_integer: int,
            y_decimal: dec,
            zero_suppression: zeros,
            mode: CoordinateMode::Absolute,
        }
    }

    #[test]
    fn test_default_format_leading() {
        let fmt = CoordinateFormat::default();
        // FSLAX24Y24: raw 10000 = 1.0000
        assert!((fmt.decode("10000", Axis::X).unwrap() - 1.0).abs() < 1e-9);
        assert!((fmt.decode("10000", Axis::Y).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_coordinate() {
        let fmt = CoordinateFormat::default();
        assert!((fmt.decode("-25000", Axis::X).unwrap() - (-2.5)).abs() < 1e-9);
        assert!((fmt.decode("+25000", Axis::X).unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_format_2_3() {
        let fmt = format(2, 3, ZeroSuppression::Leading);
        assert!((fmt.decode("1000", Axis::X).unwrap() - 1.0).abs() < 1e-9);
        assert!((fmt.decode("2000", Axis::Y).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_suppression_left_aligns() {
        let fmt = format(2, 4, ZeroSuppression::Trailing);
        // "015" is "015000" -> 01.5000
        assert!((fmt.decode("015", Axis::X).unwrap() - 1.5).abs() < 1e-9);
        assert!((fmt.decode("1", Axis::X).unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_decimal_parsed_directly() {
        let fmt = format(2, 4, ZeroSuppression::Trailing);
        assert!((fmt.decode("1.25", Axis::X).unwrap() - 1.25).abs() < 1e-9);
        assert!((fmt.decode("-.5", Axis::Y).unwrap() - (-0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let fmt = CoordinateFormat::default();
        assert_eq!(fmt.decode("", Axis::X), None);
        assert_eq!(fmt.decode("-", Axis::X), None);
        assert_eq!(fmt.decode("12a4", Axis::X), None);
    }

    #[test]
    fn test_encode_per_suppression() {
        let v = 1.5;
        assert_eq!(format(2, 4, ZeroSuppression::Leading).encode(v, Axis::X), "15000");
        assert_eq!(format(2, 4, ZeroSuppression::Trailing).encode(v, Axis::X), "015");
        assert_eq!(format(2, 4, ZeroSuppression::None).encode(v, Axis::X), "015000");
        assert_eq!(format(2, 4, ZeroSuppression::Explicit).encode(v, Axis::X), "1.5000");
        assert_eq!(format(2, 4, ZeroSuppression::Leading).encode(-0.25, Axis::Y), "-2500");
        assert_eq!(format(2, 4, ZeroSuppression::Trailing).encode(0.0, Axis::Y), "0");
        assert_eq!(format(2, 4, ZeroSuppression::Leading).encode(0.0, Axis::Y), "0");
    }

    #[test]
    fn test_decode_encode_inverse() {
        let samples = [0.0, 1.0, -1.0, 0.0001, 12.3456, -99.9999, 5.05, 0.1];
        for zeros in [
            ZeroSuppression::None,
            ZeroSuppression::Leading,
            ZeroSuppression::Trailing,
            ZeroSuppression::Explicit,
        ] {
            let fmt = format(2, 4, zeros);
            for v in samples {
                let text = fmt.encode(v, Axis::X);
                let back = fmt.decode(&text, Axis::X).unwrap();
                assert!((back - v).abs() < 1e-9, "{zeros:?}: {v} -> {text} -> {back}");
            }
        }
    }

    #[test]
    fn test_units_conversion() {
        assert!((Units::Inches.to_mm(1.0) - 25.4).abs() < 1e-9);
        assert!((Units::Inches.from_mm(25.4) - 1.0).abs() < 1e-9);
        assert_eq!(Units::Millimeters.to_mm(3.0), 3.0);
        assert_eq!(Units::from_code("IN"), Some(Units::Inches));
        assert_eq!(Units::from_code("CM"), None);
    }

    #[test]
    fn test_format_to_gerber() {
        let mut fmt = format(3, 5, ZeroSuppression::Trailing);
        fmt.mode = CoordinateMode::Incremental;
        assert_eq!(fmt.to_gerber(), "FSTIX35Y35");
        assert_eq!(CoordinateFormat::default().to_gerber(), "FSLAX24Y24");
    }
}
