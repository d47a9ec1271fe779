use serde::ser::Serializer;
use serde::Serialize;
use std::ops::{Add, Mul, Neg, Sub};

/// Round a float to N decimal places.
pub fn round_f64(v: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (v * factor).round() / factor
}

/// Wrapper that rounds f64 to 6 decimal places on serialization.
fn serialize_f64_rounded<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_f64(*v, 6))
}

// ─── Point ───────────────────────────────────────────────────────────

/// A position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub fn distance_squared(&self, other: Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    pub fn midpoint(&self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Angle (radians) of this point as seen from `origin`.
    pub fn angle_from(&self, origin: Point) -> f64 {
        (self.y - origin.y).atan2(self.x - origin.x)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Rotate about the origin by `degrees`.
    pub fn rotated(&self, degrees: f64) -> Point {
        if degrees.abs() < 1e-12 {
            return *self;
        }
        let (sin_a, cos_a) = degrees.to_radians().sin_cos();
        Point::new(
            self.x * cos_a - self.y * sin_a,
            self.x * sin_a + self.y * cos_a,
        )
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.x, self.y]
    }
}

impl From<[f64; 2]> for Point {
    fn from(value: [f64; 2]) -> Self {
        Point::new(value[0], value[1])
    }
}

impl From<(f64, f64)> for Point {
    fn from(value: (f64, f64)) -> Self {
        Point::new(value.0, value.1)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        [round_f64(self.x, 6), round_f64(self.y, 6)].serialize(s)
    }
}

// ─── Bounding Box ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BBox {
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub min_x: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub min_y: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub max_x: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub max_y: f64,
}

impl BBox {
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn expand_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn expand(&mut self, p: Point) {
        self.expand_point(p.x, p.y);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Collapse an empty box to all-zero extents so it serializes cleanly.
    pub fn or_zero(self) -> Self {
        if self.is_empty() {
            Self {
                min_x: 0.0,
                min_y: 0.0,
                max_x: 0.0,
                max_y: 0.0,
            }
        } else {
            self
        }
    }
}

impl Default for BBox {
    fn default() -> Self {
        Self::empty()
    }
}

// ─── Output records ──────────────────────────────────────────────────

/// A single drill hit from an Excellon file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrillHole {
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub x: f64,
    #[serde(serialize_with = "serialize_f64_rounded")]
    pub y: f64,
    #[serde(rename = "drillDiameter", serialize_with = "serialize_f64_rounded")]
    pub diameter: f64,
}

/// All drill hits of an Excellon file.
#[derive(Debug, Clone, Serialize)]
pub struct DrillFile {
    pub holes: Vec<DrillHole>,
    pub bounds: BBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_arithmetic() {
        let a = Point::new(1.0, 2.0);
        let b = Point::new(4.0, 6.0);
        assert_eq!(a + b, Point::new(5.0, 8.0));
        assert_eq!(b - a, Point::new(3.0, 4.0));
        assert!((a.distance(b) - 5.0).abs() < 1e-12);
        assert_eq!(a.midpoint(b), Point::new(2.5, 4.0));
    }

    #[test]
    fn test_point_angle_from() {
        let c = Point::new(1.0, 1.0);
        let p = Point::new(1.0, 3.0);
        assert!((p.angle_from(c) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_point_rotated() {
        let p = Point::new(1.0, 0.0).rotated(90.0);
        assert!(p.x.abs() < 1e-12);
        assert!((p.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bbox_expand_and_zero() {
        let mut bbox = BBox::empty();
        assert!(bbox.is_empty());
        assert_eq!(bbox.or_zero().max_x, 0.0);
        bbox.expand(Point::new(-1.0, 2.0));
        bbox.expand(Point::new(3.0, -4.0));
        assert_eq!(bbox.min_x, -1.0);
        assert_eq!(bbox.max_y, 2.0);
        assert_eq!(bbox.width(), 4.0);
        assert_eq!(bbox.height(), 6.0);
    }

    #[test]
    fn test_bbox_serializes_camel_case() {
        let mut bbox = BBox::empty();
        bbox.expand_point(0.1234567, 1.0);
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(json, r#"{"minX":0.123457,"minY":1.0,"maxX":0.123457,"maxY":1.0}"#);
    }
}
