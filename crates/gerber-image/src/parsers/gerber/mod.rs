pub mod apertures;
pub mod commands;
pub mod coord;
pub mod expr;
pub mod interpreter;
pub mod lexer;
pub mod macros;
pub mod primitives;
pub mod writer;

use log::debug;

use crate::error::GerberError;
use crate::geometry::boolean::initialize;

use self::commands::CommandParser;
use self::coord::{CoordinateFormat, Units};
use self::interpreter::GerberState;
use self::lexer::Tokenizer;
use self::primitives::{GraphicsObject, GraphicsPrimitive};
use self::writer::GerberWriter;

/// Result of interpreting one Gerber file.
#[derive(Debug)]
pub struct GerberImage {
    /// Top-level primitives in emission order.
    pub primitives: Vec<GraphicsPrimitive>,
    pub format: Option<CoordinateFormat>,
    pub units: Option<Units>,
}

impl GerberImage {
    /// Realized objects of every primitive, in emission order.
    pub fn objects(&self) -> Vec<GraphicsObject> {
        self.primitives
            .iter()
            .flat_map(|p| p.objects().iter().cloned())
            .collect()
    }

    /// Canonical Gerber for the primitive list as a complete millimeter
    /// file, using `format` for coordinates (or the file's own format when
    /// `None`).
    pub fn to_gerber(&self, format: Option<&CoordinateFormat>) -> String {
        let format = format
            .or(self.format.as_ref())
            .cloned()
            .unwrap_or_default();
        let mut writer = GerberWriter::new(&format);
        let body: String = self.primitives.iter().map(|p| p.write(&mut writer)).collect();
        writer.finish(&body)
    }
}

/// Streaming interpreter: text can be fed in arbitrary chunks.
pub struct GerberReader {
    tokenizer: Tokenizer,
    parser: CommandParser,
    state: GerberState,
}

impl Default for GerberReader {
    fn default() -> Self {
        Self::new()
    }
}

impl GerberReader {
    pub fn new() -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            parser: CommandParser::new(),
            state: GerberState::new(initialize()),
        }
    }

    /// Tokenize, parse and execute every complete command in `chunk`.
    pub fn feed(&mut self, chunk: &str) -> Result<(), GerberError> {
        let Self {
            tokenizer,
            parser,
            state,
        } = self;
        tokenizer.feed(chunk, &mut |text, line, _| dispatch(parser, state, text, line))
    }

    /// Flush the last command and freeze the image.
    pub fn finish(mut self) -> Result<GerberImage, GerberError> {
        let Self {
            tokenizer,
            parser,
            state,
        } = &mut self;
        tokenizer.finish(&mut |text, line, _| dispatch(parser, state, text, line))?;
        let line = self.tokenizer.line();
        let format = self.state.format().cloned();
        let units = self.state.units();
        let primitives = self.state.finish(line)?;
        debug!("Gerber image with {} primitives", primitives.len());
        Ok(GerberImage {
            primitives,
            format,
            units,
        })
    }
}

fn dispatch(
    parser: &mut CommandParser,
    state: &mut GerberState,
    text: &str,
    line: usize,
) -> Result<(), GerberError> {
    match parser.parse(text, line)? {
        Some(command) => command.execute(state, line),
        None => Ok(()),
    }
}

/// Interpret a complete Gerber file.
pub fn parse_gerber(text: &str) -> Result<GerberImage, GerberError> {
    let mut reader = GerberReader::new();
    reader.feed(text)?;
    reader.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::bounds_of;
    use crate::types::Point;

    const SAMPLE: &str = "G04 sample*\n%FSLAX23Y23*%\n%MOMM*%\n%ADD10C,1*%\nD10*\nG01*\nX1000Y2000D02*\nX3000Y2000D01*\nM02*\n";

    #[test]
    fn test_parse_gerber_line() {
        let image = parse_gerber(SAMPLE).unwrap();
        assert_eq!(image.primitives.len(), 1);
        assert_eq!(image.units, Some(Units::Millimeters));
        match &image.primitives[0] {
            GraphicsPrimitive::Line(l) => {
                assert_eq!(l.start, Point::new(1.0, 2.0));
                assert_eq!(l.end, Point::new(3.0, 2.0));
            }
            other => panic!("expected Line, got: {other:?}"),
        }
    }

    #[test]
    fn test_chunked_feed_matches_whole() {
        let whole = parse_gerber(SAMPLE).unwrap();
        let mut reader = GerberReader::new();
        for chunk in SAMPLE.as_bytes().chunks(7) {
            reader.feed(std::str::from_utf8(chunk).unwrap()).unwrap();
        }
        let chunked = reader.finish().unwrap();
        assert_eq!(whole.objects(), chunked.objects());
    }

    #[test]
    fn test_objects_follow_emission_order() {
        let src = "%FSLAX23Y23*%\n%MOMM*%\n%ADD10C,1*%\nD10*\nX0Y0D03*\n%LPC*%\nX500Y0D03*\nM02*\n";
        let objects = parse_gerber(src).unwrap().objects();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].polarity, primitives::Polarity::Dark);
        assert_eq!(objects[1].polarity, primitives::Polarity::Clear);
    }

    #[test]
    fn test_parse_error_aborts() {
        let err = parse_gerber("%FSLAX23Y23*%\n%MOMM*%\n%ADD10C,-1*%\nD10*\nM02*\n").unwrap_err();
        assert!(matches!(err, GerberError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_to_gerber_reinterprets_to_same_objects() {
        let src = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,0.5*%\n%ADD11R,1X2*%\nD10*\nX0Y0D02*\nX10000Y0D01*\nG03*\nX0Y10000I-10000J0D01*\nD11*\n%LPC*%\nX20000Y20000D03*\nG01*\nG36*\nX0Y0D02*\nX10000Y0D01*\nX10000Y10000D01*\nX0Y0D01*\nG37*\nM02*\n";
        let image = parse_gerber(src).unwrap();
        let again = parse_gerber(&image.to_gerber(None)).unwrap();
        let a = image.objects();
        let b = again.objects();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.polarity, y.polarity);
            assert_eq!(x.polygons.len(), y.polygons.len());
            for (ra, rb) in x.polygons.iter().zip(&y.polygons) {
                assert_eq!(ra.len(), rb.len());
                for (pa, pb) in ra.iter().zip(rb) {
                    assert!(pa.distance(*pb) < 1e-6);
                }
            }
        }
    }

    const INCH_SAMPLE: &str = "%FSLAX26Y26*%\n%MOIN*%\n\
        %AMDONUT*1,1,$1,0,0*1,0,$2,0,0*%\n\
        %AMBAR*21,1,$1,$2,0,0,30*1,0,0.01,0,0*%\n\
        %ADD10C,0.01*%\n%ADD11R,0.04X0.02*%\n%ADD12DONUT,0.05X0.02*%\n\
        %ADD13BAR,0.08X0.03*%\n%ADD14C,0.05X0.02*%\n\
        %ABD15*%\nD11*\nX0Y0D03*\n%LPC*%\nD10*\nX0Y0D03*\n%LPD*%\n%AB*%\n\
        D10*\nG01*\nX0Y0D02*\nX1000000Y0D01*\n\
        G75*\nG03*\nX0Y1000000I-1000000J0D01*\nG01*\n\
        D12*\nX1500000Y0D03*\nD13*\nX2000000Y0D03*\n\
        %LR30*%\nD11*\nX2500000Y0D03*\n%LR0*%\n\
        D14*\nX3000000Y0D03*\nD15*\nX3500000Y0D03*\n\
        %SRX2Y2I0.5J0.5*%\nD10*\nX4000000Y0D03*\n%SR*%\n\
        G36*\nX0Y2000000D02*\nX500000Y2000000D01*\nX500000Y2500000D01*\nX0Y2000000D01*\nG37*\n\
        M02*\n";

    #[test]
    fn test_inch_file_round_trips_through_millimeters() {
        let image = parse_gerber(INCH_SAMPLE).unwrap();
        let text = image.to_gerber(None);
        assert!(text.starts_with("%FSLAX46Y46*%\n%MOMM*%\n"));
        assert!(!text.contains("MOIN"));

        let again = parse_gerber(&text).unwrap();
        assert_eq!(again.units, Some(Units::Millimeters));
        let a = image.objects();
        let b = again.objects();
        assert_eq!(a.len(), 13);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.polarity, y.polarity);
            let (bx, by) = (bounds_of(&x.polygons), bounds_of(&y.polygons));
            assert!((bx.min_x - by.min_x).abs() < 1e-4, "{bx:?} vs {by:?}");
            assert!((bx.min_y - by.min_y).abs() < 1e-4, "{bx:?} vs {by:?}");
            assert!((bx.max_x - by.max_x).abs() < 1e-4, "{bx:?} vs {by:?}");
            assert!((bx.max_y - by.max_y).abs() < 1e-4, "{bx:?} vs {by:?}");
        }

        // The macro flash at 1.5 in lands at 38.1 mm with a 1.27 mm diameter
        let donut = bounds_of(&b[2].polygons);
        assert!(((donut.min_x + donut.max_x) / 2.0 - 38.1).abs() < 1e-4);
        assert!((donut.max_x - donut.min_x - 1.27).abs() < 1e-4);
    }

    #[test]
    fn test_thin_stroke_round_trips_as_thin() {
        let src = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,0.5*%\nD10*\nG75*\nG02*\nX0Y0D02*\nX1000Y0I0J0D01*\nM02*\n";
        let image = parse_gerber(src).unwrap();
        assert_eq!(image.objects()[0].polarity, primitives::Polarity::Thin);
        let again = parse_gerber(&image.to_gerber(None)).unwrap();
        let objects = again.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].polarity, primitives::Polarity::Thin);
        assert_eq!(objects[0].polygons[0].len(), 2);
    }
}
