pub mod compose;
pub mod error;
pub mod geometry;
pub mod parsers;
pub mod types;

use std::path::Path;

use serde::Serialize;

pub use compose::{compose, ComposeOptions, ComposedImage};
pub use error::GerberError;
pub use geometry::boolean::initialize;
pub use parsers::excellon::parse_excellon;
pub use parsers::gerber::{parse_gerber, GerberImage};
use types::DrillFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Gerber,
    Excellon,
}

/// Detect file kind from extension.
pub fn detect_kind(path: &Path) -> Option<FileKind> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("gbr" | "gtl" | "gbl" | "gto" | "gbo" | "gts" | "gbs" | "gko" | "gm1" | "art"
        | "pho") => Some(FileKind::Gerber),
        Some("drl" | "xln" | "txt" | "exc" | "drd") => Some(FileKind::Excellon),
        _ => None,
    }
}

/// What a file renders to.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Rendered {
    Image(ComposedImage),
    Drills(DrillFile),
}

/// Interpret and compose text of a known kind.
pub fn render_str(
    text: &str,
    kind: FileKind,
    opts: &ComposeOptions,
) -> Result<Rendered, GerberError> {
    match kind {
        FileKind::Gerber => {
            let backend = initialize();
            let image = parse_gerber(text)?;
            Ok(Rendered::Image(compose(&image.objects(), backend, opts)))
        }
        FileKind::Excellon => parse_excellon(text)
            .map(Rendered::Drills)
            .ok_or_else(|| GerberError::UnsupportedFormat("no M48 header in drill file".into())),
    }
}

/// Auto-detect kind from extension and render.
pub fn render(path: &Path, opts: &ComposeOptions) -> Result<Rendered, GerberError> {
    let kind = detect_kind(path).ok_or_else(|| {
        GerberError::UnsupportedFormat(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string(),
        )
    })?;
    let text = std::fs::read_to_string(path)?;
    render_str(&text, kind, opts)
}
