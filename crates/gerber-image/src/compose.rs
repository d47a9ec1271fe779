//! Image compositor.
//!
//! Folds realized graphics objects, in emission order, into one solid
//! polygon set plus the stitched thin polylines.

use log::{debug, warn};
use serde::Serialize;

use crate::geometry::boolean::BooleanOps;
use crate::geometry::{bounds_of, connect_wires, Polygon, PolygonSet, Polyline};
use crate::parsers::gerber::primitives::{GraphicsObject, Polarity};
use crate::types::BBox;

/// Options for [`compose`].
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Self-union the final image so no two fills overlap.
    pub union: bool,
}

/// A composited image. Coordinates in millimeters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedImage {
    /// Fills counter-clockwise, holes clockwise (non-zero rule).
    pub solid_polygons: PolygonSet,
    pub thin_polylines: Vec<Polyline>,
    pub bounds: BBox,
}

/// Composite `objects` in order: dark objects add to the image, each run
/// of clear objects is subtracted when the next dark object (or the end)
/// arrives. Thin objects only pass through the wire stitcher.
pub fn compose(
    objects: &[GraphicsObject],
    backend: &dyn BooleanOps,
    options: &ComposeOptions,
) -> ComposedImage {
    let mut image: PolygonSet = Vec::new();
    let mut clear: PolygonSet = Vec::new();
    let mut thin: Vec<Polyline> = Vec::new();

    for object in objects {
        match object.polarity {
            Polarity::Thin => thin.extend(object.polygons.iter().cloned()),
            Polarity::Clear => clear.extend(object.polygons.iter().cloned()),
            Polarity::Dark => {
                if !clear.is_empty() {
                    image = subtract(image, &clear, backend);
                    clear.clear();
                }
                image.extend(object.polygons.iter().cloned());
            }
        }
    }
    if !clear.is_empty() {
        image = subtract(image, &clear, backend);
    }

    if options.union && !image.is_empty() {
        let merged = backend.union(&image, &[]);
        if merged.success {
            image = merged.polygons;
        } else {
            warn!("Self-union of the image failed; keeping overlapping fills");
        }
    }

    let thin_polylines = connect_wires(thin);
    let bounds = bounds_of(image.iter().chain(thin_polylines.iter())).or_zero();
    debug!(
        "Composed {} objects into {} rings and {} wires",
        objects.len(),
        image.len(),
        thin_polylines.len()
    );

    ComposedImage {
        solid_polygons: image,
        thin_polylines,
        bounds,
    }
}

fn subtract(image: PolygonSet, clear: &[Polygon], backend: &dyn BooleanOps) -> PolygonSet {
    if image.is_empty() {
        return image;
    }
    let result = backend.difference(&image, clear);
    if result.success {
        result.polygons
    } else {
        warn!("Clearing {} rings from the image failed; clear objects ignored", clear.len());
        image
    }
}
