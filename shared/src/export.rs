//! Framing and sizing of overlay image exports.
//!
//! The core decides which pixel region to rasterise, at what zoom, and with which shapes.
//! Producing the pixels is delegated to a [`RegionRenderer`].

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::colors::Rgb;
use crate::geom::{PixelPoint, PixelRect};
use crate::overlay::{OverlayGroup, OverlayKey, OverlaySet};
use crate::projection::CoordinateProjector;

pub const DEFAULT_EXPORT_PADDING_PX: f64 = 16.0;
pub const MAX_EXPORT_DIMENSION: u32 = 8192;
/// Coarsest zoom level the base map is published at.
pub const DEFAULT_MIN_ZOOM: i32 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Anchored at a caller-supplied top-left corner.
    Clip,
    /// Framed around every visible overlay.
    Full,
}

impl ExportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::Full => "full",
        }
    }
}

/// Top-left corner of a manual export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportAnchor {
    World { x: f64, z: f64 },
    Pixel(PixelPoint),
}

impl ExportAnchor {
    fn to_pixel(self, projector: &CoordinateProjector) -> Option<PixelPoint> {
        match self {
            Self::World { x, z } => projector.forward(x, z),
            Self::Pixel(point) if point.x.is_finite() && point.y.is_finite() => Some(point),
            Self::Pixel(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub top_left: Option<ExportAnchor>,
    pub max_width: Option<f64>,
    pub max_height: Option<f64>,
    pub padding_px: Option<f64>,
    pub max_dimension: Option<u32>,
    pub min_zoom: i32,
    pub background: Option<Rgb>,
    /// Layers to draw, bottom first. Empty means every layer in natural order.
    pub layers: Vec<OverlayKey>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            top_left: None,
            max_width: None,
            max_height: None,
            padding_px: None,
            max_dimension: None,
            min_zoom: DEFAULT_MIN_ZOOM,
            background: None,
            layers: Vec::new(),
        }
    }
}

impl ExportOptions {
    pub fn mode(&self) -> ExportMode {
        if self.top_left.is_some() {
            ExportMode::Clip
        } else {
            ExportMode::Full
        }
    }

    /// Requested maximum output dimension clamped into `1..=MAX_EXPORT_DIMENSION`.
    pub fn dimension_limit(&self) -> u32 {
        self.max_dimension
            .map_or(MAX_EXPORT_DIMENSION, |limit| limit.clamp(1, MAX_EXPORT_DIMENSION))
    }

    fn padding(&self) -> f64 {
        self.padding_px
            .filter(|padding| padding.is_finite())
            .map_or(DEFAULT_EXPORT_PADDING_PX, |padding| padding.max(0.0))
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Pixel region to export, or `None` when there is nothing to export.
///
/// Manual mode clamps the anchor into the image and extends it by the requested (or
/// remaining) width and height. Auto mode pads the union of every visible group's bounds
/// and clips it to the image.
pub fn compute_export_bounds(
    options: &ExportOptions,
    projector: &CoordinateProjector,
    groups: &[&OverlayGroup],
) -> Option<PixelRect> {
    let full = projector.full_image_bounds();

    if let Some(anchor) = options.top_left {
        let raw = anchor.to_pixel(projector)?;
        let top_left = PixelPoint::new(
            raw.x.clamp(full.min.x, full.max.x),
            raw.y.clamp(full.min.y, full.max.y),
        );
        let remaining_width = full.max.x - top_left.x;
        let remaining_height = full.max.y - top_left.y;
        let width = positive(options.max_width).map_or(remaining_width, |w| w.min(remaining_width));
        let height =
            positive(options.max_height).map_or(remaining_height, |h| h.min(remaining_height));

        if width <= 0.0 || height <= 0.0 {
            debug!(x = top_left.x, y = top_left.y, "manual export anchored on the image edge");
            return None;
        }
        return Some(PixelRect::new(
            top_left.x,
            top_left.y,
            top_left.x + width,
            top_left.y + height,
        ));
    }

    let overlay_bounds = groups
        .iter()
        .filter(|group| group.visible)
        .filter_map(|group| group.bounds())
        .reduce(|acc, rect| acc.union(&rect))?;

    overlay_bounds.padded(options.padding()).intersect(&full)
}

/// Output geometry for one export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportPlan {
    #[serde(skip)]
    pub bounds: PixelRect,
    /// Zoom relative to the base image; 0 is one output pixel per image pixel.
    pub zoom: i32,
    /// `2^zoom`.
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

impl ExportPlan {
    /// Choose the finest zoom in `min_zoom..=0` whose longest side fits within `limit`.
    ///
    /// Both axes share the power-of-two factor, so the aspect ratio is preserved. When no
    /// level fits, the coarsest one is used.
    pub fn for_bounds(bounds: PixelRect, limit: u32, min_zoom: i32) -> Self {
        let min_zoom = min_zoom.min(0);
        let width = bounds.width().max(0.0).ceil();
        let height = bounds.height().max(0.0).ceil();
        let longest = width.max(height);
        let limit = f64::from(limit.max(1));

        let zoom = (min_zoom..=0)
            .rev()
            .find(|zoom| longest * 2f64.powi(*zoom) <= limit)
            .unwrap_or(min_zoom);
        let scale = 2f64.powi(zoom);

        Self {
            bounds,
            zoom,
            scale,
            width: output_len(width, scale),
            height: output_len(height, scale),
        }
    }
}

fn output_len(len: f64, scale: f64) -> u32 {
    (len * scale).ceil().clamp(1.0, f64::from(u32::MAX)) as u32
}

/// Everything a renderer needs to draw one export.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub plan: ExportPlan,
    /// Visible groups in draw order, bottom first.
    pub groups: Vec<&'a OverlayGroup>,
    pub background: Option<Rgb>,
}

impl RenderRequest<'_> {
    /// Map an image pixel into output pixel space.
    pub fn to_output(&self, point: PixelPoint) -> PixelPoint {
        PixelPoint::new(
            (point.x - self.plan.bounds.min.x) * self.plan.scale,
            (point.y - self.plan.bounds.min.y) * self.plan.scale,
        )
    }
}

/// Rasterises a region of the overlay set into an encoded image.
pub trait RegionRenderer {
    type Error: std::error::Error + Send + Sync + 'static;

    fn render_region(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("render failed: {0}")]
    Render(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("renderer produced an empty image")]
    EmptyImage,
}

#[derive(Debug, Clone)]
pub struct ExportedImage {
    pub filename: String,
    pub mode: ExportMode,
    pub plan: ExportPlan,
    pub bytes: Vec<u8>,
}

pub fn export_filename(mode: ExportMode, date: NaiveDate) -> String {
    format!("overlay-export-{}-{}.png", mode.as_str(), date.format("%Y-%m-%d"))
}

/// Frame, size and render the visible overlays.
///
/// `Ok(None)` means there was nothing to export.
pub fn export_overlay_image<R: RegionRenderer>(
    overlays: &OverlaySet,
    options: &ExportOptions,
    projector: &CoordinateProjector,
    renderer: &R,
    date: NaiveDate,
) -> Result<Option<ExportedImage>, ExportError> {
    let groups = overlays.visible_in_order(&options.layers);
    let Some(bounds) = compute_export_bounds(options, projector, &groups) else {
        return Ok(None);
    };

    let plan = ExportPlan::for_bounds(bounds, options.dimension_limit(), options.min_zoom);
    let mode = options.mode();
    debug!(
        mode = mode.as_str(),
        min_x = bounds.min.x,
        min_y = bounds.min.y,
        max_x = bounds.max.x,
        max_y = bounds.max.y,
        zoom = plan.zoom,
        "export region computed"
    );

    let request = RenderRequest {
        plan,
        groups,
        background: options.background,
    };
    let bytes = renderer
        .render_region(&request)
        .map_err(|e| ExportError::Render(Box::new(e)))?;
    if bytes.is_empty() {
        return Err(ExportError::EmptyImage);
    }

    let filename = export_filename(mode, date);
    info!(
        filename = %filename,
        width = plan.width,
        height = plan.height,
        bytes = bytes.len(),
        "overlay image exported"
    );
    Ok(Some(ExportedImage {
        filename,
        mode,
        plan,
        bytes,
    }))
}
