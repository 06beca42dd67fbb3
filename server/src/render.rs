use landmap_shared::overlay::OverlayStyle;
use landmap_shared::{OverlayShape, RegionRenderer, RenderRequest, Rgb};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to allocate {width}x{height} pixmap")]
    PixmapAlloc { width: u32, height: u32 },
    #[error("failed to encode PNG")]
    PngEncode,
}

/// Rasterises overlay shapes to PNG. Labels are skipped since no font rasteriser is
/// bundled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkiaRenderer;

impl RegionRenderer for SkiaRenderer {
    type Error = RenderError;

    fn render_region(&self, request: &RenderRequest<'_>) -> Result<Vec<u8>, RenderError> {
        let (width, height) = (request.plan.width, request.plan.height);
        let mut pixmap =
            Pixmap::new(width, height).ok_or(RenderError::PixmapAlloc { width, height })?;
        if let Some((r, g, b)) = request.background {
            pixmap.fill(Color::from_rgba8(r, g, b, 255));
        }

        for group in &request.groups {
            for shape in &group.shapes {
                draw_shape(&mut pixmap, request, shape);
            }
        }

        pixmap.encode_png().map_err(|_| RenderError::PngEncode)
    }
}

fn draw_shape(pixmap: &mut Pixmap, request: &RenderRequest<'_>, shape: &OverlayShape) {
    match shape {
        OverlayShape::Point { center, radius, style, .. } => {
            let center = request.to_output(*center);
            if let Some(path) =
                PathBuilder::from_circle(center.x as f32, center.y as f32, radius.max(1.0) as f32)
            {
                fill_and_stroke(pixmap, &path, style);
            }
        }
        OverlayShape::Polygon { vertices, style, .. } => {
            let mut builder = PathBuilder::new();
            for (index, vertex) in vertices.iter().enumerate() {
                let point = request.to_output(*vertex);
                if index == 0 {
                    builder.move_to(point.x as f32, point.y as f32);
                } else {
                    builder.line_to(point.x as f32, point.y as f32);
                }
            }
            builder.close();
            if let Some(path) = builder.finish() {
                fill_and_stroke(pixmap, &path, style);
            }
        }
        OverlayShape::Label { .. } => {}
        OverlayShape::Group(shapes) => {
            for shape in shapes {
                draw_shape(pixmap, request, shape);
            }
        }
    }
}

fn fill_and_stroke(pixmap: &mut Pixmap, path: &tiny_skia::Path, style: &OverlayStyle) {
    let fill = paint(style.fill, style.fill_opacity);
    pixmap.fill_path(path, &fill, FillRule::Winding, Transform::identity(), None);

    if style.weight > 0.0 {
        let stroke_paint = paint(style.stroke, style.stroke_opacity);
        let stroke = Stroke {
            width: style.weight as f32,
            ..Stroke::default()
        };
        pixmap.stroke_path(path, &stroke_paint, &stroke, Transform::identity(), None);
    }
}

fn paint((r, g, b): Rgb, opacity: f64) -> Paint<'static> {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, alpha);
    paint.anti_alias = true;
    paint
}
