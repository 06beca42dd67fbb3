use serde::{Deserialize, Serialize};

use crate::geom::{PixelPoint, PixelRect};

/// Rectangle of the game world covered by the base map image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl WorldBounds {
    pub const fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    pub const fn height(&self) -> i32 {
        self.max_z - self.min_z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

pub const DEFAULT_WORLD_BOUNDS: WorldBounds = WorldBounds {
    min_x: -13566,
    max_x: 11520,
    min_z: -8702,
    max_z: 18297,
};

pub const DEFAULT_IMAGE_SIZE: ImageSize = ImageSize {
    width: 1570,
    height: 1688,
};

/// Affine mapping between world `(x, z)` and base-image pixels.
///
/// Axes scale independently. Pixel y grows downwards while world z grows towards the top
/// of the image, so the vertical axis is flipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateProjector {
    bounds: WorldBounds,
    image: ImageSize,
    scale_x: f64,
    scale_y: f64,
}

impl CoordinateProjector {
    /// `None` when either the world or the image has no extent.
    pub fn new(bounds: WorldBounds, image: ImageSize) -> Option<Self> {
        if bounds.width() <= 0 || bounds.height() <= 0 || image.width == 0 || image.height == 0 {
            return None;
        }
        Some(Self {
            bounds,
            image,
            scale_x: image.width as f64 / bounds.width() as f64,
            scale_y: image.height as f64 / bounds.height() as f64,
        })
    }

    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    pub fn image_size(&self) -> ImageSize {
        self.image
    }

    /// The whole base image in pixel space.
    pub fn full_image_bounds(&self) -> PixelRect {
        PixelRect::new(0.0, 0.0, self.image.width as f64, self.image.height as f64)
    }

    /// World to pixel. `None` for non-finite input.
    pub fn forward(&self, world_x: f64, world_z: f64) -> Option<PixelPoint> {
        if !world_x.is_finite() || !world_z.is_finite() {
            return None;
        }
        let px = (world_x - self.bounds.min_x as f64) * self.scale_x;
        let py = self.image.height as f64 - (world_z - self.bounds.min_z as f64) * self.scale_y;
        if !px.is_finite() || !py.is_finite() {
            return None;
        }
        Some(PixelPoint::new(px, py))
    }

    /// Pixel to world. `None` for non-finite input.
    pub fn inverse(&self, pixel_x: f64, pixel_y: f64) -> Option<(f64, f64)> {
        if !pixel_x.is_finite() || !pixel_y.is_finite() {
            return None;
        }
        let world_x = pixel_x / self.scale_x + self.bounds.min_x as f64;
        let world_z = (self.image.height as f64 - pixel_y) / self.scale_y + self.bounds.min_z as f64;
        Some((world_x, world_z))
    }
}

impl Default for CoordinateProjector {
    fn default() -> Self {
        Self {
            bounds: DEFAULT_WORLD_BOUNDS,
            image: DEFAULT_IMAGE_SIZE,
            scale_x: DEFAULT_IMAGE_SIZE.width as f64 / DEFAULT_WORLD_BOUNDS.width() as f64,
            scale_y: DEFAULT_IMAGE_SIZE.height as f64 / DEFAULT_WORLD_BOUNDS.height() as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        let diff = (actual - expected).abs();
        assert!(
            diff < 1e-6,
            "expected {expected}, got {actual} (diff: {diff})"
        );
    }

    #[test]
    fn corners_map_to_image_corners_with_flipped_vertical_axis() {
        let projector = CoordinateProjector::default();
        let bottom_left = projector
            .forward(DEFAULT_WORLD_BOUNDS.min_x as f64, DEFAULT_WORLD_BOUNDS.min_z as f64)
            .expect("finite input projects");
        assert_close(bottom_left.x, 0.0);
        assert_close(bottom_left.y, DEFAULT_IMAGE_SIZE.height as f64);

        let top_right = projector
            .forward(DEFAULT_WORLD_BOUNDS.max_x as f64, DEFAULT_WORLD_BOUNDS.max_z as f64)
            .expect("finite input projects");
        assert_close(top_right.x, DEFAULT_IMAGE_SIZE.width as f64);
        assert_close(top_right.y, 0.0);
    }

    #[test]
    fn inverse_recovers_interior_world_points() {
        let projector = CoordinateProjector::default();
        for (x, z) in [(0.0, 0.0), (100.0, 200.0), (-13000.5, 18000.25), (11519.0, -8701.0)] {
            let pixel = projector.forward(x, z).expect("finite input projects");
            let (wx, wz) = projector
                .inverse(pixel.x, pixel.y)
                .expect("finite pixel inverts");
            assert_close(wx, x);
            assert_close(wz, z);
        }
    }

    #[test]
    fn non_finite_input_yields_none() {
        let projector = CoordinateProjector::default();
        assert_eq!(projector.forward(f64::NAN, 0.0), None);
        assert_eq!(projector.forward(0.0, f64::INFINITY), None);
        assert_eq!(projector.inverse(f64::NEG_INFINITY, 0.0), None);
    }

    #[test]
    fn degenerate_bounds_are_rejected() {
        let flat = WorldBounds {
            min_x: 0,
            max_x: 0,
            min_z: 0,
            max_z: 10,
        };
        assert!(CoordinateProjector::new(flat, DEFAULT_IMAGE_SIZE).is_none());
        assert!(
            CoordinateProjector::new(
                DEFAULT_WORLD_BOUNDS,
                ImageSize {
                    width: 0,
                    height: 10
                }
            )
            .is_none()
        );
    }
}
