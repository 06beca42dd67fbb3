use serde::{Deserialize, Serialize};

/// A position in image pixel space (x to the right, y down).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in pixel space. `min` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub min: PixelPoint,
    pub max: PixelPoint,
}

impl PixelRect {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: PixelPoint::new(min_x, min_y),
            max: PixelPoint::new(max_x, max_y),
        }
    }

    pub fn from_point(point: PixelPoint) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Grow to cover `point`.
    pub fn extend(&mut self, point: PixelPoint) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
    }

    pub fn union(&self, other: &PixelRect) -> PixelRect {
        PixelRect::new(
            self.min.x.min(other.min.x),
            self.min.y.min(other.min.y),
            self.max.x.max(other.max.x),
            self.max.y.max(other.max.y),
        )
    }

    pub fn padded(&self, padding: f64) -> PixelRect {
        PixelRect::new(
            self.min.x - padding,
            self.min.y - padding,
            self.max.x + padding,
            self.max.y + padding,
        )
    }

    /// Overlap of two rectangles, or `None` when it has no area.
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let min_x = self.min.x.max(other.min.x);
        let min_y = self.min.y.max(other.min.y);
        let max_x = self.max.x.min(other.max.x);
        let max_y = self.max.y.min(other.max.y);

        if max_x <= min_x || max_y <= min_y {
            return None;
        }
        Some(PixelRect::new(min_x, min_y, max_x, max_y))
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    /// Bounding box of a set of points, or `None` when there are none.
    pub fn bounding<I: IntoIterator<Item = PixelPoint>>(points: I) -> Option<PixelRect> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut rect = PixelRect::from_point(first);
        for point in iter {
            rect.extend(point);
        }
        Some(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::{PixelPoint, PixelRect};

    #[test]
    fn intersect_rejects_touching_and_disjoint_rects() {
        let a = PixelRect::new(0.0, 0.0, 10.0, 10.0);
        let touching = PixelRect::new(10.0, 0.0, 20.0, 10.0);
        let disjoint = PixelRect::new(30.0, 30.0, 40.0, 40.0);
        assert_eq!(a.intersect(&touching), None);
        assert_eq!(a.intersect(&disjoint), None);
        assert_eq!(
            a.intersect(&PixelRect::new(5.0, -5.0, 15.0, 5.0)),
            Some(PixelRect::new(5.0, 0.0, 10.0, 5.0))
        );
    }

    #[test]
    fn bounding_covers_all_points() {
        let rect = PixelRect::bounding([
            PixelPoint::new(3.0, 9.0),
            PixelPoint::new(-1.0, 4.0),
            PixelPoint::new(7.0, 2.0),
        ])
        .expect("non-empty input has bounds");
        assert_eq!(rect, PixelRect::new(-1.0, 2.0, 7.0, 9.0));
        assert_eq!(PixelRect::bounding(Vec::new()), None);
    }
}
