//! Geometry types: bounding boxes, the area of interest and projections.

pub mod aoi;
pub mod projection;

pub use aoi::{Aoi, GeometryError};
pub use projection::CrsCode;

/// Axis-aligned bounding box in a coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Envelope of a set of points, or `None` if the iterator yields nothing
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.minx.min(x), b.miny.min(y), b.maxx.max(x), b.maxy.max(y)),
            })
        })
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// The four corners, clockwise from top-left
    #[must_use]
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.minx, self.maxy),
            (self.maxx, self.maxy),
            (self.maxx, self.miny),
            (self.minx, self.miny),
        ]
    }

    /// True if `other` lies entirely inside this box (touching edges counts as inside)
    #[must_use]
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.minx >= self.minx
            && other.maxx <= self.maxx
            && other.miny >= self.miny
            && other.maxy <= self.maxy
    }

    /// True if the boxes share any area or boundary
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.maxx < other.minx
            || self.minx > other.maxx
            || self.maxy < other.miny
            || self.miny > other.maxy)
    }

    /// Smallest box covering both boxes
    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.minx.min(other.minx),
            self.miny.min(other.miny),
            self.maxx.max(other.maxx),
            self.maxy.max(other.maxy),
        )
    }
}

impl From<geo::Rect<f64>> for BoundingBox {
    fn from(rect: geo::Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_inclusive() {
        let outer = BoundingBox::new(-170.0, 15.0, -50.0, 75.0);
        assert!(outer.contains(&BoundingBox::new(-100.0, 40.0, -99.0, 41.0)));
        assert!(outer.contains(&BoundingBox::new(-170.0, 15.0, -160.0, 20.0)));
        assert!(!outer.contains(&BoundingBox::new(-171.0, 15.0, -160.0, 20.0)));
    }

    #[test]
    fn test_intersects_and_union() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c), BoundingBox::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_from_points() {
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
        let bbox = BoundingBox::from_points([(1.0, 5.0), (-2.0, 3.0), (4.0, -1.0)]).unwrap();
        assert_eq!(bbox, BoundingBox::new(-2.0, -1.0, 4.0, 5.0));
        assert_eq!(bbox.width(), 6.0);
        assert_eq!(bbox.height(), 6.0);
    }
}
