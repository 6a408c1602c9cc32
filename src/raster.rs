//! In-memory categorical rasters and their affine georeferencing.

use crate::geometry::{BoundingBox, CrsCode};

/// Affine pixel-to-world transform in GDAL coefficient order.
///
/// `x = c0 + col * c1 + row * c2`, `y = c3 + col * c4 + row * c5`,
/// where `(col, row)` are pixel-space coordinates (pixel corners at integers).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with the top-left corner at `(origin_x, origin_y)`.
    ///
    /// `pixel_height` is positive; rows increase southward.
    #[must_use]
    pub const fn from_origin(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    #[inline]
    #[must_use]
    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    /// Pixel size as positive `(x, y)` magnitudes
    #[must_use]
    pub fn resolution(&self) -> (f64, f64) {
        let [_, a, b, _, d, e] = self.0;
        (a.hypot(d), b.hypot(e))
    }

    /// True if the transform has no rotation or shear terms
    #[must_use]
    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    #[inline]
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let [c, a, b, f, d, e] = self.0;
        (c + col * a + row * b, f + col * d + row * e)
    }

    /// The inverse transform, or `None` if the matrix is singular
    #[must_use]
    pub fn invert(&self) -> Option<GeoTransform> {
        let [c, a, b, f, d, e] = self.0;
        let det = a * e - b * d;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Some(GeoTransform([
            -(ia * c + ib * f),
            ia,
            ib,
            -(id * c + ie * f),
            id,
            ie,
        ]))
    }

    /// World coordinate to fractional `(col, row)`, or `None` for a singular transform
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.invert().map(|inv| inv.pixel_to_world(x, y))
    }

    /// Transform for a sub-window whose top-left pixel is `(col_off, row_off)`
    #[must_use]
    pub fn window(&self, col_off: usize, row_off: usize) -> GeoTransform {
        #[allow(clippy::cast_precision_loss)]
        let (x, y) = self.pixel_to_world(col_off as f64, row_off as f64);
        let [_, a, b, _, d, e] = self.0;
        GeoTransform([x, a, b, y, d, e])
    }

    /// World envelope of a `width` x `height` grid under this transform
    #[must_use]
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f64, height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
            .map(|(col, row)| self.pixel_to_world(col, row));
        // four points always produce a box
        BoundingBox::from_points(corners).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// A single-band categorical raster in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub pixels: Vec<i32>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: CrsCode,
    pub nodata: Option<i32>,
}

impl RasterTile {
    /// Build a tile, checking that the pixel buffer matches the dimensions.
    ///
    /// # Errors
    /// Returns an error if `pixels.len() != width * height`.
    pub fn new(
        pixels: Vec<i32>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: CrsCode,
        nodata: Option<i32>,
    ) -> Result<Self, String> {
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| format!("Raster dimensions {width}x{height} overflow"))?;
        if pixels.len() != expected {
            return Err(format!(
                "Pixel buffer has {} values, expected {width}x{height} = {expected}",
                pixels.len()
            ));
        }
        Ok(Self { pixels, width, height, transform, crs, nodata })
    }

    /// A tile of the given shape filled with one value
    #[must_use]
    pub fn filled(
        value: i32,
        width: usize,
        height: usize,
        transform: GeoTransform,
        crs: CrsCode,
        nodata: Option<i32>,
    ) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
            transform,
            crs,
            nodata,
        }
    }

    /// Categorical rasters are always single-band
    #[inline]
    #[must_use]
    pub const fn bands(&self) -> usize {
        1
    }

    #[inline]
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// The nodata sentinel, or 0 when the tile declares none
    #[inline]
    #[must_use]
    pub fn nodata_or_default(&self) -> i32 {
        self.nodata.unwrap_or(0)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, col: usize, row: usize) -> Option<i32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.pixels.get(row * self.width + col).copied()
    }

    /// World envelope of the tile in its own CRS
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// True if every pixel equals the nodata sentinel (0 when none is set)
    #[must_use]
    pub fn is_all_nodata(&self) -> bool {
        let nodata = self.nodata_or_default();
        self.pixels.iter().all(|&v| v == nodata)
    }
}
