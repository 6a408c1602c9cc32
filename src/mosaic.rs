//! Merge clipped tiles into a single mosaic.
//!
//! [`merge`] covers the union of the inputs at the finest input resolution.
//! [`Mosaic`] takes its grid from the caller and accepts tiles one by one.
//! Either way tiles are applied in order and a pixel, once filled with a
//! valid value, is never overwritten: the first tile with data wins.

use tracing::debug;

use crate::casting::{f64_to_pixel_count, f64_to_pixel_index};
use crate::geometry::{BoundingBox, CrsCode};
use crate::raster::{GeoTransform, RasterTile};

/// Error type for mosaic merging
#[derive(Debug, Clone, PartialEq)]
pub enum MosaicError {
    /// No tiles to merge
    Empty,
    /// Inputs are not all in the same CRS
    CrsMismatch(String),
    /// An input has a rotated or sheared transform
    Rotated(usize),
}

impl std::fmt::Display for MosaicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "No tiles to merge"),
            Self::CrsMismatch(e) => write!(f, "Tiles have different CRS: {e}"),
            Self::Rotated(index) => write!(f, "Tile {index} has a rotated transform"),
        }
    }
}

impl std::error::Error for MosaicError {}

/// Merge tiles into one raster with first-valid-wins overlap.
///
/// A single tile comes back unchanged. Output nodata is the first tile's
/// nodata, or 0 when it has none.
///
/// # Errors
/// Returns [`MosaicError::Empty`] for no tiles, [`MosaicError::CrsMismatch`]
/// if CRS differ and [`MosaicError::Rotated`] for a non north-up input.
pub fn merge(tiles: &[RasterTile]) -> Result<RasterTile, MosaicError> {
    let first = tiles.first().ok_or(MosaicError::Empty)?;
    for (index, tile) in tiles.iter().enumerate() {
        check(tile, index, first.crs)?;
    }

    if tiles.len() == 1 {
        return Ok(first.clone());
    }

    let bounds = tiles
        .iter()
        .map(RasterTile::bounds)
        .reduce(|a, b| a.union(&b))
        .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0));
    let resolution = tiles
        .iter()
        .map(|t| t.transform.resolution())
        .fold((f64::INFINITY, f64::INFINITY), |(ax, ay), (x, y)| (ax.min(x), ay.min(y)));

    let mut mosaic = Mosaic::new(bounds, resolution, first.crs, first.nodata_or_default());
    for tile in tiles {
        mosaic.add(tile)?;
    }
    Ok(mosaic.into_raster())
}

/// A mosaic built one tile at a time.
///
/// Only the output raster and a fill mask stay in memory, so callers can load
/// each input just before adding it and drop it right after.
#[derive(Debug, Clone)]
pub struct Mosaic {
    raster: RasterTile,
    filled: Vec<bool>,
    tiles: usize,
}

impl Mosaic {
    /// Empty mosaic covering `bounds` at `resolution`, every pixel `nodata`
    #[must_use]
    pub fn new(bounds: BoundingBox, resolution: (f64, f64), crs: CrsCode, nodata: i32) -> Self {
        let (res_x, res_y) = resolution;
        let width = f64_to_pixel_count((bounds.width() / res_x).round()).max(1);
        let height = f64_to_pixel_count((bounds.height() / res_y).round()).max(1);
        let transform = GeoTransform::from_origin(bounds.minx, bounds.maxy, res_x, res_y);

        Self {
            raster: RasterTile::filled(nodata, width, height, transform, crs, Some(nodata)),
            filled: vec![false; width * height],
            tiles: 0,
        }
    }

    /// Paste `tile` into every pixel no earlier tile filled with a valid value.
    ///
    /// # Errors
    /// Returns [`MosaicError::CrsMismatch`] or [`MosaicError::Rotated`] if the
    /// tile does not fit the mosaic's grid.
    pub fn add(&mut self, tile: &RasterTile) -> Result<(), MosaicError> {
        check(tile, self.tiles, self.raster.crs)?;
        paste(tile, &mut self.raster, &mut self.filled);
        self.tiles += 1;
        Ok(())
    }

    /// Tiles added so far
    #[must_use]
    pub fn tiles(&self) -> usize {
        self.tiles
    }

    #[must_use]
    pub fn into_raster(self) -> RasterTile {
        debug!(
            tiles = self.tiles,
            width = self.raster.width,
            height = self.raster.height,
            crs = %self.raster.crs,
            "Merged mosaic"
        );
        self.raster
    }
}

fn check(tile: &RasterTile, index: usize, crs: CrsCode) -> Result<(), MosaicError> {
    if tile.crs != crs {
        return Err(MosaicError::CrsMismatch(format!(
            "mosaic is {crs}, tile {index} is {}",
            tile.crs
        )));
    }
    if !tile.transform.is_north_up() || tile.transform.0[1] <= 0.0 || tile.transform.0[5] >= 0.0 {
        return Err(MosaicError::Rotated(index));
    }
    Ok(())
}

/// Copy a tile's valid values into unfilled output pixels whose centers it covers
fn paste(tile: &RasterTile, out: &mut RasterTile, filled: &mut [bool]) {
    let tile_nodata = tile.nodata_or_default();
    let (width, height) = (out.width, out.height);
    let [out_x0, out_a, _, out_y0, _, out_e] = out.transform.0;
    let [x0, a, _, y0, _, e] = tile.transform.0;
    let tile_bounds = tile.bounds();

    // Output rows/cols whose centers can fall inside this tile
    let col_start = f64_to_pixel_count(((tile_bounds.minx - out_x0) / out_a - 0.5).ceil());
    let col_end = f64_to_pixel_count(((tile_bounds.maxx - out_x0) / out_a - 0.5).ceil()).min(width);
    let row_start = f64_to_pixel_count(((tile_bounds.maxy - out_y0) / out_e - 0.5).ceil());
    let row_end = f64_to_pixel_count(((tile_bounds.miny - out_y0) / out_e - 0.5).ceil()).min(height);

    for row in row_start..row_end {
        #[allow(clippy::cast_precision_loss)]
        let y = out_y0 + (row as f64 + 0.5) * out_e;
        let Some(src_row) = f64_to_pixel_index((y - y0) / e, tile.height) else {
            continue;
        };
        for col in col_start..col_end {
            let index = row * width + col;
            if filled[index] {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let x = out_x0 + (col as f64 + 0.5) * out_a;
            let Some(src_col) = f64_to_pixel_index((x - x0) / a, tile.width) else {
                continue;
            };
            let value = tile.pixels[src_row * tile.width + src_col];
            if value != tile_nodata {
                out.pixels[index] = value;
                filled[index] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(value: i32, origin: (f64, f64), size: usize, res: f64, nodata: Option<i32>) -> RasterTile {
        RasterTile::filled(
            value,
            size,
            size,
            GeoTransform::from_origin(origin.0, origin.1, res, res),
            CrsCode::epsg(5070),
            nodata,
        )
    }

    #[test]
    fn test_empty_is_error() {
        assert_eq!(merge(&[]), Err(MosaicError::Empty));
    }

    #[test]
    fn test_single_tile_is_identity() {
        let mut a = tile(3, (0.0, 100.0), 10, 10.0, Some(0));
        a.pixels[5] = 0;
        assert_eq!(merge(std::slice::from_ref(&a)).unwrap(), a);
    }

    #[test]
    fn test_disjoint_tiles_union_extent() {
        let a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        let b = tile(2, (200.0, 100.0), 10, 10.0, Some(0));
        let m = merge(&[a, b]).unwrap();

        assert_eq!((m.width, m.height), (30, 10));
        assert_eq!(m.get(0, 0), Some(1));
        assert_eq!(m.get(15, 5), Some(0)); // gap
        assert_eq!(m.get(25, 5), Some(2));
        assert_eq!(m.nodata, Some(0));
    }

    #[test]
    fn test_order_decides_overlap() {
        let a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        let b = tile(2, (50.0, 100.0), 10, 10.0, Some(0));

        let ab = merge(&[a.clone(), b.clone()]).unwrap();
        let ba = merge(&[b, a]).unwrap();
        // pixel (7, 0) is covered by both
        assert_eq!(ab.get(7, 0), Some(1));
        assert_eq!(ba.get(7, 0), Some(2));
        assert_eq!(ab.width, 15);
    }

    #[test]
    fn test_nodata_does_not_block_later_tiles() {
        let mut a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        a.pixels[0] = 0;
        let b = tile(2, (0.0, 100.0), 10, 10.0, Some(0));
        let m = merge(&[a, b]).unwrap();
        assert_eq!(m.get(0, 0), Some(2));
        assert_eq!(m.get(1, 0), Some(1));
    }

    #[test]
    fn test_per_tile_nodata() {
        // b uses 255 as nodata; its 255s never land in the mosaic
        let a = tile(0, (0.0, 100.0), 10, 10.0, Some(0));
        let b = tile(255, (0.0, 100.0), 10, 10.0, Some(255));
        let m = merge(&[a, b]).unwrap();
        assert!(m.pixels.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_finest_resolution_wins() {
        let coarse = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        let fine = tile(2, (100.0, 100.0), 20, 5.0, Some(0));
        let m = merge(&[coarse, fine]).unwrap();
        assert_eq!(m.transform.resolution(), (5.0, 5.0));
        assert_eq!((m.width, m.height), (40, 20));
        assert_eq!(m.get(0, 0), Some(1));
        assert_eq!(m.get(1, 0), Some(1));
        assert_eq!(m.get(30, 0), Some(2));
    }

    #[test]
    fn test_incremental_mosaic_matches_merge() {
        let a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        let b = tile(2, (50.0, 100.0), 10, 10.0, Some(0));

        let mut mosaic = Mosaic::new(a.bounds().union(&b.bounds()), (10.0, 10.0), CrsCode::epsg(5070), 0);
        mosaic.add(&a).unwrap();
        mosaic.add(&b).unwrap();
        assert_eq!(mosaic.tiles(), 2);
        assert_eq!(mosaic.into_raster(), merge(&[a, b]).unwrap());
    }

    #[test]
    fn test_incremental_mosaic_keeps_fixed_extent() {
        // canvas smaller than the tile: only the overlap is pasted
        let big = tile(4, (0.0, 100.0), 10, 10.0, Some(0));
        let mut mosaic = Mosaic::new(BoundingBox::new(20.0, 50.0, 60.0, 80.0), (10.0, 10.0), CrsCode::epsg(5070), 9);
        mosaic.add(&big).unwrap();

        let raster = mosaic.into_raster();
        assert_eq!((raster.width, raster.height), (4, 3));
        assert_eq!(raster.nodata, Some(9));
        assert!(raster.pixels.iter().all(|&v| v == 4));
    }

    #[test]
    fn test_incremental_mosaic_rejects_other_crs() {
        let mut mosaic = Mosaic::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), (10.0, 10.0), CrsCode::epsg(3035), 0);
        let a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        assert!(matches!(mosaic.add(&a), Err(MosaicError::CrsMismatch(_))));
        assert_eq!(mosaic.tiles(), 0);
    }

    #[test]
    fn test_crs_mismatch() {
        let a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        let mut b = tile(2, (0.0, 100.0), 10, 10.0, Some(0));
        b.crs = CrsCode::epsg(3035);
        assert!(matches!(merge(&[a, b]), Err(MosaicError::CrsMismatch(_))));
    }

    #[test]
    fn test_rotated_rejected() {
        let a = tile(1, (0.0, 100.0), 10, 10.0, Some(0));
        let mut b = tile(2, (0.0, 100.0), 10, 10.0, Some(0));
        b.transform = GeoTransform([0.0, 10.0, 1.0, 100.0, 0.0, -10.0]);
        assert_eq!(merge(&[a, b]), Err(MosaicError::Rotated(1)));
    }
}
