//! Clip a source tile to the AOI and reproject it into the target CRS.
//!
//! Steps for one tile:
//! 1. project the AOI into the tile's CRS
//! 2. read only the pixel window under the AOI's bounding box
//! 3. set pixels whose centers fall outside the AOI to nodata
//! 4. resample onto a north-up grid in the target CRS with nearest neighbour
//!
//! Steps 1-3 are [`clip_native`]. A run that merges several tiles resamples
//! them all onto one [`TargetGrid`] so that neighbours share pixel edges;
//! [`clip_and_reproject`] sizes the grid from the single tile instead.
//!
//! Class codes are categorical, so resampling always copies a source value and
//! never interpolates.

use geo::{Contains, LineString, MultiPolygon, Point, Polygon};
use tracing::debug;

use crate::casting::{f64_to_pixel_index, f64_to_pixel_count};
use crate::geometry::projection::CoordTransformer;
use crate::geometry::{Aoi, BoundingBox, CrsCode, GeometryError};
use crate::geotiff_reader::{GeoTiffReadError, PixelWindow, TileReader};
use crate::raster::{GeoTransform, RasterTile};
use crate::source::TileLocation;

/// Points per side of the grid sampled when sizing the output raster
const GRID_SAMPLES: usize = 21;

/// Pixel coordinates this close to an integer are treated as on the pixel edge
const EDGE_SNAP: f64 = 1e-6;

/// Error type for clipping and reprojection
#[derive(Debug)]
pub enum ClipError {
    /// Reading the source tile failed
    Read(GeoTiffReadError),
    /// Projecting the AOI or the pixel grid failed
    Projection(String),
    /// The tile's transform cannot be inverted or yields no output grid
    InvalidGrid(String),
}

impl std::fmt::Display for ClipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(e) => write!(f, "Failed to read tile: {e}"),
            Self::Projection(e) => write!(f, "Projection failed: {e}"),
            Self::InvalidGrid(e) => write!(f, "Invalid raster grid: {e}"),
        }
    }
}

impl std::error::Error for ClipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GeoTiffReadError> for ClipError {
    fn from(e: GeoTiffReadError) -> Self {
        Self::Read(e)
    }
}

impl From<GeometryError> for ClipError {
    fn from(e: GeometryError) -> Self {
        Self::Projection(e.to_string())
    }
}

/// Clip and reproject one tile, reading only the part under the AOI.
///
/// Returns `Ok(None)` when the AOI misses the tile or masks out every pixel.
///
/// # Errors
/// Returns [`ClipError::Read`] if the tile cannot be read and
/// [`ClipError::Projection`] if the AOI or grid cannot be projected.
pub fn clip_and_reproject(
    location: &TileLocation,
    aoi: &Aoi,
    target: CrsCode,
) -> Result<Option<RasterTile>, ClipError> {
    clip_native(location, aoi)?
        .map(|clipped| reproject_clipped(&clipped, target, &location.to_string()))
        .transpose()
}

/// In-memory variant of [`clip_and_reproject`] for an already decoded tile.
///
/// # Errors
/// See [`clip_and_reproject`].
pub fn clip_tile(tile: &RasterTile, aoi: &Aoi, target: CrsCode) -> Result<Option<RasterTile>, ClipError> {
    clip_tile_native(tile, aoi)?
        .map(|clipped| reproject_clipped(&clipped, target, "in-memory tile"))
        .transpose()
}

/// Crop and mask one tile to the AOI, staying in the tile's own CRS.
///
/// Only the pixel window under the AOI is decoded. Returns `Ok(None)` when
/// the AOI misses the tile or masks out every pixel.
///
/// # Errors
/// See [`clip_and_reproject`].
pub fn clip_native(location: &TileLocation, aoi: &Aoi) -> Result<Option<RasterTile>, ClipError> {
    let mut reader = TileReader::open(location)?;
    let header = reader.header().clone();

    let aoi_native = aoi.geometry_in(header.crs)?;
    let Some(window) = aoi_window(&aoi_native, &header.transform, header.width, header.height)? else {
        debug!(tile = %location, "AOI does not overlap tile");
        return Ok(None);
    };

    let cropped = reader.read_window(window)?;
    Ok(finish_mask(cropped, &aoi_native, &location.to_string()))
}

/// In-memory variant of [`clip_native`].
///
/// # Errors
/// See [`clip_and_reproject`].
pub fn clip_tile_native(tile: &RasterTile, aoi: &Aoi) -> Result<Option<RasterTile>, ClipError> {
    let aoi_native = aoi.geometry_in(tile.crs)?;
    let Some(window) = aoi_window(&aoi_native, &tile.transform, tile.width, tile.height)? else {
        debug!(crs = %tile.crs, "AOI does not overlap tile");
        return Ok(None);
    };
    Ok(finish_mask(crop(tile, window), &aoi_native, "in-memory tile"))
}

fn finish_mask(mut cropped: RasterTile, aoi_native: &MultiPolygon<f64>, label: &str) -> Option<RasterTile> {
    mask_outside(&mut cropped, aoi_native);
    if cropped.is_all_nodata() {
        debug!(tile = label, "AOI masks out every pixel");
        return None;
    }
    Some(cropped)
}

fn reproject_clipped(clipped: &RasterTile, target: CrsCode, label: &str) -> Result<RasterTile, ClipError> {
    let reprojected = reproject_nearest(clipped, target)?;
    debug!(
        tile = label,
        width = reprojected.width,
        height = reprojected.height,
        crs = %target,
        "Clipped tile"
    );
    Ok(reprojected)
}

/// Pixel window covering the AOI envelope, rounded outward and clamped to the raster
fn aoi_window(
    aoi_native: &MultiPolygon<f64>,
    transform: &GeoTransform,
    width: usize,
    height: usize,
) -> Result<Option<PixelWindow>, ClipError> {
    use geo::BoundingRect;

    let Some(rect) = aoi_native.bounding_rect() else {
        return Ok(None);
    };
    let bounds = BoundingBox::from(rect);
    let inverse = transform
        .invert()
        .ok_or_else(|| ClipError::InvalidGrid(format!("singular transform {:?}", transform.0)))?;

    let corners = bounds.corners().map(|(x, y)| inverse.pixel_to_world(x, y));
    let Some(envelope) = BoundingBox::from_points(corners) else {
        return Ok(None);
    };

    #[allow(clippy::cast_precision_loss)]
    let (w, h) = (width as f64, height as f64);
    let col0 = snap(envelope.minx).floor().max(0.0);
    let row0 = snap(envelope.miny).floor().max(0.0);
    let col1 = snap(envelope.maxx).ceil().min(w);
    let row1 = snap(envelope.maxy).ceil().min(h);

    if !(col1 > col0 && row1 > row0) {
        return Ok(None);
    }

    Ok(Some(PixelWindow {
        col_off: f64_to_pixel_count(col0),
        row_off: f64_to_pixel_count(row0),
        width: f64_to_pixel_count(col1 - col0),
        height: f64_to_pixel_count(row1 - row0),
    }))
}

#[inline]
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < EDGE_SNAP {
        r
    } else {
        v
    }
}

/// Copy a pixel window out of an in-memory tile
fn crop(tile: &RasterTile, window: PixelWindow) -> RasterTile {
    let mut pixels = Vec::with_capacity(window.width * window.height);
    for row in window.row_off..window.row_off + window.height {
        let start = row * tile.width + window.col_off;
        pixels.extend_from_slice(&tile.pixels[start..start + window.width]);
    }
    RasterTile {
        pixels,
        width: window.width,
        height: window.height,
        transform: tile.transform.window(window.col_off, window.row_off),
        crs: tile.crs,
        nodata: tile.nodata,
    }
}

/// Set every pixel whose center lies outside the AOI to nodata.
///
/// North-up grids use an even-odd scanline fill over each polygon's rings;
/// other grids test each pixel center with `geo`. Centers exactly on an edge
/// may land either way. The tile's nodata becomes explicit (0 if unset).
pub(crate) fn mask_outside(tile: &mut RasterTile, aoi_native: &MultiPolygon<f64>) {
    let inside = if is_upright(&tile.transform) {
        scanline_mask(tile, aoi_native)
    } else {
        point_mask(tile, aoi_native)
    };

    let nodata = tile.nodata_or_default();
    for (value, keep) in tile.pixels.iter_mut().zip(inside) {
        if !keep {
            *value = nodata;
        }
    }
    tile.nodata = Some(nodata);
}

/// Even-odd scanline fill for north-up grids
fn scanline_mask(tile: &RasterTile, aoi_native: &MultiPolygon<f64>) -> Vec<bool> {
    let [x0, a, _, y0, _, e] = tile.transform.0;
    let mut inside = vec![false; tile.pixel_count()];
    let mut crossings: Vec<f64> = Vec::new();

    for row in 0..tile.height {
        #[allow(clippy::cast_precision_loss)]
        let y = y0 + (row as f64 + 0.5) * e;
        let row_mask = &mut inside[row * tile.width..(row + 1) * tile.width];

        for polygon in &aoi_native.0 {
            crossings.clear();
            for ring in polygon_rings(polygon) {
                ring_crossings(ring, y, &mut crossings);
            }
            crossings.sort_by(f64::total_cmp);

            for pair in crossings.chunks_exact(2) {
                // center x in [left, right)
                let first = ((pair[0] - x0) / a - 0.5).ceil().max(0.0);
                let last = ((pair[1] - x0) / a - 0.5).ceil();
                #[allow(clippy::cast_precision_loss)]
                let last = last.min(tile.width as f64);
                if last <= first {
                    continue;
                }
                let (first, last) = (f64_to_pixel_count(first), f64_to_pixel_count(last));
                row_mask[first..last].iter_mut().for_each(|m| *m = true);
            }
        }
    }
    inside
}

/// Per-pixel containment test for rotated grids
fn point_mask(tile: &RasterTile, aoi_native: &MultiPolygon<f64>) -> Vec<bool> {
    let mut inside = Vec::with_capacity(tile.pixel_count());
    for row in 0..tile.height {
        for col in 0..tile.width {
            #[allow(clippy::cast_precision_loss)]
            let (x, y) = tile.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            inside.push(aoi_native.contains(&Point::new(x, y)));
        }
    }
    inside
}

fn polygon_rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors())
}

/// x positions where the horizontal line at `y` crosses the ring
fn ring_crossings(ring: &LineString<f64>, y: f64, out: &mut Vec<f64>) {
    for segment in ring.lines() {
        let (s, t) = (segment.start, segment.end);
        if (s.y > y) != (t.y > y) {
            out.push(s.x + (y - s.y) * (t.x - s.x) / (t.y - s.y));
        }
    }
}

/// Envelope in `target` of a `width` x `height` pixel grid, from a 21x21 sample
fn projected_envelope(
    transform: &GeoTransform,
    width: f64,
    height: f64,
    source: CrsCode,
    target: CrsCode,
) -> Result<BoundingBox, ClipError> {
    let transformer = CoordTransformer::new(source, target).map_err(ClipError::Projection)?;
    #[allow(clippy::cast_precision_loss)]
    let steps = (GRID_SAMPLES - 1) as f64;

    let mut points = Vec::with_capacity(GRID_SAMPLES * GRID_SAMPLES);
    let mut failures = 0usize;
    for j in 0..GRID_SAMPLES {
        for i in 0..GRID_SAMPLES {
            #[allow(clippy::cast_precision_loss)]
            let (col, row) = (i as f64 * width / steps, j as f64 * height / steps);
            let (x, y) = transform.pixel_to_world(col, row);
            match transformer.transform(x, y) {
                Ok(p) => points.push(p),
                Err(_) => failures += 1,
            }
        }
    }
    if failures > 0 {
        debug!(failures, source = %source, target = %target, "Some grid points did not project");
    }

    BoundingBox::from_points(points).ok_or_else(|| {
        ClipError::Projection(format!("no part of the tile projects from {source} to {target}"))
    })
}

/// Square pixel size keeping `width` x `height` pixels along the envelope diagonal
fn diagonal_resolution(envelope: &BoundingBox, width: f64, height: f64) -> Result<f64, ClipError> {
    let resolution = envelope.width().hypot(envelope.height()) / width.hypot(height);
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(ClipError::InvalidGrid(format!(
            "degenerate output pixel size {resolution} for {envelope:?}"
        )));
    }
    Ok(resolution)
}

/// North-up with positive x and negative y steps
fn is_upright(transform: &GeoTransform) -> bool {
    transform.is_north_up() && transform.0[1] > 0.0 && transform.0[5] < 0.0
}

/// Output grid for `src` reprojected into `target`.
///
/// Samples a 21x21 grid over the source extent, takes the envelope of the
/// projected points and picks a square pixel size that keeps the source's
/// pixel count along the diagonal.
///
/// # Errors
/// Returns [`ClipError::Projection`] if no sample point projects and
/// [`ClipError::InvalidGrid`] if the resulting pixel size is degenerate.
pub fn calculate_default_transform(
    src: &RasterTile,
    target: CrsCode,
) -> Result<(GeoTransform, usize, usize), ClipError> {
    #[allow(clippy::cast_precision_loss)]
    let (w, h) = (src.width as f64, src.height as f64);
    let envelope = projected_envelope(&src.transform, w, h, src.crs, target)?;
    let resolution = diagonal_resolution(&envelope, w, h)?;

    let out_width = f64_to_pixel_count((envelope.width() / resolution).round()).max(1);
    let out_height = f64_to_pixel_count((envelope.height() / resolution).round()).max(1);
    let transform = GeoTransform::from_origin(envelope.minx, envelope.maxy, resolution, resolution);

    Ok((transform, out_width, out_height))
}

/// Where a clipped tile lands in the target CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    /// The tile's own CRS
    pub crs: CrsCode,
    /// Extent in the tile's own CRS
    pub native_bounds: BoundingBox,
    /// Pixel size in the tile's own CRS, for north-up tiles
    pub native_resolution: Option<(f64, f64)>,
    /// Extent in the target CRS
    pub envelope: BoundingBox,
    /// Output pixel size this tile would get on its own
    pub resolution: f64,
}

impl Footprint {
    /// Measure `src` against `target`.
    ///
    /// # Errors
    /// See [`calculate_default_transform`].
    pub fn of(src: &RasterTile, target: CrsCode) -> Result<Self, ClipError> {
        let native_resolution = is_upright(&src.transform).then(|| src.transform.resolution());

        let (envelope, resolution) = match native_resolution {
            Some((rx, ry)) if src.crs == target => (src.bounds(), rx.min(ry)),
            _ => {
                #[allow(clippy::cast_precision_loss)]
                let (w, h) = (src.width as f64, src.height as f64);
                let envelope = projected_envelope(&src.transform, w, h, src.crs, target)?;
                let resolution = diagonal_resolution(&envelope, w, h)?;
                (envelope, resolution)
            }
        };

        Ok(Self {
            crs: src.crs,
            native_bounds: src.bounds(),
            native_resolution,
            envelope,
            resolution,
        })
    }
}

/// North-up square-pixel lattice in the target CRS shared by every tile of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGrid {
    pub crs: CrsCode,
    pub resolution: f64,
    /// A point on the lattice; pixel edges fall at `origin + k * resolution`
    pub origin: (f64, f64),
}

impl TargetGrid {
    /// Grid for a run over `footprints`, listed in merge order.
    ///
    /// Tiles on the same native grid are sized as one raster covering all of
    /// them, so a tile split in two gets the resolution of the whole. The
    /// finest resolution over the groups wins. The lattice passes through the
    /// first tile that already sits on it, else through `anchor`.
    ///
    /// # Errors
    /// Returns [`ClipError::InvalidGrid`] for no footprints and the errors of
    /// [`calculate_default_transform`] otherwise.
    pub fn for_footprints(
        target: CrsCode,
        footprints: &[Footprint],
        anchor: (f64, f64),
    ) -> Result<Self, ClipError> {
        if footprints.is_empty() {
            return Err(ClipError::InvalidGrid("no tiles to place on a grid".to_string()));
        }

        let mut groups: Vec<(CrsCode, (f64, f64), BoundingBox)> = Vec::new();
        let mut resolution = f64::INFINITY;
        for footprint in footprints {
            let Some(native) = footprint.native_resolution else {
                resolution = resolution.min(footprint.resolution);
                continue;
            };
            let same_grid = groups.iter_mut().find(|(crs, res, _)| {
                *crs == footprint.crs && same_size(res.0, native.0) && same_size(res.1, native.1)
            });
            match same_grid {
                Some((_, _, bounds)) => *bounds = bounds.union(&footprint.native_bounds),
                None => groups.push((footprint.crs, native, footprint.native_bounds)),
            }
        }

        for (crs, (rx, ry), bounds) in groups {
            let group_resolution = if crs == target {
                rx.min(ry)
            } else {
                let (w, h) = (bounds.width() / rx, bounds.height() / ry);
                let transform = GeoTransform::from_origin(bounds.minx, bounds.maxy, rx, ry);
                let envelope = projected_envelope(&transform, w, h, crs, target)?;
                diagonal_resolution(&envelope, w, h)?
            };
            resolution = resolution.min(group_resolution);
        }

        let origin = footprints
            .iter()
            .find(|f| {
                f.crs == target
                    && f.native_resolution
                        .is_some_and(|(rx, ry)| same_size(rx, resolution) && same_size(ry, resolution))
            })
            .map_or(anchor, |f| (f.native_bounds.minx, f.native_bounds.maxy));

        debug!(crs = %target, resolution, ?origin, "Chose target grid");
        Ok(Self { crs: target, resolution, origin })
    }

    /// Smallest window of the lattice covering `envelope`
    #[must_use]
    pub fn fit(&self, envelope: &BoundingBox) -> Option<(GeoTransform, usize, usize)> {
        let r = self.resolution;
        let (x0, y0) = self.origin;
        let col0 = snap((envelope.minx - x0) / r).floor();
        let col1 = snap((envelope.maxx - x0) / r).ceil();
        let row0 = snap((y0 - envelope.maxy) / r).floor();
        let row1 = snap((y0 - envelope.miny) / r).ceil();
        if !(col1 > col0 && row1 > row0) || !(col1 - col0).is_finite() || !(row1 - row0).is_finite() {
            return None;
        }
        let transform = GeoTransform::from_origin(x0 + col0 * r, y0 - row0 * r, r, r);
        Some((transform, f64_to_pixel_count(col1 - col0), f64_to_pixel_count(row1 - row0)))
    }

    /// Whether `transform` already is a window of this lattice
    #[must_use]
    pub fn is_aligned(&self, transform: &GeoTransform) -> bool {
        let (rx, ry) = transform.resolution();
        let (x, y) = transform.origin();
        is_upright(transform)
            && same_size(rx, self.resolution)
            && same_size(ry, self.resolution)
            && is_whole((x - self.origin.0) / self.resolution)
            && is_whole((self.origin.1 - y) / self.resolution)
    }
}

#[inline]
fn is_whole(v: f64) -> bool {
    (v - v.round()).abs() < EDGE_SNAP
}

#[inline]
fn same_size(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// Resample `src` onto the run's shared grid with nearest-neighbour lookup.
///
/// A tile already on the lattice in the grid's CRS is returned unchanged.
///
/// # Errors
/// See [`calculate_default_transform`].
pub fn reproject_onto(src: &RasterTile, grid: &TargetGrid) -> Result<RasterTile, ClipError> {
    if src.crs == grid.crs && grid.is_aligned(&src.transform) {
        return Ok(src.clone());
    }
    let footprint = Footprint::of(src, grid.crs)?;
    let (transform, width, height) = grid.fit(&footprint.envelope).ok_or_else(|| {
        ClipError::InvalidGrid(format!("{:?} does not cover any grid cell", footprint.envelope))
    })?;
    resample(src, transform, width, height, grid.crs)
}

/// Resample `src` into `target` with nearest-neighbour lookup.
///
/// Every output pixel is either a value copied from `src` or nodata. A
/// north-up source already in `target` is returned unchanged.
///
/// # Errors
/// See [`calculate_default_transform`].
pub fn reproject_nearest(src: &RasterTile, target: CrsCode) -> Result<RasterTile, ClipError> {
    if src.crs == target && src.transform.is_north_up() {
        return Ok(src.clone());
    }
    let (dst_transform, width, height) = calculate_default_transform(src, target)?;
    resample(src, dst_transform, width, height, target)
}

/// Fill a `width` x `height` grid in `target` from the source pixel under each center
fn resample(
    src: &RasterTile,
    dst_transform: GeoTransform,
    width: usize,
    height: usize,
    target: CrsCode,
) -> Result<RasterTile, ClipError> {
    let to_source = CoordTransformer::new(target, src.crs).map_err(ClipError::Projection)?;
    let inverse = src
        .transform
        .invert()
        .ok_or_else(|| ClipError::InvalidGrid(format!("singular transform {:?}", src.transform.0)))?;

    let nodata = src.nodata_or_default();
    let mut pixels = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            #[allow(clippy::cast_precision_loss)]
            let (x, y) = dst_transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            let value = to_source
                .transform(x, y)
                .ok()
                .and_then(|(sx, sy)| {
                    let (src_col, src_row) = inverse.pixel_to_world(sx, sy);
                    let c = f64_to_pixel_index(src_col, src.width)?;
                    let r = f64_to_pixel_index(src_row, src.height)?;
                    src.get(c, r)
                })
                .unwrap_or(nodata);
            pixels.push(value);
        }
    }

    Ok(RasterTile {
        pixels,
        width,
        height,
        transform: dst_transform,
        crs: target,
        nodata: Some(nodata),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use std::collections::HashSet;

    fn lonlat_tile() -> RasterTile {
        // 1.2 x 1.2 degree tile at 0.01 degrees, classes by column
        let (width, height) = (120, 120);
        let pixels = (0..width * height).map(|i| if i % width < 108 { 1 } else { 2 }).collect();
        RasterTile::new(
            pixels,
            width,
            height,
            GeoTransform::from_origin(-100.1, 41.1, 0.01, 0.01),
            CrsCode::WGS84,
            Some(0),
        )
        .unwrap()
    }

    fn square_aoi(minx: f64, miny: f64, size: f64, crs: CrsCode) -> Aoi {
        Aoi::from_polygon(
            polygon![
                (x: minx, y: miny),
                (x: minx + size, y: miny),
                (x: minx + size, y: miny + size),
                (x: minx, y: miny + size),
                (x: minx, y: miny),
            ],
            crs,
        )
        .unwrap()
    }

    #[test]
    fn test_same_crs_crop_is_exact() {
        let tile = lonlat_tile();
        let aoi = square_aoi(-100.0, 40.0, 1.0, CrsCode::WGS84);
        let clipped = clip_tile(&tile, &aoi, CrsCode::WGS84).unwrap().unwrap();

        assert_eq!((clipped.width, clipped.height), (100, 100));
        let (ox, oy) = clipped.transform.origin();
        assert!((ox + 100.0).abs() < 1e-9 && (oy - 41.0).abs() < 1e-9, "origin ({ox}, {oy})");
        assert!(clipped.pixels.iter().all(|&v| v == 1 || v == 2));
    }

    #[test]
    fn test_mask_triangle() {
        let tile = RasterTile::filled(
            5,
            10,
            10,
            GeoTransform::from_origin(0.0, 10.0, 1.0, 1.0),
            CrsCode::epsg(5070),
            None,
        );
        let aoi = Aoi::from_polygon(
            polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)],
            CrsCode::epsg(5070),
        )
        .unwrap();
        let clipped = clip_tile(&tile, &aoi, CrsCode::epsg(5070)).unwrap().unwrap();

        // lower-left triangle: pixel (col, row) center is inside when col + 0.5 < row + 0.5
        assert_eq!(clipped.nodata, Some(0));
        for row in 0..10 {
            for col in 0..10 {
                let expected = if col < row { 5 } else { 0 };
                assert_eq!(clipped.get(col, row), Some(expected), "({col}, {row})");
            }
        }
    }

    #[test]
    fn test_mask_respects_holes() {
        let tile = RasterTile::filled(
            7,
            10,
            10,
            GeoTransform::from_origin(0.0, 10.0, 1.0, 1.0),
            CrsCode::epsg(5070),
            Some(255),
        );
        let shell = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]);
        let hole = LineString::from(vec![(3.0, 3.0), (7.0, 3.0), (7.0, 7.0), (3.0, 7.0), (3.0, 3.0)]);
        let aoi = Aoi::from_polygon(Polygon::new(shell, vec![hole]), CrsCode::epsg(5070)).unwrap();

        let clipped = clip_tile(&tile, &aoi, CrsCode::epsg(5070)).unwrap().unwrap();
        let masked = clipped.pixels.iter().filter(|&&v| v == 255).count();
        assert_eq!(masked, 16);
        assert_eq!(clipped.get(5, 5), Some(255));
        assert_eq!(clipped.get(1, 1), Some(7));
    }

    #[test]
    fn test_rotated_mask_matches_point_test() {
        let mut tile = RasterTile::filled(
            1,
            20,
            20,
            GeoTransform([0.0, 1.0, 0.2, 20.0, 0.1, -1.0]),
            CrsCode::epsg(5070),
            None,
        );
        // edges at .03 never meet a pixel center of this grid
        let aoi = square_aoi(5.03, 5.03, 6.0, CrsCode::epsg(5070));
        mask_outside(&mut tile, aoi.geometry());
        for row in 0..20 {
            for col in 0..20 {
                let (x, y) = tile.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                let inside = (5.03..11.03).contains(&x) && (5.03..11.03).contains(&y);
                assert_eq!(tile.get(col, row) == Some(1), inside, "({col}, {row})");
            }
        }
    }

    #[test]
    fn test_no_overlap_is_none() {
        let tile = lonlat_tile();
        let aoi = square_aoi(10.0, 10.0, 1.0, CrsCode::WGS84);
        assert!(clip_tile(&tile, &aoi, CrsCode::epsg(5070)).unwrap().is_none());
    }

    #[test]
    fn test_only_nodata_is_none() {
        let tile = RasterTile::filled(
            0,
            10,
            10,
            GeoTransform::from_origin(0.0, 10.0, 1.0, 1.0),
            CrsCode::epsg(5070),
            Some(0),
        );
        let aoi = square_aoi(2.0, 2.0, 4.0, CrsCode::epsg(5070));
        assert!(clip_tile(&tile, &aoi, CrsCode::epsg(5070)).unwrap().is_none());
    }

    #[test]
    fn test_reprojection_never_invents_values() {
        let tile = lonlat_tile();
        let aoi = square_aoi(-100.0, 40.0, 1.0, CrsCode::WGS84);
        let clipped = clip_tile(&tile, &aoi, CrsCode::epsg(5070)).unwrap().unwrap();

        assert_eq!(clipped.crs, CrsCode::epsg(5070));
        assert!(clipped.transform.is_north_up());
        let values: HashSet<i32> = clipped.pixels.iter().copied().collect();
        assert!(values.is_subset(&HashSet::from([0, 1, 2])), "{values:?}");
        assert!(values.contains(&1) && values.contains(&2));
    }

    #[test]
    fn test_default_transform_keeps_pixel_budget() {
        let tile = RasterTile::filled(
            1,
            100,
            100,
            GeoTransform::from_origin(-100.0, 41.0, 0.01, 0.01),
            CrsCode::WGS84,
            None,
        );
        let (transform, width, height) = calculate_default_transform(&tile, CrsCode::epsg(5070)).unwrap();
        assert!(transform.is_north_up());
        let (rx, ry) = transform.resolution();
        assert_eq!(rx, ry);
        // ~1 km pixels at 40N; the Albers envelope of a lon/lat square is a bit wider
        assert!(rx > 700.0 && rx < 1200.0, "resolution {rx}");
        assert!((70..=130).contains(&width), "width {width}");
        assert!((90..=130).contains(&height), "height {height}");
    }

    #[test]
    fn test_identity_reprojection_returns_input() {
        let tile = lonlat_tile();
        let out = reproject_nearest(&tile, CrsCode::WGS84).unwrap();
        assert_eq!(out, tile);
    }

    #[test]
    fn test_rotated_mask_with_hole() {
        let mut tile = RasterTile::filled(
            4,
            20,
            20,
            GeoTransform([0.0, 1.0, 0.2, 20.0, 0.1, -1.0]),
            CrsCode::epsg(5070),
            None,
        );
        let shell = LineString::from(vec![(2.03, 2.03), (18.03, 2.03), (18.03, 18.03), (2.03, 18.03), (2.03, 2.03)]);
        let hole = LineString::from(vec![(8.03, 8.03), (12.03, 8.03), (12.03, 12.03), (8.03, 12.03), (8.03, 8.03)]);
        let aoi = Aoi::from_polygon(Polygon::new(shell, vec![hole]), CrsCode::epsg(5070)).unwrap();
        mask_outside(&mut tile, aoi.geometry());

        for row in 0..20 {
            for col in 0..20 {
                let (x, y) = tile.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                let in_shell = (2.03..18.03).contains(&x) && (2.03..18.03).contains(&y);
                let in_hole = (8.03..12.03).contains(&x) && (8.03..12.03).contains(&y);
                assert_eq!(tile.get(col, row) == Some(4), in_shell && !in_hole, "({col}, {row})");
            }
        }
    }

    #[test]
    fn test_grid_fit_snaps_outward() {
        let grid = TargetGrid { crs: CrsCode::epsg(5070), resolution: 10.0, origin: (0.0, 0.0) };

        let (transform, width, height) = grid.fit(&BoundingBox::new(5.0, -25.0, 31.0, -1.0)).unwrap();
        assert_eq!(transform.origin(), (0.0, 0.0));
        assert_eq!((width, height), (4, 3));

        // edges already on grid lines add nothing
        let (transform, width, height) = grid.fit(&BoundingBox::new(10.0, -30.0, 30.0, -10.0)).unwrap();
        assert_eq!(transform.origin(), (10.0, -10.0));
        assert_eq!((width, height), (2, 2));

        assert!(grid.fit(&BoundingBox::new(10.0, -10.0, 10.0, -10.0)).is_none());
    }

    #[test]
    fn test_split_tile_gets_whole_tile_resolution() {
        let whole = lonlat_tile();
        let left = crop(&whole, PixelWindow { col_off: 0, row_off: 0, width: 40, height: 120 });
        let right = crop(&whole, PixelWindow { col_off: 40, row_off: 0, width: 80, height: 120 });
        let target = CrsCode::epsg(5070);

        let whole_grid = TargetGrid::for_footprints(target, &[Footprint::of(&whole, target).unwrap()], (0.0, 0.0)).unwrap();
        let footprints = [Footprint::of(&left, target).unwrap(), Footprint::of(&right, target).unwrap()];
        // on their own the halves would get different pixel sizes
        assert!((footprints[0].resolution - footprints[1].resolution).abs() > 1.0);

        let grid = TargetGrid::for_footprints(target, &footprints, (0.0, 0.0)).unwrap();
        let relative = (grid.resolution - whole_grid.resolution).abs() / whole_grid.resolution;
        assert!(relative < 1e-6, "{} vs {}", grid.resolution, whole_grid.resolution);

        let a = reproject_onto(&left, &grid).unwrap();
        let b = reproject_onto(&right, &grid).unwrap();
        assert!(grid.is_aligned(&a.transform));
        assert!(grid.is_aligned(&b.transform));
    }

    #[test]
    fn test_tile_on_lattice_is_unchanged() {
        let tile = RasterTile::filled(
            3,
            50,
            40,
            GeoTransform::from_origin(1000.0, 2000.0, 30.0, 30.0),
            CrsCode::epsg(5070),
            Some(0),
        );
        let footprint = Footprint::of(&tile, CrsCode::epsg(5070)).unwrap();
        let grid = TargetGrid::for_footprints(CrsCode::epsg(5070), &[footprint], (7.0, 7.0)).unwrap();
        assert_eq!(grid.origin, (1000.0, 2000.0));
        assert_eq!(reproject_onto(&tile, &grid).unwrap(), tile);
    }

    #[test]
    fn test_off_lattice_tile_is_resampled_onto_grid() {
        let tile = RasterTile::filled(
            3,
            20,
            20,
            GeoTransform::from_origin(15.0, 615.0, 30.0, 30.0),
            CrsCode::epsg(5070),
            Some(0),
        );
        let grid = TargetGrid { crs: CrsCode::epsg(5070), resolution: 30.0, origin: (0.0, 0.0) };
        let out = reproject_onto(&tile, &grid).unwrap();

        assert!(grid.is_aligned(&out.transform));
        assert_eq!(out.transform.origin(), (0.0, 630.0));
        assert_eq!((out.width, out.height), (21, 21));
        assert!(out.pixels.iter().all(|&v| v == 0 || v == 3));
    }

    #[test]
    fn test_unsupported_target() {
        let tile = lonlat_tile();
        let result = reproject_nearest(&tile, CrsCode::epsg(999_999));
        assert!(matches!(result, Err(ClipError::Projection(_))));
    }
}
