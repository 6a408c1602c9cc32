//! End-to-end summary of an AOI over a list of tiles.
//!
//! CRS selection, then one native clip per tile on the blocking pool (bounded
//! by a semaphore), then a merge onto one shared grid in catalog order, then
//! tabulation. Clip results are merged in input order regardless of which
//! task finishes first, so the mosaic and the histogram do not depend on
//! scheduling.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clip::{clip_native, clip_tile_native, reproject_onto, ClipError, Footprint, TargetGrid};
use crate::crs_select::select_equal_area_crs;
use crate::geometry::{Aoi, CrsCode, GeometryError};
use crate::geotiff_writer::GeoTiffCompression;
use crate::histogram::{tabulate, Histogram};
use crate::mosaic::{Mosaic, MosaicError};
use crate::raster::RasterTile;
use crate::source::TileLocation;
use crate::transient::{TransientError, TransientStore, TransientTile};

/// Error type for a summary run
#[derive(Debug)]
pub enum PipelineError {
    /// The catalog returned no tiles
    NoTiles,
    /// No tile overlapped the AOI
    NoOverlap,
    /// The AOI could not be projected into the target CRS
    Geometry(GeometryError),
    /// Clipping one tile failed
    Clip { tile: String, source: ClipError },
    /// No output grid fits the clipped tiles
    Grid(ClipError),
    /// Merging the clipped tiles failed
    Mosaic(MosaicError),
    /// Spilling clipped tiles to disk failed
    Transient(TransientError),
    /// A clip task panicked or was cancelled
    Join(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTiles => write!(f, "No tiles found for the AOI"),
            Self::NoOverlap => write!(f, "No tile overlaps the AOI"),
            Self::Geometry(e) => write!(f, "Failed to project the AOI: {e}"),
            Self::Clip { tile, source } => write!(f, "Failed to clip {tile}: {source}"),
            Self::Grid(e) => write!(f, "Failed to build the output grid: {e}"),
            Self::Mosaic(e) => write!(f, "Failed to merge tiles: {e}"),
            Self::Transient(e) => write!(f, "{e}"),
            Self::Join(e) => write!(f, "Clip task failed: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Geometry(e) => Some(e),
            Self::Clip { source, .. } => Some(source),
            Self::Grid(e) => Some(e),
            Self::Mosaic(e) => Some(e),
            Self::Transient(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GeometryError> for PipelineError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

impl From<MosaicError> for PipelineError {
    fn from(e: MosaicError) -> Self {
        Self::Mosaic(e)
    }
}

impl From<TransientError> for PipelineError {
    fn from(e: TransientError) -> Self {
        Self::Transient(e)
    }
}

/// Options for a summary run
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    /// Tiles clipped at the same time
    pub max_concurrent_tiles: usize,
    /// Write clipped tiles under this directory instead of holding them in
    /// memory; the merge then loads them back one at a time
    pub spill_dir: Option<PathBuf>,
    /// Compression for spilled tiles
    pub compression: GeoTiffCompression,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tiles: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            spill_dir: None,
            compression: GeoTiffCompression::default(),
        }
    }
}

impl SummaryOptions {
    #[must_use]
    pub fn with_max_concurrent_tiles(mut self, n: usize) -> Self {
        self.max_concurrent_tiles = n.max(1);
        self
    }

    #[must_use]
    pub fn with_spill_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }
}

/// Result of a summary run
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub histogram: Histogram,
    /// Equal-area CRS the tiles were merged in
    pub target_crs: CrsCode,
    pub tiles_merged: usize,
    /// Tiles dropped for not overlapping the AOI
    pub tiles_skipped: usize,
    pub width: usize,
    pub height: usize,
}

impl SummaryReport {
    /// The histogram as report JSON
    ///
    /// # Errors
    /// See [`Histogram::to_json`].
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        self.histogram.to_json()
    }
}

/// A merged mosaic and the bookkeeping of the run that built it
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicRun {
    pub mosaic: RasterTile,
    pub target_crs: CrsCode,
    pub tiles_merged: usize,
    pub tiles_skipped: usize,
}

impl MosaicRun {
    /// Tabulate the mosaic
    #[must_use]
    pub fn summary(&self) -> SummaryReport {
        let histogram = tabulate(&self.mosaic);
        debug!(classes = histogram.len(), pixels = histogram.total(), "Tabulated mosaic");

        SummaryReport {
            histogram,
            target_crs: self.target_crs,
            tiles_merged: self.tiles_merged,
            tiles_skipped: self.tiles_skipped,
            width: self.mosaic.width,
            height: self.mosaic.height,
        }
    }
}

/// One clipped tile waiting for the merge
struct Pending {
    label: String,
    footprint: Footprint,
    nodata: i32,
    stored: Stored,
}

enum Stored {
    Memory(RasterTile),
    Spilled(TransientTile),
}

/// Native clips by input position, held in memory or spilled as they arrive
struct Clipped {
    store: Option<TransientStore>,
    slots: Vec<Option<Pending>>,
    skipped: usize,
}

impl Clipped {
    fn new(store: Option<TransientStore>, count: usize) -> Self {
        Self {
            store,
            slots: std::iter::repeat_with(|| None).take(count).collect(),
            skipped: 0,
        }
    }

    fn keep(
        &mut self,
        index: usize,
        label: String,
        clip: Option<(RasterTile, Footprint)>,
    ) -> Result<(), TransientError> {
        let Some((tile, footprint)) = clip else {
            self.skipped += 1;
            return Ok(());
        };
        let nodata = tile.nodata_or_default();
        let stored = match &mut self.store {
            Some(store) => Stored::Spilled(store.store(&tile)?),
            None => Stored::Memory(tile),
        };
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(Pending { label, footprint, nodata, stored });
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(store) = &mut self.store {
            if let Err(e) = store.release_all() {
                warn!(error = %e, "Failed to release transient tiles");
            }
        }
    }

    /// Merge every clip in input order and release the spilled files
    fn assemble(mut self, target: CrsCode, anchor: (f64, f64)) -> Result<MosaicRun, PipelineError> {
        let merged = self.merge_all(target, anchor);
        let released = self.store.as_mut().map_or(Ok(()), TransientStore::release_all);
        let run = merged?;
        released?;
        Ok(run)
    }

    /// Place all clips on one grid, then resample and paste them one at a time
    fn merge_all(&mut self, target: CrsCode, anchor: (f64, f64)) -> Result<MosaicRun, PipelineError> {
        let pending: Vec<Pending> = self.slots.drain(..).flatten().collect();
        let Some(nodata) = pending.first().map(|p| p.nodata) else {
            return Err(PipelineError::NoOverlap);
        };

        let footprints: Vec<Footprint> = pending.iter().map(|p| p.footprint.clone()).collect();
        let grid = TargetGrid::for_footprints(target, &footprints, anchor).map_err(PipelineError::Grid)?;
        let bounds = footprints
            .iter()
            .filter_map(|f| grid.fit(&f.envelope))
            .map(|(transform, width, height)| transform.bounds(width, height))
            .reduce(|a, b| a.union(&b))
            .ok_or_else(|| {
                PipelineError::Grid(ClipError::InvalidGrid("no clipped tile covers a grid cell".to_string()))
            })?;

        let tiles_merged = pending.len();
        let mut mosaic = Mosaic::new(bounds, (grid.resolution, grid.resolution), target, nodata);
        for Pending { label, stored, .. } in pending {
            let tile = match stored {
                Stored::Memory(tile) => tile,
                Stored::Spilled(handle) => match &self.store {
                    Some(store) => store.load(&handle)?,
                    None => return Err(TransientError::UnknownTile(handle.path().to_path_buf()).into()),
                },
            };
            let placed = reproject_onto(&tile, &grid).map_err(|source| PipelineError::Clip { tile: label, source })?;
            mosaic.add(&placed)?;
        }

        Ok(MosaicRun {
            mosaic: mosaic.into_raster(),
            target_crs: target,
            tiles_merged,
            tiles_skipped: self.skipped,
        })
    }
}

/// Top-left corner of the AOI in `target`, where the output lattice is pinned
fn aoi_anchor(aoi: &Aoi, target: CrsCode) -> Result<(f64, f64), PipelineError> {
    use geo::BoundingRect;

    let rect = aoi
        .geometry_in(target)?
        .bounding_rect()
        .ok_or_else(|| PipelineError::Geometry(GeometryError::Empty))?;
    Ok((rect.min().x, rect.max().y))
}

/// Attach the target-CRS footprint to a native clip
fn measure(
    clip: Option<RasterTile>,
    target: CrsCode,
) -> Result<Option<(RasterTile, Footprint)>, ClipError> {
    clip.map(|tile| Footprint::of(&tile, target).map(|footprint| (tile, footprint)))
        .transpose()
}

/// Summarize the AOI over `tiles`, merged in the given order.
///
/// # Errors
/// Returns [`PipelineError::NoTiles`] for an empty list,
/// [`PipelineError::NoOverlap`] if every tile misses the AOI, and the first
/// clip, spill or merge failure otherwise.
pub async fn summarize(
    aoi: &Aoi,
    tiles: &[TileLocation],
    options: &SummaryOptions,
) -> Result<SummaryReport, PipelineError> {
    Ok(build_mosaic(aoi, tiles, options).await?.summary())
}

/// Clip every tile and merge the clips into one mosaic in the target CRS.
///
/// Clips run on the blocking pool, at most `max_concurrent_tiles` at a time,
/// in the tiles' own CRS. Each result is kept (or spilled) as soon as it
/// arrives. All clips are then resampled onto one [`TargetGrid`] and pasted
/// in input order, so the mosaic does not depend on scheduling and adjacent
/// tiles meet without gaps. With a spill directory only the mosaic and one
/// tile are in memory during the merge.
///
/// # Errors
/// See [`summarize`].
pub async fn build_mosaic(
    aoi: &Aoi,
    tiles: &[TileLocation],
    options: &SummaryOptions,
) -> Result<MosaicRun, PipelineError> {
    if tiles.is_empty() {
        return Err(PipelineError::NoTiles);
    }

    let target = select_equal_area_crs(aoi);
    let anchor = aoi_anchor(aoi, target)?;
    info!(tiles = tiles.len(), crs = %target, "Summarizing AOI");

    let store = options
        .spill_dir
        .as_ref()
        .map(|dir| TransientStore::new(dir, options.compression))
        .transpose()?;
    let mut clipped = Clipped::new(store, tiles.len());

    if let Err(e) = clip_all(aoi, tiles, target, options, &mut clipped).await {
        clipped.release();
        return Err(e);
    }

    tokio::task::spawn_blocking(move || clipped.assemble(target, anchor))
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))?
}

/// Clip every tile, keeping each result as it completes.
///
/// The first failure cancels the rest: waiting clips are aborted and clips
/// already handed to the blocking pool return before reading.
async fn clip_all(
    aoi: &Aoi,
    tiles: &[TileLocation],
    target: CrsCode,
    options: &SummaryOptions,
    clipped: &mut Clipped,
) -> Result<(), PipelineError> {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_tiles.max(1)));
    let cancelled = Arc::new(AtomicBool::new(false));
    let shared_aoi = Arc::new(aoi.clone());
    let mut tasks = JoinSet::new();

    for (index, location) in tiles.iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let cancelled = Arc::clone(&cancelled);
        let aoi = Arc::clone(&shared_aoi);
        let location = location.clone();
        tasks.spawn(async move {
            let label = location.to_string();
            let outcome = clip_one(location, aoi, target, semaphore, cancelled).await;
            (index, label, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let kept = match joined {
            Ok((index, label, Ok(clip))) => clipped.keep(index, label, clip).map_err(PipelineError::from),
            Ok((_, _, Err(e))) => Err(e),
            Err(e) => Err(PipelineError::Join(e.to_string())),
        };
        if let Err(e) = kept {
            cancelled.store(true, Ordering::Relaxed);
            tasks.abort_all();
            debug!(error = %e, remaining = tasks.len(), "Cancelled remaining clips");
            return Err(e);
        }
    }
    Ok(())
}

async fn clip_one(
    location: TileLocation,
    aoi: Arc<Aoi>,
    target: CrsCode,
    semaphore: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
) -> Result<Option<(RasterTile, Footprint)>, PipelineError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))?;
    let label = location.to_string();

    tokio::task::spawn_blocking(move || -> Result<_, ClipError> {
        if cancelled.load(Ordering::Relaxed) {
            return Ok(None);
        }
        measure(clip_native(&location, &aoi)?, target)
    })
    .await
    .map_err(|e| PipelineError::Join(e.to_string()))?
    .map_err(|source| PipelineError::Clip { tile: label, source })
}

/// Summarize the AOI over tiles already decoded into memory.
///
/// # Errors
/// Same conditions as [`summarize`], without the I/O ones.
pub fn summarize_tiles(aoi: &Aoi, tiles: &[RasterTile]) -> Result<SummaryReport, PipelineError> {
    if tiles.is_empty() {
        return Err(PipelineError::NoTiles);
    }

    let target = select_equal_area_crs(aoi);
    let anchor = aoi_anchor(aoi, target)?;
    let mut clipped = Clipped::new(None, tiles.len());

    for (index, tile) in tiles.iter().enumerate() {
        let label = format!("tile {index}");
        let clip = clip_tile_native(tile, aoi)
            .and_then(|clip| measure(clip, target))
            .map_err(|source| PipelineError::Clip { tile: label.clone(), source })?;
        clipped.keep(index, label, clip)?;
    }

    Ok(clipped.assemble(target, anchor)?.summary())
}
