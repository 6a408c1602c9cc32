#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`crs_select`]: Equal-area CRS choice from the AOI's location
//! - [`clip`]: Clip a tile to the AOI and reproject it with nearest neighbour
//! - [`mosaic`]: Merge clipped tiles, first valid value wins, whole or one at a time
//! - [`histogram`]: Class counts and the `List(<class>)` JSON report
//! - [`pipeline`]: Run all of the above over a tile list ([`summarize`])
//! - [`geometry`]: AOI input, bounding boxes and projections
//! - [`raster`]: In-memory tiles ([`RasterTile`]) and [`GeoTransform`]
//! - [`geotiff_reader`]: Decode single-band GeoTIFF tiles, whole or windowed
//! - [`geotiff_writer`]: Write rasters to GeoTIFF files
//! - [`range_reader`]: Seekable HTTP `Range` reads for remote tiles
//! - [`source`]: Tile discovery from STAC, directories or fixed lists
//! - [`transient`]: Run-scoped on-disk storage for clipped tiles
//! - [`logging`]: stderr log setup for the binary

// ============================================================================
// Public modules
// ============================================================================

pub mod casting;
pub mod clip;
pub mod crs_select;
pub mod geometry;
pub mod geotiff_reader;
pub mod geotiff_writer;
pub mod histogram;
pub mod logging;
pub mod mosaic;
pub mod pipeline;
pub mod range_reader;
pub mod raster;
pub mod source;
pub mod transient;

// ============================================================================
// Pipeline
// ============================================================================
// Primary API: summarize(&aoi, &tiles, &SummaryOptions::default()).await

pub use pipeline::{
    build_mosaic,
    summarize,
    summarize_tiles,
    MosaicRun,
    PipelineError,
    SummaryOptions,
    SummaryReport,
};

// ============================================================================
// Core stages
// ============================================================================

pub use crs_select::{select_equal_area_crs, Region, GLOBAL_FALLBACK, REGIONS};
pub use clip::{clip_and_reproject, clip_native, clip_tile, reproject_onto, ClipError, Footprint, TargetGrid};
pub use mosaic::{merge, Mosaic, MosaicError};
pub use histogram::{tabulate, Histogram};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{Aoi, BoundingBox, CrsCode, GeometryError};
pub use geometry::projection::{
    project_point,
    get_proj_string,
    is_geographic_crs,
    CoordTransformer,
};

// ============================================================================
// Rasters
// ============================================================================

pub use raster::{GeoTransform, RasterTile};

pub use geotiff_reader::{
    read_tile,
    GeoTiffReadError,
    PixelWindow,
    TileReader,
    TileStream,
};

pub use range_reader::HttpRangeReader;

pub use geotiff_writer::{
    GeoTiffCompression,
    GeoTiffWriteError,
    GeoTiffWriter,
};

// ============================================================================
// Tile Discovery
// ============================================================================

pub use source::{
    CatalogError,
    LocalScanOptions,
    LocalTileCatalog,
    StacCatalog,
    StacConfig,
    StaticCatalog,
    TileCatalog,
    TileLocation,
};

pub use transient::{TransientError, TransientStore, TransientTile};
