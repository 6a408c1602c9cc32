//! Tile discovery.
//!
//! A [`TileCatalog`] turns an AOI into the ordered list of tiles to summarize.
//! The pipeline only needs [`TileLocation`]s it can open; how they were found
//! (a STAC search, a directory scan, a fixed list) is up to the catalog.
//!
//! # Example
//!
//! ```rust,no_run
//! use cogsummary::geometry::Aoi;
//! use cogsummary::source::{LocalScanOptions, LocalTileCatalog, TileCatalog};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let aoi = Aoi::from_geojson_file("aoi.geojson")?;
//!     let catalog = LocalTileCatalog::new("/path/to/tiles", LocalScanOptions::default());
//!
//!     for tile in catalog.find_tiles(&aoi)? {
//!         println!("Found tile: {tile}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod local;
pub mod stac;

pub use local::{LocalScanOptions, LocalTileCatalog};
pub use stac::{StacCatalog, StacConfig};

use std::fmt;
use std::path::PathBuf;

use crate::geometry::{Aoi, GeometryError};

/// Location of a tile (local path or remote URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileLocation {
    /// Local filesystem path
    Local(PathBuf),
    /// HTTP(S) URL
    Http(String),
}

impl TileLocation {
    /// Interpret a user-supplied reference: `http://` and `https://` are URLs,
    /// anything else is a path.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Http(reference.to_string())
        } else {
            Self::Local(PathBuf::from(reference))
        }
    }
}

impl fmt::Display for TileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileLocation::Local(path) => write!(f, "{}", path.display()),
            TileLocation::Http(url) => f.write_str(url),
        }
    }
}

/// Error type for tile discovery
#[derive(Debug)]
pub enum CatalogError {
    /// I/O error (missing directory, unreadable file)
    Io(std::io::Error),
    /// HTTP transport or status error
    Http(String),
    /// The catalog responded with something unexpected
    InvalidResponse(String),
    /// The AOI could not be expressed for the query
    Geometry(GeometryError),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Http(e) => write!(f, "Catalog request failed: {e}"),
            Self::InvalidResponse(e) => write!(f, "Invalid catalog response: {e}"),
            Self::Geometry(e) => write!(f, "Invalid query geometry: {e}"),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Geometry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<GeometryError> for CatalogError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

/// Trait for finding the tiles that cover an AOI.
///
/// The returned order is the merge order: earlier tiles win where tiles overlap.
pub trait TileCatalog: Send + Sync {
    /// Find tiles intersecting the AOI.
    ///
    /// # Errors
    /// Returns an error if the catalog cannot be queried.
    fn find_tiles(&self, aoi: &Aoi) -> Result<Vec<TileLocation>, CatalogError>;
}

/// A fixed list of tiles, returned as given
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tiles: Vec<TileLocation>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new(tiles: Vec<TileLocation>) -> Self {
        Self { tiles }
    }
}

impl TileCatalog for StaticCatalog {
    fn find_tiles(&self, _aoi: &Aoi) -> Result<Vec<TileLocation>, CatalogError> {
        Ok(self.tiles.clone())
    }
}
