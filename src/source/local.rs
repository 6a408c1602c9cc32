//! Local filesystem tile catalog.
//!
//! Scans a directory for `GeoTIFF` files and keeps those whose footprint
//! intersects the AOI.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::geometry::projection::CoordTransformer;
use crate::geometry::{Aoi, BoundingBox};
use crate::geotiff_reader::{read_header_from, TileHeader};

use super::{CatalogError, TileCatalog, TileLocation};

/// Options for scanning local directories.
#[derive(Debug, Clone)]
pub struct LocalScanOptions {
    /// Minimum directory depth to scan (0 = include root files)
    pub min_depth: usize,
    /// Maximum directory depth to scan (None = unlimited)
    pub max_depth: Option<usize>,
    /// File extensions to consider as `GeoTIFFs` (case-insensitive)
    pub extensions: Vec<String>,
    /// Whether to follow symbolic links
    pub follow_links: bool,
}

impl Default for LocalScanOptions {
    fn default() -> Self {
        Self {
            min_depth: 0,
            max_depth: None,
            extensions: vec![
                "tif".to_string(),
                "tiff".to_string(),
                "geotiff".to_string(),
                "geotif".to_string(),
            ],
            follow_links: false,
        }
    }
}

impl LocalScanOptions {
    /// Set minimum depth
    #[must_use]
    pub fn with_min_depth(mut self, depth: usize) -> Self {
        self.min_depth = depth;
        self
    }

    /// Set maximum depth
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Follow symbolic links while scanning
    #[must_use]
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
    }
}

/// Catalog over a directory tree of GeoTIFF tiles.
pub struct LocalTileCatalog {
    root: PathBuf,
    options: LocalScanOptions,
}

impl LocalTileCatalog {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P, options: LocalScanOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All candidate files under the root, sorted by path.
    ///
    /// # Errors
    /// Returns an error if the root directory does not exist.
    pub fn scan(&self) -> Result<Vec<PathBuf>, CatalogError> {
        if !self.root.is_dir() {
            return Err(CatalogError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Directory does not exist: {}", self.root.display()),
            )));
        }

        let mut walker = WalkDir::new(&self.root)
            .min_depth(self.options.min_depth)
            .follow_links(self.options.follow_links)
            .sort_by_file_name();

        if let Some(max) = self.options.max_depth {
            walker = walker.max_depth(max);
        }

        let mut paths: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file() && self.options.matches(entry.path()))
            .map(walkdir::DirEntry::into_path)
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl TileCatalog for LocalTileCatalog {
    fn find_tiles(&self, aoi: &Aoi) -> Result<Vec<TileLocation>, CatalogError> {
        let mut tiles = Vec::new();

        for path in self.scan()? {
            let location = TileLocation::Local(path);
            let header = match read_header_from(&location) {
                Ok(header) => header,
                Err(e) => {
                    warn!(tile = %location, error = %e, "Failed to read tile header");
                    continue;
                }
            };

            match aoi_intersects(aoi, &header) {
                Ok(true) => {
                    debug!(tile = %location, crs = %header.crs, "Tile intersects AOI");
                    tiles.push(location);
                }
                Ok(false) => debug!(tile = %location, "Tile outside AOI"),
                Err(e) => warn!(tile = %location, error = %e, "Cannot compare tile with AOI"),
            }
        }

        Ok(tiles)
    }
}

/// Bounding-box test in the tile's CRS
fn aoi_intersects(aoi: &Aoi, header: &TileHeader) -> Result<bool, String> {
    let aoi_bounds = if aoi.crs() == header.crs {
        aoi.bounds()
    } else {
        let transformer = CoordTransformer::new(aoi.crs(), header.crs)?;
        let mut points = Vec::new();
        for polygon in &aoi.geometry().0 {
            for c in &polygon.exterior().0 {
                points.push(transformer.transform(c.x, c.y)?);
            }
        }
        BoundingBox::from_points(points).ok_or_else(|| "AOI has no vertices".to_string())?
    };
    Ok(header.bounds().intersects(&aoi_bounds))
}
