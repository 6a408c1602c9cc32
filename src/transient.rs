//! Run-scoped on-disk storage for clipped tiles.
//!
//! A [`TransientStore`] owns a temporary directory and a handle for every
//! tile written into it. [`TransientStore::release_all`] deletes them all and
//! must be called on every exit path; dropping the store only cleans up the
//! directory as a last resort.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::geotiff_reader::{read_tile, GeoTiffReadError};
use crate::geotiff_writer::{GeoTiffCompression, GeoTiffWriteError, GeoTiffWriter};
use crate::raster::RasterTile;
use crate::source::TileLocation;

/// Error type for transient tile storage
#[derive(Debug)]
pub enum TransientError {
    /// Creating or deleting files failed
    Io(std::io::Error),
    /// Writing a tile failed
    Write(GeoTiffWriteError),
    /// Reading a tile back failed
    Read(GeoTiffReadError),
    /// The handle does not belong to this store or was already released
    UnknownTile(PathBuf),
}

impl std::fmt::Display for TransientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Transient storage I/O error: {e}"),
            Self::Write(e) => write!(f, "Failed to write transient tile: {e}"),
            Self::Read(e) => write!(f, "Failed to read transient tile: {e}"),
            Self::UnknownTile(path) => write!(f, "Unknown transient tile {}", path.display()),
        }
    }
}

impl std::error::Error for TransientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Write(e) => Some(e),
            Self::Read(e) => Some(e),
            Self::UnknownTile(_) => None,
        }
    }
}

impl From<std::io::Error> for TransientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<GeoTiffWriteError> for TransientError {
    fn from(e: GeoTiffWriteError) -> Self {
        Self::Write(e)
    }
}

impl From<GeoTiffReadError> for TransientError {
    fn from(e: GeoTiffReadError) -> Self {
        Self::Read(e)
    }
}

/// Handle to one stored tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientTile {
    path: PathBuf,
}

impl TransientTile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Temporary directory of spilled GeoTIFF tiles
pub struct TransientStore {
    dir: Option<TempDir>,
    tiles: Vec<TransientTile>,
    compression: GeoTiffCompression,
    next_id: usize,
}

impl TransientStore {
    /// Create a fresh temporary directory inside `parent`.
    ///
    /// # Errors
    /// Returns [`TransientError::Io`] if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(parent: P, compression: GeoTiffCompression) -> Result<Self, TransientError> {
        std::fs::create_dir_all(parent.as_ref())?;
        let dir = tempfile::Builder::new()
            .prefix("cogsummary-")
            .tempdir_in(parent.as_ref())?;
        debug!(dir = %dir.path().display(), "Created transient tile store");
        Ok(Self {
            dir: Some(dir),
            tiles: Vec::new(),
            compression,
            next_id: 0,
        })
    }

    /// Directory holding the tiles, `None` once released
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Number of tiles currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Write a tile to a new GeoTIFF in the store.
    ///
    /// # Errors
    /// Returns an error if the store was released or the write fails.
    pub fn store(&mut self, tile: &RasterTile) -> Result<TransientTile, TransientError> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| TransientError::UnknownTile(PathBuf::new()))?;
        let path = dir.path().join(format!("clip-{:05}.tif", self.next_id));
        self.next_id += 1;

        // register before writing so a partial file is still released
        let handle = TransientTile { path };
        self.tiles.push(handle.clone());
        GeoTiffWriter::new(tile)
            .compression(self.compression)
            .write(&handle.path)?;
        Ok(handle)
    }

    /// Read a stored tile back into memory.
    ///
    /// # Errors
    /// Returns [`TransientError::UnknownTile`] for a foreign or released
    /// handle, and read errors otherwise.
    pub fn load(&self, tile: &TransientTile) -> Result<RasterTile, TransientError> {
        if !self.tiles.contains(tile) {
            return Err(TransientError::UnknownTile(tile.path.clone()));
        }
        Ok(read_tile(&TileLocation::Local(tile.path.clone()))?)
    }

    /// Delete every stored tile and the directory.
    ///
    /// All deletions are attempted; the first failure is returned.
    ///
    /// # Errors
    /// Returns the first I/O error hit while deleting.
    pub fn release_all(&mut self) -> Result<(), TransientError> {
        let mut first_error = None;

        for tile in self.tiles.drain(..) {
            match std::fs::remove_file(&tile.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %tile.path.display(), error = %e, "Failed to delete transient tile");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(dir = %path.display(), error = %e, "Failed to delete transient directory");
                first_error.get_or_insert(e);
            } else {
                debug!(dir = %path.display(), "Released transient tile store");
            }
        }

        match first_error {
            Some(e) => Err(TransientError::Io(e)),
            None => Ok(()),
        }
    }
}

impl Drop for TransientStore {
    fn drop(&mut self) {
        if self.dir.is_some() {
            warn!("Transient tile store dropped without release_all");
            let _ = self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CrsCode;
    use crate::raster::GeoTransform;

    fn tile(value: i32) -> RasterTile {
        RasterTile::filled(
            value,
            8,
            8,
            GeoTransform::from_origin(0.0, 80.0, 10.0, 10.0),
            CrsCode::esri(102022),
            Some(0),
        )
    }

    #[test]
    fn test_store_and_load() {
        let parent = tempfile::tempdir().unwrap();
        let mut store = TransientStore::new(parent.path(), GeoTiffCompression::Deflate).unwrap();

        let a = store.store(&tile(1)).unwrap();
        let b = store.store(&tile(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.load(&b).unwrap(), tile(2));

        store.release_all().unwrap();
        assert!(!a.path().exists());
        assert!(store.dir().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_removes_directory() {
        let parent = tempfile::tempdir().unwrap();
        let mut store = TransientStore::new(parent.path(), GeoTiffCompression::None).unwrap();
        store.store(&tile(1)).unwrap();
        let dir = store.dir().unwrap().to_path_buf();

        store.release_all().unwrap();
        assert!(!dir.exists());
        // releasing twice is harmless
        store.release_all().unwrap();
    }

    #[test]
    fn test_load_after_release_fails() {
        let parent = tempfile::tempdir().unwrap();
        let mut store = TransientStore::new(parent.path(), GeoTiffCompression::None).unwrap();
        let handle = store.store(&tile(1)).unwrap();
        store.release_all().unwrap();
        assert!(matches!(store.load(&handle), Err(TransientError::UnknownTile(_))));
        assert!(store.store(&tile(1)).is_err());
    }

    #[test]
    fn test_drop_cleans_up() {
        let parent = tempfile::tempdir().unwrap();
        let dir = {
            let mut store = TransientStore::new(parent.path(), GeoTiffCompression::None).unwrap();
            store.store(&tile(1)).unwrap();
            store.dir().unwrap().to_path_buf()
        };
        assert!(!dir.exists());
    }
}
