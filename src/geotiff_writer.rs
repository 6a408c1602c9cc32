//! GeoTIFF writer for categorical rasters
//!
//! This module writes [`RasterTile`] data as single-band `i32` GeoTIFFs. It uses
//! pure Rust libraries (no GDAL dependency) and writes the georeferencing tags
//! [`crate::geotiff_reader`] needs to read the tile back: pixel scale and
//! tiepoint (or a model transformation for rotated grids), a GeoKey directory
//! and `GDAL_NODATA`.
//!
//! EPSG codes go straight into the GeoKey directory. Codes from other
//! authorities do not fit a GeoKey, so they are written as user-defined with
//! an `AUTH:CODE` citation.
//!
//! # Example
//!
//! ```rust,no_run
//! use cogsummary::geometry::CrsCode;
//! use cogsummary::geotiff_writer::GeoTiffCompression;
//! use cogsummary::raster::{GeoTransform, RasterTile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let tile = RasterTile::filled(
//!         1, 256, 256,
//!         GeoTransform::from_origin(0.0, 0.0, 10.0, 10.0),
//!         CrsCode::epsg(5070),
//!         Some(0),
//!     );
//!     tile.geotiff_writer()
//!         .compression(GeoTiffCompression::Deflate)
//!         .write("landcover.tif")?;
//!     Ok(())
//! }
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::encoder::colortype::GrayI32;
use tiff::encoder::{Compression, DeflateLevel, TiffEncoder};
use tiff::tags::Tag;

use crate::casting::usize_to_u32;
use crate::geometry::projection::Authority;
use crate::raster::RasterTile;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;
const GEO_ASCII_PARAMS_TAG: u16 = 34737;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression; class rasters compress very well
    #[default]
    Deflate,
}

/// Error type for GeoTIFF writing operations
#[derive(Debug)]
pub enum GeoTiffWriteError {
    /// I/O error during file operations
    Io(std::io::Error),
    /// TIFF encoding error
    TiffEncode(String),
    /// Invalid raster data
    InvalidData(String),
}

impl std::fmt::Display for GeoTiffWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::TiffEncode(e) => write!(f, "TIFF encoding error: {e}"),
            Self::InvalidData(e) => write!(f, "Invalid data: {e}"),
        }
    }
}

impl std::error::Error for GeoTiffWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GeoTiffWriteError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tiff::TiffError> for GeoTiffWriteError {
    fn from(e: tiff::TiffError) -> Self {
        Self::TiffEncode(e.to_string())
    }
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    raster: &'a RasterTile,
    compression: GeoTiffCompression,
    rows_per_strip: Option<u32>,
}

impl<'a> GeoTiffWriter<'a> {
    /// Create a new GeoTIFF writer for a raster tile
    #[must_use]
    pub fn new(raster: &'a RasterTile) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
            rows_per_strip: None,
        }
    }

    /// Set the compression method
    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the strip height. Small strips let ranged readers fetch less.
    #[must_use]
    pub fn rows_per_strip(mut self, rows: u32) -> Self {
        self.rows_per_strip = Some(rows.max(1));
        self
    }

    /// Write to a file path
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<(), GeoTiffWriteError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write to an in-memory buffer
    pub fn to_bytes(self) -> Result<Vec<u8>, GeoTiffWriteError> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Write to any writer that implements Write + Seek
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<(), GeoTiffWriteError> {
        let raster = self.raster;

        if raster.width == 0 || raster.height == 0 {
            return Err(GeoTiffWriteError::InvalidData(
                "Raster has zero dimensions".to_string(),
            ));
        }

        if raster.pixels.len() != raster.pixel_count() {
            return Err(GeoTiffWriteError::InvalidData(format!(
                "Raster has {} pixels, expected {}x{}",
                raster.pixels.len(),
                raster.width,
                raster.height
            )));
        }

        let width = usize_to_u32(raster.width).map_err(GeoTiffWriteError::InvalidData)?;
        let height = usize_to_u32(raster.height).map_err(GeoTiffWriteError::InvalidData)?;

        let compression = match self.compression {
            GeoTiffCompression::None => Compression::Uncompressed,
            GeoTiffCompression::Lzw => Compression::Lzw,
            GeoTiffCompression::Deflate => Compression::Deflate(DeflateLevel::Fast),
        };

        let mut encoder = TiffEncoder::new(writer)?.with_compression(compression);
        let mut image = encoder.new_image::<GrayI32>(width, height)?;
        if let Some(rows) = self.rows_per_strip {
            image.rows_per_strip(rows)?;
        }
        self.write_geotiff_tags(image.encoder())?;
        image.write_data(&raster.pixels)?;
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    ) -> Result<(), GeoTiffWriteError> {
        let raster = self.raster;
        let gt = raster.transform.0;

        if raster.transform.is_north_up() {
            // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
            let pixel_scale = [gt[1], -gt[5], 0.0];
            dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

            // ModelTiepoint: [I, J, K, X, Y, Z]
            // Ties pixel (0, 0) to the top-left corner
            let tiepoint = [0.0, 0.0, 0.0, gt[0], gt[3], 0.0];
            dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;
        } else {
            // Row-major 4x4 affine matrix
            let matrix = [
                gt[1], gt[2], 0.0, gt[0], //
                gt[4], gt[5], 0.0, gt[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(Tag::ModelTransformationTag, matrix.as_slice())?;
        }

        let (geokeys, ascii_params) = self.build_geokey_directory();
        dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;
        if let Some(ascii) = ascii_params {
            dir.write_tag(Tag::GeoAsciiParamsTag, ascii.as_str())?;
        }

        if let Some(nodata) = raster.nodata {
            dir.write_tag(Tag::GdalNodata, nodata.to_string().as_str())?;
        }

        Ok(())
    }

    /// GeoKeyDirectory shorts plus the GeoAsciiParams text, if any key needs it
    fn build_geokey_directory(&self) -> (Vec<u16>, Option<String>) {
        // GeoKeyDirectory structure:
        // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
        //  KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]
        let crs = self.raster.crs;
        let is_geographic = crs.is_geographic();

        let mut entries: Vec<[u16; 4]> = vec![
            [
                GT_MODEL_TYPE_GEO_KEY,
                0, // TIFFTagLocation = 0 means value is in Value_Offset
                1,
                if is_geographic {
                    MODEL_TYPE_GEOGRAPHIC
                } else {
                    MODEL_TYPE_PROJECTED
                },
            ],
            [GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA],
        ];

        let crs_key = if is_geographic {
            GEOGRAPHIC_TYPE_GEO_KEY
        } else {
            PROJECTED_CS_TYPE_GEO_KEY
        };

        let epsg_short = match crs.authority {
            Authority::Epsg => u16::try_from(crs.code).ok().filter(|&c| c != USER_DEFINED),
            Authority::Esri => None,
        };

        let ascii = match epsg_short {
            Some(_) => None,
            None => Some(format!("{crs}|")),
        };

        if let Some(citation) = &ascii {
            #[allow(clippy::cast_possible_truncation)]
            let len = citation.len() as u16;
            entries.push([GT_CITATION_GEO_KEY, GEO_ASCII_PARAMS_TAG, len, 0]);
        }
        entries.push([crs_key, 0, 1, epsg_short.unwrap_or(USER_DEFINED)]);

        // keys must be sorted by ID
        entries.sort_by_key(|e| e[0]);

        #[allow(clippy::cast_possible_truncation)]
        let mut keys = vec![1, 1, 0, entries.len() as u16];
        keys.extend(entries.iter().flatten());
        (keys, ascii)
    }
}

impl RasterTile {
    /// Write this tile to a GeoTIFF file with the default compression.
    pub fn write_geotiff<P: AsRef<Path>>(&self, path: P) -> Result<(), GeoTiffWriteError> {
        GeoTiffWriter::new(self).write(path)
    }

    /// Get a GeoTIFF writer builder for more control over output options.
    #[must_use]
    pub fn geotiff_writer(&self) -> GeoTiffWriter<'_> {
        GeoTiffWriter::new(self)
    }

    /// Write this tile to bytes as a GeoTIFF.
    pub fn to_geotiff_bytes(&self) -> Result<Vec<u8>, GeoTiffWriteError> {
        GeoTiffWriter::new(self).to_bytes()
    }
}
