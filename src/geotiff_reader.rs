//! GeoTIFF reader for categorical source tiles
//!
//! Opens a [`TileLocation`] (local file or HTTP(S) URL) and decodes a single-band
//! integer GeoTIFF into a [`RasterTile`]. Georeferencing comes from the GeoTIFF
//! model tags and GeoKey directory; nodata comes from the `GDAL_NODATA` tag.
//!
//! Clipping only needs the part of a tile under the AOI, so [`TileReader::read_window`]
//! decodes just the strips or tiles that intersect a pixel window.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, warn};

use crate::geometry::CrsCode;
use crate::range_reader::HttpRangeReader;
use crate::raster::{GeoTransform, RasterTile};
use crate::source::TileLocation;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const GEOG_CITATION_GEO_KEY: u16 = 2049;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

const USER_DEFINED: u16 = 32767;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const GEO_ASCII_PARAMS_TAG: u16 = 34737;

/// TIFF SampleFormat value for IEEE floating point
const SAMPLE_FORMAT_IEEE_FP: u16 = 3;

/// Error type for GeoTIFF reading operations
#[derive(Debug)]
pub enum GeoTiffReadError {
    /// I/O error opening or reading a local file
    Io(std::io::Error),
    /// HTTP error fetching a remote tile
    Http(String),
    /// TIFF decoding error
    TiffDecode(String),
    /// The file has no usable georeferencing tags
    MissingGeoreference(String),
    /// The CRS could not be determined or is not supported
    UnsupportedCrs(String),
    /// A valid TIFF that this reader does not handle (float samples, multiband, ...)
    Unsupported(String),
    /// Pixel window outside the raster
    InvalidWindow(String),
}

impl std::fmt::Display for GeoTiffReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Http(e) => write!(f, "HTTP error: {e}"),
            Self::TiffDecode(e) => write!(f, "TIFF decoding error: {e}"),
            Self::MissingGeoreference(e) => write!(f, "Missing georeference: {e}"),
            Self::UnsupportedCrs(e) => write!(f, "Unsupported CRS: {e}"),
            Self::Unsupported(e) => write!(f, "Unsupported raster: {e}"),
            Self::InvalidWindow(e) => write!(f, "Invalid window: {e}"),
        }
    }
}

impl std::error::Error for GeoTiffReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GeoTiffReadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tiff::TiffError> for GeoTiffReadError {
    fn from(e: tiff::TiffError) -> Self {
        Self::TiffDecode(e.to_string())
    }
}

impl From<reqwest::Error> for GeoTiffReadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Byte source for a tile: a buffered local file or ranged HTTP reads
pub enum TileStream {
    File(BufReader<File>),
    Http(HttpRangeReader),
}

impl Read for TileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::File(r) => r.read(buf),
            Self::Http(r) => r.read(buf),
        }
    }
}

impl Seek for TileStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            Self::File(r) => r.seek(pos),
            Self::Http(r) => r.seek(pos),
        }
    }
}

impl TileStream {
    /// Open a tile location for reading.
    ///
    /// Remote tiles are read lazily through HTTP `Range` requests on a shared
    /// blocking client, so call this from a blocking context (a
    /// `spawn_blocking` task or a plain thread).
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the HTTP request fails.
    pub fn open(location: &TileLocation) -> Result<Self, GeoTiffReadError> {
        match location {
            TileLocation::Local(path) => Ok(Self::File(BufReader::new(File::open(path)?))),
            TileLocation::Http(url) => Ok(Self::Http(HttpRangeReader::open(url)?)),
        }
    }
}

/// Georeferencing and layout read from a tile header
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: CrsCode,
    pub nodata: Option<i32>,
}

impl TileHeader {
    #[must_use]
    pub fn bounds(&self) -> crate::geometry::BoundingBox {
        self.transform.bounds(self.width, self.height)
    }
}

/// A pixel-space rectangle: `width` x `height` pixels starting at `(col_off, row_off)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    #[must_use]
    pub fn full(width: usize, height: usize) -> Self {
        Self { col_off: 0, row_off: 0, width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// An open GeoTIFF with its header already parsed
pub struct TileReader<R: Read + Seek> {
    decoder: Decoder<R>,
    header: TileHeader,
}

impl TileReader<TileStream> {
    /// Open a tile location and parse its header.
    ///
    /// # Errors
    /// See [`TileStream::open`] and [`TileReader::new`].
    pub fn open(location: &TileLocation) -> Result<Self, GeoTiffReadError> {
        Self::new(TileStream::open(location)?)
    }
}

impl<R: Read + Seek> TileReader<R> {
    /// Wrap a reader and parse the GeoTIFF header.
    ///
    /// # Errors
    /// Returns an error if the TIFF is malformed, not single-band integer, or
    /// lacks georeferencing or a resolvable CRS.
    pub fn new(reader: R) -> Result<Self, GeoTiffReadError> {
        let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());
        let header = read_header(&mut decoder)?;
        Ok(Self { decoder, header })
    }

    #[must_use]
    pub fn header(&self) -> &TileHeader {
        &self.header
    }

    /// Decode the whole raster.
    ///
    /// # Errors
    /// Returns an error if decoding fails or samples do not fit in `i32`.
    pub fn read_all(&mut self) -> Result<RasterTile, GeoTiffReadError> {
        let pixels = decoding_result_to_i32(self.decoder.read_image()?)?;
        let h = &self.header;
        RasterTile::new(pixels, h.width, h.height, h.transform, h.crs, h.nodata)
            .map_err(GeoTiffReadError::TiffDecode)
    }

    /// Decode only the chunks covering `window`.
    ///
    /// The returned tile's transform is shifted to the window origin.
    ///
    /// # Errors
    /// Returns [`GeoTiffReadError::InvalidWindow`] if the window is empty or
    /// extends past the raster, and decode errors otherwise.
    pub fn read_window(&mut self, window: PixelWindow) -> Result<RasterTile, GeoTiffReadError> {
        let (width, height) = (self.header.width, self.header.height);
        if window.is_empty()
            || window.col_off + window.width > width
            || window.row_off + window.height > height
        {
            return Err(GeoTiffReadError::InvalidWindow(format!(
                "{window:?} does not fit a {width}x{height} raster"
            )));
        }
        if window == PixelWindow::full(width, height) {
            return self.read_all();
        }

        let (chunk_w, chunk_h) = self.decoder.chunk_dimensions();
        let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
        if chunk_w == 0 || chunk_h == 0 {
            return Err(GeoTiffReadError::TiffDecode("zero-sized chunks".to_string()));
        }
        let chunks_across = width.div_ceil(chunk_w);

        let first_cx = window.col_off / chunk_w;
        let last_cx = (window.col_off + window.width - 1) / chunk_w;
        let first_cy = window.row_off / chunk_h;
        let last_cy = (window.row_off + window.height - 1) / chunk_h;

        let mut pixels = vec![0i32; window.width * window.height];
        for cy in first_cy..=last_cy {
            for cx in first_cx..=last_cx {
                let index = u32::try_from(cy * chunks_across + cx).map_err(|_| {
                    GeoTiffReadError::TiffDecode(format!("chunk index ({cx}, {cy}) overflows"))
                })?;
                let (data_w, data_h) = self.decoder.chunk_data_dimensions(index);
                let (data_w, data_h) = (data_w as usize, data_h as usize);
                let chunk = decoding_result_to_i32(self.decoder.read_chunk(index)?)?;

                let chunk_x0 = cx * chunk_w;
                let chunk_y0 = cy * chunk_h;
                let x_start = window.col_off.max(chunk_x0);
                let x_end = (window.col_off + window.width).min(chunk_x0 + data_w);
                let y_start = window.row_off.max(chunk_y0);
                let y_end = (window.row_off + window.height).min(chunk_y0 + data_h);

                for y in y_start..y_end {
                    let src = (y - chunk_y0) * data_w + (x_start - chunk_x0);
                    let dst = (y - window.row_off) * window.width + (x_start - window.col_off);
                    let n = x_end - x_start;
                    pixels[dst..dst + n].copy_from_slice(&chunk[src..src + n]);
                }
            }
        }

        let h = &self.header;
        RasterTile::new(
            pixels,
            window.width,
            window.height,
            h.transform.window(window.col_off, window.row_off),
            h.crs,
            h.nodata,
        )
        .map_err(GeoTiffReadError::TiffDecode)
    }
}

/// Read a whole tile from a location.
///
/// # Errors
/// See [`TileReader::open`] and [`TileReader::read_all`].
pub fn read_tile(location: &TileLocation) -> Result<RasterTile, GeoTiffReadError> {
    TileReader::open(location)?.read_all()
}

/// Read only the header of a tile.
///
/// # Errors
/// See [`TileReader::open`].
pub fn read_header_from(location: &TileLocation) -> Result<TileHeader, GeoTiffReadError> {
    Ok(TileReader::open(location)?.header)
}

fn read_header<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<TileHeader, GeoTiffReadError> {
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    match decoder.colortype()? {
        ColorType::Gray(_) | ColorType::Palette(_) => {}
        other => {
            return Err(GeoTiffReadError::Unsupported(format!(
                "expected a single-band raster, got {other:?}"
            )))
        }
    }

    if let Some(formats) = decoder.find_tag(Tag::SampleFormat)? {
        if formats.into_u16_vec()?.contains(&SAMPLE_FORMAT_IEEE_FP) {
            return Err(GeoTiffReadError::Unsupported(
                "floating point samples are not categorical".to_string(),
            ));
        }
    }

    let geokeys = GeoKeys::read(decoder)?;
    let mut transform = read_transform(decoder)?;
    if geokeys.short(GT_RASTER_TYPE_GEO_KEY) == Some(RASTER_PIXEL_IS_POINT) {
        // tiepoints reference pixel centers; shift to the corner convention
        let (x, y) = transform.pixel_to_world(-0.5, -0.5);
        transform.0[0] = x;
        transform.0[3] = y;
    }
    let crs = geokeys.crs()?;
    let nodata = read_nodata(decoder)?;

    debug!(width, height, crs = %crs, ?nodata, "Read GeoTIFF header");

    Ok(TileHeader { width, height, transform, crs, nodata })
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform, GeoTiffReadError> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = value.into_f64_vec()?;
        if m.len() < 8 {
            return Err(GeoTiffReadError::MissingGeoreference(format!(
                "ModelTransformation has {} values",
                m.len()
            )));
        }
        // row-major 4x4: x = m0*col + m1*row + m3, y = m4*col + m5*row + m7
        return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
    }

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?;

    match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            // Tiepoint (i, j, k, x, y, z) maps pixel (i, j) to world (x, y)
            let origin_x = tie[3] - tie[0] * scale[0];
            let origin_y = tie[4] + tie[1] * scale[1];
            Ok(GeoTransform::from_origin(origin_x, origin_y, scale[0], scale[1]))
        }
        _ => Err(GeoTiffReadError::MissingGeoreference(
            "no ModelTransformation or ModelPixelScale/ModelTiepoint tags".to_string(),
        )),
    }
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<i32>, GeoTiffReadError> {
    let Some(value) = decoder.find_tag(Tag::GdalNodata)? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    let text = text.trim_matches(char::from(0)).trim();
    match text.parse::<f64>() {
        #[allow(clippy::cast_possible_truncation)]
        Ok(v) if v.fract() == 0.0 && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) => {
            Ok(Some(v as i32))
        }
        _ => {
            warn!(nodata = text, "Ignoring non-integer nodata value");
            Ok(None)
        }
    }
}

/// Parsed GeoKeyDirectory with its ASCII parameters
struct GeoKeys {
    entries: Vec<[u16; 4]>,
    ascii: String,
}

impl GeoKeys {
    fn read<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Self, GeoTiffReadError> {
        let directory = decoder
            .find_tag(Tag::GeoKeyDirectoryTag)?
            .map(tiff::decoder::ifd::Value::into_u16_vec)
            .transpose()?
            .ok_or_else(|| GeoTiffReadError::UnsupportedCrs("no GeoKeyDirectory tag".to_string()))?;
        let ascii = decoder
            .find_tag(Tag::GeoAsciiParamsTag)?
            .map(tiff::decoder::ifd::Value::into_string)
            .transpose()?
            .unwrap_or_default();

        // Header: [version, revision, minor, key count], then 4 shorts per key
        let count = directory.get(3).copied().unwrap_or(0) as usize;
        let entries = directory
            .get(4..)
            .unwrap_or_default()
            .chunks_exact(4)
            .take(count)
            .map(|k| [k[0], k[1], k[2], k[3]])
            .collect();

        Ok(Self { entries, ascii })
    }

    /// Inline SHORT value of a key
    fn short(&self, key: u16) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e[0] == key && e[1] == 0)
            .map(|e| e[3])
    }

    /// ASCII value of a key, without the `|` terminator
    fn ascii(&self, key: u16) -> Option<&str> {
        let entry = self.entries.iter().find(|e| e[0] == key && e[1] == GEO_ASCII_PARAMS_TAG)?;
        let start = entry[3] as usize;
        let end = start + entry[2] as usize;
        self.ascii
            .get(start..end.min(self.ascii.len()))
            .map(|s| s.trim_end_matches(['|', '\0']))
    }

    fn crs(&self) -> Result<CrsCode, GeoTiffReadError> {
        let projected = self.short(PROJECTED_CS_TYPE_GEO_KEY);
        let geographic = self.short(GEOGRAPHIC_TYPE_GEO_KEY);

        let (code, citation_key) = match (projected, geographic) {
            (Some(code), _) => (code, GT_CITATION_GEO_KEY),
            (None, Some(code)) => (code, GEOG_CITATION_GEO_KEY),
            (None, None) => {
                return Err(GeoTiffReadError::UnsupportedCrs(format!(
                    "no projected or geographic CRS key (model type {:?})",
                    self.short(GT_MODEL_TYPE_GEO_KEY)
                )))
            }
        };

        if code != USER_DEFINED {
            return Ok(CrsCode::epsg(u32::from(code)));
        }

        // User-defined: look for an AUTH:CODE citation
        let citation = self
            .ascii(citation_key)
            .or_else(|| self.ascii(GT_CITATION_GEO_KEY))
            .ok_or_else(|| {
                GeoTiffReadError::UnsupportedCrs("user-defined CRS without a citation".to_string())
            })?;
        citation
            .parse::<CrsCode>()
            .map_err(|e| GeoTiffReadError::UnsupportedCrs(format!("citation '{citation}': {e}")))
    }
}

/// Convert any integer sample buffer to `i32`
pub(crate) fn decoding_result_to_i32(result: DecodingResult) -> Result<Vec<i32>, GeoTiffReadError> {
    fn narrow<T: Copy + std::fmt::Display>(values: Vec<T>) -> Result<Vec<i32>, GeoTiffReadError>
    where
        i32: TryFrom<T>,
    {
        values
            .into_iter()
            .map(|v| {
                i32::try_from(v).map_err(|_| {
                    GeoTiffReadError::Unsupported(format!("sample value {v} does not fit in i32"))
                })
            })
            .collect()
    }

    match result {
        DecodingResult::U8(v) => Ok(v.into_iter().map(i32::from).collect()),
        DecodingResult::U16(v) => Ok(v.into_iter().map(i32::from).collect()),
        DecodingResult::I8(v) => Ok(v.into_iter().map(i32::from).collect()),
        DecodingResult::I16(v) => Ok(v.into_iter().map(i32::from).collect()),
        DecodingResult::I32(v) => Ok(v),
        DecodingResult::U32(v) => narrow(v),
        DecodingResult::U64(v) => narrow(v),
        DecodingResult::I64(v) => narrow(v),
        _ => Err(GeoTiffReadError::Unsupported(
            "floating point samples are not categorical".to_string(),
        )),
    }
}
