//! Seekable reads over HTTP `Range` requests.
//!
//! [`HttpRangeReader`] turns a remote GeoTIFF into a `Read + Seek` source that
//! fetches fixed-size blocks on demand. The decoder only touches the header and
//! the chunks under a pixel window, so only those blocks cross the network.
//! Every reader shares one blocking `reqwest` client.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tracing::debug;

use crate::geotiff_reader::GeoTiffReadError;

/// Bytes fetched per range request
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

const HTTP_TIMEOUT_SECS: u64 = 120;

/// The process-wide blocking client, built on first use
fn shared_client() -> Result<Client, GeoTiffReadError> {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(CLIENT.get_or_init(|| client).clone())
}

/// `Read + Seek` over a remote object, one cached block per range request
pub struct HttpRangeReader {
    client: Client,
    url: String,
    len: u64,
    pos: u64,
    block_size: u64,
    blocks: HashMap<u64, Vec<u8>>,
    requests: usize,
    bytes_fetched: u64,
}

impl HttpRangeReader {
    /// Open `url` with [`DEFAULT_BLOCK_SIZE`] blocks.
    ///
    /// # Errors
    /// See [`HttpRangeReader::with_block_size`].
    pub fn open(url: &str) -> Result<Self, GeoTiffReadError> {
        Self::with_block_size(url, DEFAULT_BLOCK_SIZE)
    }

    /// Open `url`, fetching the first block to learn the object size.
    ///
    /// A server that ignores `Range` and answers `200` is tolerated: the whole
    /// body becomes a single block.
    ///
    /// # Errors
    /// Returns [`GeoTiffReadError::Http`] if the request fails or a partial
    /// response has no usable `Content-Range`.
    pub fn with_block_size(url: &str, block_size: usize) -> Result<Self, GeoTiffReadError> {
        let block_size = u64::try_from(block_size.max(1))
            .map_err(|_| GeoTiffReadError::Http(format!("block size {block_size} too large")))?;

        let response = shared_client()?
            .get(url)
            .header(RANGE, format!("bytes=0-{}", block_size - 1))
            .send()?
            .error_for_status()?;
        let status = response.status();
        let total = content_range_total(response.headers());
        let first = response.bytes()?.to_vec();

        let mut reader = Self {
            client: shared_client()?,
            url: url.to_string(),
            len: 0,
            pos: 0,
            block_size,
            blocks: HashMap::new(),
            requests: 1,
            bytes_fetched: first.len() as u64,
        };

        if status == StatusCode::PARTIAL_CONTENT {
            reader.len = total.ok_or_else(|| {
                GeoTiffReadError::Http(format!("{url}: partial response without Content-Range size"))
            })?;
        } else {
            debug!(url = %url, bytes = first.len(), "Server ignored Range, using full body");
            reader.len = first.len() as u64;
            reader.block_size = reader.len.max(1);
        }
        reader.blocks.insert(0, first);

        debug!(url = %url, size = reader.len, "Opened remote tile");
        Ok(reader)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Size of the remote object in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// HTTP requests made so far
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Body bytes received so far
    #[must_use]
    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched
    }

    fn fetch(&mut self, index: u64) -> io::Result<Vec<u8>> {
        let start = index * self.block_size;
        let end = (start + self.block_size).min(self.len) - 1;

        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(io::Error::other)?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(io::Error::other(format!(
                "{}: expected 206 for bytes {start}-{end}, got {}",
                self.url,
                response.status()
            )));
        }
        let body = response.bytes().map_err(io::Error::other)?;
        if body.len() as u64 != end - start + 1 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{}: short range response for bytes {start}-{end}", self.url),
            ));
        }

        self.requests += 1;
        self.bytes_fetched += body.len() as u64;
        Ok(body.to_vec())
    }

    fn block(&mut self, index: u64) -> io::Result<&[u8]> {
        if !self.blocks.contains_key(&index) {
            let data = self.fetch(index)?;
            self.blocks.insert(index, data);
        }
        self.blocks
            .get(&index)
            .map(Vec::as_slice)
            .ok_or_else(|| io::Error::other("range block vanished from cache"))
    }
}

impl Read for HttpRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        let index = self.pos / self.block_size;
        let offset = usize::try_from(self.pos - index * self.block_size)
            .map_err(|_| io::Error::other("block offset overflows usize"))?;

        let block = self.block(index)?;
        if offset >= block.len() {
            return Ok(0);
        }
        let n = buf.len().min(block.len() - offset);
        buf[..n].copy_from_slice(&block[offset..offset + n]);

        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for HttpRangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of remote object")
        })?;
        self.pos = target;
        Ok(target)
    }
}

/// Total size from a `Content-Range: bytes a-b/total` header
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}
