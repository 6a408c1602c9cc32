//! STAC API tile catalog.
//!
//! Runs an item search for the AOI and a year and returns the href of one
//! asset per item. Pages are followed through `next` links.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::geometry::Aoi;

use super::{CatalogError, TileCatalog, TileLocation};

/// Stop following `next` links after this many pages
const MAX_PAGES: usize = 1000;

/// Connection and query settings for a STAC search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StacConfig {
    /// API root, without the `/search` suffix
    pub url: String,
    pub collection: String,
    /// Item asset holding the raster
    pub asset: String,
    /// Items whose id ends in `-<year>` are selected
    pub year: i32,
    /// Items requested per page
    pub page_limit: usize,
    pub timeout_secs: u64,
}

impl Default for StacConfig {
    fn default() -> Self {
        Self {
            url: "https://api.impactobservatory.com/stac-aws".to_string(),
            collection: "io-10m-annual-lulc".to_string(),
            asset: "supercell".to_string(),
            year: 2019,
            page_limit: 100,
            timeout_secs: 60,
        }
    }
}

impl StacConfig {
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[must_use]
    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = asset.into();
        self
    }

    #[must_use]
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    #[must_use]
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// `POST /search` endpoint
    #[must_use]
    pub fn search_url(&self) -> String {
        format!("{}/search", self.url.trim_end_matches('/'))
    }

    /// CQL2-JSON filter selecting items for the configured year
    #[must_use]
    pub fn year_filter(&self) -> Value {
        json!({
            "op": "like",
            "args": [{"property": "id"}, format!("%-{}", self.year)],
        })
    }

    /// Search request body for an AOI geometry in lon/lat
    #[must_use]
    pub fn search_body(&self, intersects: &geojson::Geometry) -> Value {
        json!({
            "collections": [self.collection],
            "intersects": intersects,
            "filter": self.year_filter(),
            "filter-lang": "cql2-json",
            "limit": self.page_limit,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ItemCollection {
    #[serde(default)]
    features: Vec<Item>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    id: String,
    #[serde(default)]
    assets: HashMap<String, Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    merge: bool,
}

/// Catalog backed by a STAC API item search
pub struct StacCatalog {
    config: StacConfig,
    client: reqwest::blocking::Client,
}

impl StacCatalog {
    /// Build a catalog with its own HTTP client.
    ///
    /// # Errors
    /// Returns [`CatalogError::Http`] if the client cannot be built.
    pub fn new(config: StacConfig) -> Result<Self, CatalogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &StacConfig {
        &self.config
    }

    fn fetch_page(&self, request: &PageRequest) -> Result<ItemCollection, CatalogError> {
        let response = match request {
            PageRequest::Post { url, body } => self.client.post(url).json(body).send()?,
            PageRequest::Get { url } => self.client.get(url).send()?,
        };
        let response = response.error_for_status()?;
        response
            .json::<ItemCollection>()
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))
    }

    /// Asset hrefs of a page's items, in response order
    fn page_locations(&self, page: &ItemCollection) -> Vec<TileLocation> {
        page.features
            .iter()
            .filter_map(|item| match item.assets.get(&self.config.asset) {
                Some(asset) => Some(TileLocation::parse(&asset.href)),
                None => {
                    warn!(item = %item.id, asset = %self.config.asset, "Item has no such asset");
                    None
                }
            })
            .collect()
    }
}

enum PageRequest {
    Post { url: String, body: Value },
    Get { url: String },
}

impl PageRequest {
    /// Request for the page after `previous`, from its `next` link
    fn next(links: &[Link], previous: &PageRequest) -> Option<PageRequest> {
        let link = links.iter().find(|l| l.rel == "next")?;
        let is_post = link
            .method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("POST"));
        if !is_post {
            return Some(PageRequest::Get { url: link.href.clone() });
        }

        let body = match (&link.body, previous) {
            (Some(next_body), PageRequest::Post { body, .. }) if link.merge => {
                let mut merged = body.clone();
                if let (Some(target), Some(extra)) = (merged.as_object_mut(), next_body.as_object()) {
                    for (k, v) in extra {
                        target.insert(k.clone(), v.clone());
                    }
                }
                merged
            }
            (Some(next_body), _) => next_body.clone(),
            (None, PageRequest::Post { body, .. }) => body.clone(),
            (None, PageRequest::Get { .. }) => Value::Object(serde_json::Map::new()),
        };
        Some(PageRequest::Post { url: link.href.clone(), body })
    }
}

impl TileCatalog for StacCatalog {
    fn find_tiles(&self, aoi: &Aoi) -> Result<Vec<TileLocation>, CatalogError> {
        let geometry = aoi.to_geojson_wgs84()?;
        let mut request = PageRequest::Post {
            url: self.config.search_url(),
            body: self.config.search_body(&geometry),
        };

        let mut tiles = Vec::new();
        for page_number in 1..=MAX_PAGES {
            let page = self.fetch_page(&request)?;
            let found = self.page_locations(&page);
            debug!(page = page_number, items = page.features.len(), tiles = found.len(), "STAC page");
            tiles.extend(found);

            match PageRequest::next(&page.links, &request) {
                Some(next) if !page.features.is_empty() => request = next,
                _ => break,
            }
        }

        info!(
            collection = %self.config.collection,
            year = self.config.year,
            tiles = tiles.len(),
            "STAC search complete"
        );
        Ok(tiles)
    }
}
