//! Equal-area CRS selection by continental bounding box.
//!
//! The lookup is an ordered table, evaluated top to bottom. An AOI that fits
//! two boxes gets the first one listed, not the tightest.

use tracing::{debug, warn};

use crate::geometry::projection::CoordTransformer;
use crate::geometry::{Aoi, BoundingBox, CrsCode};

/// Continental regions with a designated equal-area projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    NorthAmerica,
    Europe,
    Asia,
    Africa,
    SouthAmerica,
    Australia,
}

impl Region {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NorthAmerica => "North America",
            Self::Europe => "Europe",
            Self::Asia => "Asia",
            Self::Africa => "Africa",
            Self::SouthAmerica => "South America",
            Self::Australia => "Australia",
        }
    }
}

/// Region boxes in lon/lat degrees, in match order
pub const REGIONS: &[(Region, BoundingBox, CrsCode)] = &[
    (Region::NorthAmerica, BoundingBox::new(-170.0, 15.0, -50.0, 75.0), CrsCode::epsg(5070)),
    (Region::Europe, BoundingBox::new(-10.0, 34.0, 40.0, 72.0), CrsCode::epsg(3035)),
    (Region::Asia, BoundingBox::new(25.0, -10.0, 180.0, 60.0), CrsCode::esri(102025)),
    (Region::Africa, BoundingBox::new(-20.0, -35.0, 55.0, 38.0), CrsCode::esri(102022)),
    (Region::SouthAmerica, BoundingBox::new(-90.0, -60.0, -30.0, 15.0), CrsCode::esri(102033)),
    (Region::Australia, BoundingBox::new(112.0, -45.0, 155.0, -10.0), CrsCode::esri(102034)),
];

/// World Behrmann, used when no region contains the AOI
pub const GLOBAL_FALLBACK: CrsCode = CrsCode::esri(54017);

/// First region whose box fully contains a lon/lat envelope
#[must_use]
pub fn region_for_bounds(bounds: &BoundingBox) -> Option<(Region, CrsCode)> {
    REGIONS
        .iter()
        .find(|(_, region_box, _)| region_box.contains(bounds))
        .map(|&(region, _, crs)| (region, crs))
}

/// Pick the equal-area CRS for an AOI.
///
/// Never fails: an AOI outside every region, or one that cannot be
/// projected to lon/lat, gets [`GLOBAL_FALLBACK`].
#[must_use]
pub fn select_equal_area_crs(aoi: &Aoi) -> CrsCode {
    let bounds = match lonlat_bounds(aoi) {
        Ok(bounds) => bounds,
        Err(e) => {
            warn!(crs = %aoi.crs(), error = %e, "Could not project AOI to lon/lat, using global CRS");
            return GLOBAL_FALLBACK;
        }
    };

    match region_for_bounds(&bounds) {
        Some((region, crs)) => {
            debug!(region = region.name(), crs = %crs, "Selected regional equal-area CRS");
            crs
        }
        None => {
            debug!(crs = %GLOBAL_FALLBACK, "AOI outside all regions, using global CRS");
            GLOBAL_FALLBACK
        }
    }
}

/// Envelope of every AOI vertex in EPSG:4326
fn lonlat_bounds(aoi: &Aoi) -> Result<BoundingBox, String> {
    if aoi.crs().is_geographic() {
        return Ok(aoi.bounds());
    }
    let transformer = CoordTransformer::new(aoi.crs(), CrsCode::WGS84)?;
    let mut points = Vec::new();
    for polygon in &aoi.geometry().0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            for c in &ring.0 {
                points.push(transformer.transform(c.x, c.y)?);
            }
        }
    }
    BoundingBox::from_points(points).ok_or_else(|| "AOI has no vertices".to_string())
}
