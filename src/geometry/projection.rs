//! Coordinate reference systems and point projection.
//!
//! CRS identifiers are `AUTH:CODE` pairs ([`CrsCode`]). Every supported code
//! resolves to a PROJ.4 definition that [`proj4rs`] can evaluate, so all
//! projection math stays in pure Rust (no PROJ or GDAL at runtime).
//!
//! Supported codes:
//! - Every EPSG code known to `crs-definitions`
//! - The ESRI Albers and Behrmann systems picked by [`crate::crs_select`]

use std::fmt;
use std::str::FromStr;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Naming authority of a CRS code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Authority {
    Epsg,
    Esri,
}

impl Authority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Epsg => "EPSG",
            Self::Esri => "ESRI",
        }
    }
}

/// A coordinate reference system identifier such as `EPSG:5070` or `ESRI:54017`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrsCode {
    pub authority: Authority,
    pub code: u32,
}

impl CrsCode {
    /// WGS84 longitude/latitude
    pub const WGS84: CrsCode = CrsCode::epsg(4326);
    /// Web Mercator
    pub const WEB_MERCATOR: CrsCode = CrsCode::epsg(3857);

    #[must_use]
    pub const fn epsg(code: u32) -> Self {
        Self { authority: Authority::Epsg, code }
    }

    #[must_use]
    pub const fn esri(code: u32) -> Self {
        Self { authority: Authority::Esri, code }
    }

    /// PROJ.4 definition for this code, if it is supported
    #[must_use]
    pub fn proj_string(&self) -> Option<&'static str> {
        get_proj_string(*self)
    }

    /// True if coordinates in this CRS are longitude/latitude degrees
    #[must_use]
    pub fn is_geographic(&self) -> bool {
        is_geographic_crs(*self)
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority.as_str(), self.code)
    }
}

impl FromStr for CrsCode {
    type Err = String;

    /// Parse `EPSG:4326`, `ESRI:102025`, `urn:ogc:def:crs:EPSG::4326` or
    /// `urn:ogc:def:crs:OGC:1.3:CRS84` (case-insensitive authority).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("urn:ogc:def:crs:OGC:1.3:CRS84")
            || trimmed.eq_ignore_ascii_case("CRS84")
        {
            return Ok(Self::WGS84);
        }

        let (body, is_urn) = match trimmed.strip_prefix("urn:ogc:def:crs:") {
            Some(rest) => (rest, true),
            None => (trimmed, false),
        };

        // "EPSG:4326", or in a URN "EPSG::4326" / "EPSG:9.8.1:4326"
        let parts: Vec<&str> = body.split(':').filter(|p| !p.is_empty()).collect();
        let (auth, code) = match parts.as_slice() {
            [auth, code] => (*auth, *code),
            [auth, _version, code] if is_urn => (*auth, *code),
            _ => return Err(format!("Unrecognised CRS identifier '{s}'")),
        };

        let authority = if auth.eq_ignore_ascii_case("EPSG") {
            Authority::Epsg
        } else if auth.eq_ignore_ascii_case("ESRI") {
            Authority::Esri
        } else {
            return Err(format!("Unsupported CRS authority '{auth}' in '{s}'"));
        };

        let code = code
            .parse::<u32>()
            .map_err(|_| format!("Invalid CRS code '{code}' in '{s}'"))?;

        Ok(Self { authority, code })
    }
}

const ESRI_DEFINITIONS: &[(u32, &str)] = &[
    // World Behrmann
    (
        54017,
        "+proj=cea +lon_0=0 +lat_ts=30 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs",
    ),
    // Africa Albers Equal Area Conic
    (
        102022,
        "+proj=aea +lat_0=0 +lon_0=25 +lat_1=20 +lat_2=-23 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs",
    ),
    // Asia North Albers Equal Area Conic
    (
        102025,
        "+proj=aea +lat_0=30 +lon_0=95 +lat_1=15 +lat_2=65 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs",
    ),
    // South America Albers Equal Area Conic
    (
        102033,
        "+proj=aea +lat_0=-32 +lon_0=-60 +lat_1=-5 +lat_2=-42 +x_0=0 +y_0=0 +ellps=aust_SA +units=m +no_defs",
    ),
    // Australian Albers
    (
        102034,
        "+proj=aea +lat_0=0 +lon_0=132 +lat_1=-18 +lat_2=-36 +x_0=0 +y_0=0 +ellps=GRS80 +units=m +no_defs",
    ),
];

/// Get the PROJ.4 string for a CRS code.
///
/// EPSG codes come from the crs-definitions database; ESRI codes from the
/// table above.
#[must_use]
pub fn get_proj_string(crs: CrsCode) -> Option<&'static str> {
    match crs.authority {
        Authority::Epsg => u16::try_from(crs.code)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4),
        Authority::Esri => ESRI_DEFINITIONS
            .iter()
            .find(|(code, _)| *code == crs.code)
            .map(|(_, def)| *def),
    }
}

/// Check if a CRS code represents a geographic (lon/lat) CRS
#[must_use]
pub fn is_geographic_crs(crs: CrsCode) -> bool {
    get_proj_string(crs).is_some_and(|def| def.contains("+proj=longlat"))
}

/// Coordinate transformer between two CRS codes using proj4rs.
///
/// Build it once per source/target pair and reuse it for every point; parsing
/// the projection definitions dominates the cost of a single transform.
pub struct CoordTransformer {
    source: CrsCode,
    target: CrsCode,
    /// `None` when source and target are the same CRS
    projs: Option<(Proj, Proj)>,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl CoordTransformer {
    /// Create a transformer from `source` to `target`.
    ///
    /// # Errors
    /// Returns an error if either code is unsupported or its definition does
    /// not parse.
    pub fn new(source: CrsCode, target: CrsCode) -> Result<Self, String> {
        let source_str = get_proj_string(source)
            .ok_or_else(|| format!("{source} is not a supported CRS"))?;
        let target_str = get_proj_string(target)
            .ok_or_else(|| format!("{target} is not a supported CRS"))?;

        let projs = if source == target {
            None
        } else {
            let source_proj = Proj::from_proj_string(source_str)
                .map_err(|e| format!("Invalid source projection {source}: {e:?}"))?;
            let target_proj = Proj::from_proj_string(target_str)
                .map_err(|e| format!("Invalid target projection {target}: {e:?}"))?;
            Some((source_proj, target_proj))
        };

        Ok(Self {
            source,
            target,
            projs,
            source_is_geographic: source_str.contains("+proj=longlat"),
            target_is_geographic: target_str.contains("+proj=longlat"),
        })
    }

    #[must_use]
    pub fn source(&self) -> CrsCode {
        self.source
    }

    #[must_use]
    pub fn target(&self) -> CrsCode {
        self.target
    }

    /// True if source and target are the same CRS
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform a single coordinate from source CRS to target CRS
    ///
    /// # Errors
    /// Returns an error if proj4rs rejects the point or produces a
    /// non-finite result (e.g. a point outside the projection's domain).
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        let Some((source_proj, target_proj)) = &self.projs else {
            return Ok((x, y));
        };

        // proj4rs uses radians for geographic coordinates
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source_proj, target_proj, &mut point).map_err(|e| {
            format!("Transform from {} to {} failed at ({x}, {y}): {e:?}", self.source, self.target)
        })?;

        let (out_x, out_y) = if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(format!(
                "Transform from {} to {} produced a non-finite result at ({x}, {y})",
                self.source, self.target
            ));
        }

        Ok((out_x, out_y))
    }
}

/// Project a point from one CRS to another.
///
/// Convenience wrapper that builds a [`CoordTransformer`] for a single point.
///
/// # Errors
/// Returns an error if a CRS is not supported or the projection fails.
#[inline]
pub fn project_point(source: CrsCode, target: CrsCode, x: f64, y: f64) -> Result<(f64, f64), String> {
    if source == target {
        return Ok((x, y));
    }
    CoordTransformer::new(source, target)?.transform(x, y)
}
