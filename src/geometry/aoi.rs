//! Area of interest: validated polygon geometry plus its CRS.
//!
//! An [`Aoi`] is built from caller geometry (usually a GeoJSON file) and is
//! read-only for the rest of a run. Construction rejects empty geometry,
//! zero-area polygons, non-finite coordinates and self-intersecting rings, so
//! downstream stages can assume a valid footprint.

use std::path::Path;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BoundingRect, Coord, Line, LineString, MapCoords, MultiPolygon, Polygon};
use geojson::GeoJson;

use super::projection::{CoordTransformer, CrsCode};
use super::BoundingBox;

/// Errors raised while building or reprojecting an AOI
#[derive(Debug)]
pub enum GeometryError {
    /// I/O error reading the geometry file
    Io(std::io::Error),
    /// The input is not valid GeoJSON
    Parse(String),
    /// The input has no usable geometry
    Empty,
    /// The geometry is not a Polygon or MultiPolygon
    UnsupportedGeometry(String),
    /// The geometry is malformed (self-intersecting, zero area, ...)
    Invalid(String),
    /// The CRS is unknown or cannot be evaluated
    UnsupportedCrs(String),
    /// Reprojecting the geometry failed
    Projection(String),
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse(e) => write!(f, "Invalid GeoJSON: {e}"),
            Self::Empty => write!(f, "AOI has no geometry"),
            Self::UnsupportedGeometry(kind) => {
                write!(f, "AOI must be a Polygon or MultiPolygon, got {kind}")
            }
            Self::Invalid(e) => write!(f, "Invalid AOI geometry: {e}"),
            Self::UnsupportedCrs(e) => write!(f, "Unsupported AOI CRS: {e}"),
            Self::Projection(e) => write!(f, "AOI reprojection failed: {e}"),
        }
    }
}

impl std::error::Error for GeometryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GeometryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A validated area of interest
#[derive(Debug, Clone)]
pub struct Aoi {
    geometry: MultiPolygon<f64>,
    crs: CrsCode,
}

impl Aoi {
    /// Build an AOI from polygon geometry in `crs`.
    ///
    /// # Errors
    /// Returns [`GeometryError::Empty`] for an empty multipolygon,
    /// [`GeometryError::UnsupportedCrs`] if the CRS has no definition, and
    /// [`GeometryError::Invalid`] if any polygon fails validation.
    pub fn new(geometry: MultiPolygon<f64>, crs: CrsCode) -> Result<Self, GeometryError> {
        if crs.proj_string().is_none() {
            return Err(GeometryError::UnsupportedCrs(crs.to_string()));
        }
        validate_multi_polygon(&geometry)?;
        Ok(Self { geometry, crs })
    }

    /// Build an AOI from a single polygon
    ///
    /// # Errors
    /// See [`Aoi::new`].
    pub fn from_polygon(polygon: Polygon<f64>, crs: CrsCode) -> Result<Self, GeometryError> {
        Self::new(MultiPolygon::new(vec![polygon]), crs)
    }

    /// Parse an AOI from GeoJSON text.
    ///
    /// Accepts a FeatureCollection (first feature is used), a Feature or a bare
    /// geometry. Coordinates are EPSG:4326 unless a legacy `crs` member names
    /// another system.
    ///
    /// # Errors
    /// Returns an error if the text is not GeoJSON, has no features, or its
    /// geometry is not a valid Polygon/MultiPolygon.
    pub fn from_geojson_str(text: &str) -> Result<Self, GeometryError> {
        let geojson: GeoJson = text
            .parse()
            .map_err(|e: geojson::Error| GeometryError::Parse(e.to_string()))?;

        let (geometry, members) = match geojson {
            GeoJson::FeatureCollection(collection) => {
                let members = collection.foreign_members;
                let first = collection.features.into_iter().next().ok_or(GeometryError::Empty)?;
                let members = members.or(first.foreign_members);
                (first.geometry, members)
            }
            GeoJson::Feature(feature) => (feature.geometry, feature.foreign_members),
            GeoJson::Geometry(geometry) => {
                let members = geometry.foreign_members.clone();
                (Some(geometry), members)
            }
        };

        let geometry = geometry.ok_or(GeometryError::Empty)?;
        let crs = match members.as_ref().and_then(|m| m.get("crs")) {
            Some(crs_member) => parse_crs_member(crs_member)?,
            None => CrsCode::WGS84,
        };

        let geometry = geo::Geometry::<f64>::try_from(&geometry.value)
            .map_err(|e| GeometryError::Parse(e.to_string()))?;

        let multi_polygon = match geometry {
            geo::Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            geo::Geometry::MultiPolygon(multi_polygon) => multi_polygon,
            other => return Err(GeometryError::UnsupportedGeometry(geometry_kind(&other).to_string())),
        };

        Self::new(multi_polygon, crs)
    }

    /// Read and parse a GeoJSON file
    ///
    /// # Errors
    /// See [`Aoi::from_geojson_str`].
    pub fn from_geojson_file<P: AsRef<Path>>(path: P) -> Result<Self, GeometryError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&text)
    }

    #[must_use]
    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    #[must_use]
    pub fn crs(&self) -> CrsCode {
        self.crs
    }

    /// Bounding box in the AOI's own CRS
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        // validated non-empty, so the rect always exists
        self.geometry
            .bounding_rect()
            .map_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0), BoundingBox::from)
    }

    /// The AOI geometry projected into `target`.
    ///
    /// # Errors
    /// Returns [`GeometryError::Projection`] if any vertex fails to project.
    pub fn geometry_in(&self, target: CrsCode) -> Result<MultiPolygon<f64>, GeometryError> {
        if target == self.crs {
            return Ok(self.geometry.clone());
        }
        let transformer =
            CoordTransformer::new(self.crs, target).map_err(GeometryError::Projection)?;
        reproject_multi_polygon(&self.geometry, &transformer).map_err(GeometryError::Projection)
    }

    /// The AOI as a GeoJSON geometry in EPSG:4326, for catalog queries
    ///
    /// # Errors
    /// Returns [`GeometryError::Projection`] if the AOI cannot be projected to lon/lat.
    pub fn to_geojson_wgs84(&self) -> Result<geojson::Geometry, GeometryError> {
        let wgs84 = self.geometry_in(CrsCode::WGS84)?;
        Ok(geojson::Geometry::new(geojson::Value::from(&wgs84)))
    }
}

/// Project every vertex of a multipolygon through `transformer`
pub(crate) fn reproject_multi_polygon(
    geometry: &MultiPolygon<f64>,
    transformer: &CoordTransformer,
) -> Result<MultiPolygon<f64>, String> {
    geometry.try_map_coords(|c: Coord<f64>| {
        transformer
            .transform(c.x, c.y)
            .map(|(x, y)| Coord { x, y })
    })
}

/// Read a legacy GeoJSON `crs` member: `{"type": "name", "properties": {"name": "EPSG:4326"}}`
fn parse_crs_member(member: &serde_json::Value) -> Result<CrsCode, GeometryError> {
    let name = member
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| GeometryError::UnsupportedCrs(format!("unreadable crs member {member}")))?;
    let crs: CrsCode = name.parse().map_err(GeometryError::UnsupportedCrs)?;
    Ok(crs)
}

fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

fn validate_multi_polygon(geometry: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    if geometry.0.is_empty() {
        return Err(GeometryError::Empty);
    }
    for (index, polygon) in geometry.0.iter().enumerate() {
        validate_polygon(polygon).map_err(|e| GeometryError::Invalid(format!("polygon {index}: {e}")))?;
    }
    Ok(())
}

fn validate_polygon(polygon: &Polygon<f64>) -> Result<(), String> {
    let rings: Vec<&LineString<f64>> =
        std::iter::once(polygon.exterior()).chain(polygon.interiors()).collect();

    for (ring_index, ring) in rings.iter().enumerate() {
        if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(format!("ring {ring_index} has non-finite coordinates"));
        }
        let segments = ring_segments(ring);
        if segments.len() < 3 {
            return Err(format!("ring {ring_index} has fewer than 3 distinct segments"));
        }
        if ring_self_intersects(&segments) {
            return Err(format!("ring {ring_index} is self-intersecting"));
        }
    }

    if polygon.unsigned_area() <= 0.0 {
        return Err("polygon has zero area".to_string());
    }

    // Holes may touch the shell at a point but must not cross it or each other
    for (i, a) in rings.iter().enumerate() {
        for b in rings.iter().skip(i + 1) {
            if rings_cross(&ring_segments(a), &ring_segments(b)) {
                return Err(format!("ring {i} crosses another ring"));
            }
        }
    }

    Ok(())
}

/// Ring segments with zero-length (repeated vertex) segments dropped
fn ring_segments(ring: &LineString<f64>) -> Vec<Line<f64>> {
    ring.lines().filter(|l| l.start != l.end).collect()
}

fn ring_self_intersects(segments: &[Line<f64>]) -> bool {
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                // neighbours always share a vertex; only overlap is a fault
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(_) => return true,
            }
        }
    }
    false
}

fn rings_cross(a: &[Line<f64>], b: &[Line<f64>]) -> bool {
    a.iter().any(|sa| {
        b.iter().any(|sb| match line_intersection(*sa, *sb) {
            Some(LineIntersection::SinglePoint { is_proper, .. }) => is_proper,
            Some(LineIntersection::Collinear { .. }) => true,
            None => false,
        })
    })
}
