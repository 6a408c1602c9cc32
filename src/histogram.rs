//! Pixel class counts and their JSON report format.
//!
//! The report is a JSON object keyed by `List(<class>)` with pixel counts as
//! values, keys in string order, pretty-printed with four-space indentation.
//! Downstream consumers parse this exact text, so the key format and ordering
//! must not change.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::raster::RasterTile;

/// Occurrence count per pixel value, nodata included
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: BTreeMap<i32, u64>,
}

impl Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more occurrence of `value`
    pub fn add(&mut self, value: i32) {
        *self.counts.entry(value).or_insert(0) += 1;
    }

    #[must_use]
    pub fn get(&self, value: i32) -> u64 {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    /// Sum of all counts
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(value, count)` pairs in numeric order
    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.counts.iter().map(|(&v, &c)| (v, c))
    }

    /// Counts keyed by report label, in string order
    #[must_use]
    pub fn labelled(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(&value, &count)| (class_key(value), count))
            .collect()
    }

    /// Serialize as the pretty-printed report object.
    ///
    /// # Errors
    /// Returns an error only if serialization fails, which does not happen for
    /// string keys and integer values.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.labelled().serialize(&mut serializer)?;
        // serde_json only writes valid UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl FromIterator<i32> for Histogram {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        let mut histogram = Histogram::new();
        for value in iter {
            histogram.add(value);
        }
        histogram
    }
}

/// Report key for a class value
#[must_use]
pub fn class_key(value: i32) -> String {
    format!("List({value})")
}

/// Count every pixel of `raster`, nodata included
#[must_use]
pub fn tabulate(raster: &RasterTile) -> Histogram {
    raster.pixels.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CrsCode;
    use crate::raster::GeoTransform;

    #[test]
    fn test_tabulate_counts_everything() {
        let raster = RasterTile::new(
            vec![1, 1, 2, 0, 1, 10],
            3,
            2,
            GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0),
            CrsCode::epsg(5070),
            Some(0),
        )
        .unwrap();
        let histogram = tabulate(&raster);
        assert_eq!(histogram.get(1), 3);
        assert_eq!(histogram.get(0), 1);
        assert_eq!(histogram.get(99), 0);
        assert_eq!(histogram.total(), 6);
        assert_eq!(histogram.len(), 4);
    }

    #[test]
    fn test_json_shape() {
        let histogram: Histogram = [1, 1, 2, 10, 10, 10].into_iter().collect();
        let json = histogram.to_json().unwrap();
        assert_eq!(json, "{\n    \"List(1)\": 2,\n    \"List(10)\": 3,\n    \"List(2)\": 1\n}");
    }

    #[test]
    fn test_negative_keys_sort_as_strings() {
        let histogram: Histogram = [-1, 3, -20].into_iter().collect();
        let keys: Vec<String> = histogram.labelled().into_keys().collect();
        assert_eq!(keys, vec!["List(-1)", "List(-20)", "List(3)"]);
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::new();
        assert!(histogram.is_empty());
        assert_eq!(histogram.to_json().unwrap(), "{}");
    }

    #[test]
    fn test_json_is_stable() {
        let a: Histogram = [5, 3, 5, 7].into_iter().collect();
        let b: Histogram = [7, 5, 5, 3].into_iter().collect();
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }
}
