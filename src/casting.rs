//! Numeric casting helpers for raster grid arithmetic.
//!
//! # Assumptions
//!
//! ## Grid dimensions (`usize` → `f64`)
//! Allowed without checks at call sites: `f64` represents every integer up to
//! 2^53 exactly and no raster comes close to that.
//!
//! ## Pixel coordinates (`f64` → `usize`)
//! Float-to-index conversions need bounds checking because the float may be
//! negative, NaN, or past the raster edge.
//!
//! ## TIFF dimensions (`usize` → `u32`)
//! TIFF stores dimensions as 32-bit values, so output sizes are checked.

use std::convert::TryFrom;

/// Convert a `usize` to `u32`, failing on 64-bit overflow.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Value {value} exceeds u32 maximum"))
}

/// Convert a float to a pixel index, returning `None` if out of bounds.
///
/// Truncates toward zero, which is `floor` for the non-negative values that
/// pass the checks. Returns `None` for negative values, NaN, and values at or
/// beyond `max_value`.
#[inline]
#[must_use]
pub fn f64_to_pixel_index(value: f64, max_value: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    // Safety: we've already checked value >= 0 and is not NaN above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value as usize;
    if index >= max_value {
        None
    } else {
        Some(index)
    }
}

/// Convert an already rounded, non-negative float to a pixel count.
///
/// Negative values and NaN become 0; values past `usize::MAX` saturate.
#[inline]
#[must_use]
pub fn f64_to_pixel_count(value: f64) -> usize {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    // float-to-int `as` saturates
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = value as usize;
    count
}
