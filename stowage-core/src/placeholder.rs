//! Selection of in-band values that stand in for missing entries.
//!
//! The choices here are part of the on-disk format: other readers and writers
//! pick the same placeholder for the same data.

use std::collections::HashSet;

use crate::error::{StowageError, StowageResult};

/// Name of the attribute recording the placeholder next to the data.
pub const MISSING_VALUE_PLACEHOLDER: &str = "missing-value-placeholder";

/// Stored value of a missing boolean; present values are 0 or 1.
pub const BOOLEAN_PLACEHOLDER: u8 = 2;

/// Placeholder for a floating-point column, chosen among the present values.
pub fn float_placeholder<I>(present: I) -> StowageResult<f64>
where
    I: IntoIterator<Item = f64>,
{
    let present: Vec<f64> = present.into_iter().collect();
    if !present.iter().any(|v| v.is_nan()) {
        return Ok(f64::NAN);
    }

    for candidate in [f64::INFINITY, f64::NEG_INFINITY, f64::MAX, -f64::MAX, 0.0] {
        if !present.iter().any(|&v| v == candidate) {
            return Ok(candidate);
        }
    }

    let mut finite: Vec<f64> = present.into_iter().filter(|v| v.is_finite()).collect();
    finite.sort_by(f64::total_cmp);
    finite.dedup_by(|a, b| a == b);

    // 0 and both extremes are present at this point, so no gap exceeds f64::MAX.
    finite
        .windows(2)
        .map(|pair| (pair[0], pair[1], pair[0] + (pair[1] - pair[0]) / 2.0))
        .find(|&(low, high, mid)| mid != low && mid != high)
        .map(|(_, _, mid)| mid)
        .ok_or_else(|| StowageError::PlaceholderExhausted("floating-point".to_string()))
}

/// Placeholder for an integer column whose values all fit in 32 bits.
pub fn integer_placeholder<I>(present: I) -> StowageResult<i32>
where
    I: IntoIterator<Item = i32>,
{
    let present: HashSet<i32> = present.into_iter().collect();
    for candidate in [i32::MIN, i32::MAX, 0] {
        if !present.contains(&candidate) {
            return Ok(candidate);
        }
    }

    (i32::MIN..=i32::MAX)
        .find(|candidate| !present.contains(candidate))
        .ok_or_else(|| StowageError::PlaceholderExhausted("32-bit integer".to_string()))
}

/// `"NA"`, extended with underscores until it no longer collides with a value.
pub fn string_placeholder<'a, I>(present: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let present: HashSet<&str> = present.into_iter().collect();
    let mut placeholder = String::from("NA");
    while present.contains(placeholder.as_str()) {
        placeholder.push('_');
    }
    placeholder
}

/// Whether every value lies in the signed 32-bit domain of `integer` columns.
pub fn fits_integer<I>(values: I) -> bool
where
    I: IntoIterator<Item = i64>,
{
    values.into_iter().all(|v| i32::try_from(v).is_ok())
}
