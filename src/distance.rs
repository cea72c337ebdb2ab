//! Distance metrics for dense vectors.
//!
//! Two metrics are supported, matching the integer metric codes of the original
//! C interface (`0 = inner product`, `1 = L2`).
//!
//! ## Important nuance
//!
//! [`DistanceMetric::L2`] reports **squared** Euclidean distance. Rankings are identical
//! to true Euclidean distance, exact matches still score `0.0`, and range-search radii
//! are compared against the squared value.
//!
//! [`DistanceMetric::InnerProduct`] reports the raw similarity `<a, b>`, so larger is
//! better and result lists are sorted descending.

use crate::error::{Error, Result};
use crate::simd;
use serde::{Deserialize, Serialize};

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Maximum inner product search.
    InnerProduct,
    /// Squared Euclidean distance.
    #[default]
    L2,
}

impl DistanceMetric {
    /// Parse the integer metric code used at the status-code boundary.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(DistanceMetric::InnerProduct),
            1 => Ok(DistanceMetric::L2),
            other => Err(Error::InvalidParameter(format!(
                "unknown metric code {other}"
            ))),
        }
    }

    /// Integer metric code.
    pub fn code(self) -> i32 {
        match self {
            DistanceMetric::InnerProduct => 0,
            DistanceMetric::L2 => 1,
        }
    }

    /// Compute the metric between two vectors.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => simd::l2_distance_squared(a, b),
            DistanceMetric::InnerProduct => simd::dot(a, b),
        }
    }

    /// Whether `a` ranks strictly ahead of `b`.
    #[inline]
    pub fn is_better(self, a: f32, b: f32) -> bool {
        match self {
            DistanceMetric::L2 => a < b,
            DistanceMetric::InnerProduct => a > b,
        }
    }

    /// Sort key where smaller is always better.
    #[inline]
    pub(crate) fn rank_key(self, dist: f32) -> f32 {
        match self {
            DistanceMetric::L2 => dist,
            DistanceMetric::InnerProduct => -dist,
        }
    }

    /// Distance used to pad result slots that have no neighbor.
    #[inline]
    pub fn worst(self) -> f32 {
        match self {
            DistanceMetric::L2 => f32::INFINITY,
            DistanceMetric::InnerProduct => f32::NEG_INFINITY,
        }
    }

    /// Range-search membership test.
    ///
    /// L2 keeps `dist <= radius`; inner product keeps `sim >= radius`.
    #[inline]
    pub fn within(self, dist: f32, radius: f32) -> bool {
        match self {
            DistanceMetric::L2 => dist <= radius,
            DistanceMetric::InnerProduct => dist >= radius,
        }
    }
}

/// Normalize a vector to unit L2 norm.
#[inline]
#[must_use]
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let n = simd::norm(v);
    if n < 1e-10 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / n).collect()
}

/// Normalize in place; zero vectors are left untouched.
#[inline]
pub fn normalize_in_place(v: &mut [f32]) {
    let n = simd::norm(v);
    if n >= 1e-10 {
        for x in v {
            *x /= n;
        }
    }
}
