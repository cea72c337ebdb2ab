//! Unified trait for all index variants.

use crate::distance::DistanceMetric;
use crate::error::{check_batch, Error, Result};
use crate::results::{RangeSearchResult, SearchResults};

/// Operations shared by every dense-vector index.
///
/// Batches are row-major flat slices: `n * dimension()` floats. Mutations take
/// `&mut self`; searches take `&self` and may be called from many threads.
pub trait VectorIndex {
    /// Vector dimension accepted by `add`, `train` and `search`.
    fn dimension(&self) -> usize;

    /// Metric results are reported in.
    fn metric(&self) -> DistanceMetric;

    /// Number of stored vectors.
    fn ntotal(&self) -> usize;

    /// Whether the index can accept vectors.
    fn is_trained(&self) -> bool;

    /// Train on `x`. Indexes that need no training accept any batch.
    fn train(&mut self, x: &[f32]) -> Result<()>;

    /// Append vectors numbered sequentially from `ntotal()`.
    fn add(&mut self, x: &[f32]) -> Result<()>;

    /// Append vectors with caller-supplied ids.
    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()>;

    /// `k` nearest neighbors of every query.
    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults>;

    /// Every stored vector within `radius` of each query.
    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult>;

    /// Stored (or decoded) vector carrying `key`.
    fn reconstruct(&self, key: i64) -> Result<Vec<f32>>;

    /// Drop every stored vector; training is kept.
    fn reset(&mut self);

    /// Labels of the `k` nearest entries for each vector, `n * k` row-major.
    fn assign(&self, x: &[f32], k: usize) -> Result<Vec<i64>> {
        Ok(self.search(x, k)?.labels)
    }

    /// Reconstruct `ni` consecutive keys starting at `i0`, flat `ni * dimension()`.
    fn reconstruct_n(&self, i0: i64, ni: usize) -> Result<Vec<f32>> {
        let len = ni.checked_mul(self.dimension());
        let end = i64::try_from(ni).ok().and_then(|ni| i0.checked_add(ni));
        let (Some(len), Some(end)) = (len, end) else {
            return Err(Error::InvalidParameter(format!(
                "cannot reconstruct {ni} vectors from key {i0}"
            )));
        };
        let mut out = Vec::new();
        out.try_reserve(len)?;
        for key in i0..end {
            out.extend_from_slice(&self.reconstruct(key)?);
        }
        Ok(out)
    }

    /// Summary of the index.
    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: self.is_trained(),
            kind: "index",
        }
    }
}

/// Statistics about an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// Stored vectors.
    pub ntotal: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Whether the index accepts adds.
    pub is_trained: bool,
    /// Short variant name, as in index descriptions (`"IVF"`, `"Flat"`).
    pub kind: &'static str,
}

/// Validate a batch plus optional ids against `dimension`; returns `n`.
pub(crate) fn check_add(x: &[f32], dimension: usize, ids: Option<&[i64]>) -> Result<usize> {
    let n = check_batch(x.len(), dimension)?;
    if let Some(ids) = ids {
        if ids.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: ids.len(),
            });
        }
    }
    Ok(n)
}

/// Ids for `n` new vectors: the caller's, or sequential from `start`.
pub(crate) fn ids_or_sequential(ids: Option<&[i64]>, start: usize, n: usize) -> Vec<i64> {
    match ids {
        Some(ids) => ids.to_vec(),
        None => (start as i64..(start + n) as i64).collect(),
    }
}
