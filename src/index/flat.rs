//! Exhaustive exact search.
//!
//! Every query is compared against every stored vector. L2 results come back as
//! squared distances in ascending order, inner-product results as similarities in
//! descending order.

use super::traits::{check_add, IndexStats, VectorIndex};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::results::{par_range_search, par_search, Neighbor, RangeSearchResult, SearchResults, TopK};
use crate::store::VectorStore;
use serde::{Deserialize, Serialize};

/// Brute-force index over raw vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    metric: DistanceMetric,
    store: VectorStore<f32>,
}

impl FlatIndex {
    /// Empty index for `dimension`-dim vectors.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidParameter(
                "dimension must be greater than 0".into(),
            ));
        }
        Ok(Self {
            metric,
            store: VectorStore::new(dimension),
        })
    }

    /// Exact L2 index.
    pub fn l2(dimension: usize) -> Result<Self> {
        Self::new(dimension, DistanceMetric::L2)
    }

    /// Exact inner-product index.
    pub fn inner_product(dimension: usize) -> Result<Self> {
        Self::new(dimension, DistanceMetric::InnerProduct)
    }

    /// Underlying storage.
    pub fn store(&self) -> &VectorStore<f32> {
        &self.store
    }

    /// Flat buffer of stored vectors.
    pub fn vectors(&self) -> &[f32] {
        self.store.as_slice()
    }

    /// Stored vector at insertion position `pos`.
    pub(crate) fn row(&self, pos: usize) -> &[f32] {
        self.store.row(pos)
    }

    /// Offer every stored vector to `heap`.
    pub(crate) fn scan(&self, q: &[f32], heap: &mut TopK) {
        for (id, v) in self.store.iter() {
            heap.push(id, self.metric.distance(q, v));
        }
    }

    /// Append every stored vector within `radius` to `out`.
    pub(crate) fn scan_range(&self, q: &[f32], radius: f32, out: &mut Vec<Neighbor>) {
        for (label, v) in self.store.iter() {
            let distance = self.metric.distance(q, v);
            if self.metric.within(distance, radius) {
                out.push(Neighbor { label, distance });
            }
        }
    }

    /// Keep only the first `len` stored vectors.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.store.truncate(len);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.store.validate()
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.store.dimension()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.store.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        check_add(x, self.dimension(), None).map(|_| ())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.store.add(x, None)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.store.add(x, Some(ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        par_search(x, self.dimension(), k, self.metric, |q, heap| {
            self.scan(q, heap);
            Ok(())
        })
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        par_range_search(x, self.dimension(), |q, out| {
            self.scan_range(q, radius, out);
            Ok(())
        })
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        self.store.reconstruct(key)
    }

    fn reset(&mut self) {
        self.store.reset();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: true,
            kind: "Flat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> FlatIndex {
        let mut idx = FlatIndex::l2(2).unwrap();
        idx.add(&[0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 3.0, 3.0]).unwrap();
        idx
    }

    #[test]
    fn exact_match_is_first() {
        let idx = grid();
        let r = idx.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(r.labels, vec![1, 0]);
        assert_eq!(r.distances, vec![0.0, 1.0]);
    }

    #[test]
    fn pads_when_k_exceeds_ntotal() {
        let idx = grid();
        let r = idx.search(&[0.0, 0.0], 6).unwrap();
        assert_eq!(&r.labels[4..], &[-1, -1]);
        assert!(r.distances[5].is_infinite());
    }

    #[test]
    fn inner_product_is_descending() {
        let mut idx = FlatIndex::inner_product(2).unwrap();
        idx.add(&[1.0, 0.0, 0.5, 0.5, 0.0, 1.0]).unwrap();
        let r = idx.search(&[1.0, 0.2], 3).unwrap();
        assert_eq!(r.labels[0], 0);
        assert!(r.distances.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn range_search_uses_squared_radius() {
        let idx = grid();
        let r = idx.range_search(&[0.0, 0.0], 4.0).unwrap();
        let mut labels = r.query(0).0.to_vec();
        labels.sort_unstable();
        assert_eq!(labels, vec![0, 1, 2]);
    }

    #[test]
    fn k_zero_is_rejected() {
        assert!(matches!(
            grid().search(&[0.0, 0.0], 0),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn dimension_mismatch_on_search() {
        assert!(matches!(
            grid().search(&[0.0, 0.0, 0.0], 1),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn reconstruct_n_walks_sequential_ids() {
        let idx = grid();
        assert_eq!(idx.reconstruct_n(1, 2).unwrap(), vec![1.0, 0.0, 0.0, 2.0]);
        assert!(idx.reconstruct_n(3, 2).is_err());
        assert!(matches!(
            idx.reconstruct_n(i64::MAX, 2),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            idx.reconstruct_n(0, usize::MAX),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn huge_k_returns_error_instead_of_panicking() {
        let idx = grid();
        assert!(matches!(
            idx.search(&[0.0, 0.0], 1 << 61),
            Err(Error::Allocation(_))
        ));
        assert!(matches!(
            idx.search(&[0.0, 0.0, 1.0, 1.0], usize::MAX),
            Err(Error::InvalidParameter(_))
        ));
        // `k` far above `ntotal` still pads normally.
        let r = idx.search(&[0.0, 0.0], 5000).unwrap();
        assert_eq!(r.neighbors_of(0).len(), idx.ntotal());
        assert_eq!(r.labels.len(), 5000);
    }
}
