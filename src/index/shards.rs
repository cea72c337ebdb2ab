//! Fan-out over independent shards of the same shape.
//!
//! Adds split a batch into contiguous slices, one per shard. Searches query every
//! shard in parallel and merge the per-shard top-k lists; equal distances resolve
//! by shard order, then by lowest id.
//!
//! `add` and `train` run on copies of the shards and commit only when every shard
//! succeeds, so a failure in one shard leaves all of them untouched.

use super::traits::{check_add, ids_or_sequential, IndexStats, VectorIndex};
use super::Index;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::results::{check_queries, RangeSearchResult, SearchResults, TopK};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Shards holding disjoint slices of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardsIndex {
    dimension: usize,
    metric: DistanceMetric,
    shards: Vec<Index>,
    /// Number vectors added without ids across shards, continuing from `ntotal()`.
    successive_ids: bool,
}

impl ShardsIndex {
    /// Empty sharded index; shards are attached with [`ShardsIndex::add_shard`].
    pub fn new(dimension: usize, metric: DistanceMetric) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidParameter(
                "dimension must be greater than 0".into(),
            ));
        }
        Ok(Self {
            dimension,
            metric,
            shards: Vec::new(),
            successive_ids: true,
        })
    }

    /// Let each shard number its own vectors instead.
    #[must_use]
    pub fn with_successive_ids(mut self, successive_ids: bool) -> Self {
        self.successive_ids = successive_ids;
        self
    }

    /// Append a shard; its dimension and metric must match.
    pub fn add_shard(&mut self, shard: Index) -> Result<()> {
        if shard.dimension() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: shard.dimension(),
            });
        }
        if shard.metric() != self.metric {
            return Err(Error::InvalidParameter(format!(
                "shard metric {:?} differs from {:?}",
                shard.metric(),
                self.metric
            )));
        }
        self.shards.push(shard);
        Ok(())
    }

    /// The shards, in the order they were added.
    pub fn shards(&self) -> &[Index] {
        &self.shards
    }

    pub(crate) fn shards_mut(&mut self) -> &mut [Index] {
        &mut self.shards
    }

    /// Number of attached shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    fn add_inner(&mut self, x: &[f32], ids: Option<&[i64]>) -> Result<()> {
        let n = check_add(x, self.dimension, ids)?;
        if self.shards.is_empty() {
            return Err(Error::InvalidParameter("index has no shards".into()));
        }
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }

        let ids = match ids {
            Some(ids) => Some(ids.to_vec()),
            None if self.successive_ids => Some(ids_or_sequential(None, self.ntotal(), n)),
            None => None,
        };
        let nshard = self.shards.len();
        let d = self.dimension;
        // Stage on copies so a shard that rejects its slice leaves every shard as it was.
        let mut staged = self.shards.clone();
        staged
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(i, shard)| {
                let (i0, i1) = (i * n / nshard, (i + 1) * n / nshard);
                if i0 == i1 {
                    return Ok(());
                }
                let slice = &x[i0 * d..i1 * d];
                match &ids {
                    Some(ids) => shard.add_with_ids(slice, &ids[i0..i1]),
                    None => shard.add(slice),
                }
            })?;
        self.shards = staged;
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for shard in &self.shards {
            shard.validate()?;
            if shard.dimension() != self.dimension || shard.metric() != self.metric {
                return Err(Error::CorruptData("shard shape mismatch".into()));
            }
        }
        Ok(())
    }
}

impl VectorIndex for ShardsIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.shards.iter().map(VectorIndex::ntotal).sum()
    }

    fn is_trained(&self) -> bool {
        self.shards.iter().all(VectorIndex::is_trained)
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        check_add(x, self.dimension, None)?;
        let mut staged = self.shards.clone();
        staged.par_iter_mut().try_for_each(|shard| shard.train(x))?;
        self.shards = staged;
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.add_inner(x, None)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.add_inner(x, Some(ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        let nq = check_queries(x, self.dimension, k)?;
        let partial = self
            .shards
            .par_iter()
            .map(|shard| shard.search(x, k))
            .collect::<Result<Vec<_>>>()?;

        let per_query = (0..nq)
            .into_par_iter()
            .map(|q| {
                let mut heap = TopK::new(k, self.metric);
                for (source, r) in partial.iter().enumerate() {
                    for (&label, &dist) in r.labels_of(q).iter().zip(r.distances_of(q)) {
                        if label >= 0 {
                            heap.push_from(source as u32, label, dist);
                        }
                    }
                }
                heap.into_sorted()
            })
            .collect();
        SearchResults::from_neighbors(k, self.metric, per_query)
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        let nq = check_add(x, self.dimension, None)?;
        let partial = self
            .shards
            .par_iter()
            .map(|shard| shard.range_search(x, radius))
            .collect::<Result<Vec<_>>>()?;

        let mut merged = RangeSearchResult::new(0);
        for q in 0..nq {
            for r in &partial {
                let (labels, distances) = r.query(q);
                merged.labels.extend_from_slice(labels);
                merged.distances.extend_from_slice(distances);
            }
            merged.lims.push(merged.labels.len());
        }
        Ok(merged)
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        for shard in &self.shards {
            match shard.reconstruct(key) {
                Err(Error::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(Error::NotFound(key))
    }

    fn reset(&mut self) {
        self.shards.iter_mut().for_each(VectorIndex::reset);
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension,
            is_trained: self.is_trained(),
            kind: "Shards",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::flat::FlatIndex;

    fn two_shards() -> ShardsIndex {
        let mut idx = ShardsIndex::new(1, DistanceMetric::L2).unwrap();
        idx.add_shard(Index::Flat(FlatIndex::l2(1).unwrap())).unwrap();
        idx.add_shard(Index::Flat(FlatIndex::l2(1).unwrap())).unwrap();
        idx
    }

    #[test]
    fn add_splits_contiguously_with_successive_ids() {
        let mut idx = two_shards();
        idx.add(&[0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(idx.shards()[0].ntotal(), 2);
        assert_eq!(idx.shards()[1].ntotal(), 2);
        assert_eq!(idx.ntotal(), 4);
        let r = idx.search(&[2.9], 2).unwrap();
        assert_eq!(r.labels, vec![3, 2]);
    }

    #[test]
    fn ties_break_by_shard_then_id() {
        let mut idx = two_shards();
        idx.add_with_ids(&[1.0, 1.0, 1.0, 1.0], &[9, 8, 1, 0]).unwrap();
        let r = idx.search(&[1.0], 4).unwrap();
        assert_eq!(r.labels, vec![8, 9, 0, 1]);
    }

    #[test]
    fn shard_shape_must_match() {
        let mut idx = two_shards();
        assert!(idx.add_shard(Index::Flat(FlatIndex::l2(2).unwrap())).is_err());
        assert!(idx
            .add_shard(Index::Flat(FlatIndex::inner_product(1).unwrap()))
            .is_err());
    }

    #[test]
    fn range_search_concatenates_in_shard_order() {
        let mut idx = two_shards();
        idx.add(&[0.0, 5.0, 0.5, 9.0]).unwrap();
        let r = idx.range_search(&[0.0], 1.0).unwrap();
        assert_eq!(r.lims, vec![0, 2]);
        assert_eq!(r.labels, vec![0, 2]);
        r.validate().unwrap();
    }

    #[test]
    fn failed_train_leaves_every_shard_untrained() {
        use crate::index::ivf::{IvfIndex, IvfParams};

        let mut idx = ShardsIndex::new(2, DistanceMetric::L2).unwrap();
        for nlist in [2, 50] {
            let ivf = IvfIndex::new(2, DistanceMetric::L2, IvfParams::new(nlist)).unwrap();
            idx.add_shard(ivf.into()).unwrap();
        }
        let x: Vec<f32> = (0..20).map(|i| i as f32).collect();

        assert!(idx.train(&x).is_err());
        assert!(idx.shards().iter().all(|s| !s.is_trained()));
    }

    #[test]
    fn failed_add_leaves_every_shard_unchanged() {
        use crate::index::idmap::IdMapIndex;

        let mut idx = ShardsIndex::new(1, DistanceMetric::L2)
            .unwrap()
            .with_successive_ids(false);
        idx.add_shard(Index::Flat(FlatIndex::l2(1).unwrap())).unwrap();
        let mapped = IdMapIndex::new(Index::Flat(FlatIndex::l2(1).unwrap())).unwrap();
        idx.add_shard(mapped.into()).unwrap();

        // The id-mapped shard rejects an add without ids.
        assert!(matches!(
            idx.add(&[0.0, 1.0, 2.0, 3.0]),
            Err(Error::NotSupported(_))
        ));
        assert_eq!(idx.ntotal(), 0);
        assert_eq!(idx.shards()[0].ntotal(), 0);

        idx.add_with_ids(&[0.0, 1.0], &[10, 11]).unwrap();
        assert_eq!(idx.ntotal(), 2);
    }

    #[test]
    fn reconstruct_searches_every_shard() {
        let mut idx = two_shards();
        idx.add(&[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(idx.reconstruct(2).unwrap(), vec![2.0]);
        assert!(matches!(idx.reconstruct(5), Err(Error::NotFound(5))));
    }
}
