//! Re-ranking of approximate candidates against exact vectors.

use super::flat::FlatIndex;
use super::traits::{check_add, ids_or_sequential, IndexStats, VectorIndex};
use super::Index;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::results::{check_queries, RangeSearchResult, SearchResults, TopK};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Refinement settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefineParams {
    /// The base index is asked for `ceil(k * k_factor)` candidates.
    pub k_factor: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self { k_factor: 1.0 }
    }
}

/// Base index plus an exact copy of every vector.
///
/// Search pulls `ceil(k * k_factor)` candidates from the base and re-ranks them
/// with exact distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineIndex {
    base: Box<Index>,
    refine: FlatIndex,
    /// First storage position of every id in `refine`.
    positions: HashMap<i64, usize>,
    params: RefineParams,
}

impl RefineIndex {
    /// Wrap an empty base index.
    pub fn new(base: Index) -> Result<Self> {
        if base.ntotal() != 0 {
            return Err(Error::InvalidParameter(
                "refine base index must be empty".into(),
            ));
        }
        let refine = FlatIndex::new(base.dimension(), base.metric())?;
        Ok(Self {
            base: Box::new(base),
            refine,
            positions: HashMap::new(),
            params: RefineParams::default(),
        })
    }

    /// The approximate index.
    pub fn base(&self) -> &Index {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut Index {
        &mut self.base
    }

    /// Current candidate over-fetch factor.
    pub fn k_factor(&self) -> f32 {
        self.params.k_factor
    }

    /// Candidate over-fetch factor; must be at least 1.
    pub fn set_k_factor(&mut self, k_factor: f32) -> Result<()> {
        if !(k_factor >= 1.0) || !k_factor.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "k_factor must be >= 1, got {k_factor}"
            )));
        }
        self.params.k_factor = k_factor;
        Ok(())
    }

    fn add_inner(&mut self, x: &[f32], ids: Option<&[i64]>) -> Result<()> {
        let n = check_add(x, self.dimension(), ids)?;
        let ids = ids_or_sequential(ids, self.ntotal(), n);
        self.positions.try_reserve(n)?;

        let start = self.refine.ntotal();
        self.refine.add_with_ids(x, &ids)?;
        if let Err(e) = self.base.add_with_ids(x, &ids) {
            self.refine.truncate(start);
            return Err(e);
        }
        for (offset, &id) in ids.iter().enumerate() {
            self.positions.entry(id).or_insert(start + offset);
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.base.validate()?;
        self.refine.validate()?;
        let ids = self.refine.store().ids();
        if self.base.ntotal() != ids.len()
            || self
                .positions
                .iter()
                .any(|(&id, &pos)| ids.get(pos) != Some(&id))
        {
            return Err(Error::CorruptData("refine store is out of sync".into()));
        }
        if !(self.params.k_factor >= 1.0) {
            return Err(Error::CorruptData("refine k_factor below 1".into()));
        }
        Ok(())
    }
}

impl VectorIndex for RefineIndex {
    fn dimension(&self) -> usize {
        self.refine.dimension()
    }

    fn metric(&self) -> DistanceMetric {
        self.refine.metric()
    }

    fn ntotal(&self) -> usize {
        self.refine.ntotal()
    }

    fn is_trained(&self) -> bool {
        self.base.is_trained()
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        self.base.train(x)
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.add_inner(x, None)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.add_inner(x, Some(ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        let d = self.dimension();
        check_queries(x, d, k)?;
        let k_base = ((k as f32 * self.params.k_factor).ceil() as usize).max(k);
        let candidates = self.base.search(x, k_base)?;
        let metric = self.metric();

        let per_query = x
            .par_chunks(d)
            .enumerate()
            .map(|(q, query)| {
                let mut heap = TopK::new(k, metric);
                for &label in candidates.labels_of(q) {
                    if let Some(&pos) = self.positions.get(&label) {
                        heap.push(label, metric.distance(query, self.refine.row(pos)));
                    }
                }
                heap.into_sorted()
            })
            .collect();
        SearchResults::from_neighbors(k, metric, per_query)
    }

    /// Answered exactly from the refinement store.
    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        self.refine.range_search(x, radius)
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        self.positions
            .get(&key)
            .map(|&pos| self.refine.row(pos).to_vec())
            .ok_or(Error::NotFound(key))
    }

    fn reset(&mut self) {
        self.base.reset();
        self.refine.reset();
        self.positions.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: self.is_trained(),
            kind: "Refine",
        }
    }
}
