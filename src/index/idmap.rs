//! External id remapping over an inner index.

use super::traits::{check_add, IndexStats, VectorIndex};
use super::Index;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::results::{RangeSearchResult, SearchResults};
use serde::{Deserialize, Serialize};

/// Stores vectors in the inner index under sequential positions and translates
/// them to caller ids on the way out.
///
/// Only [`VectorIndex::add_with_ids`] is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapIndex {
    index: Box<Index>,
    /// Caller id of every inner position.
    id_map: Vec<i64>,
}

impl IdMapIndex {
    /// Wrap an empty index.
    pub fn new(index: Index) -> Result<Self> {
        if index.ntotal() != 0 {
            return Err(Error::InvalidParameter(
                "ID map requires an empty inner index".into(),
            ));
        }
        Ok(Self {
            index: Box::new(index),
            id_map: Vec::new(),
        })
    }

    /// The wrapped index, which stores vectors under sequential positions.
    pub fn inner(&self) -> &Index {
        &self.index
    }

    pub(crate) fn inner_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    /// Caller ids in insertion order.
    pub fn id_map(&self) -> &[i64] {
        &self.id_map
    }

    fn translate(&self, labels: &mut [i64]) {
        for label in labels.iter_mut().filter(|l| **l >= 0) {
            *label = self.id_map.get(*label as usize).copied().unwrap_or(-1);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.index.validate()?;
        if self.id_map.len() != self.index.ntotal() {
            return Err(Error::CorruptData(format!(
                "ID map holds {} ids for {} vectors",
                self.id_map.len(),
                self.index.ntotal()
            )));
        }
        Ok(())
    }
}

impl VectorIndex for IdMapIndex {
    fn dimension(&self) -> usize {
        self.index.dimension()
    }

    fn metric(&self) -> DistanceMetric {
        self.index.metric()
    }

    fn ntotal(&self) -> usize {
        self.id_map.len()
    }

    fn is_trained(&self) -> bool {
        self.index.is_trained()
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        self.index.train(x)
    }

    fn add(&mut self, _x: &[f32]) -> Result<()> {
        Err(Error::NotSupported(
            "add without ids on an ID map; use add_with_ids".into(),
        ))
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        check_add(x, self.dimension(), Some(ids))?;
        self.id_map.try_reserve(ids.len())?;
        self.index.add(x)?;
        self.id_map.extend_from_slice(ids);
        Ok(())
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        let mut results = self.index.search(x, k)?;
        self.translate(&mut results.labels);
        Ok(results)
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        let mut results = self.index.range_search(x, radius)?;
        self.translate(&mut results.labels);
        Ok(results)
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        let pos = self
            .id_map
            .iter()
            .position(|&id| id == key)
            .ok_or(Error::NotFound(key))?;
        self.index.reconstruct(pos as i64)
    }

    fn reset(&mut self) {
        self.index.reset();
        self.id_map.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: self.is_trained(),
            kind: "IDMap",
        }
    }
}
