//! Index preceded by a linear transform.

use super::traits::{IndexStats, VectorIndex};
use super::Index;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::results::{RangeSearchResult, SearchResults};
use crate::transform::VectorTransform;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Applies a [`VectorTransform`] to every vector before it reaches the inner index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreTransformIndex {
    transform: VectorTransform,
    index: Box<Index>,
}

impl PreTransformIndex {
    /// The transform output must match the inner index dimension.
    pub fn new(transform: VectorTransform, index: Index) -> Result<Self> {
        if transform.d_out() != index.dimension() {
            return Err(Error::DimensionMismatch {
                expected: index.dimension(),
                actual: transform.d_out(),
            });
        }
        Ok(Self {
            transform,
            index: Box::new(index),
        })
    }

    /// Transform applied to every input vector.
    pub fn transform(&self) -> &VectorTransform {
        &self.transform
    }

    /// Index over transformed vectors.
    pub fn inner(&self) -> &Index {
        &self.index
    }

    pub(crate) fn inner_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.transform.validate()?;
        self.index.validate()?;
        if self.transform.d_out() != self.index.dimension() {
            return Err(Error::CorruptData("transform output dimension mismatch".into()));
        }
        Ok(())
    }
}

impl VectorIndex for PreTransformIndex {
    fn dimension(&self) -> usize {
        self.transform.d_in()
    }

    fn metric(&self) -> DistanceMetric {
        self.index.metric()
    }

    fn ntotal(&self) -> usize {
        self.index.ntotal()
    }

    fn is_trained(&self) -> bool {
        self.transform.is_trained() && self.index.is_trained()
    }

    /// Trains the transform if needed, then the inner index on transformed data.
    fn train(&mut self, x: &[f32]) -> Result<()> {
        let mut transform = self.transform.clone();
        if !transform.is_trained() {
            transform.train(x)?;
            debug!(d_in = transform.d_in(), d_out = transform.d_out(), "trained transform");
        }
        let xt = transform.apply(x)?;
        self.index.train(&xt)?;
        self.transform = transform;
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        let xt = self.transform.apply(x)?;
        self.index.add(&xt)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        let xt = self.transform.apply(x)?;
        self.index.add_with_ids(&xt, ids)
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        if k == 0 {
            return Err(Error::InvalidParameter("k must be greater than 0".into()));
        }
        let xt = self.transform.apply(x)?;
        self.index.search(&xt, k)
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        let xt = self.transform.apply(x)?;
        self.index.range_search(&xt, radius)
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        let y = self.index.reconstruct(key)?;
        self.transform.reverse(&y)
    }

    fn reset(&mut self) {
        self.index.reset();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: self.is_trained(),
            kind: "PreTransform",
        }
    }
}
