//! Flat index over scalar-quantized codes.

use super::traits::{check_add, IndexStats, VectorIndex};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::quantization::{QuantizerType, ScalarQuantizer};
use crate::results::{par_range_search, par_search, Neighbor, RangeSearchResult, SearchResults};
use crate::store::CodeStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Exhaustive search over SQ codes; every candidate is decoded and compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizerIndex {
    metric: DistanceMetric,
    sq: ScalarQuantizer,
    codes: CodeStore,
}

impl ScalarQuantizerIndex {
    /// Empty index; call [`VectorIndex::train`] unless `qtype` is `QTfp16`.
    pub fn new(dimension: usize, qtype: QuantizerType, metric: DistanceMetric) -> Result<Self> {
        let sq = ScalarQuantizer::new(dimension, qtype)?;
        let codes = CodeStore::new(sq.code_size());
        Ok(Self { metric, sq, codes })
    }

    /// The trained quantizer.
    pub fn quantizer(&self) -> &ScalarQuantizer {
        &self.sq
    }

    /// Bytes per stored vector.
    pub fn code_size(&self) -> usize {
        self.sq.code_size()
    }

    fn add_inner(&mut self, x: &[f32], ids: Option<&[i64]>) -> Result<()> {
        if !self.sq.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        check_add(x, self.dimension(), ids)?;
        let codes = self.sq.encode_batch(x)?;
        self.codes.add(&codes, ids)
    }

    fn scan(&self, q: &[f32], mut visit: impl FnMut(i64, f32)) {
        let mut buf = vec![0.0f32; self.dimension()];
        for (id, code) in self.codes.iter() {
            self.sq.decode_into(code, &mut buf);
            visit(id, self.metric.distance(q, &buf));
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.sq.validate()?;
        self.codes.validate()?;
        if self.codes.width() != self.sq.code_size() {
            return Err(Error::CorruptData("code width does not match quantizer".into()));
        }
        Ok(())
    }
}

impl VectorIndex for ScalarQuantizerIndex {
    fn dimension(&self) -> usize {
        self.sq.dimension()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.codes.len()
    }

    fn is_trained(&self) -> bool {
        self.sq.is_trained()
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        if !self.codes.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot retrain an index that holds vectors".into(),
            ));
        }
        self.sq.train(x)?;
        debug!(qtype = ?self.sq.qtype(), "trained scalar quantizer index");
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.add_inner(x, None)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.add_inner(x, Some(ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        par_search(x, self.dimension(), k, self.metric, |q, heap| {
            self.scan(q, |id, d| heap.push(id, d));
            Ok(())
        })
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        par_range_search(x, self.dimension(), |q, out| {
            self.scan(q, |label, distance| {
                if self.metric.within(distance, radius) {
                    out.push(Neighbor { label, distance });
                }
            });
            Ok(())
        })
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        let code = self.codes.get(key)?;
        Ok(self.sq.decode(&code))
    }

    fn reset(&mut self) {
        self.codes.reset();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: self.is_trained(),
            kind: "ScalarQuantizer",
        }
    }
}
