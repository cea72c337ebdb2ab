//! Locality-sensitive hashing by sign of (optionally rotated) projections.
//!
//! Each vector becomes an `nbits` binary code: bit `i` is set when projected
//! component `i` exceeds its threshold. Candidates are ranked by Hamming distance
//! between codes, reported as `f32` (smaller is better).
//!
//! ## Projection
//!
//! - `rotate_data = true`: a seeded random orthonormal `nbits * d` projection.
//! - `rotate_data = false`: the first `nbits` components, so `nbits <= d`.
//!
//! ## Thresholds
//!
//! With `train_thresholds` the per-bit threshold is the median projected value of
//! the training set, and the index reports untrained until [`VectorIndex::train`]
//! runs. Otherwise every threshold is `0`.

use super::traits::{check_add, IndexStats, VectorIndex};
use crate::distance::DistanceMetric;
use crate::error::{check_batch, Error, Result};
use crate::results::{par_range_search, par_search, Neighbor, RangeSearchResult, SearchResults};
use crate::simd;
use crate::store::CodeStore;
use crate::transform::RandomRotationMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// LSH configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    /// Code length in bits.
    pub nbits: usize,
    /// Project through a random rotation instead of truncating.
    pub rotate_data: bool,
    /// Learn per-bit median thresholds.
    pub train_thresholds: bool,
}

impl LshParams {
    /// `nbits`-bit codes over truncated, untrained projections.
    pub fn new(nbits: usize) -> Self {
        Self {
            nbits,
            rotate_data: false,
            train_thresholds: false,
        }
    }
}

/// Binary-code index ranked by Hamming distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LshIndex {
    dimension: usize,
    params: LshParams,
    rotation: Option<RandomRotationMatrix>,
    thresholds: Vec<f32>,
    trained: bool,
    codes: CodeStore,
}

impl LshIndex {
    /// Index over `dimension`-dim vectors; fails when `nbits > dimension` without rotation.
    pub fn new(dimension: usize, params: LshParams) -> Result<Self> {
        if dimension == 0 || params.nbits == 0 {
            return Err(Error::InvalidParameter(
                "dimension and nbits must be greater than 0".into(),
            ));
        }
        if !params.rotate_data && params.nbits > dimension {
            return Err(Error::InvalidParameter(format!(
                "nbits ({}) exceeds dimension ({dimension}) without rotation",
                params.nbits
            )));
        }
        let rotation = if params.rotate_data {
            Some(RandomRotationMatrix::new(dimension, params.nbits)?)
        } else {
            None
        };
        Ok(Self {
            dimension,
            params,
            rotation,
            thresholds: vec![0.0; params.nbits],
            trained: !params.train_thresholds,
            codes: CodeStore::new(params.nbits.div_ceil(8)),
        })
    }

    /// Configuration.
    pub fn params(&self) -> LshParams {
        self.params
    }

    /// Bytes per code.
    pub fn code_size(&self) -> usize {
        self.params.nbits.div_ceil(8)
    }

    /// Per-bit thresholds.
    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    fn project(&self, v: &[f32], out: &mut [f32]) {
        match &self.rotation {
            Some(r) => r.apply_one(v, out),
            None => out.copy_from_slice(&v[..self.params.nbits]),
        }
    }

    /// Binary code of one vector.
    pub fn encode(&self, v: &[f32]) -> Vec<u8> {
        let mut proj = vec![0.0f32; self.params.nbits];
        self.project(v, &mut proj);
        let mut code = vec![0u8; self.code_size()];
        for (i, (p, t)) in proj.iter().zip(&self.thresholds).enumerate() {
            if p > t {
                code[i / 8] |= 1 << (i % 8);
            }
        }
        code
    }

    fn add_inner(&mut self, x: &[f32], ids: Option<&[i64]>) -> Result<()> {
        if !self.trained {
            return Err(Error::UntrainedIndex);
        }
        let n = check_add(x, self.dimension, ids)?;
        let mut codes = Vec::new();
        codes.try_reserve(n * self.code_size())?;
        for v in x.chunks_exact(self.dimension) {
            codes.extend(self.encode(v));
        }
        self.codes.add(&codes, ids)
    }

    fn scan(&self, q: &[f32], mut visit: impl FnMut(i64, f32)) {
        let qc = self.encode(q);
        for (id, code) in self.codes.iter() {
            visit(id, simd::hamming(&qc, code) as f32);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.params.nbits == 0 {
            return Err(Error::CorruptData("LSH dimension or nbits is zero".into()));
        }
        self.codes.validate()?;
        if self.thresholds.len() != self.params.nbits
            || self.codes.width() != self.code_size()
            || self.rotation.is_some() != self.params.rotate_data
        {
            return Err(Error::CorruptData("LSH layout does not match nbits".into()));
        }
        match &self.rotation {
            Some(r) => {
                r.validate()?;
                if r.d_in() != self.dimension || r.d_out() != self.params.nbits {
                    return Err(Error::CorruptData(format!(
                        "LSH rotation is {}x{}, expected {}x{}",
                        r.d_out(),
                        r.d_in(),
                        self.params.nbits,
                        self.dimension
                    )));
                }
            }
            None if self.params.nbits > self.dimension => {
                return Err(Error::CorruptData(format!(
                    "LSH nbits ({}) exceeds dimension ({}) without rotation",
                    self.params.nbits, self.dimension
                )));
            }
            None => {}
        }
        Ok(())
    }
}

impl VectorIndex for LshIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::L2
    }

    fn ntotal(&self) -> usize {
        self.codes.len()
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        let n = check_batch(x.len(), self.dimension)?;
        if !self.params.train_thresholds {
            return Ok(());
        }
        if n == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        if !self.codes.is_empty() {
            return Err(Error::InvalidParameter(
                "cannot retrain an index that holds vectors".into(),
            ));
        }

        let nbits = self.params.nbits;
        let mut proj = vec![0.0f32; n * nbits];
        for (v, p) in x.chunks_exact(self.dimension).zip(proj.chunks_exact_mut(nbits)) {
            self.project(v, p);
        }
        let mut column = vec![0.0f32; n];
        let mut thresholds = Vec::with_capacity(nbits);
        for b in 0..nbits {
            for (c, p) in column.iter_mut().zip(proj.chunks_exact(nbits)) {
                *c = p[b];
            }
            column.sort_by(f32::total_cmp);
            let median = if n % 2 == 1 {
                column[n / 2]
            } else {
                (column[n / 2 - 1] + column[n / 2]) / 2.0
            };
            thresholds.push(median);
        }

        debug!(nbits, n, "trained LSH thresholds");
        self.thresholds = thresholds;
        self.trained = true;
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        self.add_inner(x, None)
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        self.add_inner(x, Some(ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        if !self.trained {
            return Err(Error::UntrainedIndex);
        }
        par_search(x, self.dimension, k, DistanceMetric::L2, |q, heap| {
            self.scan(q, |id, d| heap.push(id, d));
            Ok(())
        })
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        if !self.trained {
            return Err(Error::UntrainedIndex);
        }
        par_range_search(x, self.dimension, |q, out| {
            self.scan(q, |label, distance| {
                if distance <= radius {
                    out.push(Neighbor { label, distance });
                }
            });
            Ok(())
        })
    }

    fn reconstruct(&self, _key: i64) -> Result<Vec<f32>> {
        Err(Error::NotSupported("reconstruct on an LSH index".into()))
    }

    fn reset(&mut self) {
        self.codes.reset();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension,
            is_trained: self.trained,
            kind: "LSH",
        }
    }
}
