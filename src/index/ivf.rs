//! Inverted file index.
//!
//! A coarse quantizer splits the space into `nlist` cells. Each stored vector
//! lives in the inverted list of its nearest centroid; a query scans only the
//! `nprobe` lists whose centroids are closest to it.
//!
//! ```text
//! Untrained --train--> Trained --add--> Populated --search--> results
//!                         ^                 |
//!                         +------reset------+
//! ```
//!
//! List payloads are either raw vectors ([`IvfEncoding::Flat`]) or scalar-quantized
//! codes ([`IvfEncoding::ScalarQuantized`]). SQ payloads may encode the residual
//! `x - centroid` instead of `x`, which tightens the quantizer's range.

use super::flat::FlatIndex;
use super::traits::{check_add, ids_or_sequential, IndexStats, VectorIndex};
use crate::distance::DistanceMetric;
use crate::error::{check_batch, Error, Result};
use crate::partitioning::KMeansParams;
use crate::quantization::{CoarseQuantizer, QuantizerType, ScalarQuantizer};
use crate::results::{par_range_search, par_search, Neighbor, RangeSearchResult, SearchResults};
use crate::store::{CodeStore, VectorStore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How vectors are stored inside the inverted lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IvfEncoding {
    /// Raw `f32` vectors.
    #[default]
    Flat,
    /// Scalar-quantized codes.
    ScalarQuantized(QuantizerType),
}

/// IVF parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfParams {
    /// Number of inverted lists (coarse centroids).
    pub nlist: usize,
    /// Lists scanned per query.
    pub nprobe: usize,
    /// List payload encoding.
    pub encoding: IvfEncoding,
    /// Encode `x - centroid` (SQ payloads only).
    pub by_residual: bool,
    /// k-means settings for quantizer training.
    pub kmeans: KMeansParams,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            nlist: 100,
            nprobe: 1,
            encoding: IvfEncoding::Flat,
            by_residual: false,
            kmeans: KMeansParams::default(),
        }
    }
}

impl IvfParams {
    /// Flat lists with `nlist` cells.
    pub fn new(nlist: usize) -> Self {
        Self {
            nlist,
            ..Self::default()
        }
    }

    /// Scalar-quantized lists; residual encoding on by default.
    pub fn scalar_quantized(nlist: usize, qtype: QuantizerType) -> Self {
        Self {
            nlist,
            encoding: IvfEncoding::ScalarQuantized(qtype),
            by_residual: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IvfStorage {
    Flat(VectorStore<f32>),
    Scalar { sq: ScalarQuantizer, codes: CodeStore },
}

impl IvfStorage {
    fn len(&self) -> usize {
        match self {
            Self::Flat(store) => store.len(),
            Self::Scalar { codes, .. } => codes.len(),
        }
    }

    fn ids(&self) -> &[i64] {
        match self {
            Self::Flat(store) => store.ids(),
            Self::Scalar { codes, .. } => codes.ids(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Flat(store) => store.reset(),
            Self::Scalar { codes, .. } => codes.reset(),
        }
    }
}

/// Inverted file index over a coarse quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfIndex {
    metric: DistanceMetric,
    quantizer: CoarseQuantizer,
    nprobe: usize,
    by_residual: bool,
    kmeans: KMeansParams,
    storage: IvfStorage,
    /// Storage positions per list.
    lists: Vec<Vec<usize>>,
    /// List of every storage position.
    list_of: Vec<usize>,
}

impl IvfIndex {
    /// Untrained index with its own quantizer.
    pub fn new(dimension: usize, metric: DistanceMetric, params: IvfParams) -> Result<Self> {
        let quantizer = FlatIndex::new(dimension, metric)?;
        Self::with_quantizer(quantizer, params)
    }

    /// Build on a caller-supplied flat quantizer.
    ///
    /// A quantizer already holding `nlist` centroids is used as-is and training
    /// skips k-means.
    pub fn with_quantizer(quantizer: FlatIndex, params: IvfParams) -> Result<Self> {
        if params.nprobe == 0 {
            return Err(Error::InvalidParameter("nprobe must be greater than 0".into()));
        }
        let dimension = quantizer.dimension();
        let metric = quantizer.metric();
        let quantizer = CoarseQuantizer::from_flat(quantizer, params.nlist)?;
        let (storage, by_residual) = match params.encoding {
            IvfEncoding::Flat => (IvfStorage::Flat(VectorStore::new(dimension)), false),
            IvfEncoding::ScalarQuantized(qtype) => {
                let sq = ScalarQuantizer::new(dimension, qtype)?;
                let codes = CodeStore::new(sq.code_size());
                (IvfStorage::Scalar { sq, codes }, params.by_residual)
            }
        };
        Ok(Self {
            metric,
            nprobe: params.nprobe.min(params.nlist),
            by_residual,
            kmeans: params.kmeans,
            storage,
            lists: vec![Vec::new(); params.nlist],
            list_of: Vec::new(),
            quantizer,
        })
    }

    /// Number of inverted lists.
    pub fn nlist(&self) -> usize {
        self.quantizer.nlist()
    }

    /// Lists scanned per query.
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Set the number of lists scanned per query; values above `nlist` are clamped.
    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        if nprobe == 0 {
            return Err(Error::InvalidParameter("nprobe must be greater than 0".into()));
        }
        self.nprobe = nprobe.min(self.nlist());
        Ok(())
    }

    /// Whether SQ payloads hold residuals.
    pub fn by_residual(&self) -> bool {
        self.by_residual
    }

    /// Coarse quantizer.
    pub fn quantizer(&self) -> &CoarseQuantizer {
        &self.quantizer
    }

    /// Number of vectors in list `list`.
    pub fn list_len(&self, list: usize) -> usize {
        self.lists.get(list).map_or(0, Vec::len)
    }

    fn residuals(quantizer: &CoarseQuantizer, x: &[f32]) -> Result<Vec<f32>> {
        let d = quantizer.dimension();
        x.par_chunks(d)
            .map(|v| {
                let c = quantizer.decode(quantizer.encode(v)?);
                Ok(v.iter().zip(c).map(|(a, b)| a - b).collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>>>()
            .map(|rows| rows.concat())
    }

    fn add_inner(&mut self, x: &[f32], ids: Option<&[i64]>) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        let n = check_add(x, self.dimension(), ids)?;
        let d = self.dimension();

        let assignments = x
            .par_chunks(d)
            .map(|v| self.quantizer.encode(v))
            .collect::<Result<Vec<_>>>()?;
        let ids = ids_or_sequential(ids, self.ntotal(), n);

        self.list_of.try_reserve(n)?;
        let start = self.storage.len();
        match &mut self.storage {
            IvfStorage::Flat(store) => store.add(x, Some(&ids))?,
            IvfStorage::Scalar { sq, codes } => {
                let payload = if self.by_residual {
                    Self::residuals(&self.quantizer, x)?
                } else {
                    x.to_vec()
                };
                let encoded = sq.encode_batch(&payload)?;
                codes.add(&encoded, Some(&ids))?;
            }
        }

        for (offset, &list) in assignments.iter().enumerate() {
            self.lists[list].push(start + offset);
        }
        self.list_of.extend_from_slice(&assignments);
        debug!(n, ntotal = self.ntotal(), "added vectors to IVF");
        Ok(())
    }

    /// Vector stored at `pos` (decoded for SQ payloads).
    fn decode_at(&self, pos: usize, buf: &mut [f32]) {
        match &self.storage {
            IvfStorage::Flat(store) => buf.copy_from_slice(store.row(pos)),
            IvfStorage::Scalar { sq, codes } => {
                sq.decode_into(codes.row(pos), buf);
                if self.by_residual {
                    let c = self.quantizer.decode(self.list_of[pos]);
                    for (b, ci) in buf.iter_mut().zip(c) {
                        *b += ci;
                    }
                }
            }
        }
    }

    fn distance_at(&self, q: &[f32], pos: usize, buf: &mut [f32]) -> f32 {
        match &self.storage {
            IvfStorage::Flat(store) => self.metric.distance(q, store.row(pos)),
            IvfStorage::Scalar { .. } => {
                self.decode_at(pos, buf);
                self.metric.distance(q, buf)
            }
        }
    }

    /// Visit every vector in the `nprobe` lists nearest to `q`.
    fn scan(&self, q: &[f32], mut visit: impl FnMut(i64, f32)) {
        let ids = self.storage.ids();
        let mut buf = vec![0.0f32; self.dimension()];
        for list in self.quantizer.probe(q, self.nprobe) {
            for &pos in &self.lists[list] {
                visit(ids[pos], self.distance_at(q, pos, &mut buf));
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.quantizer.validate()?;
        let ntotal = match &self.storage {
            IvfStorage::Flat(store) => {
                store.validate()?;
                if store.width() != self.quantizer.dimension() {
                    return Err(Error::CorruptData("IVF store width mismatch".into()));
                }
                store.len()
            }
            IvfStorage::Scalar { sq, codes } => {
                sq.validate()?;
                codes.validate()?;
                if codes.width() != sq.code_size() || sq.dimension() != self.quantizer.dimension() {
                    return Err(Error::CorruptData("IVF code width mismatch".into()));
                }
                codes.len()
            }
        };
        if self.lists.len() != self.nlist() || self.list_of.len() != ntotal {
            return Err(Error::CorruptData(format!(
                "IVF holds {} lists and {} assignments for nlist {} and {ntotal} vectors",
                self.lists.len(),
                self.list_of.len(),
                self.nlist()
            )));
        }
        if self.nprobe == 0 || self.nprobe > self.nlist() {
            return Err(Error::CorruptData(format!("nprobe {} out of range", self.nprobe)));
        }
        let mut seen = vec![false; ntotal];
        for (list, members) in self.lists.iter().enumerate() {
            for &pos in members {
                if pos >= ntotal || seen[pos] || self.list_of[pos] != list {
                    return Err(Error::CorruptData(format!(
                        "inverted list {list} holds invalid position {pos}"
                    )));
                }
                seen[pos] = true;
            }
        }
        if seen.iter().any(|s| !s) {
            return Err(Error::CorruptData(
                "stored vector missing from inverted lists".into(),
            ));
        }
        Ok(())
    }
}

impl VectorIndex for IvfIndex {
    fn dimension(&self) -> usize {
        self.quantizer.dimension()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.storage.len()
    }

    fn is_trained(&self) -> bool {
        self.quantizer.is_trained()
            && match &self.storage {
                IvfStorage::Flat(_) => true,
                IvfStorage::Scalar { sq, .. } => sq.is_trained(),
            }
    }

    /// Train the coarse quantizer (unless it is already complete) and the list
    /// encoder. Nothing changes if any step fails.
    fn train(&mut self, x: &[f32]) -> Result<()> {
        let n = check_batch(x.len(), self.dimension())?;
        if n == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        if self.ntotal() > 0 {
            return Err(Error::InvalidParameter(
                "cannot retrain an index that holds vectors".into(),
            ));
        }

        let mut quantizer = self.quantizer.clone();
        if !quantizer.is_trained() {
            quantizer.train(x, &self.kmeans)?;
        }
        let trained_sq = match &self.storage {
            IvfStorage::Flat(_) => None,
            IvfStorage::Scalar { sq, .. } => {
                let mut sq = sq.clone();
                if self.by_residual {
                    sq.train(&Self::residuals(&quantizer, x)?)?;
                } else {
                    sq.train(x)?;
                }
                Some(sq)
            }
        };

        self.quantizer = quantizer;
        if let (Some(trained), IvfStorage::Scalar { sq, .. }) = (trained_sq, &mut self.storage) {
            *sq = trained;
        }
        info!(nlist = self.nlist(), n, "trained IVF index");
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
        let pos = self
            .storage
            .ids()
            .iter()
            .position(|&id| id == key)
            .ok_or(Error::NotFound(key))?;
        let mut out = vec![0.0f32; self.dimension()];
        self.decode_at(pos, &mut out);
        Ok(out)
    }

    fn reset(&mut self) {
        self.storage.reset();
        self.lists.iter_mut().for_each(Vec::clear);
        self.list_of.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            ntotal: self.ntotal(),
            dimension: self.dimension(),
            is_trained: self.is_trained(),
            kind: match self.storage {
                IvfStorage::Flat(_) => "IVFFlat",
                IvfStorage::Scalar { .. } => "IVFScalarQuantizer",
            },
        }
    }
}
