//! Handle-based access to indexes.
//!
//! [`Registry`] owns every index it creates and hands out typed, copyable
//! handles. Handles come from one monotonically increasing counter and are
//! never reused, so a freed handle stays invalid for the life of the registry.
//!
//! Each index sits behind its own `RwLock`: searches on one index run
//! concurrently, mutations are serialized, and work on different indexes never
//! contends beyond the short map lookup.
//!
//! Operations that take a batch also take its row count `n`; the batch must hold
//! exactly `n` rows of the index dimension.
//!
//! ```
//! use proxim::{DistanceMetric, Registry};
//!
//! let reg = Registry::new();
//! let h = reg.new_flat(2, DistanceMetric::L2).unwrap();
//! reg.add(h, 2, &[0.0, 0.0, 1.0, 1.0]).unwrap();
//! let res = reg.search(h, 1, &[0.9, 0.9], 1).unwrap();
//! assert_eq!(res.labels, vec![1]);
//!
//! reg.free(h).unwrap();
//! assert!(reg.ntotal(h).is_err());
//! ```

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::factory::index_factory;
use crate::index::{
    BinaryFlatIndex, BinarySearchResults, FlatIndex, IdMapIndex, Index, IvfIndex, IvfParams,
    LshIndex, LshParams, RefineIndex, ScalarQuantizerIndex, ShardsIndex, VectorIndex,
};
use crate::quantization::QuantizerType;
use crate::results::{RangeSearchResult, SearchResults};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handle to a dense index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexHandle(u64);

/// Handle to a binary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinaryIndexHandle(u64);

impl IndexHandle {
    /// Numeric value of the handle.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl BinaryIndexHandle {
    /// Numeric value of the handle.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index#{}", self.0)
    }
}

impl fmt::Display for BinaryIndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binary#{}", self.0)
    }
}

type Slot<T> = Arc<RwLock<T>>;

/// Arena of live indexes.
pub struct Registry {
    next: AtomicU64,
    indexes: RwLock<HashMap<u64, Slot<Index>>>,
    binaries: RwLock<HashMap<u64, Slot<BinaryFlatIndex>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("indexes", &self.indexes.read().len())
            .field("binaries", &self.binaries.read().len())
            .finish()
    }
}

/// `x` must hold exactly `n` rows of `row_len` elements.
fn check_rows(n: usize, len: usize, row_len: usize) -> Result<()> {
    let expected = n
        .checked_mul(row_len)
        .ok_or_else(|| Error::InvalidParameter(format!("{n} rows overflow")))?;
    if len != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: len,
        });
    }
    Ok(())
}

impl Registry {
    /// Empty registry; the first handle is `1`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            indexes: RwLock::new(HashMap::new()),
            binaries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live objects of either kind.
    pub fn len(&self) -> usize {
        self.indexes.read().len() + self.binaries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Take ownership of `index` and return its handle.
    pub fn insert(&self, index: Index) -> IndexHandle {
        let id = self.next_id();
        debug!(handle = id, kind = index.kind(), "registered index");
        self.indexes.write().insert(id, Arc::new(RwLock::new(index)));
        IndexHandle(id)
    }

    /// Take ownership of a binary index and return its handle.
    pub fn insert_binary(&self, index: BinaryFlatIndex) -> BinaryIndexHandle {
        let id = self.next_id();
        debug!(handle = id, "registered binary index");
        self.binaries
            .write()
            .insert(id, Arc::new(RwLock::new(index)));
        BinaryIndexHandle(id)
    }

    fn slot(&self, h: IndexHandle) -> Result<Slot<Index>> {
        self.indexes
            .read()
            .get(&h.0)
            .cloned()
            .ok_or(Error::InvalidHandle(h.0))
    }

    fn binary_slot(&self, h: BinaryIndexHandle) -> Result<Slot<BinaryFlatIndex>> {
        self.binaries
            .read()
            .get(&h.0)
            .cloned()
            .ok_or(Error::InvalidHandle(h.0))
    }

    /// Run `f` with shared access to the index.
    pub fn with_index<T>(&self, h: IndexHandle, f: impl FnOnce(&Index) -> T) -> Result<T> {
        let slot = self.slot(h)?;
        let guard = slot.read();
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access to the index.
    pub fn with_index_mut<T>(
        &self,
        h: IndexHandle,
        f: impl FnOnce(&mut Index) -> T,
    ) -> Result<T> {
        let slot = self.slot(h)?;
        let mut guard = slot.write();
        Ok(f(&mut guard))
    }

    /// Build a new index from the one behind `source` and retire `source`.
    ///
    /// `source` is released only if `build` succeeds; on failure it stays valid
    /// and unchanged.
    fn consume(
        &self,
        source: IndexHandle,
        build: impl FnOnce(Index) -> Result<Index>,
    ) -> Result<IndexHandle> {
        let mut map = self.indexes.write();
        let slot = map.get(&source.0).ok_or(Error::InvalidHandle(source.0))?;
        let snapshot = slot.read().clone();
        let built = build(snapshot)?;
        map.remove(&source.0);
        let id = self.next_id();
        debug!(
            consumed = source.0,
            handle = id,
            kind = built.kind(),
            "registered index"
        );
        map.insert(id, Arc::new(RwLock::new(built)));
        Ok(IndexHandle(id))
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Exact index.
    pub fn new_flat(&self, d: usize, metric: DistanceMetric) -> Result<IndexHandle> {
        Ok(self.insert(FlatIndex::new(d, metric)?.into()))
    }

    /// IVF with raw storage over the flat index `quantizer`, which is consumed.
    pub fn new_ivf(
        &self,
        quantizer: IndexHandle,
        d: usize,
        nlist: usize,
        metric: DistanceMetric,
    ) -> Result<IndexHandle> {
        self.new_ivf_with(quantizer, d, metric, IvfParams::new(nlist))
    }

    /// IVF with scalar-quantized storage over the flat index `quantizer`, which
    /// is consumed.
    pub fn new_ivf_scalar_quantizer(
        &self,
        quantizer: IndexHandle,
        d: usize,
        nlist: usize,
        qtype: QuantizerType,
        metric: DistanceMetric,
        by_residual: bool,
    ) -> Result<IndexHandle> {
        let params = IvfParams {
            by_residual,
            ..IvfParams::scalar_quantized(nlist, qtype)
        };
        self.new_ivf_with(quantizer, d, metric, params)
    }

    fn new_ivf_with(
        &self,
        quantizer: IndexHandle,
        d: usize,
        metric: DistanceMetric,
        params: IvfParams,
    ) -> Result<IndexHandle> {
        self.consume(quantizer, |q| {
            let Index::Flat(flat) = q else {
                return Err(Error::InvalidParameter(format!(
                    "IVF quantizer must be a flat index, got {}",
                    q.kind()
                )));
            };
            if flat.dimension() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    actual: flat.dimension(),
                });
            }
            if flat.metric() != metric {
                return Err(Error::InvalidParameter(format!(
                    "quantizer metric {:?} differs from {metric:?}",
                    flat.metric()
                )));
            }
            Ok(IvfIndex::with_quantizer(flat, params)?.into())
        })
    }

    /// Flat index over scalar-quantized codes; needs training.
    pub fn new_scalar_quantizer(
        &self,
        d: usize,
        qtype: QuantizerType,
        metric: DistanceMetric,
    ) -> Result<IndexHandle> {
        Ok(self.insert(ScalarQuantizerIndex::new(d, qtype, metric)?.into()))
    }

    /// LSH index with `nbits`-bit codes.
    pub fn new_lsh(
        &self,
        d: usize,
        nbits: usize,
        rotate_data: bool,
        train_thresholds: bool,
    ) -> Result<IndexHandle> {
        let params = LshParams {
            nbits,
            rotate_data,
            train_thresholds,
        };
        Ok(self.insert(LshIndex::new(d, params)?.into()))
    }

    /// Wrap the empty index `base` (consumed) with external id mapping.
    pub fn new_id_map(&self, base: IndexHandle) -> Result<IndexHandle> {
        self.consume(base, |b| Ok(IdMapIndex::new(b)?.into()))
    }

    /// Add exact re-ranking on top of the empty index `base` (consumed).
    pub fn new_refine_flat(&self, base: IndexHandle) -> Result<IndexHandle> {
        self.consume(base, |b| Ok(RefineIndex::new(b)?.into()))
    }

    /// Empty shard container.
    pub fn new_shards(&self, d: usize, metric: DistanceMetric) -> Result<IndexHandle> {
        Ok(self.insert(ShardsIndex::new(d, metric)?.into()))
    }

    /// Move the index behind `shard` into the shard container `shards`.
    pub fn add_shard(&self, shards: IndexHandle, shard: IndexHandle) -> Result<()> {
        if shards == shard {
            return Err(Error::InvalidParameter(
                "an index cannot be its own shard".into(),
            ));
        }
        let mut map = self.indexes.write();
        let target = map.get(&shards.0).ok_or(Error::InvalidHandle(shards.0))?.clone();
        let source = map.get(&shard.0).ok_or(Error::InvalidHandle(shard.0))?;
        let snapshot = source.read().clone();

        let mut guard = target.write();
        let kind = guard.kind();
        let Index::Shards(container) = &mut *guard else {
            return Err(Error::NotSupported(format!("add_shard on a {kind} index")));
        };
        container.add_shard(snapshot)?;
        map.remove(&shard.0);
        debug!(shards = shards.0, consumed = shard.0, "added shard");
        Ok(())
    }

    /// Build from a factory description.
    pub fn index_factory(
        &self,
        d: usize,
        description: &str,
        metric: DistanceMetric,
    ) -> Result<IndexHandle> {
        Ok(self.insert(index_factory(d, description, metric)?))
    }

    /// Exact Hamming index over `d_bits`-bit codes.
    pub fn new_binary_flat(&self, d_bits: usize) -> Result<BinaryIndexHandle> {
        Ok(self.insert_binary(BinaryFlatIndex::new(d_bits)?))
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Add `n` vectors numbered from the current `ntotal`.
    pub fn add(&self, h: IndexHandle, n: usize, x: &[f32]) -> Result<()> {
        self.with_index_mut(h, |idx| {
            check_rows(n, x.len(), idx.dimension())?;
            idx.add(x)
        })?
    }

    /// Add `n` vectors under caller ids.
    pub fn add_with_ids(&self, h: IndexHandle, n: usize, x: &[f32], ids: &[i64]) -> Result<()> {
        self.with_index_mut(h, |idx| {
            check_rows(n, x.len(), idx.dimension())?;
            idx.add_with_ids(x, ids)
        })?
    }

    /// Train on `n` vectors.
    pub fn train(&self, h: IndexHandle, n: usize, x: &[f32]) -> Result<()> {
        self.with_index_mut(h, |idx| {
            check_rows(n, x.len(), idx.dimension())?;
            idx.train(x)
        })?
    }

    pub fn reset(&self, h: IndexHandle) -> Result<()> {
        self.with_index_mut(h, |idx| idx.reset())
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// `k` nearest neighbors of each of the `n` queries.
    pub fn search(&self, h: IndexHandle, n: usize, x: &[f32], k: usize) -> Result<SearchResults> {
        self.with_index(h, |idx| {
            check_rows(n, x.len(), idx.dimension())?;
            idx.search(x, k)
        })?
    }

    /// Neighbors within `radius` of each of the `n` queries.
    pub fn range_search(
        &self,
        h: IndexHandle,
        n: usize,
        x: &[f32],
        radius: f32,
    ) -> Result<RangeSearchResult> {
        self.with_index(h, |idx| {
            check_rows(n, x.len(), idx.dimension())?;
            idx.range_search(x, radius)
        })?
    }

    pub fn reconstruct(&self, h: IndexHandle, key: i64) -> Result<Vec<f32>> {
        self.with_index(h, |idx| idx.reconstruct(key))?
    }

    pub fn reconstruct_n(&self, h: IndexHandle, i0: i64, ni: usize) -> Result<Vec<f32>> {
        self.with_index(h, |idx| idx.reconstruct_n(i0, ni))?
    }

    /// Labels of the `k` nearest entries for each of the `n` vectors.
    pub fn assign(&self, h: IndexHandle, n: usize, x: &[f32], k: usize) -> Result<Vec<i64>> {
        self.with_index(h, |idx| {
            check_rows(n, x.len(), idx.dimension())?;
            idx.assign(x, k)
        })?
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn ntotal(&self, h: IndexHandle) -> Result<usize> {
        self.with_index(h, |idx| idx.ntotal())
    }

    pub fn is_trained(&self, h: IndexHandle) -> Result<bool> {
        self.with_index(h, |idx| idx.is_trained())
    }

    pub fn dimension(&self, h: IndexHandle) -> Result<usize> {
        self.with_index(h, |idx| idx.dimension())
    }

    /// Lists probed per query by the IVF level of the index.
    pub fn nprobe(&self, h: IndexHandle) -> Result<usize> {
        self.with_index(h, |idx| idx.nprobe())?
    }

    pub fn set_nprobe(&self, h: IndexHandle, nprobe: usize) -> Result<()> {
        self.with_index_mut(h, |idx| idx.set_nprobe(nprobe))?
    }

    pub fn set_refine_k_factor(&self, h: IndexHandle, k_factor: f32) -> Result<()> {
        self.with_index_mut(h, |idx| idx.set_refine_k_factor(k_factor))?
    }

    // ------------------------------------------------------------------------
    // Binary indexes
    // ------------------------------------------------------------------------

    pub fn binary_add(&self, h: BinaryIndexHandle, n: usize, x: &[u8]) -> Result<()> {
        let slot = self.binary_slot(h)?;
        let mut idx = slot.write();
        check_rows(n, x.len(), idx.code_size())?;
        idx.add(x)
    }

    /// `k` nearest codes by Hamming distance.
    pub fn binary_search(
        &self,
        h: BinaryIndexHandle,
        n: usize,
        x: &[u8],
        k: usize,
    ) -> Result<BinarySearchResults> {
        let slot = self.binary_slot(h)?;
        let idx = slot.read();
        check_rows(n, x.len(), idx.code_size())?;
        idx.search(x, k)
    }

    pub fn binary_train(&self, h: BinaryIndexHandle, n: usize, x: &[u8]) -> Result<()> {
        let slot = self.binary_slot(h)?;
        let mut idx = slot.write();
        check_rows(n, x.len(), idx.code_size())?;
        idx.train(x)
    }

    pub fn binary_reset(&self, h: BinaryIndexHandle) -> Result<()> {
        self.binary_slot(h)?.write().reset();
        Ok(())
    }

    pub fn binary_ntotal(&self, h: BinaryIndexHandle) -> Result<usize> {
        Ok(self.binary_slot(h)?.read().ntotal())
    }

    pub fn binary_is_trained(&self, h: BinaryIndexHandle) -> Result<bool> {
        Ok(self.binary_slot(h)?.read().is_trained())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Save the index behind `h` to `path`.
    #[cfg(feature = "persistence")]
    pub fn write(&self, h: IndexHandle, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.with_index(h, |idx| crate::persistence::write_index_file(idx, path))?
    }

    /// Load an index from `path` under a fresh handle.
    #[cfg(feature = "persistence")]
    pub fn read(&self, path: impl AsRef<std::path::Path>) -> Result<IndexHandle> {
        let index = crate::persistence::read_index_file(path)?;
        Ok(self.insert(index))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Release the index behind `h`.
    ///
    /// The index is dropped once in-flight operations holding it finish.
    pub fn free(&self, h: IndexHandle) -> Result<()> {
        self.indexes
            .write()
            .remove(&h.0)
            .ok_or(Error::InvalidHandle(h.0))?;
        debug!(handle = h.0, "freed index");
        Ok(())
    }

    /// Release the binary index behind `h`.
    pub fn free_binary(&self, h: BinaryIndexHandle) -> Result<()> {
        self.binaries
            .write()
            .remove(&h.0)
            .ok_or(Error::InvalidHandle(h.0))?;
        debug!(handle = h.0, "freed binary index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::into_status;

    #[test]
    fn handles_are_never_reused() {
        let reg = Registry::new();
        let a = reg.new_flat(4, DistanceMetric::L2).unwrap();
        reg.free(a).unwrap();
        let b = reg.new_flat(4, DistanceMetric::L2).unwrap();
        assert!(b.raw() > a.raw());
        assert!(matches!(reg.ntotal(a), Err(Error::InvalidHandle(id)) if id == a.raw()));
    }

    #[test]
    fn double_free() {
        let reg = Registry::new();
        let h = reg.new_flat(4, DistanceMetric::L2).unwrap();
        assert!(reg.free(h).is_ok());
        assert!(matches!(reg.free(h), Err(Error::InvalidHandle(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn row_count_must_match_batch() {
        let reg = Registry::new();
        let h = reg.new_flat(2, DistanceMetric::L2).unwrap();
        assert!(matches!(
            reg.add(h, 3, &[0.0; 4]),
            Err(Error::DimensionMismatch {
                expected: 6,
                actual: 4
            })
        ));
        assert_eq!(reg.ntotal(h).unwrap(), 0);
    }

    #[test]
    fn ivf_consumes_quantizer() {
        let reg = Registry::new();
        let q = reg.new_flat(2, DistanceMetric::L2).unwrap();
        let ivf = reg.new_ivf(q, 2, 2, DistanceMetric::L2).unwrap();
        assert!(matches!(reg.ntotal(q), Err(Error::InvalidHandle(_))));
        assert!(!reg.is_trained(ivf).unwrap());
        assert_eq!(reg.nprobe(ivf).unwrap(), 1);
    }

    #[test]
    fn failed_consume_keeps_source() {
        let reg = Registry::new();
        let q = reg.new_flat(3, DistanceMetric::L2).unwrap();
        assert!(reg.new_ivf(q, 4, 2, DistanceMetric::L2).is_err());
        assert_eq!(reg.dimension(q).unwrap(), 3);

        let lsh = reg.new_lsh(8, 8, false, false).unwrap();
        assert!(reg.new_ivf(lsh, 8, 2, DistanceMetric::L2).is_err());
        assert!(reg.ntotal(lsh).is_ok());
    }

    #[test]
    fn shards_take_ownership() {
        let reg = Registry::new();
        let shards = reg.new_shards(2, DistanceMetric::L2).unwrap();
        let a = reg.new_flat(2, DistanceMetric::L2).unwrap();
        let b = reg.new_flat(2, DistanceMetric::L2).unwrap();
        reg.add_shard(shards, a).unwrap();
        reg.add_shard(shards, b).unwrap();
        assert!(reg.free(a).is_err());

        reg.add(shards, 4, &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0])
            .unwrap();
        let res = reg.search(shards, 1, &[2.9, 2.9], 1).unwrap();
        assert_eq!(res.labels, vec![3]);

        let wrong = reg.new_flat(3, DistanceMetric::L2).unwrap();
        assert!(reg.add_shard(shards, wrong).is_err());
        assert!(reg.ntotal(wrong).is_ok());
    }

    #[test]
    fn binary_lifecycle() {
        let reg = Registry::new();
        let h = reg.new_binary_flat(16).unwrap();
        reg.binary_add(h, 2, &[0, 0, 255, 255]).unwrap();
        assert_eq!(reg.binary_ntotal(h).unwrap(), 2);
        let res = reg.binary_search(h, 1, &[255, 254], 1).unwrap();
        assert_eq!((res.labels[0], res.distances[0]), (1, 1));
        reg.binary_reset(h).unwrap();
        assert_eq!(reg.binary_ntotal(h).unwrap(), 0);
        reg.free_binary(h).unwrap();
        assert!(reg.binary_is_trained(h).is_err());
    }

    #[test]
    fn status_codes_at_the_boundary() {
        let reg = Registry::new();
        let h = reg.new_flat(2, DistanceMetric::L2).unwrap();
        let mut out = 99usize;
        assert_eq!(into_status(reg.ntotal(h), &mut out), 0);
        assert_eq!(out, 0);
        reg.free(h).unwrap();
        let code = into_status(reg.ntotal(h), &mut out);
        assert_eq!(code, Error::InvalidHandle(0).code());
        assert_eq!(out, 0);
    }

    #[test]
    fn concurrent_searches() {
        let reg = Arc::new(Registry::new());
        let h = reg.new_flat(2, DistanceMetric::L2).unwrap();
        let data: Vec<f32> = (0..200).map(|i| i as f32).collect();
        reg.add(h, 100, &data).unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let reg = &reg;
                s.spawn(move || {
                    let q = [t as f32 * 2.0, t as f32 * 2.0 + 1.0];
                    let res = reg.search(h, 1, &q, 1).unwrap();
                    assert_eq!(res.labels, vec![t as i64]);
                });
            }
        });
    }
}
