//! Index variants and the [`Index`] tree that composes them.
//!
//! | Variant | Training | Payload | Search |
//! |---------|----------|---------|--------|
//! | [`FlatIndex`] | none | raw vectors | exhaustive, exact |
//! | [`ScalarQuantizerIndex`] | value ranges | SQ codes | exhaustive over decoded codes |
//! | [`LshIndex`] | optional thresholds | binary codes | Hamming |
//! | [`IvfIndex`] | k-means centroids | raw or SQ | `nprobe` nearest lists |
//! | [`RefineIndex`] | base index | base + exact copy | base candidates re-ranked |
//! | [`PreTransformIndex`] | transform + inner | inner | inner on transformed queries |
//! | [`IdMapIndex`] | inner | inner | inner, labels remapped |
//! | [`ShardsIndex`] | every shard | shards | parallel fan-out and merge |
//!
//! Composites own their children, so a whole pipeline is one value that can be
//! trained, searched and serialized by walking the tree. [`BinaryFlatIndex`] works
//! on packed bit vectors and stands outside the tree.

pub mod binary;
pub mod flat;
pub mod idmap;
pub mod ivf;
pub mod lsh;
pub mod pretransform;
pub mod refine;
pub mod scalar;
pub mod shards;
pub mod traits;

pub use binary::{BinaryFlatIndex, BinarySearchResults};
pub use flat::FlatIndex;
pub use idmap::IdMapIndex;
pub use ivf::{IvfEncoding, IvfIndex, IvfParams};
pub use lsh::{LshIndex, LshParams};
pub use pretransform::PreTransformIndex;
pub use refine::{RefineIndex, RefineParams};
pub use scalar::ScalarQuantizerIndex;
pub use shards::ShardsIndex;
pub use traits::{IndexStats, VectorIndex};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::results::{RangeSearchResult, SearchResults};
use serde::{Deserialize, Serialize};

/// A node of an index pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Index {
    Flat(FlatIndex),
    Ivf(IvfIndex),
    ScalarQuantizer(ScalarQuantizerIndex),
    Lsh(LshIndex),
    Refine(RefineIndex),
    PreTransform(PreTransformIndex),
    IdMap(IdMapIndex),
    Shards(ShardsIndex),
}

macro_rules! dispatch {
    ($self:expr, $idx:ident => $body:expr) => {
        match $self {
            Index::Flat($idx) => $body,
            Index::Ivf($idx) => $body,
            Index::ScalarQuantizer($idx) => $body,
            Index::Lsh($idx) => $body,
            Index::Refine($idx) => $body,
            Index::PreTransform($idx) => $body,
            Index::IdMap($idx) => $body,
            Index::Shards($idx) => $body,
        }
    };
}

impl Index {
    /// Short variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            Index::Flat(_) => "Flat",
            Index::Ivf(_) => "IVF",
            Index::ScalarQuantizer(_) => "ScalarQuantizer",
            Index::Lsh(_) => "LSH",
            Index::Refine(_) => "Refine",
            Index::PreTransform(_) => "PreTransform",
            Index::IdMap(_) => "IDMap",
            Index::Shards(_) => "Shards",
        }
    }

    /// `nprobe` of the first IVF index in the tree.
    pub fn nprobe(&self) -> Result<usize> {
        match self {
            Index::Ivf(ivf) => Ok(ivf.nprobe()),
            Index::Refine(r) => r.base().nprobe(),
            Index::PreTransform(p) => p.inner().nprobe(),
            Index::IdMap(m) => m.inner().nprobe(),
            Index::Shards(s) => s
                .shards()
                .iter()
                .find_map(|shard| shard.nprobe().ok())
                .ok_or_else(|| Error::NotSupported("nprobe on an index without IVF".into())),
            _ => Err(Error::NotSupported(format!(
                "nprobe on a {} index",
                self.kind()
            ))),
        }
    }

    /// Set `nprobe` on every IVF index in the tree.
    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        if nprobe == 0 {
            return Err(Error::InvalidParameter("nprobe must be greater than 0".into()));
        }
        if self.nprobe().is_err() {
            return Err(Error::NotSupported(format!(
                "nprobe on a {} index",
                self.kind()
            )));
        }
        self.apply_nprobe(nprobe);
        Ok(())
    }

    fn apply_nprobe(&mut self, nprobe: usize) {
        match self {
            Index::Ivf(ivf) => {
                // Non-zero was checked by the caller.
                let _ = ivf.set_nprobe(nprobe);
            }
            Index::Refine(r) => r.base_mut().apply_nprobe(nprobe),
            Index::PreTransform(p) => p.inner_mut().apply_nprobe(nprobe),
            Index::IdMap(m) => m.inner_mut().apply_nprobe(nprobe),
            Index::Shards(s) => s
                .shards_mut()
                .iter_mut()
                .for_each(|shard| shard.apply_nprobe(nprobe)),
            _ => {}
        }
    }

    /// Set the over-fetch factor of the refinement stage.
    pub fn set_refine_k_factor(&mut self, k_factor: f32) -> Result<()> {
        match self {
            Index::Refine(r) => r.set_k_factor(k_factor),
            Index::IdMap(m) => m.inner_mut().set_refine_k_factor(k_factor),
            _ => Err(Error::NotSupported(format!(
                "k_factor on a {} index",
                self.kind()
            ))),
        }
    }

    /// Check every structural invariant of the tree.
    pub fn validate(&self) -> Result<()> {
        dispatch!(self, idx => idx.validate())
    }
}

impl VectorIndex for Index {
    fn dimension(&self) -> usize {
        dispatch!(self, idx => idx.dimension())
    }

    fn metric(&self) -> DistanceMetric {
        dispatch!(self, idx => idx.metric())
    }

    fn ntotal(&self) -> usize {
        dispatch!(self, idx => idx.ntotal())
    }

    fn is_trained(&self) -> bool {
        dispatch!(self, idx => idx.is_trained())
    }

    fn train(&mut self, x: &[f32]) -> Result<()> {
        dispatch!(self, idx => idx.train(x))
    }

    fn add(&mut self, x: &[f32]) -> Result<()> {
        dispatch!(self, idx => idx.add(x))
    }

    fn add_with_ids(&mut self, x: &[f32], ids: &[i64]) -> Result<()> {
        dispatch!(self, idx => idx.add_with_ids(x, ids))
    }

    fn search(&self, x: &[f32], k: usize) -> Result<SearchResults> {
        dispatch!(self, idx => idx.search(x, k))
    }

    fn range_search(&self, x: &[f32], radius: f32) -> Result<RangeSearchResult> {
        dispatch!(self, idx => idx.range_search(x, radius))
    }

    fn reconstruct(&self, key: i64) -> Result<Vec<f32>> {
        dispatch!(self, idx => idx.reconstruct(key))
    }

    fn reset(&mut self) {
        dispatch!(self, idx => idx.reset())
    }

    fn stats(&self) -> IndexStats {
        dispatch!(self, idx => idx.stats())
    }
}

macro_rules! impl_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Index {
                fn from(idx: $ty) -> Self {
                    Index::$variant(idx)
                }
            }
        )*
    };
}

impl_from!(
    Flat(FlatIndex),
    Ivf(IvfIndex),
    ScalarQuantizer(ScalarQuantizerIndex),
    Lsh(LshIndex),
    Refine(RefineIndex),
    PreTransform(PreTransformIndex),
    IdMap(IdMapIndex),
    Shards(ShardsIndex),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nprobe_reaches_through_wrappers() {
        let ivf = IvfIndex::new(4, DistanceMetric::L2, IvfParams::new(8)).unwrap();
        let mut idx = Index::from(IdMapIndex::new(ivf.into()).unwrap());
        assert_eq!(idx.nprobe().unwrap(), 1);
        idx.set_nprobe(5).unwrap();
        assert_eq!(idx.nprobe().unwrap(), 5);
        assert!(matches!(idx.set_nprobe(0), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn nprobe_on_flat_is_not_supported() {
        let mut idx = Index::from(FlatIndex::l2(4).unwrap());
        assert!(matches!(idx.nprobe(), Err(Error::NotSupported(_))));
        assert!(matches!(idx.set_nprobe(2), Err(Error::NotSupported(_))));
        assert!(idx.set_refine_k_factor(2.0).is_err());
    }

    #[test]
    fn dispatch_reports_kind() {
        let idx = Index::from(FlatIndex::l2(4).unwrap());
        assert_eq!(idx.kind(), "Flat");
        assert_eq!(idx.stats().kind, "Flat");
        assert_eq!(idx.dimension(), 4);
    }
}
