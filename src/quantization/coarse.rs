//! Coarse quantizer: a centroid codebook used to partition vectors into lists.

use crate::distance::DistanceMetric;
use crate::error::{check_batch, Error, Result};
use crate::index::flat::FlatIndex;
use crate::index::VectorIndex;
use crate::partitioning::{KMeans, KMeansParams};
use crate::results::TopK;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Nearest-centroid quantizer backed by a flat index of `nlist` centroids.
///
/// List numbers are centroid positions in the flat index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoarseQuantizer {
    centroids: FlatIndex,
    nlist: usize,
}

impl CoarseQuantizer {
    /// Untrained quantizer with `nlist` lists.
    pub fn new(dimension: usize, nlist: usize, metric: DistanceMetric) -> Result<Self> {
        Self::from_flat(FlatIndex::new(dimension, metric)?, nlist)
    }

    /// Wrap an existing flat index.
    ///
    /// The index must be empty or hold exactly `nlist` centroids; in the latter
    /// case the quantizer is trained already.
    pub fn from_flat(centroids: FlatIndex, nlist: usize) -> Result<Self> {
        if nlist == 0 {
            return Err(Error::InvalidParameter("nlist must be greater than 0".into()));
        }
        let n = centroids.ntotal();
        if n != 0 && n != nlist {
            return Err(Error::InvalidParameter(format!(
                "quantizer holds {n} centroids, expected 0 or {nlist}"
            )));
        }
        Ok(Self { centroids, nlist })
    }

    /// Number of lists.
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Centroid dimension.
    pub fn dimension(&self) -> usize {
        self.centroids.dimension()
    }

    /// Assignment metric.
    pub fn metric(&self) -> DistanceMetric {
        self.centroids.metric()
    }

    /// Whether the codebook is complete.
    pub fn is_trained(&self) -> bool {
        self.centroids.ntotal() == self.nlist
    }

    /// Flat `nlist * dimension` centroid buffer.
    pub fn centroids(&self) -> &[f32] {
        self.centroids.vectors()
    }

    /// Learn `nlist` centroids from `x` with k-means.
    ///
    /// The existing codebook is replaced only when training succeeds.
    pub fn train(&mut self, x: &[f32], params: &KMeansParams) -> Result<()> {
        let n = check_batch(x.len(), self.dimension())?;
        if n == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        if n < self.nlist {
            return Err(Error::InsufficientData {
                required: self.nlist,
                actual: n,
            });
        }

        let params = KMeansParams {
            metric: self.metric(),
            ..params.clone()
        };
        let mut km = KMeans::with_params(self.dimension(), self.nlist, params)?;
        let stats = km.fit(x)?;
        debug!(
            nlist = self.nlist,
            n,
            q_error = stats.q_error,
            iterations = stats.iterations,
            "trained coarse quantizer"
        );

        let mut codebook = FlatIndex::new(self.dimension(), self.metric())?;
        codebook.add(km.centroids())?;
        self.centroids = codebook;
        Ok(())
    }

    /// List number of the nearest centroid; ties go to the lowest list.
    pub fn encode(&self, v: &[f32]) -> Result<usize> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        Ok(crate::partitioning::kmeans::nearest(
            self.metric(),
            v,
            self.centroids(),
            self.dimension(),
        ))
    }

    /// Centroid of list `list`.
    pub fn decode(&self, list: usize) -> &[f32] {
        self.centroids.row(list)
    }

    /// The `nprobe` lists closest to `q`, best first.
    pub fn probe(&self, q: &[f32], nprobe: usize) -> Vec<usize> {
        let metric = self.metric();
        let mut heap = TopK::new(nprobe.min(self.nlist), metric);
        for (list, c) in self.centroids().chunks_exact(self.dimension()).enumerate() {
            heap.push(list as i64, metric.distance(q, c));
        }
        heap.into_sorted()
            .into_iter()
            .map(|n| n.label as usize)
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.centroids.validate()?;
        let n = self.centroids.ntotal();
        if n != 0 && n != self.nlist {
            return Err(Error::CorruptData(format!(
                "quantizer holds {n} centroids for {} lists",
                self.nlist
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> Vec<f32> {
        let mut x = Vec::new();
        for &(cx, cy) in &[(0.0f32, 0.0f32), (10.0, 10.0)] {
            for i in 0..5 {
                x.extend_from_slice(&[cx + i as f32 * 0.01, cy - i as f32 * 0.01]);
            }
        }
        x
    }

    #[test]
    fn insufficient_data() {
        let mut q = CoarseQuantizer::new(2, 4, DistanceMetric::L2).unwrap();
        let err = q.train(&[0.0, 0.0, 1.0, 1.0], &KMeansParams::default());
        assert!(matches!(
            err,
            Err(Error::InsufficientData {
                required: 4,
                actual: 2
            })
        ));
        assert!(!q.is_trained());
    }

    #[test]
    fn empty_training_set() {
        let mut q = CoarseQuantizer::new(2, 1, DistanceMetric::L2).unwrap();
        assert!(matches!(
            q.train(&[], &KMeansParams::default()),
            Err(Error::EmptyTrainingSet)
        ));
    }

    #[test]
    fn encode_and_probe() {
        let mut q = CoarseQuantizer::new(2, 2, DistanceMetric::L2).unwrap();
        q.train(&corners(), &KMeansParams::default()).unwrap();
        let a = q.encode(&[0.0, 0.0]).unwrap();
        let b = q.encode(&[10.0, 10.0]).unwrap();
        assert_ne!(a, b);
        assert_eq!(q.probe(&[9.0, 9.0], 2), vec![b, a]);
        assert_eq!(q.probe(&[9.0, 9.0], 10).len(), 2);
    }

    #[test]
    fn failed_retrain_keeps_codebook() {
        let mut q = CoarseQuantizer::new(2, 2, DistanceMetric::L2).unwrap();
        q.train(&corners(), &KMeansParams::default()).unwrap();
        let before = q.centroids().to_vec();
        assert!(q.train(&[1.0, 1.0], &KMeansParams::default()).is_err());
        assert_eq!(q.centroids(), &before[..]);
    }

    #[test]
    fn prepopulated_flat_counts_as_trained() {
        let mut flat = FlatIndex::l2(2).unwrap();
        flat.add(&[0.0, 0.0, 5.0, 5.0]).unwrap();
        let q = CoarseQuantizer::from_flat(flat, 2).unwrap();
        assert!(q.is_trained());
        assert_eq!(q.encode(&[4.0, 4.0]).unwrap(), 1);
    }
}
