//! k-means clustering implementation.
//!
//! Lloyd iteration used to train IVF coarse quantizers and exposed standalone
//! through [`kmeans_clustering`].
//!
//! Policy choices:
//! - Initialization defaults to k-means++ with a fixed seed (1234), so repeated fits
//!   on the same data are reproducible. [`KMeansInit::Random`] samples `k` distinct
//!   points instead.
//! - A centroid that receives no points is reseeded from the point currently
//!   farthest from its own centroid, taken from a cluster that keeps at least one
//!   other member.

use crate::distance::{normalize_in_place, DistanceMetric};
use crate::error::{check_batch, Error, Result};
use crate::simd;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Centroid initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KMeansInit {
    /// `k` distinct points sampled uniformly.
    Random,
    /// k-means++ (D² weighted sampling).
    #[default]
    PlusPlus,
}

/// k-means configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    /// Maximum Lloyd iterations.
    pub niter: usize,
    /// Stop once no centroid moves more than this (squared L2).
    pub epsilon: f32,
    /// RNG seed for initialization.
    pub seed: u64,
    /// Initialization strategy.
    pub init: KMeansInit,
    /// Metric used for assignment.
    pub metric: DistanceMetric,
    /// L2-normalize centroids after each update.
    pub spherical: bool,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            niter: 25,
            epsilon: 1e-6,
            seed: 1234,
            init: KMeansInit::PlusPlus,
            metric: DistanceMetric::L2,
            spherical: false,
        }
    }
}

/// Outcome of a [`KMeans::fit`] run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringStats {
    /// Sum of squared L2 distances from points to their assigned centroid.
    pub q_error: f32,
    /// Lloyd iterations performed.
    pub iterations: usize,
    /// Whether the centroid shift dropped below `epsilon`.
    pub converged: bool,
}

/// k-means clustering for partitioning vectors.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// Centroids, flat `k * dimension`.
    centroids: Vec<f32>,
    dimension: usize,
    k: usize,
    params: KMeansParams,
}

impl KMeans {
    /// Create new k-means with k clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        Self::with_params(dimension, k, KMeansParams::default())
    }

    /// Create k-means with explicit parameters.
    pub fn with_params(dimension: usize, k: usize, params: KMeansParams) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidParameter(
                "dimension must be greater than 0".into(),
            ));
        }
        if k == 0 {
            return Err(Error::InvalidClusterCount { k, num_points: 0 });
        }
        if params.niter == 0 {
            return Err(Error::InvalidParameter("niter must be greater than 0".into()));
        }

        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            params,
        })
    }

    /// Configure a deterministic seed for initialization.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = seed;
        self
    }

    /// Train on `x` (`n * dimension` floats).
    pub fn fit(&mut self, x: &[f32]) -> Result<ClusteringStats> {
        self.run(x, None)
    }

    /// Train on `x`, checking `cancel` between iterations.
    ///
    /// On cancellation the previous centroids are kept and [`Error::Cancelled`] is
    /// returned.
    pub fn fit_with_cancel(&mut self, x: &[f32], cancel: &AtomicBool) -> Result<ClusteringStats> {
        self.run(x, Some(cancel))
    }

    fn run(&mut self, x: &[f32], cancel: Option<&AtomicBool>) -> Result<ClusteringStats> {
        let n = check_batch(x.len(), self.dimension)?;
        if n == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        if self.k > n {
            return Err(Error::InvalidClusterCount {
                k: self.k,
                num_points: n,
            });
        }

        let mut centroids = match self.params.init {
            KMeansInit::PlusPlus => self.kmeans_plus_plus(x, n),
            KMeansInit::Random => self.random_init(x, n),
        };
        if self.params.spherical {
            self.normalize_centroids(&mut centroids);
        }

        let mut iterations = 0;
        let mut converged = false;
        for _ in 0..self.params.niter {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Err(Error::Cancelled);
            }
            iterations += 1;

            let (mut assignments, mut sq_dists) = self.assign_with_distances(x, &centroids);
            self.reseed_empty(x, &mut centroids, &mut assignments, &mut sq_dists);
            let new_centroids = self.update_centroids(x, &assignments, &centroids);

            let shift = centroids
                .chunks_exact(self.dimension)
                .zip(new_centroids.chunks_exact(self.dimension))
                .map(|(a, b)| simd::l2_distance_squared(a, b))
                .fold(0.0f32, f32::max);

            centroids = new_centroids;
            if shift < self.params.epsilon {
                converged = true;
                break;
            }
        }

        let (_, sq_dists) = self.assign_with_distances(x, &centroids);
        let q_error = sq_dists.iter().sum();
        debug!(
            k = self.k,
            n,
            iterations,
            converged,
            q_error,
            "k-means finished"
        );

        self.centroids = centroids;
        Ok(ClusteringStats {
            q_error,
            iterations,
            converged,
        })
    }

    /// k-means++ initialization.
    fn kmeans_plus_plus(&self, x: &[f32], n: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut centroids = Vec::with_capacity(self.k * self.dimension);

        let first = rng.random_range(0..n);
        centroids.extend_from_slice(row(x, self.dimension, first));

        // Squared L2 to the nearest chosen centroid, updated incrementally.
        let mut min_dist: Vec<f32> = x
            .chunks_exact(self.dimension)
            .map(|v| simd::l2_distance_squared(v, &centroids[..self.dimension]))
            .collect();

        for c in 1..self.k {
            let total: f64 = min_dist.iter().map(|&d| d as f64).sum();
            let chosen = if total <= 0.0 {
                // Every point coincides with a centroid; fall back to an unused index.
                c % n
            } else {
                let threshold = rng.random::<f64>() * total;
                let mut cumulative = 0.0f64;
                let mut pick = n - 1;
                for (i, &d) in min_dist.iter().enumerate() {
                    cumulative += d as f64;
                    if cumulative >= threshold && d > 0.0 {
                        pick = i;
                        break;
                    }
                }
                pick
            };

            let start = centroids.len();
            centroids.extend_from_slice(row(x, self.dimension, chosen));
            let newest = &centroids[start..start + self.dimension];
            for (d, v) in min_dist.iter_mut().zip(x.chunks_exact(self.dimension)) {
                *d = d.min(simd::l2_distance_squared(v, newest));
            }
        }

        centroids
    }

    /// Sample `k` distinct points.
    fn random_init(&self, x: &[f32], n: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let picks = rand::seq::index::sample(&mut rng, n, self.k);
        let mut centroids = Vec::with_capacity(self.k * self.dimension);
        for i in picks.iter() {
            centroids.extend_from_slice(row(x, self.dimension, i));
        }
        centroids
    }

    /// Nearest centroid per point plus its squared L2 distance.
    fn assign_with_distances(&self, x: &[f32], centroids: &[f32]) -> (Vec<usize>, Vec<f32>) {
        let metric = self.params.metric;
        let dim = self.dimension;
        x.par_chunks(dim)
            .map(|v| {
                let best = nearest(metric, v, centroids, dim);
                let sq = simd::l2_distance_squared(v, row(centroids, dim, best));
                (best, sq)
            })
            .unzip()
    }

    /// Give every empty cluster the farthest point of a multi-member cluster.
    fn reseed_empty(
        &self,
        x: &[f32],
        centroids: &mut [f32],
        assignments: &mut [usize],
        sq_dists: &mut [f32],
    ) {
        let mut counts = vec![0usize; self.k];
        for &a in assignments.iter() {
            counts[a] += 1;
        }

        for cluster in 0..self.k {
            if counts[cluster] > 0 {
                continue;
            }
            let donor = sq_dists
                .iter()
                .enumerate()
                .filter(|&(i, _)| counts[assignments[i]] > 1)
                .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i);

            let Some(point) = donor else {
                // k <= n guarantees a donor; nothing left to split otherwise.
                break;
            };

            counts[assignments[point]] -= 1;
            counts[cluster] = 1;
            assignments[point] = cluster;
            sq_dists[point] = 0.0;
            centroids[cluster * self.dimension..(cluster + 1) * self.dimension]
                .copy_from_slice(row(x, self.dimension, point));
            debug!(cluster, point, "reseeded empty cluster");
        }
    }

    /// Update centroids based on assignments.
    fn update_centroids(&self, x: &[f32], assignments: &[usize], previous: &[f32]) -> Vec<f32> {
        let dim = self.dimension;
        let mut sums = vec![0.0f64; self.k * dim];
        let mut counts = vec![0usize; self.k];

        for (v, &cluster) in x.chunks_exact(dim).zip(assignments) {
            counts[cluster] += 1;
            let acc = &mut sums[cluster * dim..(cluster + 1) * dim];
            for (s, &val) in acc.iter_mut().zip(v) {
                *s += val as f64;
            }
        }

        let mut centroids = vec![0.0f32; self.k * dim];
        for c in 0..self.k {
            let out = &mut centroids[c * dim..(c + 1) * dim];
            if counts[c] == 0 {
                out.copy_from_slice(row(previous, dim, c));
                continue;
            }
            let inv = 1.0 / counts[c] as f64;
            for (o, &s) in out.iter_mut().zip(&sums[c * dim..(c + 1) * dim]) {
                *o = (s * inv) as f32;
            }
        }

        if self.params.spherical {
            self.normalize_centroids(&mut centroids);
        }
        centroids
    }

    fn normalize_centroids(&self, centroids: &mut [f32]) {
        for c in centroids.chunks_exact_mut(self.dimension) {
            normalize_in_place(c);
        }
    }

    /// Assign vectors to nearest clusters.
    pub fn assign_clusters(&self, x: &[f32]) -> Vec<usize> {
        if self.centroids.is_empty() {
            return Vec::new();
        }
        self.assign_with_distances(x, &self.centroids).0
    }

    /// Trained centroids, flat `k * dimension` (empty before `fit`).
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    /// Consume and return the centroids.
    pub fn into_centroids(self) -> Vec<f32> {
        self.centroids
    }

    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// One-shot clustering: returns `(centroids, q_error)`.
pub fn kmeans_clustering(dimension: usize, k: usize, x: &[f32]) -> Result<(Vec<f32>, f32)> {
    let mut km = KMeans::new(dimension, k)?;
    let stats = km.fit(x)?;
    Ok((km.into_centroids(), stats.q_error))
}

/// Index of the best centroid for `v`; ties resolve to the lowest index.
#[inline]
pub(crate) fn nearest(metric: DistanceMetric, v: &[f32], centroids: &[f32], dim: usize) -> usize {
    let mut best = 0;
    let mut best_dist = metric.worst();
    for (i, c) in centroids.chunks_exact(dim).enumerate() {
        let d = metric.distance(v, c);
        if metric.is_better(d, best_dist) {
            best_dist = d;
            best = i;
        }
    }
    best
}

#[inline]
fn row(x: &[f32], dim: usize, idx: usize) -> &[f32] {
    &x[idx * dim..(idx + 1) * dim]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blobs(centers: &[[f32; 2]], per: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Vec::new();
        for c in centers {
            for _ in 0..per {
                out.push(c[0] + rng.random_range(-0.1..0.1));
                out.push(c[1] + rng.random_range(-0.1..0.1));
            }
        }
        out
    }

    #[test]
    fn rejects_bad_cluster_counts() {
        assert!(matches!(
            KMeans::new(2, 0),
            Err(Error::InvalidClusterCount { k: 0, .. })
        ));
        let mut km = KMeans::new(2, 5).unwrap();
        assert!(matches!(
            km.fit(&[0.0; 8]),
            Err(Error::InvalidClusterCount { k: 5, num_points: 4 })
        ));
        assert!(matches!(km.fit(&[]), Err(Error::EmptyTrainingSet)));
    }

    #[test]
    fn separates_blobs() {
        let centers = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];
        let x = blobs(&centers, 30, 7);
        let mut km = KMeans::new(2, 3).unwrap();
        let stats = km.fit(&x).unwrap();
        assert!(stats.q_error < 3.0 * 30.0 * 0.02 * 2.0);

        let a = km.assign_clusters(&x);
        for blob in a.chunks(30) {
            assert!(blob.iter().all(|&c| c == blob[0]));
        }
        assert_ne!(a[0], a[30]);
        assert_ne!(a[30], a[60]);
        assert_ne!(a[0], a[60]);
    }

    #[test]
    fn random_init_also_works() {
        let x = blobs(&[[0.0, 0.0], [5.0, 5.0]], 20, 3);
        let params = KMeansParams {
            init: KMeansInit::Random,
            ..Default::default()
        };
        let mut km = KMeans::with_params(2, 2, params).unwrap();
        km.fit(&x).unwrap();
        assert_eq!(km.centroids().len(), 4);
    }

    #[test]
    fn no_cluster_stays_empty() {
        // Many duplicates: plain Lloyd would leave clusters empty.
        let mut x = vec![0.0f32; 2 * 20];
        x.extend_from_slice(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let params = KMeansParams {
            init: KMeansInit::Random,
            seed: 0,
            ..Default::default()
        };
        let mut km = KMeans::with_params(2, 4, params).unwrap();
        km.fit(&x).unwrap();
        let a = km.assign_clusters(&x);
        let mut used: Vec<usize> = a.clone();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn cancellation_keeps_previous_centroids() {
        let x = blobs(&[[0.0, 0.0], [5.0, 5.0]], 10, 1);
        let mut km = KMeans::new(2, 2).unwrap();
        km.fit(&x).unwrap();
        let before = km.centroids().to_vec();

        let cancel = AtomicBool::new(true);
        assert!(matches!(
            km.fit_with_cancel(&x, &cancel),
            Err(Error::Cancelled)
        ));
        assert_eq!(km.centroids(), before.as_slice());
    }

    #[test]
    fn one_shot_api() {
        let x = blobs(&[[0.0, 0.0], [3.0, 3.0]], 10, 9);
        let (c, err) = kmeans_clustering(2, 2, &x).unwrap();
        assert_eq!(c.len(), 4);
        assert!(err >= 0.0);
    }

    proptest! {
        #[test]
        fn prop_kmeans_fit_is_deterministic_given_seed(
            seed in any::<u64>(),
            dimension in 1usize..16,
            num_vectors in 2usize..64,
            k in 1usize..16,
            raw in proptest::collection::vec(-1.0f32..1.0f32, 2usize..(64*16)),
        ) {
            prop_assume!(k <= num_vectors);
            let needed = num_vectors * dimension;
            prop_assume!(raw.len() >= needed);
            let vectors = raw[..needed].to_vec();

            let mut km1 = KMeans::new(dimension, k).unwrap().with_seed(seed);
            let mut km2 = KMeans::new(dimension, k).unwrap().with_seed(seed);

            km1.fit(&vectors).unwrap();
            km2.fit(&vectors).unwrap();

            prop_assert_eq!(km1.assign_clusters(&vectors), km2.assign_clusters(&vectors));
        }
    }
}
