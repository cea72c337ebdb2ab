//! Synthetic datasets and exact ground truth.
//!
//! All vectors are flat row-major `f32` batches.

use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::index::{FlatIndex, VectorIndex};
use crate::results::SearchResults;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Database and query vectors of one dimension.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Vectors to index, `n_train * dimension`.
    pub train: Vec<f32>,
    /// Query vectors, `n_test * dimension`.
    pub test: Vec<f32>,
    pub dimension: usize,
}

impl Dataset {
    /// Number of training (database) vectors.
    pub fn n_train(&self) -> usize {
        self.train.len() / self.dimension
    }

    /// Number of query vectors.
    pub fn n_test(&self) -> usize {
        self.test.len() / self.dimension
    }

    /// Exact top-`k` of every query against the database.
    pub fn ground_truth(&self, k: usize, metric: DistanceMetric) -> Result<SearchResults> {
        ground_truth(&self.train, &self.test, self.dimension, k, metric)
    }
}

/// Uniform vectors in `[0, 1)^d`.
pub fn create_uniform_dataset(n_train: usize, n_test: usize, dimension: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sample = |n: usize| -> Vec<f32> {
        (0..n * dimension).map(|_| rng.random::<f32>()).collect()
    };
    let train = sample(n_train);
    let test = sample(n_test);
    Dataset {
        train,
        test,
        dimension,
    }
}

/// Gaussian blobs around `n_clusters` uniform centers.
pub fn create_clustered_dataset(
    n_train: usize,
    n_test: usize,
    dimension: usize,
    n_clusters: usize,
    cluster_std: f32,
    seed: u64,
) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_clusters = n_clusters.max(1);

    let centers: Vec<f32> = (0..n_clusters * dimension)
        .map(|_| rng.random::<f32>())
        .collect();

    let mut sample = |n: usize| -> Vec<f32> {
        let mut out = Vec::with_capacity(n * dimension);
        for _ in 0..n {
            let c = rng.random_range(0..n_clusters);
            for &center in &centers[c * dimension..(c + 1) * dimension] {
                let z: f32 = rng.sample(StandardNormal);
                out.push(center + z * cluster_std);
            }
        }
        out
    };
    let train = sample(n_train);
    let test = sample(n_test);
    Dataset {
        train,
        test,
        dimension,
    }
}

/// Exact neighbors via a [`FlatIndex`] with sequential labels.
pub fn ground_truth(
    database: &[f32],
    queries: &[f32],
    dimension: usize,
    k: usize,
    metric: DistanceMetric,
) -> Result<SearchResults> {
    let mut flat = FlatIndex::new(dimension, metric)?;
    flat.add(database)?;
    flat.search(queries, k)
}
