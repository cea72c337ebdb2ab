//! Space partitioning.
//!
//! [`kmeans`] provides the Lloyd clustering that trains IVF coarse quantizers.

pub mod kmeans;

pub use kmeans::{kmeans_clustering, ClusteringStats, KMeans, KMeansInit, KMeansParams};
