//! proxim: exact and approximate nearest-neighbor search over dense vectors.
//!
//! Indexes are values of one tree type, [`Index`], built directly or from a
//! textual description with [`index_factory`]:
//!
//! - `index/`: flat, IVF, scalar-quantized, LSH and binary indexes, plus the
//!   composites (refine, pre-transform, id map, shards)
//! - `partitioning/`: k-means
//! - `quantization/`: coarse (centroid) and scalar quantizers
//! - `transform`: PCA and random rotations
//! - `persistence/`: versioned binary codec
//! - `registry`: handle-based access for callers that cannot hold Rust values
//!
//! # Conventions
//!
//! Batches are flat row-major `&[f32]` slices of `n * d` values. L2 distances
//! are squared; inner-product scores are raw similarities, larger is better.
//! Search results are padded with label `-1` when fewer than `k` entries exist.
//!
//! # Example
//!
//! ```
//! use proxim::{index_factory, DistanceMetric, VectorIndex};
//!
//! let d = 8;
//! let data: Vec<f32> = (0..200 * d).map(|i| ((i * 37) % 101) as f32 / 101.0).collect();
//!
//! let mut idx = index_factory(d, "IVF4,Flat", DistanceMetric::L2).unwrap();
//! idx.train(&data).unwrap();
//! idx.add(&data).unwrap();
//!
//! let res = idx.search(&data[..d], 3).unwrap();
//! assert_eq!(res.labels[0], 0);
//! assert_eq!(res.distances[0], 0.0);
//! ```
//!
//! # Concurrency
//!
//! Every index is `Send + Sync`. Searches take `&self` and split batches across
//! the rayon pool; training and adds take `&mut self`.
//!
//! # Logging
//!
//! Training, persistence and registry lifecycle events are emitted through
//! `tracing`. The crate installs no subscriber.

pub mod benchmark;
pub mod distance;
pub mod error;
pub mod factory;
pub mod index;
pub mod partitioning;
pub mod persistence;
pub mod quantization;
pub mod registry;
pub mod results;
pub mod simd;
pub mod store;
pub mod transform;

// Re-exports
pub use distance::{normalize, DistanceMetric};
pub use error::{into_status, Error, Result};
pub use factory::index_factory;
pub use index::{
    BinaryFlatIndex, BinarySearchResults, FlatIndex, IdMapIndex, Index, IndexStats, IvfEncoding,
    IvfIndex, IvfParams, LshIndex, LshParams, PreTransformIndex, RefineIndex, RefineParams,
    ScalarQuantizerIndex, ShardsIndex, VectorIndex,
};
pub use partitioning::{kmeans_clustering, KMeans, KMeansInit, KMeansParams};
pub use quantization::{QuantizerType, ScalarQuantizer};
pub use registry::{BinaryIndexHandle, IndexHandle, Registry};
pub use results::{Neighbor, RangeSearchResult, SearchResults};
pub use transform::{PcaMatrix, RandomRotationMatrix, VectorTransform};
