//! Utilities for measuring index quality.
//!
//! - **Datasets**: seeded uniform and clustered vectors
//! - **Ground truth**: exact neighbors from a flat scan
//! - **Metrics**: recall@k, precision@k
//!
//! ```
//! use proxim::benchmark::{create_clustered_dataset, mean_recall};
//! use proxim::{index_factory, DistanceMetric, VectorIndex};
//!
//! let ds = create_clustered_dataset(500, 20, 8, 4, 0.05, 7);
//! let truth = ds.ground_truth(5, DistanceMetric::L2).unwrap();
//!
//! let mut idx = index_factory(8, "IVF4,Flat", DistanceMetric::L2).unwrap();
//! idx.train(&ds.train).unwrap();
//! idx.add(&ds.train).unwrap();
//! idx.set_nprobe(4).unwrap();
//! let found = idx.search(&ds.test, 5).unwrap();
//! assert!(mean_recall(&truth, &found, 5) > 0.99);
//! ```

pub mod datasets;
pub mod metrics;

pub use datasets::{create_clustered_dataset, create_uniform_dataset, ground_truth, Dataset};
pub use metrics::{mean_recall, precision_at_k, recall_at_k, recall_curve};
