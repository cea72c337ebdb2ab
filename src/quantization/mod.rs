//! Vector quantization: compress or partition vectors while preserving distance.
//!
//! Two families live here:
//!
//! | Quantizer | Code | Used by |
//! |-----------|------|---------|
//! | [`CoarseQuantizer`] | nearest centroid id | IVF list assignment |
//! | [`ScalarQuantizer`] | 1, 4, 8 or 16 bits per dimension | SQ indexes, IVF list storage |
//!
//! ## Scalar vs coarse
//!
//! **Scalar quantization** codes each dimension independently against a learned
//! range. It is cheap to train and decode but ignores correlations between
//! dimensions.
//!
//! **Coarse quantization** learns `nlist` centroids with k-means and reduces a
//! vector to the id of its nearest centroid. On its own it is far too lossy to
//! rank candidates, so IVF uses it only to decide which list a vector lives in.

pub mod coarse;
pub mod scalar;

pub use coarse::CoarseQuantizer;
pub use scalar::{QuantizerType, ScalarQuantizer};
