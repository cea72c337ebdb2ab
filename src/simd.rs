//! Vector kernels.
//!
//! With the `innr` feature (default) the float kernels come from the `innr`
//! crate, which dispatches to SIMD at runtime. Without it, portable loops
//! accumulate into `LANES` partial sums so LLVM can vectorise them.
//!
//! ```rust
//! use proxim::simd::{dot, l2_distance_squared, norm};
//!
//! let a = [1.0_f32, 0.0, 0.0];
//! let b = [0.707, 0.707, 0.0];
//!
//! let d = dot(&a, &b);
//! let l2 = l2_distance_squared(&a, &b);
//! let n = norm(&a);
//! ```

#[cfg(feature = "innr")]
pub use innr::{dot, l2_distance, l2_distance_squared, norm};

#[cfg(not(feature = "innr"))]
mod fallback {
    //! Portable kernels used when `innr` is disabled.

    const LANES: usize = 8;

    /// Dot product of two vectors.
    #[inline]
    #[must_use]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);

        let mut acc = [0.0f32; LANES];
        let chunks = n / LANES;
        for c in 0..chunks {
            let base = c * LANES;
            for l in 0..LANES {
                acc[l] += a[base + l] * b[base + l];
            }
        }
        let mut sum: f32 = acc.iter().sum();
        for i in chunks * LANES..n {
            sum += a[i] * b[i];
        }
        sum
    }

    /// L2 norm of a vector.
    #[inline]
    #[must_use]
    pub fn norm(v: &[f32]) -> f32 {
        dot(v, v).sqrt()
    }

    /// Squared L2 distance.
    #[inline]
    #[must_use]
    pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);

        let mut acc = [0.0f32; LANES];
        let chunks = n / LANES;
        for c in 0..chunks {
            let base = c * LANES;
            for l in 0..LANES {
                let d = a[base + l] - b[base + l];
                acc[l] += d * d;
            }
        }
        let mut sum: f32 = acc.iter().sum();
        for i in chunks * LANES..n {
            let d = a[i] - b[i];
            sum += d * d;
        }
        sum
    }

    /// L2 (Euclidean) distance.
    #[inline]
    #[must_use]
    pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        l2_distance_squared(a, b).sqrt()
    }
}

#[cfg(not(feature = "innr"))]
pub use fallback::*;

// Hamming stays local: innr's binary ops work on its own `PackedBinary` type.

/// Hamming distance between two packed bit strings.
#[inline]
#[must_use]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);
    let mut total = 0u32;
    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        let wa = u64::from_le_bytes([ca[0], ca[1], ca[2], ca[3], ca[4], ca[5], ca[6], ca[7]]);
        let wb = u64::from_le_bytes([cb[0], cb[1], cb[2], cb[3], cb[4], cb[5], cb[6], cb[7]]);
        total += (wa ^ wb).count_ones();
    }
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        total += (x ^ y).count_ones();
    }
    total
}
