//! Linear vector transforms applied ahead of an index.
//!
//! - [`RandomRotationMatrix`]: seeded random orthonormal projection, trained at
//!   construction.
//! - [`PcaMatrix`]: principal component projection learned from data, with optional
//!   whitening (`eigen_power = -0.5`) and a random rotation of the output.
//!
//! Both store a row-major `d_out * d_in` matrix and compute `y = M (x - mean)`.

use crate::error::{check_batch, Error, Result};
use crate::simd;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Seed used when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 1234;

// ============================================================================
// Rotation Matrix Generation
// ============================================================================

/// Row-major `m * m` orthonormal matrix from Gaussian rows and Gram-Schmidt.
fn orthonormal(m: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m);

    while basis.len() < m {
        let mut v: Vec<f64> = (0..m).map(|_| rng.sample(StandardNormal)).collect();
        for b in &basis {
            let dot: f64 = v.iter().zip(b).map(|(a, b)| a * b).sum();
            for (vi, bi) in v.iter_mut().zip(b) {
                *vi -= dot * bi;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        // Degenerate draw: resample.
        if norm > 1e-6 {
            v.iter_mut().for_each(|x| *x /= norm);
            basis.push(v);
        }
    }

    basis.into_iter().flatten().map(|x| x as f32).collect()
}

/// `out = M (x - mean)` for a row-major `d_out * d_in` matrix.
fn project(matrix: &[f32], mean: Option<&[f32]>, d_in: usize, x: &[f32], out: &mut [f32]) {
    let centered;
    let x = match mean {
        Some(mean) => {
            centered = x.iter().zip(mean).map(|(a, m)| a - m).collect::<Vec<_>>();
            &centered[..]
        }
        None => x,
    };
    for (o, row) in out.iter_mut().zip(matrix.chunks_exact(d_in)) {
        *o = simd::dot(row, x);
    }
}

/// `out = M^T y + mean`.
fn project_back(matrix: &[f32], mean: Option<&[f32]>, d_in: usize, y: &[f32], out: &mut [f32]) {
    match mean {
        Some(mean) => out.copy_from_slice(mean),
        None => out.fill(0.0),
    }
    for (&yi, row) in y.iter().zip(matrix.chunks_exact(d_in)) {
        for (o, &m) in out.iter_mut().zip(row) {
            *o += yi * m;
        }
    }
}

// ============================================================================
// Random rotation
// ============================================================================

/// Random orthonormal projection from `d_in` to `d_out` dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomRotationMatrix {
    d_in: usize,
    d_out: usize,
    seed: u64,
    /// Row-major `d_out * d_in`.
    matrix: Vec<f32>,
}

impl RandomRotationMatrix {
    /// Build with the default seed.
    pub fn new(d_in: usize, d_out: usize) -> Result<Self> {
        Self::with_seed(d_in, d_out, DEFAULT_SEED)
    }

    /// Build from an explicit seed.
    ///
    /// A `max(d_in, d_out)` square orthonormal matrix is drawn and its top-left
    /// `d_out * d_in` block kept.
    pub fn with_seed(d_in: usize, d_out: usize, seed: u64) -> Result<Self> {
        if d_in == 0 || d_out == 0 {
            return Err(Error::InvalidParameter(
                "rotation dimensions must be greater than 0".into(),
            ));
        }
        let m = d_in.max(d_out);
        let full = orthonormal(m, seed);
        let matrix = (0..d_out)
            .flat_map(|i| full[i * m..i * m + d_in].iter().copied())
            .collect();
        Ok(Self {
            d_in,
            d_out,
            seed,
            matrix,
        })
    }

    /// Input dimension.
    pub fn d_in(&self) -> usize {
        self.d_in
    }

    /// Output dimension.
    pub fn d_out(&self) -> usize {
        self.d_out
    }

    /// Rotate one vector.
    pub fn apply_one(&self, x: &[f32], out: &mut [f32]) {
        project(&self.matrix, None, self.d_in, x, out);
    }

    /// Transpose product; the exact inverse when `d_out >= d_in`.
    pub fn reverse_one(&self, y: &[f32], out: &mut [f32]) {
        project_back(&self.matrix, None, self.d_in, y, out);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.d_in.checked_mul(self.d_out) != Some(self.matrix.len()) {
            return Err(Error::CorruptData("rotation matrix size mismatch".into()));
        }
        Ok(())
    }
}

// ============================================================================
// PCA
// ============================================================================

/// PCA projection learned from training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaMatrix {
    d_in: usize,
    d_out: usize,
    /// Each component is scaled by `eigenvalue ^ eigen_power`; `0` keeps it orthonormal.
    eigen_power: f32,
    /// Rotate the output with a random orthonormal matrix.
    random_rotation: bool,
    mean: Vec<f32>,
    /// Row-major `d_out * d_in`; empty until trained.
    matrix: Vec<f32>,
    eigenvalues: Vec<f32>,
}

impl PcaMatrix {
    /// Untrained PCA reducing `d_in` dimensions to `d_out`.
    pub fn new(d_in: usize, d_out: usize, eigen_power: f32, random_rotation: bool) -> Result<Self> {
        if d_in == 0 || d_out == 0 {
            return Err(Error::InvalidParameter(
                "PCA dimensions must be greater than 0".into(),
            ));
        }
        if d_out > d_in {
            return Err(Error::InvalidParameter(format!(
                "PCA cannot expand {d_in} dimensions to {d_out}"
            )));
        }
        Ok(Self {
            d_in,
            d_out,
            eigen_power,
            random_rotation,
            mean: Vec::new(),
            matrix: Vec::new(),
            eigenvalues: Vec::new(),
        })
    }

    pub fn d_in(&self) -> usize {
        self.d_in
    }

    pub fn d_out(&self) -> usize {
        self.d_out
    }

    pub fn is_trained(&self) -> bool {
        !self.matrix.is_empty()
    }

    /// Eigenvalues of the kept components, largest first.
    pub fn eigenvalues(&self) -> &[f32] {
        &self.eigenvalues
    }

    /// Learn the mean and principal components of `x`.
    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        let d = self.d_in;
        let n = check_batch(x.len(), d)?;
        if n == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        if n < 2 {
            return Err(Error::InsufficientData {
                required: 2,
                actual: n,
            });
        }

        let mut mean = vec![0.0f64; d];
        for v in x.chunks_exact(d) {
            for (m, &val) in mean.iter_mut().zip(v) {
                *m += val as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n as f64);

        let mut cov = vec![0.0f64; d * d];
        for v in x.chunks_exact(d) {
            for i in 0..d {
                let ci = v[i] as f64 - mean[i];
                for j in i..d {
                    cov[i * d + j] += ci * (v[j] as f64 - mean[j]);
                }
            }
        }
        for i in 0..d {
            for j in i..d {
                let c = cov[i * d + j] / n as f64;
                cov[i * d + j] = c;
                cov[j * d + i] = c;
            }
        }

        let (values, vectors) = jacobi_eigen(&mut cov, d);
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

        let mut matrix = Vec::with_capacity(self.d_out * d);
        let mut eigenvalues = Vec::with_capacity(self.d_out);
        for &c in order.iter().take(self.d_out) {
            let lambda = values[c].max(0.0);
            let scale = if self.eigen_power == 0.0 {
                1.0
            } else {
                lambda.max(1e-12).powf(self.eigen_power as f64)
            };
            // Column `c` of the eigenvector matrix.
            matrix.extend((0..d).map(|r| (vectors[r * d + c] * scale) as f32));
            eigenvalues.push(lambda as f32);
        }

        if self.random_rotation {
            let rr = RandomRotationMatrix::new(self.d_out, self.d_out)?;
            let mut rotated = vec![0.0f32; self.d_out * d];
            for col in 0..d {
                let column: Vec<f32> = (0..self.d_out).map(|r| matrix[r * d + col]).collect();
                let mut out = vec![0.0f32; self.d_out];
                rr.apply_one(&column, &mut out);
                for (r, v) in out.into_iter().enumerate() {
                    rotated[r * d + col] = v;
                }
            }
            matrix = rotated;
        }

        debug!(d_in = d, d_out = self.d_out, n, "trained PCA");
        self.mean = mean.into_iter().map(|m| m as f32).collect();
        self.matrix = matrix;
        self.eigenvalues = eigenvalues;
        Ok(())
    }

    fn apply_one(&self, x: &[f32], out: &mut [f32]) {
        project(&self.matrix, Some(&self.mean), self.d_in, x, out);
    }

    fn reverse_one(&self, y: &[f32], out: &mut [f32]) {
        project_back(&self.matrix, Some(&self.mean), self.d_in, y, out);
    }

    fn validate(&self) -> Result<()> {
        if self.is_trained()
            && (self.matrix.len() != self.d_in * self.d_out || self.mean.len() != self.d_in)
        {
            return Err(Error::CorruptData("PCA matrix size mismatch".into()));
        }
        Ok(())
    }
}

/// Cyclic Jacobi eigen-decomposition of a symmetric `d * d` matrix.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvectors stored as columns.
fn jacobi_eigen(a: &mut [f64], d: usize) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![0.0f64; d * d];
    for i in 0..d {
        v[i * d + i] = 1.0;
    }

    for _sweep in 0..100 {
        let off: f64 = (0..d)
            .flat_map(|i| (0..d).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i * d + j] * a[i * d + j])
            .sum();
        if off < 1e-22 {
            break;
        }

        for p in 0..d {
            for q in p + 1..d {
                let apq = a[p * d + q];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q * d + q] - a[p * d + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..d {
                    let akp = a[k * d + p];
                    let akq = a[k * d + q];
                    a[k * d + p] = c * akp - s * akq;
                    a[k * d + q] = s * akp + c * akq;
                }
                for k in 0..d {
                    let apk = a[p * d + k];
                    let aqk = a[q * d + k];
                    a[p * d + k] = c * apk - s * aqk;
                    a[q * d + k] = s * apk + c * aqk;
                }
                for k in 0..d {
                    let vkp = v[k * d + p];
                    let vkq = v[k * d + q];
                    v[k * d + p] = c * vkp - s * vkq;
                    v[k * d + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    ((0..d).map(|i| a[i * d + i]).collect(), v)
}

// ============================================================================
// Transform sum type
// ============================================================================

/// A linear transform placed in front of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorTransform {
    Pca(PcaMatrix),
    RandomRotation(RandomRotationMatrix),
}

impl VectorTransform {
    /// Input dimension.
    pub fn d_in(&self) -> usize {
        match self {
            Self::Pca(p) => p.d_in,
            Self::RandomRotation(r) => r.d_in,
        }
    }

    /// Output dimension.
    pub fn d_out(&self) -> usize {
        match self {
            Self::Pca(p) => p.d_out,
            Self::RandomRotation(r) => r.d_out,
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            Self::Pca(p) => p.is_trained(),
            Self::RandomRotation(_) => true,
        }
    }

    /// Train on `x`; random rotations ignore the data.
    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        match self {
            Self::Pca(p) => p.train(x),
            Self::RandomRotation(r) => check_batch(x.len(), r.d_in).map(|_| ()),
        }
    }

    /// Transform a batch of `d_in`-dim vectors into `d_out`-dim vectors.
    pub fn apply(&self, x: &[f32]) -> Result<Vec<f32>> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        let (d_in, d_out) = (self.d_in(), self.d_out());
        let n = check_batch(x.len(), d_in)?;
        let mut out = Vec::new();
        out.try_reserve(n * d_out)?;
        out.resize(n * d_out, 0.0);
        for (v, o) in x.chunks_exact(d_in).zip(out.chunks_exact_mut(d_out)) {
            match self {
                Self::Pca(p) => p.apply_one(v, o),
                Self::RandomRotation(r) => r.apply_one(v, o),
            }
        }
        Ok(out)
    }

    /// Map `d_out`-dim vectors back to the input space.
    ///
    /// PCA is reversible only without eigenvalue scaling.
    pub fn reverse(&self, y: &[f32]) -> Result<Vec<f32>> {
        if !self.is_trained() {
            return Err(Error::UntrainedIndex);
        }
        if let Self::Pca(p) = self {
            if p.eigen_power != 0.0 {
                return Err(Error::NotSupported(
                    "reverse transform of a whitened PCA".into(),
                ));
            }
        }
        let (d_in, d_out) = (self.d_in(), self.d_out());
        let n = check_batch(y.len(), d_out)?;
        let mut out = vec![0.0f32; n * d_in];
        for (v, o) in y.chunks_exact(d_out).zip(out.chunks_exact_mut(d_in)) {
            match self {
                Self::Pca(p) => p.reverse_one(v, o),
                Self::RandomRotation(r) => r.reverse_one(v, o),
            }
        }
        Ok(out)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Pca(p) => p.validate(),
            Self::RandomRotation(r) => r.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_is_orthonormal() {
        let r = RandomRotationMatrix::new(6, 6).unwrap();
        for i in 0..6 {
            for j in 0..6 {
                let dot = simd::dot(&r.matrix[i * 6..i * 6 + 6], &r.matrix[j * 6..j * 6 + 6]);
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "{i},{j}: {dot}");
            }
        }
    }

    #[test]
    fn rotation_preserves_norm_and_reverses() {
        let t = VectorTransform::RandomRotation(RandomRotationMatrix::new(4, 4).unwrap());
        let x = [1.0f32, -2.0, 0.5, 3.0];
        let y = t.apply(&x).unwrap();
        assert!((simd::norm(&y) - simd::norm(&x)).abs() < 1e-4);
        let back = t.reverse(&y).unwrap();
        for (a, b) in x.iter().zip(&back) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn rotation_is_seeded() {
        let a = RandomRotationMatrix::with_seed(5, 3, 7).unwrap();
        let b = RandomRotationMatrix::with_seed(5, 3, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.matrix.len(), 15);
    }

    #[test]
    fn pca_finds_dominant_axis() {
        // Points spread along (1, 1, 0) with small noise elsewhere.
        let mut x = Vec::new();
        for i in 0..50 {
            let t = i as f32 - 25.0;
            let e = ((i * 7) % 5) as f32 * 0.01;
            x.extend_from_slice(&[t, t, e]);
        }
        let mut p = PcaMatrix::new(3, 1, 0.0, false).unwrap();
        p.train(&x).unwrap();
        let c = &p.matrix;
        let s = std::f32::consts::FRAC_1_SQRT_2;
        assert!((c[0].abs() - s).abs() < 1e-3 && (c[1].abs() - s).abs() < 1e-3);
        assert!(c[2].abs() < 1e-2);
    }

    #[test]
    fn pca_full_rank_reverse_round_trip() {
        let x: Vec<f32> = (0..40).map(|i| ((i * 13 % 17) as f32) * 0.3 - 2.0).collect();
        let mut t = VectorTransform::Pca(PcaMatrix::new(4, 4, 0.0, true).unwrap());
        t.train(&x).unwrap();
        let back = t.reverse(&t.apply(&x).unwrap()).unwrap();
        for (a, b) in x.iter().zip(&back) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn pca_needs_two_vectors() {
        let mut p = PcaMatrix::new(2, 1, 0.0, false).unwrap();
        assert!(matches!(p.train(&[]), Err(Error::EmptyTrainingSet)));
        assert!(matches!(
            p.train(&[1.0, 2.0]),
            Err(Error::InsufficientData { .. })
        ));
        assert!(!p.is_trained());
    }

    #[test]
    fn whitened_pca_is_not_reversible() {
        let x: Vec<f32> = (0..20).map(|i| (i % 7) as f32).collect();
        let mut t = VectorTransform::Pca(PcaMatrix::new(2, 2, -0.5, false).unwrap());
        t.train(&x).unwrap();
        let y = t.apply(&x[..2]).unwrap();
        assert!(matches!(t.reverse(&y), Err(Error::NotSupported(_))));
    }

    #[test]
    fn pca_rejects_expansion() {
        assert!(PcaMatrix::new(4, 8, 0.0, false).is_err());
    }
}
