//! Exhaustive Hamming search over packed binary vectors.

use crate::distance::DistanceMetric;
use crate::error::{check_batch, Error, Result};
use crate::results::{padded, TopK};
use crate::simd;
use crate::store::CodeStore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Top-k Hamming results, row-major `n * k`; empty slots hold label `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySearchResults {
    pub k: usize,
    pub distances: Vec<i32>,
    pub labels: Vec<i64>,
}

/// Flat index of `d`-bit binary vectors, each stored as `d / 8` bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryFlatIndex {
    d: usize,
    codes: CodeStore,
}

impl BinaryFlatIndex {
    /// `d` is the vector length in bits and must be a positive multiple of 8.
    pub fn new(d: usize) -> Result<Self> {
        if d == 0 || d % 8 != 0 {
            return Err(Error::InvalidParameter(format!(
                "binary dimension {d} is not a positive multiple of 8"
            )));
        }
        Ok(Self {
            d,
            codes: CodeStore::new(d / 8),
        })
    }

    /// Dimension in bits.
    pub fn dimension(&self) -> usize {
        self.d
    }

    /// Bytes per vector.
    pub fn code_size(&self) -> usize {
        self.d / 8
    }

    /// Number of stored codes.
    pub fn ntotal(&self) -> usize {
        self.codes.len()
    }

    /// Always `true`.
    pub fn is_trained(&self) -> bool {
        true
    }

    /// No-op; binary flat search needs no training.
    pub fn train(&mut self, x: &[u8]) -> Result<()> {
        check_batch(x.len(), self.code_size()).map(|_| ())
    }

    /// Append packed vectors (`n * d / 8` bytes).
    pub fn add(&mut self, x: &[u8]) -> Result<()> {
        self.codes.add(x, None)
    }

    /// Append packed vectors under caller-supplied ids.
    pub fn add_with_ids(&mut self, x: &[u8], ids: &[i64]) -> Result<()> {
        self.codes.add(x, Some(ids))
    }

    /// `k` nearest stored vectors by Hamming distance; ties go to the lowest id.
    pub fn search(&self, x: &[u8], k: usize) -> Result<BinarySearchResults> {
        if k == 0 {
            return Err(Error::InvalidParameter("k must be greater than 0".into()));
        }
        let n = check_batch(x.len(), self.code_size())?;
        let mut distances = padded(n, k, i32::MAX)?;
        let mut labels = padded(n, k, -1i64)?;
        let per_query: Vec<_> = x
            .par_chunks(self.code_size())
            .map(|q| {
                let mut heap = TopK::new(k, DistanceMetric::L2);
                for (id, code) in self.codes.iter() {
                    heap.push(id, simd::hamming(q, code) as f32);
                }
                heap.into_sorted()
            })
            .collect();

        for (q, neighbors) in per_query.into_iter().enumerate() {
            for (j, nb) in neighbors.into_iter().enumerate() {
                distances[q * k + j] = nb.distance as i32;
                labels[q * k + j] = nb.label;
            }
        }
        Ok(BinarySearchResults {
            k,
            distances,
            labels,
        })
    }

    /// Stored code carrying `key`.
    pub fn reconstruct(&self, key: i64) -> Result<Vec<u8>> {
        self.codes.get(key)
    }

    /// Drop every stored code.
    pub fn reset(&mut self) {
        self.codes.reset();
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.codes.validate()?;
        if self.d == 0 || self.d % 8 != 0 || self.codes.width() != self.d / 8 {
            return Err(Error::CorruptData("binary code width mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_must_be_byte_aligned() {
        assert!(BinaryFlatIndex::new(12).is_err());
        assert!(BinaryFlatIndex::new(0).is_err());
        assert_eq!(BinaryFlatIndex::new(16).unwrap().code_size(), 2);
    }

    #[test]
    fn hamming_search() {
        let mut idx = BinaryFlatIndex::new(16).unwrap();
        idx.add(&[0x00, 0x00, 0xFF, 0x00, 0x0F, 0x00]).unwrap();
        let r = idx.search(&[0x01, 0x00], 3).unwrap();
        assert_eq!(r.labels, vec![0, 2, 1]);
        assert_eq!(r.distances, vec![1, 3, 7]);
    }

    #[test]
    fn huge_k_is_an_error() {
        let mut idx = BinaryFlatIndex::new(8).unwrap();
        idx.add(&[1, 2]).unwrap();
        assert!(matches!(idx.search(&[1], 1 << 61), Err(Error::Allocation(_))));
        assert!(matches!(
            idx.search(&[1, 2], usize::MAX),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn ragged_input_is_rejected() {
        let mut idx = BinaryFlatIndex::new(16).unwrap();
        assert!(matches!(
            idx.add(&[0x00, 0x01, 0x02]),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(idx.ntotal(), 0);
    }

    #[test]
    fn reset_empties() {
        let mut idx = BinaryFlatIndex::new(8).unwrap();
        idx.add(&[1, 2, 3]).unwrap();
        idx.reset();
        assert_eq!(idx.ntotal(), 0);
        let r = idx.search(&[0], 2).unwrap();
        assert_eq!(r.labels, vec![-1, -1]);
    }
}
