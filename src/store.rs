//! Fixed-width row storage with parallel ids.
//!
//! Every index variant keeps its payload in a [`VectorStore`]: raw `f32` vectors
//! for exact indexes, packed `u8` codes ([`CodeStore`]) for quantized ones. Rows
//! live in one contiguous buffer (`len * width` elements) and each row carries an
//! `i64` id. Appends are all-or-nothing.

use crate::error::{check_batch, Error, Result};
use serde::{Deserialize, Serialize};

/// Append-only rows of `width` elements plus one id per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStore<T> {
    width: usize,
    data: Vec<T>,
    ids: Vec<i64>,
}

/// Storage for quantized codes.
pub type CodeStore = VectorStore<u8>;

impl<T: Copy> VectorStore<T> {
    /// Create an empty store of `width`-element rows.
    pub fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Row width in elements.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of stored rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append rows.
    ///
    /// `rows` must hold a whole number of rows. Without `ids`, rows are numbered by
    /// position (`len()`, `len() + 1`, ...). Either every row is appended or, on
    /// error, none is.
    pub fn add(&mut self, rows: &[T], ids: Option<&[i64]>) -> Result<()> {
        let n = check_batch(rows.len(), self.width)?;
        if let Some(ids) = ids {
            if ids.len() != n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    actual: ids.len(),
                });
            }
        }

        self.data.try_reserve(rows.len())?;
        self.ids.try_reserve(n)?;

        self.data.extend_from_slice(rows);
        match ids {
            Some(ids) => self.ids.extend_from_slice(ids),
            None => {
                let start = self.ids.len() as i64;
                self.ids.extend(start..start + n as i64);
            }
        }
        Ok(())
    }

    /// Append one row with an explicit id.
    pub fn push(&mut self, row: &[T], id: i64) -> Result<()> {
        self.add(row, Some(&[id]))
    }

    /// Row at position `pos`.
    #[inline]
    pub fn row(&self, pos: usize) -> &[T] {
        let start = pos * self.width;
        &self.data[start..start + self.width]
    }

    /// Id at position `pos`.
    #[inline]
    pub fn id(&self, pos: usize) -> i64 {
        self.ids[pos]
    }

    /// All ids in insertion order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// The flat row buffer.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Iterate `(id, row)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[T])> + '_ {
        self.ids
            .iter()
            .copied()
            .zip(self.data.chunks_exact(self.width.max(1)))
    }

    /// Position of the first row carrying `id`.
    pub fn position_of(&self, id: i64) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    /// Copy of the row carrying `id`.
    pub fn get(&self, id: i64) -> Result<Vec<T>> {
        self.position_of(id)
            .map(|pos| self.row(pos).to_vec())
            .ok_or(Error::NotFound(id))
    }

    /// Drop every row from position `len` on.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.width);
        self.ids.truncate(len);
    }

    /// Remove every row; the width is kept.
    pub fn reset(&mut self) {
        self.data.clear();
        self.ids.clear();
    }

    /// Check the length invariant after deserialization.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(Error::CorruptData("store width is zero".into()));
        }
        if self.data.len() != self.ids.len() * self.width {
            return Err(Error::CorruptData(format!(
                "store holds {} elements for {} rows of width {}",
                self.data.len(),
                self.ids.len(),
                self.width
            )));
        }
        Ok(())
    }
}

impl VectorStore<f32> {
    /// Vector dimension.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.width
    }

    /// Copy of the stored vector carrying `id`.
    pub fn reconstruct(&self, id: i64) -> Result<Vec<f32>> {
        self.get(id)
    }
}
