//! Scalar quantization: each dimension coded independently.
//!
//! A trained quantizer maps every component into `[vmin, vmin + vdiff]` and
//! stores it on `bits` bits:
//!
//! ```text
//! code = round((x - vmin) / vdiff * (2^bits - 1))
//! x'   = vmin + code / (2^bits - 1) * vdiff
//! ```
//!
//! Non-uniform types learn one range per dimension, uniform types a single
//! range shared by all dimensions. `QTfp16` stores IEEE half floats and needs no
//! training. Codes are bit-packed, little-endian within each byte.

use crate::error::{check_batch, Error, Result};
use half::f16;
use serde::{Deserialize, Serialize};

/// Scalar quantizer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantizerType {
    /// 8 bits per dimension, per-dimension range.
    QT8bit,
    /// 4 bits per dimension, per-dimension range.
    QT4bit,
    /// 8 bits per dimension, one shared range.
    QT8bitUniform,
    /// 4 bits per dimension, one shared range.
    QT4bitUniform,
    /// IEEE 754 half precision.
    QTfp16,
    /// 1 bit per dimension, per-dimension range.
    QT1bit,
}

impl QuantizerType {
    /// Parse the integer type code used at the status-code boundary.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::QT8bit),
            1 => Ok(Self::QT4bit),
            2 => Ok(Self::QT8bitUniform),
            3 => Ok(Self::QT4bitUniform),
            4 => Ok(Self::QTfp16),
            7 => Ok(Self::QT1bit),
            other => Err(Error::InvalidParameter(format!(
                "unknown quantizer type {other}"
            ))),
        }
    }

    /// Integer type code.
    pub fn code(self) -> i32 {
        match self {
            Self::QT8bit => 0,
            Self::QT4bit => 1,
            Self::QT8bitUniform => 2,
            Self::QT4bitUniform => 3,
            Self::QTfp16 => 4,
            Self::QT1bit => 7,
        }
    }

    /// Bits per dimension.
    pub fn bits(self) -> usize {
        match self {
            Self::QT8bit | Self::QT8bitUniform => 8,
            Self::QT4bit | Self::QT4bitUniform => 4,
            Self::QTfp16 => 16,
            Self::QT1bit => 1,
        }
    }

    /// Whether a single range covers every dimension.
    pub fn is_uniform(self) -> bool {
        matches!(self, Self::QT8bitUniform | Self::QT4bitUniform)
    }

    /// Whether ranges must be learned before encoding.
    pub fn needs_training(self) -> bool {
        !matches!(self, Self::QTfp16)
    }
}

/// Trained scalar quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    qtype: QuantizerType,
    dimension: usize,
    /// Range starts: one per dimension, or one value for uniform types.
    vmin: Vec<f32>,
    /// Range widths, same layout as `vmin`.
    vdiff: Vec<f32>,
    trained: bool,
}

impl ScalarQuantizer {
    /// Untrained quantizer for `dimension`-dim vectors.
    pub fn new(dimension: usize, qtype: QuantizerType) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidParameter(
                "dimension must be greater than 0".into(),
            ));
        }
        Ok(Self {
            qtype,
            dimension,
            vmin: Vec::new(),
            vdiff: Vec::new(),
            trained: !qtype.needs_training(),
        })
    }

    /// Quantizer type.
    pub fn qtype(&self) -> QuantizerType {
        self.qtype
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        (self.dimension * self.qtype.bits()).div_ceil(8)
    }

    /// Whether ranges are available.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Learn value ranges from `x`. The previous ranges survive a failed call.
    pub fn train(&mut self, x: &[f32]) -> Result<()> {
        let n = check_batch(x.len(), self.dimension)?;
        if n == 0 {
            return Err(Error::EmptyTrainingSet);
        }
        if !self.qtype.needs_training() {
            return Ok(());
        }

        let (vmin, vdiff) = if self.qtype.is_uniform() {
            let (lo, hi) = x
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            (vec![lo], vec![hi - lo])
        } else {
            let mut lo = vec![f32::INFINITY; self.dimension];
            let mut hi = vec![f32::NEG_INFINITY; self.dimension];
            for v in x.chunks_exact(self.dimension) {
                for (j, &val) in v.iter().enumerate() {
                    lo[j] = lo[j].min(val);
                    hi[j] = hi[j].max(val);
                }
            }
            let diff = lo.iter().zip(&hi).map(|(l, h)| h - l).collect();
            (lo, diff)
        };

        if vmin.iter().chain(&vdiff).any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(
                "training data contains non-finite values".into(),
            ));
        }

        self.vmin = vmin;
        self.vdiff = vdiff;
        self.trained = true;
        Ok(())
    }

    #[inline]
    fn range(&self, dim: usize) -> (f32, f32) {
        if self.qtype.is_uniform() {
            (self.vmin[0], self.vdiff[0])
        } else {
            (self.vmin[dim], self.vdiff[dim])
        }
    }

    /// Encode one vector into `out` (`code_size()` bytes).
    pub fn encode_into(&self, v: &[f32], out: &mut [u8]) -> Result<()> {
        if !self.trained {
            return Err(Error::UntrainedIndex);
        }
        if v.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            });
        }
        out.fill(0);

        if self.qtype == QuantizerType::QTfp16 {
            for (j, &x) in v.iter().enumerate() {
                out[2 * j..2 * j + 2].copy_from_slice(&f16::from_f32(x).to_le_bytes());
            }
            return Ok(());
        }

        let bits = self.qtype.bits();
        let levels = ((1u32 << bits) - 1) as f32;
        for (j, &x) in v.iter().enumerate() {
            let (vmin, vdiff) = self.range(j);
            let t = if vdiff > 0.0 {
                ((x - vmin) / vdiff).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let code = (t * levels).round() as u8;
            let bit = j * bits;
            out[bit / 8] |= code << (bit % 8);
        }
        Ok(())
    }

    /// Encode one vector.
    pub fn encode(&self, v: &[f32]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.code_size()];
        self.encode_into(v, &mut out)?;
        Ok(out)
    }

    /// Encode a batch of vectors into one contiguous code buffer.
    pub fn encode_batch(&self, x: &[f32]) -> Result<Vec<u8>> {
        let n = check_batch(x.len(), self.dimension)?;
        let cs = self.code_size();
        let mut codes = Vec::new();
        codes.try_reserve(n * cs)?;
        codes.resize(n * cs, 0);
        for (v, out) in x.chunks_exact(self.dimension).zip(codes.chunks_exact_mut(cs)) {
            self.encode_into(v, out)?;
        }
        Ok(codes)
    }

    /// Decode one code into `out` (`dimension` floats).
    pub fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        if self.qtype == QuantizerType::QTfp16 {
            for (j, o) in out.iter_mut().enumerate().take(self.dimension) {
                *o = f16::from_le_bytes([code[2 * j], code[2 * j + 1]]).to_f32();
            }
            return;
        }

        let bits = self.qtype.bits();
        let mask = ((1u32 << bits) - 1) as u8;
        let levels = mask as f32;
        for (j, o) in out.iter_mut().enumerate().take(self.dimension) {
            let bit = j * bits;
            let c = (code[bit / 8] >> (bit % 8)) & mask;
            let (vmin, vdiff) = self.range(j);
            *o = vmin + c as f32 / levels * vdiff;
        }
    }

    /// Decode one code.
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        self.decode_into(code, &mut out);
        out
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.trained || !self.qtype.needs_training() {
            return Ok(());
        }
        let expected = if self.qtype.is_uniform() {
            1
        } else {
            self.dimension
        };
        if self.vmin.len() != expected || self.vdiff.len() != expected {
            return Err(Error::CorruptData(format!(
                "scalar quantizer has {} ranges, expected {expected}",
                self.vmin.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dim: usize, n: usize) -> Vec<f32> {
        (0..n * dim)
            .map(|i| ((i * 37 % 101) as f32 / 50.0) - 1.0)
            .collect()
    }

    #[test]
    fn untrained_encode_fails() {
        let sq = ScalarQuantizer::new(4, QuantizerType::QT8bit).unwrap();
        assert!(matches!(sq.encode(&[0.0; 4]), Err(Error::UntrainedIndex)));
    }

    #[test]
    fn empty_training_set() {
        let mut sq = ScalarQuantizer::new(4, QuantizerType::QT4bit).unwrap();
        assert!(matches!(sq.train(&[]), Err(Error::EmptyTrainingSet)));
        assert!(!sq.is_trained());
    }

    #[test]
    fn code_sizes() {
        let d = 10;
        let size = |q| ScalarQuantizer::new(d, q).unwrap().code_size();
        assert_eq!(size(QuantizerType::QT8bit), 10);
        assert_eq!(size(QuantizerType::QT4bit), 5);
        assert_eq!(size(QuantizerType::QT1bit), 2);
        assert_eq!(size(QuantizerType::QTfp16), 20);
    }

    #[test]
    fn reconstruction_error_is_bounded() {
        let d = 8;
        let x = sample(d, 50);
        for qtype in [
            QuantizerType::QT8bit,
            QuantizerType::QT4bit,
            QuantizerType::QT8bitUniform,
            QuantizerType::QT4bitUniform,
            QuantizerType::QT1bit,
        ] {
            let mut sq = ScalarQuantizer::new(d, qtype).unwrap();
            sq.train(&x).unwrap();
            let levels = ((1u32 << qtype.bits()) - 1) as f32;
            // Every range here is at most 2.0 wide.
            let bound = 2.0 / (2.0 * levels) + 1e-5;
            for v in x.chunks_exact(d) {
                let back = sq.decode(&sq.encode(v).unwrap());
                for (a, b) in v.iter().zip(&back) {
                    assert!((a - b).abs() <= bound, "{qtype:?}: {a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn fp16_needs_no_training() {
        let sq = ScalarQuantizer::new(3, QuantizerType::QTfp16).unwrap();
        assert!(sq.is_trained());
        let back = sq.decode(&sq.encode(&[0.5, -1.25, 3.0]).unwrap());
        assert_eq!(back, vec![0.5, -1.25, 3.0]);
    }

    #[test]
    fn decode_is_deterministic() {
        let d = 4;
        let x = sample(d, 10);
        let mut sq = ScalarQuantizer::new(d, QuantizerType::QT4bit).unwrap();
        sq.train(&x).unwrap();
        let code = sq.encode(&x[..d]).unwrap();
        assert_eq!(sq.decode(&code), sq.decode(&code));
    }

    #[test]
    fn type_codes_round_trip() {
        for q in [
            QuantizerType::QT8bit,
            QuantizerType::QT4bit,
            QuantizerType::QT8bitUniform,
            QuantizerType::QT4bitUniform,
            QuantizerType::QTfp16,
            QuantizerType::QT1bit,
        ] {
            assert_eq!(QuantizerType::from_code(q.code()).unwrap(), q);
        }
        assert!(QuantizerType::from_code(99).is_err());
    }
}
