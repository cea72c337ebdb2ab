//! Build index pipelines from a textual description.
//!
//! ```text
//! description := ["IDMap,"] transform* base [",RFlat" | ",Refine(Flat)"]
//! transform   := "PCA" N | "PCAR" N | "PCAW" N | "RR" N
//! base        := "Flat" | sq | "IVF" N "," ("Flat" | sq) | "LSH" [N] ["r"] ["t"]
//! sq          := "SQ8" | "SQ4" | "SQ1" | "SQfp16"
//! ```
//!
//! Tokens are read left to right. Every transform takes the current dimension as
//! input and hands its output dimension to the next stage. The refinement stage
//! wraps the whole transformed pipeline, so it re-ranks in the input space, and
//! `IDMap` wraps everything.
//!
//! # Examples
//!
//! ```
//! use proxim::{index_factory, DistanceMetric, VectorIndex};
//!
//! let idx = index_factory(64, "PCA32,IVF16,SQ8", DistanceMetric::L2).unwrap();
//! assert_eq!(idx.dimension(), 64);
//! assert!(!idx.is_trained());
//!
//! assert!(index_factory(64, "FOO99,Bar", DistanceMetric::L2).is_err());
//! ```

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::{
    FlatIndex, IdMapIndex, Index, IvfIndex, IvfParams, LshIndex, LshParams, PreTransformIndex,
    RefineIndex, ScalarQuantizerIndex,
};
use crate::quantization::QuantizerType;
use crate::transform::{PcaMatrix, RandomRotationMatrix, VectorTransform};
use std::iter::Peekable;
use std::str::Split;
use tracing::debug;

/// Parse `description` and build an untrained index for `dimension`-dim vectors.
pub fn index_factory(dimension: usize, description: &str, metric: DistanceMetric) -> Result<Index> {
    if dimension == 0 {
        return Err(Error::InvalidParameter(
            "dimension must be greater than 0".into(),
        ));
    }
    let index = Parser::new(description, dimension, metric).build()?;
    debug!(description, dimension, kind = index.kind(), "built index from description");
    Ok(index)
}

struct Parser<'a> {
    tokens: Peekable<Split<'a, char>>,
    dimension: usize,
    metric: DistanceMetric,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidSpec(msg.into())
}

/// Positive integer suffix of a token.
fn size(token: &str, digits: &str) -> Result<usize> {
    match digits.parse::<usize>() {
        Ok(0) => Err(invalid(format!("zero size in `{token}`"))),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(format!("bad size in `{token}`"))),
    }
}

fn scalar_type(token: &str) -> Option<QuantizerType> {
    match token {
        "SQ8" => Some(QuantizerType::QT8bit),
        "SQ4" => Some(QuantizerType::QT4bit),
        "SQ1" => Some(QuantizerType::QT1bit),
        "SQfp16" => Some(QuantizerType::QTfp16),
        _ => None,
    }
}

impl<'a> Parser<'a> {
    fn new(description: &'a str, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            tokens: description.split(',').peekable(),
            dimension,
            metric,
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.tokens.next().map(str::trim)
    }

    fn peek_token(&mut self) -> Option<&'a str> {
        self.tokens.peek().copied().map(str::trim)
    }

    fn build(mut self) -> Result<Index> {
        let id_map = if self.peek_token() == Some("IDMap") {
            self.next_token();
            true
        } else {
            false
        };

        let mut transforms = Vec::new();
        while let Some(t) = self.peek_token().and_then(|t| self.transform(t).transpose()) {
            let t = t?;
            self.next_token();
            self.dimension = t.d_out();
            transforms.push(t);
        }

        let base_token = self.next_token().ok_or_else(|| invalid("missing base index"))?;
        let mut index = self.base(base_token)?;

        while let Some(t) = transforms.pop() {
            index = PreTransformIndex::new(t, index)?.into();
        }

        if let Some(token) = self.next_token() {
            match token {
                "RFlat" | "Refine(Flat)" => index = RefineIndex::new(index)?.into(),
                other => return Err(invalid(format!("unexpected token `{other}`"))),
            }
        }

        if let Some(extra) = self.next_token() {
            return Err(invalid(format!("trailing token `{extra}`")));
        }

        if id_map {
            index = IdMapIndex::new(index)?.into();
        }
        Ok(index)
    }

    /// A transform stage, or `None` if `token` is not one.
    fn transform(&self, token: &str) -> Result<Option<VectorTransform>> {
        let d_in = self.dimension;
        let pca = |digits: &str, eigen_power: f32, rotate: bool| -> Result<VectorTransform> {
            let d_out = size(token, digits)?;
            if d_out > d_in {
                return Err(invalid(format!(
                    "`{token}` outputs {d_out} dimensions from {d_in}"
                )));
            }
            Ok(VectorTransform::Pca(PcaMatrix::new(
                d_in,
                d_out,
                eigen_power,
                rotate,
            )?))
        };

        let parsed = if let Some(digits) = token.strip_prefix("PCAR") {
            pca(digits, 0.0, true)?
        } else if let Some(digits) = token.strip_prefix("PCAW") {
            pca(digits, -0.5, false)?
        } else if let Some(digits) = token.strip_prefix("PCA") {
            pca(digits, 0.0, false)?
        } else if let Some(digits) = token.strip_prefix("RR") {
            let d_out = size(token, digits)?;
            VectorTransform::RandomRotation(RandomRotationMatrix::new(d_in, d_out)?)
        } else {
            return Ok(None);
        };
        Ok(Some(parsed))
    }

    fn base(&mut self, token: &str) -> Result<Index> {
        let (d, metric) = (self.dimension, self.metric);

        if token == "Flat" {
            return Ok(FlatIndex::new(d, metric)?.into());
        }
        if let Some(qtype) = scalar_type(token) {
            return Ok(ScalarQuantizerIndex::new(d, qtype, metric)?.into());
        }
        if let Some(digits) = token.strip_prefix("IVF") {
            let nlist = size(token, digits)?;
            let storage = self
                .next_token()
                .ok_or_else(|| invalid(format!("`{token}` needs a storage stage")))?;
            let params = match storage {
                "Flat" => IvfParams::new(nlist),
                other => match scalar_type(other) {
                    Some(qtype) => IvfParams::scalar_quantized(nlist, qtype),
                    None => return Err(invalid(format!("unknown IVF storage `{other}`"))),
                },
            };
            return Ok(IvfIndex::new(d, metric, params)?.into());
        }
        if let Some(rest) = token.strip_prefix("LSH") {
            let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let (digits, flags) = rest.split_at(split);
            let nbits = if digits.is_empty() { d } else { size(token, digits)? };
            let (rotate_data, flags) = match flags.strip_prefix('r') {
                Some(f) => (true, f),
                None => (false, flags),
            };
            let (train_thresholds, flags) = match flags.strip_prefix('t') {
                Some(f) => (true, f),
                None => (false, flags),
            };
            if !flags.is_empty() {
                return Err(invalid(format!("unknown LSH flags in `{token}`")));
            }
            let params = LshParams {
                nbits,
                rotate_data,
                train_thresholds,
            };
            return LshIndex::new(d, params)
                .map(Index::from)
                .map_err(|e| invalid(format!("`{token}`: {e}")));
        }
        Err(invalid(format!("unknown token `{token}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;

    fn build(desc: &str) -> Result<Index> {
        index_factory(16, desc, DistanceMetric::L2)
    }

    #[test]
    fn flat() {
        let idx = build("Flat").unwrap();
        assert_eq!(idx.kind(), "Flat");
        assert!(idx.is_trained());
    }

    #[test]
    fn ivf_variants() {
        let idx = build("IVF8,Flat").unwrap();
        assert_eq!(idx.kind(), "IVF");
        assert!(!idx.is_trained());
        assert_eq!(build("IVF8,SQ4").unwrap().stats().kind, "IVFScalarQuantizer");
    }

    #[test]
    fn transform_chain_feeds_dimensions() {
        let idx = build("PCA8,RR4,Flat").unwrap();
        assert_eq!(idx.dimension(), 16);
        let Index::PreTransform(outer) = &idx else {
            panic!("expected pre-transform, got {}", idx.kind());
        };
        assert_eq!(outer.transform().d_out(), 8);
        assert_eq!(outer.inner().dimension(), 8);
        let Index::PreTransform(inner) = outer.inner() else {
            panic!("expected nested pre-transform");
        };
        assert_eq!(inner.inner().dimension(), 4);
    }

    #[test]
    fn idmap_and_refine() {
        let idx = build("IDMap,PCA8,IVF4,SQ8,RFlat").unwrap();
        let Index::IdMap(map) = &idx else {
            panic!("expected IDMap");
        };
        let Index::Refine(refine) = map.inner() else {
            panic!("expected Refine");
        };
        assert_eq!(refine.base().kind(), "PreTransform");
        assert_eq!(refine.dimension(), 16);
        assert!(build("SQfp16,Refine(Flat)").is_ok());
    }

    #[test]
    fn lsh_flags() {
        let Index::Lsh(lsh) = build("LSH32rt").unwrap() else {
            panic!("expected LSH");
        };
        let p = lsh.params();
        assert_eq!((p.nbits, p.rotate_data, p.train_thresholds), (32, true, true));

        let Index::Lsh(lsh) = build("LSH").unwrap() else {
            panic!("expected LSH");
        };
        assert_eq!(lsh.params().nbits, 16);
        assert!(matches!(build("LSH32"), Err(Error::InvalidSpec(_))));
        assert!(matches!(build("LSHx"), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn invalid_descriptions() {
        for desc in [
            "FOO99,Bar",
            "",
            "IVF0,Flat",
            "IVF8",
            "IVF8,PQ4",
            "PCA32,Flat",
            "PCA0,Flat",
            "Flat,Flat",
            "Flat,RFlat,Extra",
            "PCA8",
            "SQ3",
        ] {
            assert!(
                matches!(build(desc), Err(Error::InvalidSpec(_))),
                "{desc:?} should be rejected"
            );
        }
    }
}
