//! On-disk framing for serialized objects.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Magic (4B): "PXIX"                      │
//! │ Version (4B, LE u32)                    │
//! │ Payload kind (1B)                       │
//! │ Payload length (8B, LE u64)             │
//! ├─────────────────────────────────────────┤
//! │ Payload: postcard-encoded object        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Compatibility
//!
//! - v1: initial format.
//! - A reader rejects any version it does not know with
//!   [`Error::UnsupportedVersion`](crate::Error::UnsupportedVersion).

use crate::error::{Error, Result};

/// Magic bytes opening every serialized object.
pub const MAGIC: [u8; 4] = *b"PXIX";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_LEN: usize = 4 + 4 + 1 + 8;

/// What the payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    /// A dense [`Index`](crate::index::Index) tree.
    Index = 1,
    /// A [`BinaryFlatIndex`](crate::index::BinaryFlatIndex).
    BinaryIndex = 2,
    /// A [`RangeSearchResult`](crate::results::RangeSearchResult).
    RangeResult = 3,
}

impl TryFrom<u8> for PayloadKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PayloadKind::Index),
            2 => Ok(PayloadKind::BinaryIndex),
            3 => Ok(PayloadKind::RangeResult),
            other => Err(Error::CorruptData(format!("unknown payload kind {other}"))),
        }
    }
}

/// Fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub kind: PayloadKind,
    pub payload_len: u64,
}

impl Header {
    /// Header for a current-version payload.
    pub fn new(kind: PayloadKind, payload_len: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            kind,
            payload_len,
        }
    }

    /// Serialize to the fixed-size wire header.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8] = self.kind as u8;
        out[9..17].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Parse and check a header.
    ///
    /// Checks run in order: length, magic, version, payload kind.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CorruptData(format!(
                "truncated header: {} of {HEADER_LEN} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::CorruptData("bad magic bytes".into()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let kind = PayloadKind::try_from(bytes[8])?;
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[9..17]);
        Ok(Self {
            version,
            kind,
            payload_len: u64::from_le_bytes(len),
        })
    }

    /// Fail unless the payload holds `kind`.
    pub fn expect(&self, kind: PayloadKind) -> Result<()> {
        if self.kind != kind {
            return Err(Error::CorruptData(format!(
                "expected a {kind:?} payload, found {:?}",
                self.kind
            )));
        }
        Ok(())
    }
}
