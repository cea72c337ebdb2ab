//! Save and restore indexes and range results.
//!
//! Every object is framed by a [`Header`] and encoded with postcard. Loading
//! re-checks all structural invariants of the decoded object, so a payload that
//! decodes but describes an impossible index is reported as
//! [`Error::CorruptData`].

use super::format::{Header, PayloadKind, HEADER_LEN};
use crate::error::{Error, Result};
use crate::index::{BinaryFlatIndex, Index};
use crate::results::RangeSearchResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

fn encode<T: Serialize>(kind: PayloadKind, value: &T) -> Result<Vec<u8>> {
    let payload =
        postcard::to_allocvec(value).map_err(|e| Error::Io(std::io::Error::other(e)))?;
    let mut out = Vec::new();
    out.try_reserve(HEADER_LEN + payload.len())?;
    out.extend_from_slice(&Header::new(kind, payload.len() as u64).encode());
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    postcard::from_bytes(payload).map_err(|e| Error::CorruptData(format!("payload: {e}")))
}

fn decode<T: DeserializeOwned>(kind: PayloadKind, bytes: &[u8]) -> Result<T> {
    let header = Header::decode(bytes)?;
    header.expect(kind)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != header.payload_len {
        return Err(Error::CorruptData(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    decode_payload(payload)
}

fn read_framed<R: Read>(kind: PayloadKind, mut reader: R) -> Result<Vec<u8>> {
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::CorruptData("truncated header".into()),
        _ => Error::Io(e),
    })?;
    let header = Header::decode(&head)?;
    header.expect(kind)?;

    let mut payload = Vec::new();
    reader.take(header.payload_len).read_to_end(&mut payload)?;
    if payload.len() as u64 != header.payload_len {
        return Err(Error::CorruptData(format!(
            "truncated payload: {} of {} bytes",
            payload.len(),
            header.payload_len
        )));
    }
    Ok(payload)
}

// ============================================================================
// Dense indexes
// ============================================================================

/// Encode an index tree.
pub fn serialize_index(index: &Index) -> Result<Vec<u8>> {
    encode(PayloadKind::Index, index)
}

/// Decode and validate an index tree.
pub fn deserialize_index(bytes: &[u8]) -> Result<Index> {
    let index: Index = decode(PayloadKind::Index, bytes)?;
    index.validate()?;
    Ok(index)
}

/// Write an index to any sink.
pub fn write_index<W: Write>(index: &Index, mut writer: W) -> Result<()> {
    let bytes = serialize_index(index)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    debug!(bytes = bytes.len(), kind = index.kind(), "wrote index");
    Ok(())
}

/// Read an index from any source. Only the framed object is consumed.
pub fn read_index<R: Read>(reader: R) -> Result<Index> {
    let payload = read_framed(PayloadKind::Index, reader)?;
    let index: Index = decode_payload(&payload)?;
    index.validate()?;
    Ok(index)
}

/// Write an index to `path`, replacing any existing file.
pub fn write_index_file(index: &Index, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_index(index, BufWriter::new(file))?;
    info!(path = %path.display(), kind = index.kind(), "saved index");
    Ok(())
}

/// Read an index from `path`.
pub fn read_index_file(path: impl AsRef<Path>) -> Result<Index> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let index = read_index(BufReader::new(file))?;
    info!(path = %path.display(), kind = index.kind(), "loaded index");
    Ok(index)
}

// ============================================================================
// Binary indexes
// ============================================================================

/// Encode a binary index.
pub fn serialize_binary_index(index: &BinaryFlatIndex) -> Result<Vec<u8>> {
    encode(PayloadKind::BinaryIndex, index)
}

/// Decode and validate a binary index.
pub fn deserialize_binary_index(bytes: &[u8]) -> Result<BinaryFlatIndex> {
    let index: BinaryFlatIndex = decode(PayloadKind::BinaryIndex, bytes)?;
    index.validate()?;
    Ok(index)
}

/// Write a binary index to `path`, replacing any existing file.
pub fn write_binary_index_file(index: &BinaryFlatIndex, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    writer.write_all(&serialize_binary_index(index)?)?;
    writer.flush()?;
    Ok(())
}

/// Read a binary index from `path`.
pub fn read_binary_index_file(path: impl AsRef<Path>) -> Result<BinaryFlatIndex> {
    let payload = read_framed(
        PayloadKind::BinaryIndex,
        BufReader::new(File::open(path.as_ref())?),
    )?;
    let index: BinaryFlatIndex = decode_payload(&payload)?;
    index.validate()?;
    Ok(index)
}

// ============================================================================
// Range results
// ============================================================================

/// Encode a range search result.
pub fn serialize_range_result(result: &RangeSearchResult) -> Result<Vec<u8>> {
    encode(PayloadKind::RangeResult, result)
}

/// Decode a range result; `lims` must be a valid offset table.
pub fn deserialize_range_result(bytes: &[u8]) -> Result<RangeSearchResult> {
    let result: RangeSearchResult = decode(PayloadKind::RangeResult, bytes)?;
    result.validate()?;
    Ok(result)
}
