//! Persistence for indexes and search results.
//!
//! [`format`] defines the framing shared by every serialized object; [`codec`]
//! (feature `persistence`) encodes and decodes the objects themselves.
//!
//! Reads and writes are synchronous. File variants open the file for the length
//! of the call and close it on every exit path.

pub mod format;

#[cfg(feature = "persistence")]
pub mod codec;

#[cfg(feature = "persistence")]
pub use codec::{
    deserialize_binary_index, deserialize_index, deserialize_range_result, read_binary_index_file,
    read_index, read_index_file, serialize_binary_index, serialize_index, serialize_range_result,
    write_binary_index_file, write_index, write_index_file,
};
