//! Error types for proxim.

use thiserror::Error;

/// Errors that can occur during training, indexing, search or persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// Vector (or batch) length does not match the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The index (or one of its components) must be trained first.
    #[error("index is not trained")]
    UntrainedIndex,

    /// Training was called with zero vectors.
    #[error("training set is empty")]
    EmptyTrainingSet,

    /// Fewer training vectors than the quantizer needs.
    #[error("insufficient training data: need at least {required} vectors, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// k-means was asked for `k == 0` or more clusters than points.
    #[error("invalid cluster count: k = {k} for {num_points} points")]
    InvalidClusterCount { k: usize, num_points: usize },

    /// Factory description could not be parsed.
    #[error("invalid index description: {0}")]
    InvalidSpec(String),

    /// No stored entry carries this id.
    #[error("id {0} not found")]
    NotFound(i64),

    /// Serialized data uses a format revision this build cannot read.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// Serialized data is structurally inconsistent.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Memory could not be reserved for the operation.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The operation is not available for this index type.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Handle was never issued or has already been freed.
    #[error("invalid handle {0}")]
    InvalidHandle(u64),

    /// A long-running operation observed its cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error while reading or writing an index.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, non-zero status code for this error kind.
    ///
    /// `0` is reserved for success at the status-code boundary (see [`into_status`]).
    pub fn code(&self) -> i32 {
        match self {
            Error::DimensionMismatch { .. } => 1,
            Error::UntrainedIndex => 2,
            Error::EmptyTrainingSet => 3,
            Error::InsufficientData { .. } => 4,
            Error::InvalidClusterCount { .. } => 5,
            Error::InvalidSpec(_) => 6,
            Error::NotFound(_) => 7,
            Error::UnsupportedVersion(_) => 8,
            Error::CorruptData(_) => 9,
            Error::Allocation(_) => 10,
            Error::InvalidParameter(_) => 11,
            Error::NotSupported(_) => 12,
            Error::InvalidHandle(_) => 13,
            Error::Cancelled => 14,
            Error::Io(_) => 15,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Self {
        Error::Allocation(e.to_string())
    }
}

/// Result type for proxim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Collapse a result into a status code, writing `out` only on success.
///
/// On failure `out` is left untouched and the error's [`Error::code`] is returned.
pub fn into_status<T>(result: Result<T>, out: &mut T) -> i32 {
    match result {
        Ok(value) => {
            *out = value;
            0
        }
        Err(e) => e.code(),
    }
}

/// Check that a flat batch holds a whole number of `dim`-length rows.
///
/// Returns the number of rows.
pub(crate) fn check_batch(len: usize, dim: usize) -> Result<usize> {
    if dim == 0 || len % dim != 0 {
        return Err(Error::DimensionMismatch {
            expected: dim,
            actual: len,
        });
    }
    Ok(len / dim)
}
