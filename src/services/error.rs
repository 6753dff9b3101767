use crate::store::{BodyError, StoreError};
use thiserror::Error;

/// Failure kinds of the virtual filesystem layer.
///
/// `NotFound`/`AlreadyExists` carry the tenant-relative path, never a raw
/// store key.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("resource `{0}` not found")]
    NotFound(String),
    #[error("resource `{0}` already exists")]
    AlreadyExists(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("path escapes the tenant root")]
    SecurityViolation,
    #[error("upload exceeds the size limit")]
    PayloadTooLarge,
    #[error("upload incomplete: {0}")]
    IncompleteUpload(String),
    #[error("object store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Wrap a store failure that happened while working on `path`.
    pub fn from_store(err: StoreError, path: &str) -> Self {
        if let Some(body) = err.body_error() {
            return Self::from_body(body);
        }
        match err {
            StoreError::NotFound(_) => FsError::NotFound(path.to_string()),
            StoreError::InvalidKey(_) => FsError::InvalidPath(path.to_string()),
            other => FsError::StoreUnavailable(other),
        }
    }

    /// A broken request body is the caller's problem, never a store outage.
    fn from_body(err: &BodyError) -> Self {
        match err {
            BodyError::TooLarge => FsError::PayloadTooLarge,
            BodyError::Interrupted(reason) => FsError::IncompleteUpload(reason.clone()),
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        if let Some(body) = err.body_error() {
            return Self::from_body(body);
        }
        match err {
            StoreError::NotFound(_) => FsError::NotFound("object".into()),
            StoreError::InvalidKey(_) => FsError::InvalidPath("object key rejected by store".into()),
            other => FsError::StoreUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn body_failures_are_not_store_outages() {
        let too_large = StoreError::Io(BodyError::TooLarge.into_io());
        assert!(matches!(
            FsError::from_store(too_large, "big.bin"),
            FsError::PayloadTooLarge
        ));

        let cut = StoreError::Io(BodyError::Interrupted("connection reset".into()).into_io());
        assert!(matches!(FsError::from(cut), FsError::IncompleteUpload(_)));
    }

    #[test]
    fn plain_io_failures_stay_store_outages() {
        let disk = StoreError::Io(io::Error::other("disk full"));
        assert!(matches!(
            FsError::from_store(disk, "a.txt"),
            FsError::StoreUnavailable(_)
        ));
    }
}
