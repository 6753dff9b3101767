//! Object store gateway.
//!
//! The drive never talks to a concrete backend directly; everything goes
//! through [`ObjectStore`], a flat key/value interface with prefix listing
//! and no notion of directories or multi-key transactions.

pub mod disk;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

/// Separator used to emulate folders over flat keys.
pub const DELIMITER: char = '/';

/// Payload stream flowing into or out of the store.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// The caller's body failure behind this error, if the store only
    /// passed it through.
    pub fn body_error(&self) -> Option<&BodyError> {
        match self {
            StoreError::Io(err) => BodyError::find(err),
            _ => None,
        }
    }
}

/// Failure of a caller-supplied upload stream, as opposed to the store.
///
/// Producers wrap it into the `io::Error` their [`ByteStream`] yields so it
/// survives the trip through `put` untouched.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body exceeds the upload limit")]
    TooLarge,
    #[error("request body ended early: {0}")]
    Interrupted(String),
}

impl BodyError {
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    pub fn find(err: &io::Error) -> Option<&BodyError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<BodyError>())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a `stat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// One item of a prefix listing.
///
/// `is_dir` is set for directory markers and, in non-recursive listings,
/// for the synthetic common prefix that stands in for a deeper subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub recursive: bool,
    pub max_results: Option<usize>,
}

impl ListOptions {
    pub fn one_level() -> Self {
        Self::default()
    }

    pub fn recursive() -> Self {
        Self {
            recursive: true,
            max_results: None,
        }
    }

    /// Cheapest possible "does anything live under this prefix" probe.
    pub fn probe() -> Self {
        Self {
            recursive: true,
            max_results: Some(1),
        }
    }
}

/// Per-key result of a best-effort batch delete.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub key: String,
    pub error: Option<StoreError>,
}

impl DeleteOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Flat, prefix-addressed object storage.
///
/// All implementations must be thread-safe; the service shares a single
/// instance behind an `Arc<dyn ObjectStore>` across every request.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Size and metadata of a single key. `NotFound` when absent.
    async fn stat(&self, key: &str) -> StoreResult<ObjectStat>;

    /// Lists keys starting with `prefix` in key order.
    ///
    /// Non-recursive listings collapse everything below the next `/` into a
    /// single directory entry. The listing is finite and re-evaluated on
    /// every call.
    async fn list(&self, prefix: &str, options: ListOptions) -> StoreResult<Vec<ObjectEntry>>;

    /// Opens the payload of `key` for streaming. Dropping the stream releases
    /// the underlying handle.
    async fn get(&self, key: &str) -> StoreResult<ByteStream<'static>>;

    /// Writes `body` under `key`, replacing any previous object.
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        content_type: Option<&str>,
    ) -> StoreResult<ObjectStat>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Deletes every key independently; one failure never stops the rest.
    async fn delete_many(&self, keys: &[String]) -> Vec<DeleteOutcome> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let error = self.delete(key).await.err();
            outcomes.push(DeleteOutcome {
                key: key.clone(),
                error,
            });
        }
        outcomes
    }

    /// Server-side copy. Implementations must not leave a partially written
    /// object at `dst` when they fail.
    async fn copy(&self, src: &str, dst: &str) -> StoreResult<ObjectStat>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Shapes a key-ordered sequence of `(key, size)` pairs into listing entries.
///
/// Keys sharing a common prefix are contiguous in key order, so collapsing a
/// subtree only needs to compare against the last emitted entry.
pub(crate) fn group_listing<I>(prefix: &str, objects: I, options: ListOptions) -> Vec<ObjectEntry>
where
    I: IntoIterator<Item = (String, u64)>,
{
    let limit = options.max_results.unwrap_or(usize::MAX);
    let mut entries: Vec<ObjectEntry> = Vec::new();

    for (key, size) in objects {
        if entries.len() >= limit {
            break;
        }
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };

        if !options.recursive {
            if let Some(pos) = rest.find(DELIMITER) {
                let common = format!("{}{}", prefix, &rest[..=pos]);
                let seen = entries
                    .last()
                    .is_some_and(|last| last.is_dir && last.key == common);
                if !seen {
                    entries.push(ObjectEntry {
                        key: common,
                        size: 0,
                        is_dir: true,
                    });
                }
                continue;
            }
        }

        let is_dir = key.ends_with(DELIMITER);
        entries.push(ObjectEntry { key, size, is_dir });
    }

    entries
}
