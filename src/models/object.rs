//! Represents an object (blob) as tracked by the metadata table of the disk store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for a single stored object.
///
/// The object store is flat: `key` is the full backing-store identifier
/// (`<tenant-root>/<tenant-relative-path>`). Directory markers are ordinary
/// zero-byte rows whose key ends with `/`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Object key (path-like identifier, unique across the store).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type) supplied on upload, if any.
    pub content_type: Option<String>,

    /// MD5 checksum of the payload, lowercase hex.
    pub etag: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}
