//! src/store/disk.rs
//!
//! DiskObjectStore: flat object storage backed by SQLite for metadata and
//! local disk for payloads. Payloads live beneath
//! `base_path/{shard}/{shard}/{md5(key)}`, so the on-disk layout never
//! depends on the shape of the key (keys ending in `/` are legal here).

use super::{
    ByteStream, ListOptions, ObjectEntry, ObjectStat, ObjectStore, StoreError, StoreResult,
    group_listing,
};
use crate::models::object::StoredObject;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Apply the metadata schema. Every statement is idempotent.
pub async fn apply_schema(db: &SqlitePool) -> StoreResult<usize> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in &statements {
        debug!("Executing schema SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}

#[derive(Clone)]
pub struct DiskObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl DiskObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Last line of defence for keys; the drive layer has already
    /// canonicalized them.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let valid = !key.is_empty()
            && key.len() <= MAX_OBJECT_KEY_LEN
            && !key.starts_with('/')
            && !key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if valid {
            Ok(())
        } else {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    /// Generate two-level shard identifiers plus the payload file name.
    fn object_shards(key: &str) -> (String, String, String) {
        let digest = md5::compute(key);
        (
            format!("{:02x}", digest[0]),
            format!("{:02x}", digest[1]),
            format!("{:x}", digest),
        )
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b, name) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT key, size_bytes, content_type, etag, last_modified
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Insert or overwrite the metadata row for `key`.
    async fn upsert_object(
        &self,
        key: &str,
        size_bytes: i64,
        content_type: Option<&str>,
        etag: &str,
    ) -> StoreResult<StoredObject> {
        let row = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (key, size_bytes, content_type, etag, last_modified)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                content_type = excluded.content_type,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING key, size_bytes, content_type, etag, last_modified
            "#,
        )
        .bind(key)
        .bind(size_bytes)
        .bind(content_type)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(row)
    }

    /// Make sure the shard directory for `file_path` exists and return a
    /// fresh temp path next to it.
    async fn temp_path_for(file_path: &Path) -> StoreResult<PathBuf> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    /// Recursively remove empty shard directories up to `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Stream `body` into a new file at `path`, returning size and MD5 etag.
async fn write_payload(path: &Path, mut body: ByteStream<'_>) -> io::Result<(i64, String)> {
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// Move a finished temp file over its final location.
async fn replace_file(tmp_path: &Path, file_path: &Path) -> io::Result<()> {
    match fs::rename(tmp_path, file_path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(file_path).await?;
            fs::rename(tmp_path, file_path).await
        }
        Err(err) => Err(err),
    }
}

impl From<StoredObject> for ObjectStat {
    fn from(object: StoredObject) -> Self {
        ObjectStat {
            key: object.key,
            size: object.size_bytes.max(0) as u64,
            content_type: object.content_type,
            etag: object.etag,
            last_modified: object.last_modified,
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn stat(&self, key: &str) -> StoreResult<ObjectStat> {
        self.ensure_key_safe(key)?;
        Ok(self.fetch_object(key).await?.into())
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StoreResult<Vec<ObjectEntry>> {
        // `LIKE` is case-insensitive in SQLite, so match the prefix bytewise.
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, size_bytes FROM objects WHERE substr(key, 1, length(",
        );
        builder.push_bind(prefix);
        builder.push(")) = ");
        builder.push_bind(prefix);
        builder.push(" ORDER BY key ASC");

        // One-level listings collapse rows, so the limit can only be pushed
        // down for recursive ones.
        if let (true, Some(max)) = (options.recursive, options.max_results) {
            builder.push(" LIMIT ");
            builder.push_bind(max as i64);
        }

        let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&*self.db).await?;

        Ok(group_listing(
            prefix,
            rows.into_iter().map(|(key, size)| (key, size.max(0) as u64)),
            options,
        ))
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream<'static>> {
        self.ensure_key_safe(key)?;
        self.fetch_object(key).await?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(ReaderStream::with_capacity(file, READ_CHUNK_SIZE).boxed())
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// Bytes go to a temp file first (size and etag computed on the way),
    /// then the file is renamed into place and the row upserted. The temp or
    /// final file is removed on any error.
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        content_type: Option<&str>,
    ) -> StoreResult<ObjectStat> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let tmp_path = Self::temp_path_for(&file_path).await?;

        let (size_bytes, etag) = match write_payload(&tmp_path, body).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };

        if let Err(err) = replace_file(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        match self
            .upsert_object(key, size_bytes, content_type, &etag)
            .await
        {
            Ok(row) => Ok(row.into()),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// Remove the metadata row, then the payload, then empty shard folders.
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> StoreResult<ObjectStat> {
        self.ensure_key_safe(src)?;
        self.ensure_key_safe(dst)?;
        let source = self.fetch_object(src).await?;

        let src_path = self.object_path(src);
        let dst_path = self.object_path(dst);
        let tmp_path = Self::temp_path_for(&dst_path).await?;

        if let Err(err) = fs::copy(&src_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(match err.kind() {
                ErrorKind::NotFound => StoreError::NotFound(src.to_string()),
                _ => StoreError::Io(err),
            });
        }

        if let Err(err) = replace_file(&tmp_path, &dst_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        match self
            .upsert_object(
                dst,
                source.size_bytes,
                source.content_type.as_deref(),
                &source.etag,
            )
            .await
        {
            Ok(row) => Ok(row.into()),
            Err(err) => {
                let _ = fs::remove_file(&dst_path).await;
                Err(err)
            }
        }
    }

    /// `SELECT 1` against SQLite plus a write/read/delete probe on disk.
    async fn health_check(&self) -> StoreResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(StoreError::Backend(format!(
                "unexpected sqlite probe result: {}",
                one
            )));
        }

        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Backend("disk probe content mismatch".into()));
        }

        Ok(())
    }
}
