//! In-memory object store for tests, with per-key fault injection.

use super::{
    ByteStream, ListOptions, ObjectEntry, ObjectStat, ObjectStore, StoreError, StoreResult,
    group_listing,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{
    collections::{BTreeMap, HashSet},
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Clone)]
struct MemoryObject {
    data: Bytes,
    content_type: Option<String>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    failing_copies: Mutex<HashSet<String>>,
    partial_copies: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_reads: Mutex<HashSet<String>>,
    reads: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            MemoryObject {
                data: Bytes::copy_from_slice(data),
                content_type: None,
            },
        );
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|object| object.data.to_vec())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Copies whose source key is `src` fail.
    pub fn fail_copy_from(&self, src: &str) {
        self.failing_copies.lock().unwrap().insert(src.to_string());
    }

    /// Copies from `src` write a truncated destination and then fail.
    pub fn fail_copy_after_write_from(&self, src: &str) {
        self.partial_copies.lock().unwrap().insert(src.to_string());
    }

    /// How many `get` calls have been served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    /// Reading `key` yields its first byte and then an I/O error.
    pub fn fail_read_of(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    fn stat_of(key: &str, object: &MemoryObject) -> ObjectStat {
        ObjectStat {
            key: key.to_string(),
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            etag: format!("{:x}", md5::compute(&object.data)),
            last_modified: Utc::now(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn stat(&self, key: &str) -> StoreResult<ObjectStat> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .map(|object| Self::stat_of(key, object))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StoreResult<Vec<ObjectEntry>> {
        let snapshot: Vec<(String, u64)> = self
            .objects
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| (key.clone(), object.data.len() as u64))
            .collect();
        Ok(group_listing(prefix, snapshot, options))
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream<'static>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if self.failing_reads.lock().unwrap().contains(key) {
            let head = data.slice(..data.len().min(1));
            let broken: Vec<io::Result<Bytes>> = vec![
                Ok(head),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "injected read failure")),
            ];
            return Ok(stream::iter(broken).boxed());
        }

        // Two chunks, so consumers cannot rely on whole-object reads.
        let mid = data.len() / 2;
        let chunks: Vec<io::Result<Bytes>> = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
        Ok(stream::iter(chunks).boxed())
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream<'_>,
        content_type: Option<&str>,
    ) -> StoreResult<ObjectStat> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let object = MemoryObject {
            data: buffer.freeze(),
            content_type: content_type.map(str::to_string),
        };
        let stat = Self::stat_of(key, &object);
        self.objects.lock().unwrap().insert(key.to_string(), object);
        Ok(stat)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StoreError::Backend(format!("injected delete failure for {}", key)));
        }
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn copy(&self, src: &str, dst: &str) -> StoreResult<ObjectStat> {
        if self.failing_copies.lock().unwrap().contains(src) {
            return Err(StoreError::Backend(format!("injected copy failure for {}", src)));
        }
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get(src)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;
        if self.partial_copies.lock().unwrap().contains(src) {
            let truncated = MemoryObject {
                data: object.data.slice(..object.data.len() / 2),
                content_type: object.content_type,
            };
            objects.insert(dst.to_string(), truncated);
            return Err(StoreError::Backend(format!(
                "injected copy failure after writing {}",
                dst
            )));
        }
        let stat = Self::stat_of(dst, &object);
        objects.insert(dst.to_string(), object);
        Ok(stat)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
