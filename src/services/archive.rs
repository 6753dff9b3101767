//! Download dispatch and on-the-fly zip archives.
//!
//! A folder download never buffers the archive: a blocking task pulls one
//! object at a time from the store, feeds it through a streaming
//! [`ZipWriter`] and hands the compressed bytes to the response through a
//! bounded channel. Once bytes have been sent, a failure can only be
//! signalled by ending the body with an error, which aborts the transfer.

use super::{
    error::{FsError, FsResult},
    path_canonicalizer::{PathKind, ResourcePath, TenantRoot},
    traversal::FolderTraversal,
};
use crate::store::{ByteStream, ObjectStore};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use std::{
    io::{self, Write},
    sync::Arc,
};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, warn};
use zip::{CompressionMethod, ZipWriter, result::ZipError, write::SimpleFileOptions};

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const ZIP: &str = "application/zip";

const ROOT_ARCHIVE_NAME: &str = "files.zip";
const CHANNEL_DEPTH: usize = 4;
const SEND_THRESHOLD: usize = 64 * 1024;

/// What a download handler needs to answer: headers plus a body producer.
pub struct Download {
    pub content_type: &'static str,
    pub file_name: String,
    pub content_length: Option<u64>,
    pub body: ByteStream<'static>,
}

pub struct DownloadDispatcher {
    store: Arc<dyn ObjectStore>,
    root: TenantRoot,
}

impl DownloadDispatcher {
    pub fn new(store: Arc<dyn ObjectStore>, root: TenantRoot) -> Self {
        Self { store, root }
    }

    /// Raw bytes for a file, a zip archive for a folder.
    pub async fn prepare(&self, path: &ResourcePath) -> FsResult<Download> {
        match path.kind() {
            PathKind::File => self.file_download(path).await,
            PathKind::Folder => self.folder_download(path).await,
        }
    }

    async fn file_download(&self, path: &ResourcePath) -> FsResult<Download> {
        let key = self.root.key_for(path);
        let stat = self
            .store
            .stat(&key)
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;
        let body = self
            .store
            .get(&key)
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;

        Ok(Download {
            content_type: OCTET_STREAM,
            file_name: path.name().to_string(),
            content_length: Some(stat.size),
            body,
        })
    }

    async fn folder_download(&self, path: &ResourcePath) -> FsResult<Download> {
        let traversal = FolderTraversal::new(self.store.clone(), self.root.clone());
        if !traversal.folder_exists(path).await? {
            return Err(FsError::NotFound(path.as_str().to_string()));
        }
        let keys = traversal.resource_names(path).await?;

        let file_name = if path.is_root() {
            ROOT_ARCHIVE_NAME.to_string()
        } else {
            format!("{}.zip", path.name())
        };
        let streamer = ArchiveStreamer::new(self.store.clone());

        Ok(Download {
            content_type: ZIP,
            file_name,
            content_length: None,
            body: streamer.stream(self.root.key_for(path), keys),
        })
    }
}

pub struct ArchiveStreamer {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveStreamer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Zip `keys` into a byte stream, naming each entry by its key relative
    /// to `base_key`. Must be called from within a tokio runtime.
    pub fn stream(&self, base_key: String, keys: Vec<String>) -> ByteStream<'static> {
        self.spawn(base_key, keys).0
    }

    /// The body plus the blocking producer behind it. The producer ends
    /// once the archive is complete, fails, or the body is dropped.
    fn spawn(
        &self,
        base_key: String,
        keys: Vec<String>,
    ) -> (ByteStream<'static>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
        let store = self.store.clone();
        let handle = Handle::current();

        let producer = tokio::task::spawn_blocking(move || {
            let mut sink = ChannelWriter::new(tx);
            match write_archive(store.as_ref(), &handle, &base_key, &keys, &mut sink) {
                Ok(entries) => debug!("streamed archive of {} ({} entries)", base_key, entries),
                Err(err) if sink.is_closed() => {
                    debug!("archive download of {} cancelled: {}", base_key, err)
                }
                Err(err) => {
                    warn!("archive download of {} aborted: {}", base_key, err);
                    sink.abort(err);
                }
            }
        });

        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        (body, producer)
    }
}

fn zip_to_io(err: ZipError) -> io::Error {
    match err {
        ZipError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

/// Write every object into one archive, one entry at a time. Each object
/// stream is dropped before the next one is opened.
fn write_archive(
    store: &dyn ObjectStore,
    handle: &Handle,
    base_key: &str,
    keys: &[String],
    sink: &mut ChannelWriter,
) -> io::Result<usize> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new_stream(&mut *sink);
    let mut entries = 0;

    for key in keys {
        let Some(entry_name) = key.strip_prefix(base_key).filter(|name| !name.is_empty()) else {
            continue;
        };

        let object = handle
            .block_on(store.get(key))
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        zip.start_file(entry_name, options).map_err(zip_to_io)?;

        let mut reader = SyncIoBridge::new_with_handle(StreamReader::new(object), handle.clone());
        io::copy(&mut reader, &mut zip)?;
        entries += 1;
    }

    zip.finish().map_err(zip_to_io)?;
    sink.flush()?;
    Ok(entries)
}

/// `Write` adapter feeding a response body channel from a blocking thread.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buffer: BytesMut,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buffer: BytesMut::with_capacity(SEND_THRESHOLD),
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "download receiver dropped"))
    }

    /// End the body with an error so the transfer is cut short instead of
    /// looking complete.
    fn abort(self, err: io::Error) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= SEND_THRESHOLD {
            self.send_buffered()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryObjectStore;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn setup(keys: &[(&str, &[u8])]) -> (Arc<MemoryObjectStore>, DownloadDispatcher, TenantRoot) {
        let store = Arc::new(MemoryObjectStore::new());
        for (key, data) in keys {
            store.insert(&format!("user-5-files/{}", key), data);
        }
        let root = TenantRoot::for_user(5);
        let dispatcher = DownloadDispatcher::new(store.clone(), root.clone());
        (store, dispatcher, root)
    }

    async fn collect(body: ByteStream<'static>) -> Vec<io::Result<Bytes>> {
        body.collect().await
    }

    async fn read_archive(body: ByteStream<'static>) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut bytes = Vec::new();
        for chunk in collect(body).await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        ZipArchive::new(Cursor::new(bytes)).unwrap()
    }

    fn path(raw: &str, root: &TenantRoot) -> ResourcePath {
        ResourcePath::parse(Some(raw), root).unwrap()
    }

    #[tokio::test]
    async fn file_download_streams_raw_bytes() {
        let (_store, dispatcher, root) = setup(&[("docs/a.txt", b"hello world")]);

        let download = dispatcher.prepare(&path("docs/a.txt", &root)).await.unwrap();
        assert_eq!(download.content_type, OCTET_STREAM);
        assert_eq!(download.file_name, "a.txt");
        assert_eq!(download.content_length, Some(11));

        let bytes: Vec<u8> = collect(download.body)
            .await
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn missing_file_download_is_not_found() {
        let (_store, dispatcher, root) = setup(&[]);
        let result = dispatcher.prepare(&path("nope.txt", &root)).await;
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn folder_archive_entries_are_relative_to_folder() {
        let (_store, dispatcher, root) = setup(&[
            ("a/b/", b""),
            ("a/b/c/d.txt", b"deep"),
            ("a/b/top.txt", b"top"),
            ("a/other.txt", b"outside"),
        ]);

        let download = dispatcher.prepare(&path("a/b/", &root)).await.unwrap();
        assert_eq!(download.content_type, ZIP);
        assert_eq!(download.file_name, "b.zip");

        let mut archive = read_archive(download.body).await;
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["c/d.txt", "top.txt"]);

        let mut content = String::new();
        archive
            .by_name("c/d.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "deep");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn marker_only_folder_downloads_as_empty_archive() {
        let (_store, dispatcher, root) = setup(&[("empty/", b"")]);

        let download = dispatcher.prepare(&path("empty/", &root)).await.unwrap();
        let archive = read_archive(download.body).await;
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn root_download_is_named_files_zip() {
        let (_store, dispatcher, _root) = setup(&[("x.txt", b"x")]);

        let download = dispatcher.prepare(&ResourcePath::root()).await.unwrap();
        assert_eq!(download.file_name, ROOT_ARCHIVE_NAME);
        let archive = read_archive(download.body).await;
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn missing_folder_download_is_not_found() {
        let (_store, dispatcher, root) = setup(&[("a.txt", b"a")]);
        let result = dispatcher.prepare(&path("ghost/", &root)).await;
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_failure_mid_archive_ends_stream_with_error() {
        let (store, dispatcher, root) = setup(&[("f/a.txt", b"aaaa"), ("f/b.txt", b"bbbb")]);
        store.fail_read_of("user-5-files/f/b.txt");

        let download = dispatcher.prepare(&path("f/", &root)).await.unwrap();
        let chunks = collect(download.body).await;
        assert!(chunks.last().unwrap().is_err());
    }

    /// Deterministic bytes that deflate cannot shrink, so the channel fills.
    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_the_body_stops_the_producer() {
        let store = Arc::new(MemoryObjectStore::new());
        for i in 0..8 {
            store.insert(
                &format!("user-5-files/big/{}.bin", i),
                &noise(512 * 1024, i + 1),
            );
        }
        let streamer = ArchiveStreamer::new(store.clone());
        let keys = (0..8).map(|i| format!("user-5-files/big/{}.bin", i)).collect();

        let (mut body, producer) = streamer.spawn("user-5-files/big/".into(), keys);
        assert!(body.next().await.unwrap().is_ok());
        drop(body);

        tokio::time::timeout(std::time::Duration::from_secs(10), producer)
            .await
            .expect("producer kept running after the body was dropped")
            .unwrap();
        assert!(store.reads() < 8, "read {} of 8 objects", store.reads());
    }
}
