//! DriveService: the operations offered to the HTTP layer.
//!
//! Every method takes an already canonicalized [`ResourcePath`] and the
//! caller's [`TenantRoot`]; nothing in here sees raw user input.

use super::{
    archive::{Download, DownloadDispatcher},
    error::{FsError, FsResult},
    path_canonicalizer::{PathKind, ResourcePath, TenantRoot},
    resources::ResourceHandlers,
};
use crate::{
    models::resource::ResourceInfo,
    store::{ByteStream, ObjectStore},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct DriveService {
    store: Arc<dyn ObjectStore>,
}

impl DriveService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn handlers(&self, root: &TenantRoot) -> ResourceHandlers {
        ResourceHandlers::new(self.store.clone(), root.clone())
    }

    pub async fn resource_info(
        &self,
        root: &TenantRoot,
        path: &ResourcePath,
    ) -> FsResult<ResourceInfo> {
        self.handlers(root).for_path(path).info(path).await
    }

    pub async fn delete_resource(&self, root: &TenantRoot, path: &ResourcePath) -> FsResult<()> {
        self.handlers(root).for_path(path).delete(path).await
    }

    /// The source path decides whether this is a file or a folder move.
    pub async fn move_resource(
        &self,
        root: &TenantRoot,
        from: &ResourcePath,
        to: &ResourcePath,
    ) -> FsResult<ResourceInfo> {
        self.handlers(root).for_path(from).move_to(from, to).await
    }

    pub async fn upload(
        &self,
        root: &TenantRoot,
        folder: &ResourcePath,
        file_name: &str,
        body: ByteStream<'_>,
        content_type: Option<&str>,
    ) -> FsResult<ResourceInfo> {
        self.handlers(root)
            .for_path(folder)
            .upload(folder, file_name, body, content_type)
            .await
    }

    pub async fn create_folder(
        &self,
        root: &TenantRoot,
        path: &ResourcePath,
    ) -> FsResult<ResourceInfo> {
        match path.kind() {
            PathKind::Folder => self.handlers(root).folder().create(path).await,
            PathKind::File => Err(FsError::InvalidOperation(format!(
                "`{}` is not a folder path",
                path.as_str()
            ))),
        }
    }

    pub async fn folder_content(
        &self,
        root: &TenantRoot,
        path: &ResourcePath,
    ) -> FsResult<Vec<ResourceInfo>> {
        match path.kind() {
            PathKind::Folder => self.handlers(root).folder().traversal().get_content(path).await,
            PathKind::File => Err(FsError::InvalidOperation(format!(
                "`{}` is not a folder path",
                path.as_str()
            ))),
        }
    }

    pub async fn search(&self, root: &TenantRoot, query: &str) -> FsResult<Vec<ResourceInfo>> {
        self.handlers(root).folder().traversal().search(query).await
    }

    pub async fn download(&self, root: &TenantRoot, path: &ResourcePath) -> FsResult<Download> {
        DownloadDispatcher::new(self.store.clone(), root.clone())
            .prepare(path)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BodyError, memory::MemoryObjectStore};
    use bytes::Bytes;
    use futures::{StreamExt, stream};

    fn service() -> (Arc<MemoryObjectStore>, DriveService) {
        let store = Arc::new(MemoryObjectStore::new());
        (store.clone(), DriveService::new(store))
    }

    fn parse(raw: &str, root: &TenantRoot) -> ResourcePath {
        ResourcePath::parse(Some(raw), root).unwrap()
    }

    #[tokio::test]
    async fn tenants_never_see_each_other() {
        let (_store, service) = service();
        let alice = TenantRoot::for_user(1);
        let bob = TenantRoot::for_user(2);

        let body = stream::iter(vec![Ok(Bytes::from_static(b"secret"))]).boxed();
        service
            .upload(&alice, &ResourcePath::root(), "secret.txt", body, None)
            .await
            .unwrap();

        let file = parse("secret.txt", &bob);
        assert!(matches!(
            service.resource_info(&bob, &file).await,
            Err(FsError::NotFound(_))
        ));
        assert!(service.search(&bob, "secret").await.unwrap().is_empty());
        assert_eq!(service.search(&alice, "secret").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_and_list_through_the_service() {
        let (_store, service) = service();
        let root = TenantRoot::for_user(9);
        let docs = parse("docs/", &root);

        service.create_folder(&root, &docs).await.unwrap();
        let listing = service.folder_content(&root, &ResourcePath::root()).await.unwrap();
        assert_eq!(listing, vec![ResourceInfo::directory("docs/")]);

        assert!(service.folder_content(&root, &docs).await.unwrap().is_empty());
        assert!(matches!(
            service.create_folder(&root, &parse("file.txt", &root)).await,
            Err(FsError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn move_dispatches_on_source_kind() {
        let (store, service) = service();
        let root = TenantRoot::for_user(4);
        store.insert("user-4-files/a/x.txt", b"x");

        let moved = service
            .move_resource(&root, &parse("a/", &root), &parse("b/", &root))
            .await
            .unwrap();
        assert!(moved.is_directory());

        let renamed = service
            .move_resource(&root, &parse("b/x.txt", &root), &parse("b/y.txt", &root))
            .await
            .unwrap();
        assert_eq!(renamed.full_path(), "b/y.txt");
        assert_eq!(store.keys(), vec!["user-4-files/b/y.txt"]);
    }

    #[tokio::test]
    async fn broken_upload_body_is_not_a_store_outage() {
        let (store, service) = service();
        let root = TenantRoot::for_user(6);

        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(BodyError::TooLarge.into_io()),
        ])
        .boxed();
        let err = service
            .upload(&root, &ResourcePath::root(), "big.bin", body, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::PayloadTooLarge));
        assert!(store.keys().is_empty());
    }
}
