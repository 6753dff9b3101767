//! File and folder handlers behind one capability set.
//!
//! The kind of a [`ResourcePath`] is fixed once at the boundary (trailing
//! `/` means folder); [`ResourceHandlers::for_path`] then picks the matching
//! strategy.

use super::{
    error::{FsError, FsResult},
    path_canonicalizer::{PathKind, ResourcePath, TenantRoot},
    resource_mapper,
    traversal::{FolderTraversal, copy_or_clean_up},
};
use crate::{
    models::resource::ResourceInfo,
    store::{ByteStream, ObjectStat, ObjectStore},
};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::{io, sync::Arc};
use tracing::{debug, info};

#[async_trait]
pub trait Resource: Send + Sync {
    async fn info(&self, path: &ResourcePath) -> FsResult<ResourceInfo>;

    async fn delete(&self, path: &ResourcePath) -> FsResult<()>;

    async fn move_to(&self, from: &ResourcePath, to: &ResourcePath) -> FsResult<ResourceInfo>;

    async fn exists(&self, path: &ResourcePath) -> FsResult<bool>;

    /// Store `body` as `file_name` relative to `path`.
    async fn upload(
        &self,
        path: &ResourcePath,
        file_name: &str,
        body: ByteStream<'_>,
        content_type: Option<&str>,
    ) -> FsResult<ResourceInfo>;
}

pub struct FileResource {
    store: Arc<dyn ObjectStore>,
    root: TenantRoot,
}

impl FileResource {
    pub fn new(store: Arc<dyn ObjectStore>, root: TenantRoot) -> Self {
        Self { store, root }
    }

    async fn stat_of(&self, path: &ResourcePath) -> FsResult<ObjectStat> {
        self.store
            .stat(&self.root.key_for(path))
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))
    }

    async fn size_of(&self, path: &ResourcePath) -> FsResult<u64> {
        self.stat_of(path).await.map(|stat| stat.size)
    }
}

/// Extension of the last segment, if it has one. Leading-dot names such as
/// `.env` have none.
fn extension_of(path: &ResourcePath) -> Option<&str> {
    let name = path.name();
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => Some(&name[pos + 1..]),
        _ => None,
    }
}

#[async_trait]
impl Resource for FileResource {
    async fn info(&self, path: &ResourcePath) -> FsResult<ResourceInfo> {
        let stat = self.stat_of(path).await?;
        resource_mapper::from_stat(&self.root, &stat)
            .ok_or_else(|| FsError::NotFound(path.as_str().to_string()))
    }

    async fn delete(&self, path: &ResourcePath) -> FsResult<()> {
        self.size_of(path).await?;
        self.store
            .delete(&self.root.key_for(path))
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;
        info!("deleted file {}{}", self.root.prefix(), path.as_str());
        Ok(())
    }

    /// Copy, then delete. The source is only removed after the copy has
    /// succeeded; a destination without the source's extension gets it
    /// appended.
    async fn move_to(&self, from: &ResourcePath, to: &ResourcePath) -> FsResult<ResourceInfo> {
        if to.is_folder() {
            return Err(FsError::InvalidOperation(format!(
                "cannot move file `{}` to folder path `{}`",
                from.as_str(),
                to.as_str()
            )));
        }
        let to = match extension_of(from) {
            Some(ext) => to.with_extension(ext)?,
            None => to.clone(),
        };

        let size = self.size_of(from).await?;
        if self.exists(&to).await? {
            return Err(FsError::AlreadyExists(to.as_str().to_string()));
        }

        let src = self.root.key_for(from);
        let dst = self.root.key_for(&to);
        copy_or_clean_up(self.store.as_ref(), &src, &dst)
            .await
            .map_err(|err| FsError::from_store(err, from.as_str()))?;
        self.store
            .delete(&src)
            .await
            .map_err(|err| FsError::from_store(err, from.as_str()))?;

        info!("moved file {} to {}", src, dst);
        Ok(ResourceInfo::file(to.as_str(), size))
    }

    async fn exists(&self, path: &ResourcePath) -> FsResult<bool> {
        match self.size_of(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn upload(
        &self,
        path: &ResourcePath,
        _file_name: &str,
        _body: ByteStream<'_>,
        _content_type: Option<&str>,
    ) -> FsResult<ResourceInfo> {
        Err(FsError::InvalidOperation(format!(
            "upload target `{}` is not a folder",
            path.as_str()
        )))
    }
}

pub struct FolderResource {
    store: Arc<dyn ObjectStore>,
    root: TenantRoot,
    traversal: FolderTraversal,
    files: FileResource,
}

impl FolderResource {
    pub fn new(store: Arc<dyn ObjectStore>, root: TenantRoot) -> Self {
        Self {
            traversal: FolderTraversal::new(store.clone(), root.clone()),
            files: FileResource::new(store.clone(), root.clone()),
            store,
            root,
        }
    }

    pub fn traversal(&self) -> &FolderTraversal {
        &self.traversal
    }

    /// Create an empty folder by writing a zero-byte marker at its key.
    pub async fn create(&self, path: &ResourcePath) -> FsResult<ResourceInfo> {
        if path.is_root() || self.traversal.folder_exists(path).await? {
            return Err(FsError::AlreadyExists(path.as_str().to_string()));
        }
        let parent = path.parent();
        if !self.traversal.folder_exists(&parent).await? {
            return Err(FsError::NotFound(parent.as_str().to_string()));
        }

        let marker = stream::empty::<io::Result<bytes::Bytes>>().boxed();
        self.store
            .put(&self.root.key_for(path), marker, None)
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;

        info!("created folder {}{}", self.root.prefix(), path.as_str());
        Ok(ResourceInfo::directory(path.as_str()))
    }
}

#[async_trait]
impl Resource for FolderResource {
    async fn info(&self, path: &ResourcePath) -> FsResult<ResourceInfo> {
        if self.traversal.folder_exists(path).await? {
            Ok(ResourceInfo::directory(path.as_str()))
        } else {
            Err(FsError::NotFound(path.as_str().to_string()))
        }
    }

    async fn delete(&self, path: &ResourcePath) -> FsResult<()> {
        if path.is_root() {
            return Err(FsError::InvalidOperation(
                "the root folder cannot be deleted".into(),
            ));
        }
        let removed = self.traversal.delete_tree(path).await?;
        info!(
            "deleted folder {}{} ({} objects)",
            self.root.prefix(),
            path.as_str(),
            removed
        );
        Ok(())
    }

    async fn move_to(&self, from: &ResourcePath, to: &ResourcePath) -> FsResult<ResourceInfo> {
        if from.is_root() {
            return Err(FsError::InvalidOperation(
                "the root folder cannot be moved".into(),
            ));
        }
        if !to.is_folder() {
            return Err(FsError::InvalidOperation(format!(
                "cannot move folder `{}` to file path `{}`",
                from.as_str(),
                to.as_str()
            )));
        }
        if to.is_within(from) {
            return Err(FsError::InvalidOperation(format!(
                "cannot move folder `{}` into itself",
                from.as_str()
            )));
        }
        if self.traversal.folder_exists(to).await? {
            return Err(FsError::AlreadyExists(to.as_str().to_string()));
        }

        let moved = self.traversal.move_tree(from, to).await?;
        info!(
            "moved folder {}{} to {} ({} objects)",
            self.root.prefix(),
            from.as_str(),
            to.as_str(),
            moved
        );
        Ok(ResourceInfo::directory(to.as_str()))
    }

    async fn exists(&self, path: &ResourcePath) -> FsResult<bool> {
        self.traversal.folder_exists(path).await
    }

    /// Refuses to overwrite: an existing object at the target key is a
    /// conflict.
    async fn upload(
        &self,
        path: &ResourcePath,
        file_name: &str,
        body: ByteStream<'_>,
        content_type: Option<&str>,
    ) -> FsResult<ResourceInfo> {
        let target = path.child_file(file_name)?;
        if self.files.exists(&target).await? {
            return Err(FsError::AlreadyExists(target.as_str().to_string()));
        }

        let stat = self
            .store
            .put(&self.root.key_for(&target), body, content_type)
            .await
            .map_err(|err| FsError::from_store(err, target.as_str()))?;

        let info = resource_mapper::from_stat(&self.root, &stat)
            .ok_or_else(|| FsError::NotFound(target.as_str().to_string()))?;
        debug!(
            "uploaded {}{} ({} bytes)",
            self.root.prefix(),
            info.full_path(),
            stat.size
        );
        Ok(info)
    }
}

/// Both strategies for one tenant; picks one per path.
pub struct ResourceHandlers {
    file: FileResource,
    folder: FolderResource,
}

impl ResourceHandlers {
    pub fn new(store: Arc<dyn ObjectStore>, root: TenantRoot) -> Self {
        Self {
            file: FileResource::new(store.clone(), root.clone()),
            folder: FolderResource::new(store, root),
        }
    }

    pub fn for_path(&self, path: &ResourcePath) -> &dyn Resource {
        match path.kind() {
            PathKind::File => &self.file,
            PathKind::Folder => &self.folder,
        }
    }

    pub fn folder(&self) -> &FolderResource {
        &self.folder
    }
}
