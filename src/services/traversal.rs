//! Folder-level operations over flat keys: listing, recursive delete,
//! recursive move and breadth-first search.
//!
//! A folder exists iff it is the tenant root or at least one key (object or
//! directory marker) carries its prefix. Nothing here takes locks; move and
//! delete are ordered so that sources are only removed once every copy has
//! landed.

use super::{
    error::{FsError, FsResult},
    path_canonicalizer::{ResourcePath, TenantRoot},
    resource_mapper,
};
use crate::{
    models::resource::ResourceInfo,
    store::{DeleteOutcome, ListOptions, ObjectStore},
};
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct FolderTraversal {
    store: Arc<dyn ObjectStore>,
    root: TenantRoot,
}

impl FolderTraversal {
    pub fn new(store: Arc<dyn ObjectStore>, root: TenantRoot) -> Self {
        Self { store, root }
    }

    pub async fn folder_exists(&self, path: &ResourcePath) -> FsResult<bool> {
        if path.is_root() {
            return Ok(true);
        }
        let prefix = self.root.key_for(path);
        let probe = self
            .store
            .list(&prefix, ListOptions::probe())
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;
        Ok(!probe.is_empty())
    }

    async fn require_folder(&self, path: &ResourcePath) -> FsResult<()> {
        if self.folder_exists(path).await? {
            Ok(())
        } else {
            Err(FsError::NotFound(path.as_str().to_string()))
        }
    }

    /// One-level listing of an existing folder. The folder's own marker is
    /// not part of its content.
    pub async fn get_content(&self, path: &ResourcePath) -> FsResult<Vec<ResourceInfo>> {
        self.require_folder(path).await?;
        let prefix = self.root.key_for(path);
        let entries = self
            .store
            .list(&prefix, ListOptions::one_level())
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;

        Ok(entries
            .iter()
            .filter(|entry| entry.key != prefix)
            .filter_map(|entry| resource_mapper::from_entry(&self.root, entry))
            .collect())
    }

    /// Every key under the folder, markers included.
    pub async fn all_keys(&self, path: &ResourcePath) -> FsResult<Vec<String>> {
        let prefix = self.root.key_for(path);
        let entries = self
            .store
            .list(&prefix, ListOptions::recursive())
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;
        Ok(entries.into_iter().map(|entry| entry.key).collect())
    }

    /// Absolute keys of every file below the folder, markers excluded.
    pub async fn resource_names(&self, path: &ResourcePath) -> FsResult<Vec<String>> {
        let prefix = self.root.key_for(path);
        let entries = self
            .store
            .list(&prefix, ListOptions::recursive())
            .await
            .map_err(|err| FsError::from_store(err, path.as_str()))?;
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.key)
            .collect())
    }

    /// Best-effort recursive delete.
    ///
    /// Returns how many keys were removed. Individual failures are logged;
    /// the call only fails when nothing at all could be deleted.
    pub async fn delete_tree(&self, path: &ResourcePath) -> FsResult<usize> {
        let keys = self.all_keys(path).await?;
        if keys.is_empty() {
            return Err(FsError::NotFound(path.as_str().to_string()));
        }
        let outcomes = self.store.delete_many(&keys).await;
        summarize_deletes(path, outcomes)
    }

    /// Copy every key under `from` to the same relative key under `to`, and
    /// only then delete the sources.
    ///
    /// A failing copy stops the move before any source is touched. Objects
    /// already copied stay under `to`; the failed destination key itself is
    /// cleaned up so no partial object is left behind.
    pub async fn move_tree(&self, from: &ResourcePath, to: &ResourcePath) -> FsResult<usize> {
        let sources = self.all_keys(from).await?;
        if sources.is_empty() {
            return Err(FsError::NotFound(from.as_str().to_string()));
        }

        let from_prefix = self.root.key_for(from);
        let to_prefix = self.root.key_for(to);

        for src in &sources {
            let Some(relative) = src.strip_prefix(from_prefix.as_str()) else {
                continue;
            };
            let dst = format!("{}{}", to_prefix, relative);
            copy_or_clean_up(self.store.as_ref(), src, &dst)
                .await
                .map_err(|err| FsError::from_store(err, from.as_str()))?;
        }
        debug!(
            "copied {} objects from {} to {}",
            sources.len(),
            from_prefix,
            to_prefix
        );

        let outcomes = self.store.delete_many(&sources).await;
        summarize_deletes(from, outcomes)
    }

    /// Breadth-first, case-insensitive substring search on bare names,
    /// starting at the tenant root.
    pub async fn search(&self, query: &str) -> FsResult<Vec<ResourceInfo>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(FsError::InvalidPath("search query must not be empty".into()));
        }

        let mut pending = VecDeque::from([self.root.prefix().to_string()]);
        let mut found = Vec::new();

        while let Some(prefix) = pending.pop_front() {
            let entries = self.store.list(&prefix, ListOptions::one_level()).await?;
            for entry in entries {
                if entry.key == prefix {
                    continue;
                }
                let Some(info) = resource_mapper::from_entry(&self.root, &entry) else {
                    continue;
                };
                if info.is_directory() {
                    pending.push_back(entry.key.clone());
                }
                if info.bare_name().to_lowercase().contains(&needle) {
                    found.push(info);
                }
            }
        }

        Ok(found)
    }
}

/// Copy `src` to `dst`; on failure, make sure nothing is left at `dst`.
pub(crate) async fn copy_or_clean_up(
    store: &dyn ObjectStore,
    src: &str,
    dst: &str,
) -> Result<(), crate::store::StoreError> {
    match store.copy(src, dst).await {
        Ok(_) => Ok(()),
        Err(err) => {
            if let Err(cleanup) = store.delete(dst).await {
                if !cleanup.is_not_found() {
                    warn!("could not clean up {} after failed copy: {}", dst, cleanup);
                }
            }
            Err(err)
        }
    }
}

fn summarize_deletes(path: &ResourcePath, outcomes: Vec<DeleteOutcome>) -> FsResult<usize> {
    let total = outcomes.len();
    let mut deleted = 0;
    let mut first_error = None;

    for outcome in outcomes {
        if outcome.is_ok() {
            deleted += 1;
            continue;
        }
        if let Some(err) = outcome.error {
            warn!("failed to delete {}: {}", outcome.key, err);
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) if deleted == 0 => Err(FsError::from_store(err, path.as_str())),
        Some(_) => {
            warn!(
                "partially deleted {}: {} of {} objects removed",
                path.as_str(),
                deleted,
                total
            );
            Ok(deleted)
        }
        None => Ok(deleted),
    }
}
