//! Derives [`ResourceInfo`] values from store keys and stat results.

use super::path_canonicalizer::TenantRoot;
use crate::{
    models::resource::ResourceInfo,
    store::{ObjectEntry, ObjectStat},
};

/// Map a listing entry to a resource, or `None` if the key lies outside the
/// tenant root.
pub fn from_entry(root: &TenantRoot, entry: &ObjectEntry) -> Option<ResourceInfo> {
    let relative = root.relative(&entry.key)?;
    Some(if entry.is_dir {
        ResourceInfo::directory(relative)
    } else {
        ResourceInfo::file(relative, entry.size)
    })
}

pub fn from_stat(root: &TenantRoot, stat: &ObjectStat) -> Option<ResourceInfo> {
    let relative = root.relative(&stat.key)?;
    Some(if relative.ends_with('/') {
        ResourceInfo::directory(relative)
    } else {
        ResourceInfo::file(relative, stat.size)
    })
}
