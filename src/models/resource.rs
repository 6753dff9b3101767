//! Represents a file or folder as seen by a drive user.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    File,
    Directory,
}

/// Per-request view of a resource, built from a live store query.
///
/// `path` is the tenant-relative folder holding the resource (empty or
/// ending with `/`), `name` its last segment. Directory names keep their
/// trailing `/` and never carry a size, so `path + name` is always the
/// tenant-relative key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

impl ResourceInfo {
    pub fn file(relative_key: &str, size: u64) -> Self {
        let (path, name) = split_key(relative_key);
        Self {
            path: path.to_string(),
            name: name.to_string(),
            size: Some(size),
            resource_type: ResourceType::File,
        }
    }

    pub fn directory(relative_key: &str) -> Self {
        let (path, name) = split_key(relative_key.trim_end_matches('/'));
        let name = if name.is_empty() {
            String::new()
        } else {
            format!("{}/", name)
        };
        Self {
            path: path.to_string(),
            name,
            size: None,
            resource_type: ResourceType::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.resource_type == ResourceType::Directory
    }

    /// Name without the trailing `/` of directories.
    pub fn bare_name(&self) -> &str {
        self.name.trim_end_matches('/')
    }

    pub fn full_path(&self) -> String {
        format!("{}{}", self.path, self.name)
    }
}

/// Split at the last `/`: `("a/b/", "c.txt")` for `a/b/c.txt`.
fn split_key(key: &str) -> (&str, &str) {
    match key.rfind('/') {
        Some(pos) => key.split_at(pos + 1),
        None => ("", key),
    }
}
