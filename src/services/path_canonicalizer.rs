//! Validation and normalization of user-supplied paths.
//!
//! Every path entering the drive is resolved against the caller's tenant
//! root and rejected if it would land anywhere else. The trailing `/` of the
//! input survives canonicalization: it is what tells a folder from a file
//! everywhere downstream.

use super::error::{FsError, FsResult};
use crate::store::DELIMITER;
use tracing::warn;

/// Longest accepted path segment, in characters.
pub const MAX_SEGMENT_LEN: usize = 50;

/// Key prefix owning one user's namespace, always ending with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRoot(String);

impl TenantRoot {
    pub fn for_user(user_id: u64) -> Self {
        Self(format!("user-{}-files/", user_id))
    }

    pub fn prefix(&self) -> &str {
        &self.0
    }

    /// Absolute store key for a tenant-relative path.
    pub fn key_for(&self, path: &ResourcePath) -> String {
        format!("{}{}", self.0, path.as_str())
    }

    /// Tenant-relative part of an absolute store key.
    pub fn relative<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.0.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Folder,
}

/// A canonical, tenant-relative path. Folders end with `/`; the tenant root
/// itself is the empty folder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    kind: PathKind,
    value: String,
}

impl ResourcePath {
    pub fn root() -> Self {
        Self {
            kind: PathKind::Folder,
            value: String::new(),
        }
    }

    /// Canonicalize untrusted input for `root`. See [`canonicalize`].
    pub fn parse(raw: Option<&str>, root: &TenantRoot) -> FsResult<Self> {
        canonicalize(raw, root)
    }

    /// Build from a relative key that came back from the store, which is
    /// trusted and already canonical.
    pub(crate) fn from_relative_key(key: &str) -> Self {
        let kind = if key.is_empty() || key.ends_with(DELIMITER) {
            PathKind::Folder
        } else {
            PathKind::File
        };
        Self {
            kind,
            value: key.to_string(),
        }
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn is_folder(&self) -> bool {
        self.kind == PathKind::Folder
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Last segment without its trailing `/`.
    pub fn name(&self) -> &str {
        let trimmed = self.value.trim_end_matches(DELIMITER);
        match trimmed.rfind(DELIMITER) {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        }
    }

    /// Folder containing this path; the root is its own parent.
    pub fn parent(&self) -> ResourcePath {
        let trimmed = self.value.trim_end_matches(DELIMITER);
        match trimmed.rfind(DELIMITER) {
            Some(pos) => ResourcePath::from_relative_key(&trimmed[..=pos]),
            None => ResourcePath::root(),
        }
    }

    /// True when `self` is `other` or lies somewhere below it.
    pub fn is_within(&self, other: &ResourcePath) -> bool {
        other.is_folder() && self.value.starts_with(&other.value)
    }

    /// File path for an uploaded file name below this folder. The name may
    /// carry `/`-separated sub-folders; every segment is validated and dot
    /// segments are refused outright.
    pub fn child_file(&self, file_name: &str) -> FsResult<ResourcePath> {
        if file_name.is_empty() || file_name.ends_with(DELIMITER) {
            return Err(FsError::InvalidPath(format!(
                "`{}` is not a file name",
                file_name
            )));
        }
        for segment in file_name.split(DELIMITER) {
            validate_segment(segment)?;
            if segment == "." || segment == ".." {
                return Err(FsError::InvalidPath(format!(
                    "`{}` is not a file name",
                    file_name
                )));
            }
        }
        Ok(ResourcePath {
            kind: PathKind::File,
            value: format!("{}{}", self.value, file_name),
        })
    }

    /// The file path with `.ext` appended, unless it already ends that way.
    pub fn with_extension(&self, ext: &str) -> FsResult<ResourcePath> {
        let suffix = format!(".{}", ext);
        if self.value.ends_with(&suffix) {
            return Ok(self.clone());
        }
        let name = format!("{}{}", self.name(), suffix);
        validate_segment(&name)?;
        Ok(ResourcePath {
            kind: PathKind::File,
            value: format!("{}{}", self.value, suffix),
        })
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '(' | ')' | '-' | ' ')
}

fn validate_segment(segment: &str) -> FsResult<()> {
    if segment.is_empty() {
        return Err(FsError::InvalidPath("empty path segment".into()));
    }
    if segment.chars().count() > MAX_SEGMENT_LEN {
        return Err(FsError::InvalidPath(format!(
            "path segment longer than {} characters",
            MAX_SEGMENT_LEN
        )));
    }
    if let Some(bad) = segment.chars().find(|c| !is_allowed_char(*c)) {
        return Err(FsError::InvalidPath(format!(
            "character {:?} is not allowed",
            bad
        )));
    }
    Ok(())
}

/// Validate `raw`, resolve it against `root` and normalize `.`/`..`.
///
/// Fails closed: anything that normalizes to a location outside the tenant
/// root is a `SecurityViolation`, regardless of whether it exists. A path
/// that ends in `/`, `.` or `..`, or the empty path, comes back as a folder.
pub fn canonicalize(raw: Option<&str>, root: &TenantRoot) -> FsResult<ResourcePath> {
    let raw = raw.ok_or_else(|| FsError::InvalidPath("path is required".into()))?;
    if raw.is_empty() {
        return Ok(ResourcePath::root());
    }
    if raw.contains('\\') || raw.contains('|') {
        return Err(FsError::InvalidPath("backslash and `|` are not allowed".into()));
    }

    let trailing = raw.ends_with(DELIMITER);
    let body = if trailing { &raw[..raw.len() - 1] } else { raw };

    let mut resolved: Vec<&str> = root
        .prefix()
        .split(DELIMITER)
        .filter(|s| !s.is_empty())
        .collect();
    let mut ends_on_dot = false;

    for segment in body.split(DELIMITER) {
        validate_segment(segment)?;
        match segment {
            "." => ends_on_dot = true,
            ".." => {
                ends_on_dot = true;
                if resolved.pop().is_none() {
                    warn!("path traversal attempt under {}: {:?}", root.prefix(), raw);
                    return Err(FsError::SecurityViolation);
                }
            }
            name => {
                ends_on_dot = false;
                resolved.push(name);
            }
        }
    }

    let mut absolute = resolved.join("/");
    absolute.push(DELIMITER);
    let Some(relative) = root.relative(&absolute) else {
        warn!("path traversal attempt under {}: {:?}", root.prefix(), raw);
        return Err(FsError::SecurityViolation);
    };

    if relative.is_empty() || trailing || ends_on_dot {
        Ok(ResourcePath {
            kind: PathKind::Folder,
            value: relative.to_string(),
        })
    } else {
        Ok(ResourcePath {
            kind: PathKind::File,
            value: relative.trim_end_matches(DELIMITER).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> TenantRoot {
        TenantRoot::for_user(7)
    }

    fn parse(raw: &str) -> FsResult<ResourcePath> {
        canonicalize(Some(raw), &root())
    }

    #[test]
    fn tenant_root_prefix_is_derived_from_user_id() {
        assert_eq!(root().prefix(), "user-7-files/");
    }

    #[test]
    fn empty_path_is_the_root_folder() {
        let path = parse("").unwrap();
        assert!(path.is_root());
        assert!(path.is_folder());
        assert_eq!(root().key_for(&path), "user-7-files/");
    }

    #[test]
    fn trailing_separator_selects_folder() {
        let folder = parse("docs/reports/").unwrap();
        assert_eq!(folder.kind(), PathKind::Folder);
        assert_eq!(folder.as_str(), "docs/reports/");

        let file = parse("docs/report (1).txt").unwrap();
        assert_eq!(file.kind(), PathKind::File);
        assert_eq!(file.as_str(), "docs/report (1).txt");
    }

    #[test]
    fn dot_segments_are_normalized_inside_the_root() {
        assert_eq!(parse("a/./b/../c.txt").unwrap().as_str(), "a/c.txt");
        assert_eq!(parse("a/b/..").unwrap().as_str(), "a/");
        assert!(parse("a/..").unwrap().is_root());
    }

    #[test]
    fn escaping_the_root_is_a_security_violation() {
        for raw in ["..", "../", "../user-8-files/secret.txt", "a/../../x"] {
            let err = parse(raw).unwrap_err();
            assert!(matches!(err, FsError::SecurityViolation), "{raw}: {err:?}");
        }
    }

    #[test]
    fn canonical_keys_never_leave_the_root() {
        let inputs = ["x", "x/", "x/y/../z", "./x", "x/./", "a/b/c/../../d.txt"];
        for raw in inputs {
            let path = parse(raw).unwrap();
            assert!(root().key_for(&path).starts_with(root().prefix()));
        }
    }

    #[test]
    fn malformed_input_is_rejected() {
        let too_long = "a".repeat(MAX_SEGMENT_LEN + 1);
        for raw in ["a//b", "/a", "a\\b", "a|b", "a/b*c", "naïve.txt", too_long.as_str()] {
            assert!(matches!(parse(raw), Err(FsError::InvalidPath(_))), "{raw}");
        }
        assert!(matches!(canonicalize(None, &root()), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn segment_at_length_limit_is_accepted() {
        let name = "b".repeat(MAX_SEGMENT_LEN);
        assert!(parse(&name).is_ok());
    }

    #[test]
    fn name_and_parent() {
        let file = parse("a/b/c.txt").unwrap();
        assert_eq!(file.name(), "c.txt");
        assert_eq!(file.parent().as_str(), "a/b/");

        let folder = parse("a/b/").unwrap();
        assert_eq!(folder.name(), "b");
        assert_eq!(folder.parent().as_str(), "a/");
        assert!(parse("a/").unwrap().parent().is_root());
    }

    #[test]
    fn child_file_validates_every_segment() {
        let folder = parse("docs/").unwrap();
        assert_eq!(
            folder.child_file("sub/notes.txt").unwrap().as_str(),
            "docs/sub/notes.txt"
        );
        assert!(folder.child_file("../x.txt").is_err());
        assert!(folder.child_file("sub/").is_err());
        assert!(folder.child_file("bad:name").is_err());
    }

    #[test]
    fn with_extension_appends_only_when_missing() {
        let target = parse("renamed").unwrap();
        assert_eq!(target.with_extension("txt").unwrap().as_str(), "renamed.txt");

        let already = parse("renamed.txt").unwrap();
        assert_eq!(already.with_extension("txt").unwrap().as_str(), "renamed.txt");
    }
}
