//! Hierarchical view of a flat bucket.
//!
//! Paths are bucket-relative keys.  A directory is either an explicit
//! marker object whose key ends in `/`, or is implied by some key nested
//! under it.  The root is the empty path.
//!
//! Every returned [`NodeInfo`] carries an opaque id from [`crate::codec`];
//! directory ids always encode the trailing `/` form, so a child's
//! `parent_id` equals the id its parent directory is listed under.
//!
//! Nothing here is atomic across keys.  `rename` is a copy followed by a
//! delete; when the delete fails both keys are left in place and the caller
//! gets [`StoreError::RenameIncomplete`].  Removing a directory deletes
//! only its marker key.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::codec;
use crate::errors::StoreError;
use crate::storage::backend::{ListQuery, ObjectEntry, PresignMethod, StoreHandle};

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "application/octet-stream")]
    File,
}

/// Access flags reported for a node.  Every node is currently
/// readable, writable and unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    #[serde(serialize_with = "flag")]
    pub read: bool,
    #[serde(serialize_with = "flag")]
    pub write: bool,
    #[serde(serialize_with = "flag")]
    pub locked: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            locked: false,
        }
    }
}

/// A file or directory as seen by the file manager.
///
/// Serializes to the field names file manager clients expect
/// (`hash`, `phash`, `mime`, `ts` in milliseconds, `dirs` as 0/1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(rename = "hash")]
    pub id: String,
    #[serde(rename = "phash", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "mime")]
    pub kind: NodeKind,
    #[serde(rename = "ts", with = "chrono::serde::ts_milliseconds")]
    pub modified: DateTime<Utc>,
    pub size: u64,
    #[serde(rename = "dirs", serialize_with = "flag")]
    pub has_children: bool,
    #[serde(flatten)]
    pub permissions: Permissions,
}

impl NodeInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

fn flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

// ── Path helpers ─────────────────────────────────────────────────────

/// Strip leading separators and map root spellings to `""`.
fn normalize(path: &str) -> &str {
    let path = path.trim_start_matches('/');
    if codec::is_root(path) {
        ""
    } else {
        path
    }
}

/// Prefix under which the children of directory `path` live.
fn dir_prefix(path: &str) -> String {
    let trimmed = normalize(path).trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Parent directory prefix of `path` (`""` for top-level entries).
fn parent_prefix(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "",
    }
}

/// Last path segment without a trailing separator.
fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Accept `name` or `name/`; reject empty names, dot names and names
/// containing a separator anywhere else.
fn validate_name(operation: &str, name: &str) -> Result<String, StoreError> {
    let name = name.strip_suffix('/').unwrap_or(name).trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StoreError::object(
            operation,
            format!("invalid name '{name}'"),
        ));
    }
    Ok(name.to_string())
}

// ── BucketFs ─────────────────────────────────────────────────────────

/// Filesystem operations over one bucket.
#[derive(Clone)]
pub struct BucketFs {
    store: StoreHandle,
    bucket: String,
}

impl BucketFs {
    /// Filesystem over `bucket`.  Fails if `bucket` is not a valid S3
    /// bucket name.
    pub fn new(store: StoreHandle, bucket: impl Into<String>) -> Result<Self, StoreError> {
        let bucket = bucket.into();
        crate::buckets::validate_bucket_name(&bucket)?;
        Ok(Self { store, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Id for a bucket-relative path.
    pub fn id_of(&self, path: &str) -> String {
        codec::encode(&self.bucket, normalize(path))
    }

    /// Id of the root directory.
    pub fn root_id(&self) -> String {
        codec::encode(&self.bucket, codec::ROOT_TOKEN)
    }

    /// Id of the directory containing `path`.
    fn parent_id_of(&self, path: &str) -> String {
        self.id_of(parent_prefix(path))
    }

    fn dir_node(&self, path: &str, has_children: bool, modified: DateTime<Utc>) -> NodeInfo {
        let prefix = dir_prefix(path);
        if prefix.is_empty() {
            return NodeInfo {
                name: self.bucket.clone(),
                id: self.root_id(),
                parent_id: None,
                kind: NodeKind::Directory,
                modified,
                size: 0,
                has_children,
                permissions: Permissions::default(),
            };
        }
        NodeInfo {
            name: base_name(&prefix).to_string(),
            id: self.id_of(&prefix),
            parent_id: Some(self.parent_id_of(&prefix)),
            kind: NodeKind::Directory,
            modified,
            size: 0,
            has_children,
            permissions: Permissions::default(),
        }
    }

    fn file_node(&self, key: &str, size: u64, modified: Option<DateTime<Utc>>) -> NodeInfo {
        NodeInfo {
            name: base_name(key).to_string(),
            id: self.id_of(key),
            parent_id: Some(self.parent_id_of(key)),
            kind: NodeKind::File,
            modified: modified.unwrap_or_else(Utc::now),
            size,
            has_children: false,
            permissions: Permissions::default(),
        }
    }

    /// Describe the node at `path`.
    ///
    /// Trailing-slash paths and paths with nested keys are directories;
    /// anything else is stat'ed as a file and a missing key yields
    /// [`StoreError::NoSuchKey`].
    pub async fn info(&self, path: &str) -> Result<NodeInfo, StoreError> {
        let path = normalize(path);
        if path.is_empty() || path.ends_with('/') {
            let has_children = self.has_child_directories(path).await?;
            return Ok(self.dir_node(path, has_children, Utc::now()));
        }

        match self.store.stat_object(&self.bucket, path).await {
            Ok(stat) => Ok(self.file_node(path, stat.size, stat.last_modified)),
            Err(e) if e.is_not_found() => {
                if self.directory_exists(path).await? {
                    let has_children = self.has_child_directories(path).await?;
                    Ok(self.dir_node(path, has_children, Utc::now()))
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Children of directory `path`.
    ///
    /// With `tree` set, lists recursively and returns every directory
    /// below `path` instead, whether it has a marker or is implied by a
    /// nested key.  The directory's own marker is never included.
    pub async fn list(&self, path: &str, tree: bool) -> Result<Vec<NodeInfo>, StoreError> {
        let prefix = dir_prefix(path);
        if tree {
            return self.list_tree(&prefix).await;
        }

        let entries = self
            .store
            .list_objects(&self.bucket, ListQuery::children(prefix.clone()))
            .await?;
        debug!(
            "Listing {}/{}: {} entries",
            self.bucket,
            prefix,
            entries.len()
        );

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.key == prefix {
                continue;
            }
            let rest = &entry.key[prefix.len()..];
            match rest.find('/') {
                None => nodes.push(self.file_node(&entry.key, entry.size, entry.last_modified)),
                Some(idx) if idx + 1 == rest.len() => {
                    let has_children = self.has_child_directories(&entry.key).await?;
                    let modified = entry.last_modified.unwrap_or_else(Utc::now);
                    nodes.push(self.dir_node(&entry.key, has_children, modified));
                }
                Some(_) => {}
            }
        }
        Ok(nodes)
    }

    async fn list_tree(&self, prefix: &str) -> Result<Vec<NodeInfo>, StoreError> {
        let entries = self
            .store
            .list_objects(&self.bucket, ListQuery::recursive(prefix))
            .await?;
        let dirs = Self::collect_dirs(prefix, &entries);
        let now = Utc::now();

        Ok(dirs
            .iter()
            .map(|dir| {
                let has_children = dirs
                    .range::<String, _>(dir.clone()..)
                    .skip(1)
                    .take_while(|other| other.starts_with(dir.as_str()))
                    .any(|other| parent_prefix(other) == dir.as_str());
                self.dir_node(dir, has_children, now)
            })
            .collect())
    }

    /// Every directory prefix strictly below `prefix` implied by `entries`.
    fn collect_dirs(prefix: &str, entries: &[ObjectEntry]) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for entry in entries {
            let Some(rest) = entry.key.strip_prefix(prefix) else {
                continue;
            };
            for (idx, _) in rest.match_indices('/') {
                dirs.insert(format!("{prefix}{}", &rest[..=idx]));
            }
        }
        dirs
    }

    /// Create directory `name` inside `parent` by writing its marker.
    pub async fn make_directory(&self, parent: &str, name: &str) -> Result<NodeInfo, StoreError> {
        let name = validate_name("make_directory", name)?;
        let key = format!("{}{}/", dir_prefix(parent), name);
        self.store
            .put_object(&self.bucket, &key, Bytes::new())
            .await?;
        debug!("Created directory marker {}/{}", self.bucket, key);
        Ok(self.dir_node(&key, false, Utc::now()))
    }

    /// Create empty file `name` inside `parent`.
    pub async fn make_file(&self, parent: &str, name: &str) -> Result<NodeInfo, StoreError> {
        self.upload(parent, name, Bytes::new()).await
    }

    /// Path of file `name` inside directory `parent`.
    pub fn file_path(parent: &str, name: &str) -> Result<String, StoreError> {
        let name = validate_name("upload", name)?;
        Ok(format!("{}{}", dir_prefix(parent), name))
    }

    /// Write `data` as file `name` inside directory `parent`.
    pub async fn upload(&self, parent: &str, name: &str, data: Bytes) -> Result<NodeInfo, StoreError> {
        let key = Self::file_path(parent, name)?;
        let size = data.len() as u64;
        self.store.put_object(&self.bucket, &key, data).await?;
        Ok(self.file_node(&key, size, Some(Utc::now())))
    }

    /// Replace the contents of file `path`.
    pub async fn write(&self, path: &str, data: Bytes) -> Result<NodeInfo, StoreError> {
        let path = normalize(path);
        if path.is_empty() || path.ends_with('/') {
            return Err(StoreError::object("write", "cannot write to a directory"));
        }
        let size = data.len() as u64;
        self.store.put_object(&self.bucket, path, data).await?;
        Ok(self.file_node(path, size, Some(Utc::now())))
    }

    /// Contents of file `path`.
    pub async fn read(&self, path: &str) -> Result<Bytes, StoreError> {
        let path = normalize(path);
        if path.is_empty() || path.ends_with('/') {
            return Err(StoreError::object("read", "cannot read a directory"));
        }
        self.store.get_object(&self.bucket, path).await
    }

    /// Whether an object is stored under exactly `path`.  Implied
    /// directories have no key and report `false`.
    pub async fn key_exists(&self, path: &str) -> Result<bool, StoreError> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(false);
        }
        match self.store.stat_object(&self.bucket, path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete the exact key `path`.
    ///
    /// Returns the removed node's id, or `None` when nothing was stored
    /// under that key.  Children of a directory are left alone.
    pub async fn remove(&self, path: &str) -> Result<Option<String>, StoreError> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(StoreError::object("remove", "cannot remove the root directory"));
        }
        match self.store.stat_object(&self.bucket, path).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }
        self.store.remove_object(&self.bucket, path).await?;
        debug!("Removed {}/{}", self.bucket, path);
        Ok(Some(self.id_of(path)))
    }

    /// Rename `path` to `new_name` in the same directory.
    pub async fn rename(&self, path: &str, new_name: &str) -> Result<NodeInfo, StoreError> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(StoreError::object("rename", "cannot rename the root directory"));
        }
        let name = validate_name("rename", new_name)?;
        let is_dir = path.ends_with('/');
        let new_key = format!(
            "{}{}{}",
            parent_prefix(path),
            name,
            if is_dir { "/" } else { "" }
        );
        if new_key == path {
            return self.info(path).await;
        }

        match self.store.stat_object(&self.bucket, &new_key).await {
            Ok(_) => {
                return Err(StoreError::object(
                    "rename",
                    format!("{new_key} already exists"),
                ))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.store.copy_object(&self.bucket, path, &new_key).await?;
        if let Err(e) = self.store.remove_object(&self.bucket, path).await {
            warn!(
                "Rename of {}/{} left both keys: copied to {} but delete failed: {}",
                self.bucket, path, new_key, e
            );
            return Err(StoreError::RenameIncomplete {
                from: path.to_string(),
                to: new_key,
                message: e.to_string(),
            });
        }
        debug!("Renamed {}/{} to {}", self.bucket, path, new_key);
        self.info(&new_key).await
    }

    /// Whether any subdirectory (marker or common prefix) exists directly
    /// under `path`.  An empty prefix is "no"; a missing bucket is an
    /// error, since nothing below it can be answered.
    pub async fn has_child_directories(&self, path: &str) -> Result<bool, StoreError> {
        let prefix = dir_prefix(path);
        match self
            .store
            .list_objects(&self.bucket, ListQuery::children(prefix.clone()))
            .await
        {
            Ok(entries) => Ok(entries
                .iter()
                .any(|entry| entry.key != prefix && entry.key.ends_with('/'))),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether `path` is a directory, explicit or implied.
    ///
    /// `Ok(false)` means the probe succeeded and found nothing; `Err`
    /// means the probe itself failed and the answer is unknown.
    pub async fn directory_exists(&self, path: &str) -> Result<bool, StoreError> {
        let prefix = dir_prefix(path);
        if prefix.is_empty() {
            return Ok(true);
        }
        match self
            .store
            .list_objects(&self.bucket, ListQuery::recursive(prefix).limit(1))
            .await
        {
            Ok(entries) => Ok(!entries.is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Directory nodes from the root down to `path` inclusive.
    pub async fn parents(&self, path: &str) -> Result<Vec<NodeInfo>, StoreError> {
        let target = dir_prefix(path);
        let mut chain = vec![self.info("").await?];
        let mut current = String::new();
        for segment in target.split('/').filter(|s| !s.is_empty()) {
            current.push_str(segment);
            current.push('/');
            let has_children = self.has_child_directories(&current).await?;
            chain.push(self.dir_node(&current, has_children, Utc::now()));
        }
        Ok(chain)
    }

    /// Presigned GET URL for file `path`, valid for `expiry_secs`.
    pub async fn direct_link(&self, path: &str, expiry_secs: u64) -> Result<String, StoreError> {
        let path = normalize(path);
        if path.is_empty() || path.ends_with('/') {
            return Err(StoreError::object("direct_link", "directories have no download link"));
        }
        self.store.stat_object(&self.bucket, path).await?;
        self.store
            .presigned_url(&self.bucket, path, PresignMethod::Get, expiry_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::ObjectStore;
    use crate::storage::memory::faults::FaultyStore;
    use crate::storage::memory::MemoryStore;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn test_fs() -> (BucketFs, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_bucket("files"));
        let fs = BucketFs::new(store.clone(), "files").unwrap();
        (fs, store)
    }

    fn faulty_fs() -> (BucketFs, Arc<FaultyStore>) {
        let store = Arc::new(FaultyStore::wrapping(Arc::new(MemoryStore::with_bucket(
            "files",
        ))));
        let fs = BucketFs::new(store.clone(), "files").unwrap();
        (fs, store)
    }

    async fn put(store: &dyn ObjectStore, key: &str, body: &'static [u8]) {
        store
            .put_object("files", key, Bytes::from_static(body))
            .await
            .unwrap();
    }

    fn names(nodes: &[NodeInfo]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_root_info() {
        let (fs, _) = test_fs();
        let root = fs.info("").await.unwrap();
        assert_eq!(root.name, "files");
        assert_eq!(root.id, codec::encode("files", "root"));
        assert!(root.parent_id.is_none());
        assert!(root.is_dir());
        assert!(!root.has_children);
        assert_eq!(fs.info("/").await.unwrap().id, root.id);
    }

    #[tokio::test]
    async fn test_make_directory_then_list_root() {
        let (fs, store) = test_fs();
        let node = fs.make_directory("", "docs").await.unwrap();
        assert_eq!(node.id, codec::encode("files", "docs/"));
        assert_eq!(node.parent_id.as_deref(), Some(fs.root_id().as_str()));
        assert!(store.stat_object("files", "docs/").await.is_ok());

        let listing = fs.list("", false).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "docs");
        assert!(listing[0].is_dir());
        assert!(fs.info("").await.unwrap().has_children);
    }

    #[tokio::test]
    async fn test_listing_skips_own_marker() {
        let (fs, store) = test_fs();
        put(&*store, "docs/", b"").await;
        put(&*store, "docs/readme.txt", b"hello").await;

        let listing = fs.list("docs/", false).await.unwrap();
        assert_eq!(names(&listing), vec!["readme.txt"]);
        assert_eq!(listing[0].size, 5);
        assert_eq!(
            listing[0].parent_id.as_deref(),
            Some(codec::encode("files", "docs/").as_str())
        );
    }

    #[tokio::test]
    async fn test_make_file_parent_id() {
        let (fs, _) = test_fs();
        fs.make_directory("", "a").await.unwrap();
        let file = fs.make_file("a", "f.txt").await.unwrap();
        assert_eq!(file.size, 0);

        let listing = fs.list("a", false).await.unwrap();
        let f = listing.iter().find(|n| n.name == "f.txt").unwrap();
        assert_eq!(f.parent_id.as_deref(), Some(codec::encode("files", "a/").as_str()));
        assert_eq!(f.id, file.id);
    }

    #[tokio::test]
    async fn test_implied_directories() {
        let (fs, store) = test_fs();
        put(&*store, "x/y/z.txt", b"z").await;

        assert!(fs.directory_exists("x").await.unwrap());
        assert!(fs.directory_exists("x/y/").await.unwrap());
        assert!(!fs.directory_exists("nope").await.unwrap());

        let info = fs.info("x").await.unwrap();
        assert!(info.is_dir());
        assert!(info.has_children);
        assert_eq!(info.id, codec::encode("files", "x/"));

        let root = fs.list("", false).await.unwrap();
        assert_eq!(names(&root), vec!["x"]);
    }

    #[tokio::test]
    async fn test_info_missing_file() {
        let (fs, _) = test_fs();
        let err = fs.info("ghost.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_tree_listing() {
        let (fs, store) = test_fs();
        put(&*store, "a/", b"").await;
        put(&*store, "a/b/c/file.txt", b"1").await;
        put(&*store, "d/e.txt", b"1").await;
        put(&*store, "top.txt", b"1").await;

        let tree = fs.list("", true).await.unwrap();
        let ids: Vec<_> = tree.iter().map(|n| codec::decode(&n.id).unwrap()).collect();
        assert_eq!(ids, vec!["a/", "a/b/", "a/b/c/", "d/"]);
        assert!(tree.iter().all(NodeInfo::is_dir));
        let has_children: Vec<_> = tree.iter().map(|n| n.has_children).collect();
        assert_eq!(has_children, vec![true, true, false, false]);

        let sub = fs.list("a/", true).await.unwrap();
        assert_eq!(names(&sub), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (fs, _) = test_fs();
        let node = fs.make_file("", "notes.txt").await.unwrap();
        let path = codec::decode(&node.id).unwrap();
        let written = fs.write(&path, Bytes::from_static(b"hi there")).await.unwrap();
        assert_eq!(written.size, 8);
        assert_eq!(fs.read(&path).await.unwrap(), Bytes::from_static(b"hi there"));
        assert!(fs.write("dir/", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_missing_is_none() {
        let (fs, _) = test_fs();
        assert_eq!(fs.remove("ghost.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_directory_does_not_cascade() {
        let (fs, store) = test_fs();
        put(&*store, "a/", b"").await;
        put(&*store, "a/child.txt", b"c").await;

        let removed = fs.remove("a/").await.unwrap();
        assert_eq!(removed, Some(codec::encode("files", "a/")));
        assert!(store.stat_object("files", "a/child.txt").await.is_ok());
        // Still implied by the child.
        assert!(fs.directory_exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_root_rejected() {
        let (fs, _) = test_fs();
        assert!(fs.remove("").await.is_err());
        assert!(fs.rename("/", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_file() {
        let (fs, store) = test_fs();
        put(&*store, "dir/old.txt", b"data").await;

        let node = fs.rename("dir/old.txt", "new.txt").await.unwrap();
        assert_eq!(node.name, "new.txt");
        assert_eq!(node.id, codec::encode("files", "dir/new.txt"));
        assert!(store.stat_object("files", "dir/old.txt").await.is_err());
        assert_eq!(
            store.get_object("files", "dir/new.txt").await.unwrap(),
            Bytes::from_static(b"data")
        );
    }

    #[tokio::test]
    async fn test_rename_directory_keeps_trailing_slash() {
        let (fs, store) = test_fs();
        put(&*store, "old/", b"").await;

        let node = fs.rename("old/", "new").await.unwrap();
        assert!(node.is_dir());
        assert_eq!(node.id, codec::encode("files", "new/"));
        assert!(store.stat_object("files", "new/").await.is_ok());
        assert!(store.stat_object("files", "old/").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_refuses_overwrite() {
        let (fs, store) = test_fs();
        put(&*store, "a.txt", b"a").await;
        put(&*store, "b.txt", b"b").await;
        assert!(fs.rename("a.txt", "b.txt").await.is_err());
        assert_eq!(
            store.get_object("files", "b.txt").await.unwrap(),
            Bytes::from_static(b"b")
        );
    }

    #[tokio::test]
    async fn test_rename_copy_failure_leaves_original() {
        let (fs, store) = faulty_fs();
        put(&*store, "a.txt", b"a").await;
        store.fail_copy.store(true, Ordering::SeqCst);

        let err = fs.rename("a.txt", "b.txt").await.unwrap_err();
        assert!(!matches!(err, StoreError::RenameIncomplete { .. }));
        assert!(store.stat_object("files", "a.txt").await.is_ok());
        assert!(store.stat_object("files", "b.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_delete_failure_reports_both_keys() {
        let (fs, store) = faulty_fs();
        put(&*store, "a.txt", b"a").await;
        store.fail_remove.store(true, Ordering::SeqCst);

        let err = fs.rename("a.txt", "b.txt").await.unwrap_err();
        match err {
            StoreError::RenameIncomplete { from, to, .. } => {
                assert_eq!(from, "a.txt");
                assert_eq!(to, "b.txt");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.stat_object("files", "a.txt").await.is_ok());
        assert!(store.stat_object("files", "b.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_failure_is_not_false() {
        let (fs, store) = faulty_fs();
        store.fail_list.store(true, Ordering::SeqCst);
        assert!(fs.directory_exists("a").await.is_err());
        assert!(fs.has_child_directories("").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let (fs, _) = test_fs();
        for name in ["", "/", "a/b", "..", "./"] {
            assert!(fs.make_directory("", name).await.is_err(), "name {name:?}");
        }
        // A single trailing separator is tolerated.
        let node = fs.make_directory("", "ok/").await.unwrap();
        assert_eq!(node.id, codec::encode("files", "ok/"));
    }

    #[tokio::test]
    async fn test_parents_chain() {
        let (fs, store) = test_fs();
        put(&*store, "a/b/c/", b"").await;
        let chain = fs.parents("a/b/c/").await.unwrap();
        assert_eq!(names(&chain), vec!["files", "a", "b", "c"]);
        assert!(chain[1].has_children);
        assert!(!chain[3].has_children);
    }

    #[tokio::test]
    async fn test_direct_link() {
        let (fs, store) = test_fs();
        put(&*store, "report.pdf", b"%PDF").await;
        let url = fs.direct_link("report.pdf", 600).await.unwrap();
        assert!(url.contains("report.pdf"));
        assert!(url.contains("expires=600"));
        assert!(fs.direct_link("missing.pdf", 600).await.is_err());
        assert!(fs.direct_link("dir/", 600).await.is_err());
    }

    #[test]
    fn test_node_serialization() {
        let node = NodeInfo {
            name: "docs".into(),
            id: "files_ZG9jcy8".into(),
            parent_id: Some("files_cm9vdA".into()),
            kind: NodeKind::Directory,
            modified: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            size: 0,
            has_children: true,
            permissions: Permissions::default(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["hash"], "files_ZG9jcy8");
        assert_eq!(json["phash"], "files_cm9vdA");
        assert_eq!(json["mime"], "directory");
        assert_eq!(json["ts"], 1_700_000_000_000i64);
        assert_eq!(json["dirs"], 1);
        assert_eq!(json["read"], 1);
        assert_eq!(json["write"], 1);
        assert_eq!(json["locked"], 0);
    }

    #[test]
    fn test_invalid_bucket_rejected() {
        let store = Arc::new(MemoryStore::new());
        assert!(BucketFs::new(store, "Bad_Bucket").is_err());
    }

    #[tokio::test]
    async fn test_missing_bucket_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let fs = BucketFs::new(store, "ghost").unwrap();
        let err = fs.has_child_directories("").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Bucket);
        assert!(fs.directory_exists("docs/").await.is_err());
    }

    #[tokio::test]
    async fn test_file_wins_over_implied_directory() {
        let (fs, store) = test_fs();
        put(&*store, "a", b"file").await;
        put(&*store, "a/x", b"nested").await;
        let node = fs.info("a").await.unwrap();
        assert!(!node.is_dir());
        assert!(fs.info("a/").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_key_exists() {
        let (fs, store) = test_fs();
        put(&*store, "docs/readme.txt", b"r").await;
        assert!(fs.key_exists("docs/readme.txt").await.unwrap());
        assert!(!fs.key_exists("docs/").await.unwrap());
        assert!(!fs.key_exists("").await.unwrap());
    }

    #[test]
    fn test_file_path() {
        assert_eq!(BucketFs::file_path("", "a.txt").unwrap(), "a.txt");
        assert_eq!(BucketFs::file_path("docs/", "a.txt").unwrap(), "docs/a.txt");
        assert!(BucketFs::file_path("docs/", "x/y").is_err());
    }
}
