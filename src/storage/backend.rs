//! Object store capability trait.
//!
//! [`ObjectStore`] is the narrow set of operations the filesystem layer
//! needs from an S3-compatible store.  Keys are flat strings; any notion of
//! directories is layered on top by [`crate::vfs`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::StoreError;

/// Shared handle to a store client.
pub type StoreHandle = Arc<dyn ObjectStore>;

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full key, or the common prefix (ending in `/`) for grouped entries.
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// `true` for common prefixes and for keys ending in `/`.
    pub is_dir: bool,
}

/// Listing request.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub prefix: String,
    /// When `false`, keys are grouped at the next `/` after the prefix.
    pub recursive: bool,
    /// Stop after this many entries.
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Immediate children of `prefix`.
    pub fn children(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: false,
            limit: None,
        }
    }

    /// Every key below `prefix`.
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: true,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Metadata returned by a stat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// HTTP method a presigned URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Async object store contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// List keys in `bucket` matching `query`.
    fn list_objects(
        &self,
        bucket: &str,
        query: ListQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectEntry>, StoreError>> + Send + '_>>;

    /// Size and modification time of `key`.  Missing keys yield
    /// [`StoreError::NoSuchKey`].
    fn stat_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStat, StoreError>> + Send + '_>>;

    /// Full contents of `key`.
    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + '_>>;

    /// Create or replace `key`.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Delete `key`.  Deleting a missing key is not an error.
    fn remove_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Server-side copy of `src_key` to `dst_key` within `bucket`.
    fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>>;

    fn make_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Delete an empty bucket.
    fn remove_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Names of all buckets visible to the credentials.  Also used as the
    /// connectivity probe.
    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>>;

    /// Time-limited URL granting `method` on `key`.
    fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        expiry_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>>;
}
