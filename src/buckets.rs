//! Bucket administration.
//!
//! Creating, deleting and inspecting whole buckets, plus presigned download
//! links.  These sit beside the filesystem view rather than inside it:
//! a [`crate::vfs::BucketFs`] assumes its bucket already exists.

use tracing::{info, warn};

use crate::errors::StoreError;
use crate::storage::backend::{ListQuery, ObjectEntry, PresignMethod, StoreHandle};

/// Default lifetime of a download link, in seconds.
pub const DEFAULT_LINK_EXPIRY_SECS: u64 = 3600;

/// Check `name` against the S3 bucket naming rules: 3 to 63 characters of
/// lowercase letters, digits, `-` and `.`, starting and ending with a letter
/// or digit, no `..`, and not shaped like an IPv4 address.
pub fn validate_bucket_name(name: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| {
        Err(StoreError::bucket(
            "validate_bucket_name",
            format!("InvalidBucketName: '{name}' {reason}"),
        ))
    };

    if name.len() < 3 || name.len() > 63 {
        return invalid("must be 3 to 63 characters long");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return invalid("may only contain lowercase letters, digits, '-' and '.'");
    }
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(name.as_bytes()[0]) || !edge_ok(name.as_bytes()[name.len() - 1]) {
        return invalid("must start and end with a letter or digit");
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    if name.split('.').count() == 4 && name.split('.').all(|part| part.parse::<u8>().is_ok()) {
        return invalid("must not be formatted as an IP address");
    }
    Ok(())
}

/// Bucket-level operations over one store.
pub struct BucketAdmin {
    store: StoreHandle,
}

impl BucketAdmin {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Create `bucket`.  Fails if the name is invalid or the bucket exists.
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        validate_bucket_name(bucket)?;
        if self.store.bucket_exists(bucket).await? {
            return Err(StoreError::bucket(
                "create_bucket",
                format!("BucketAlreadyExists: {bucket}"),
            ));
        }
        self.store.make_bucket(bucket).await?;
        info!("Bucket created: {}", bucket);
        Ok(())
    }

    /// Delete `bucket`.
    ///
    /// A non-empty bucket is refused unless `force` is set, in which case
    /// every object is deleted first.
    pub async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<(), StoreError> {
        if !self.store.bucket_exists(bucket).await? {
            return Err(StoreError::bucket(
                "delete_bucket",
                format!("NoSuchBucket: {bucket}"),
            ));
        }

        let objects = self.list_objects(bucket).await?;
        if !objects.is_empty() {
            if !force {
                return Err(StoreError::bucket(
                    "delete_bucket",
                    format!("BucketNotEmpty: {bucket} holds {} objects", objects.len()),
                ));
            }
            warn!(
                "Force-deleting bucket {}: removing {} objects",
                bucket,
                objects.len()
            );
            for object in &objects {
                self.store.remove_object(bucket, &object.key).await?;
            }
        }

        self.store.remove_bucket(bucket).await?;
        info!("Bucket deleted: {}", bucket);
        Ok(())
    }

    /// Every object in `bucket`, recursively, in key order.
    pub async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        self.store
            .list_objects(bucket, ListQuery::recursive(""))
            .await
    }

    pub async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        self.store.list_buckets().await
    }

    /// Presigned GET URL for `key` in `bucket`.
    pub async fn download_url(
        &self,
        bucket: &str,
        key: &str,
        expiry_secs: u64,
    ) -> Result<String, StoreError> {
        self.store
            .presigned_url(bucket, key, PresignMethod::Get, expiry_secs)
            .await
    }
}
