//! In-memory object store.
//!
//! Buckets are held in a `tokio::sync::RwLock<HashMap<...>>`, each bucket a
//! `BTreeMap` so prefix listings come out in key order exactly like an S3
//! `ListObjectsV2` response.  Grouping at `/` for non-recursive listings
//! follows S3 delimiter semantics, including returning a key equal to the
//! prefix itself.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use super::backend::{ListQuery, ObjectEntry, ObjectStat, ObjectStore, PresignMethod};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

type Bucket = BTreeMap<String, StoredObject>;

/// In-memory store.  Cheap to construct; used for tests and the `memory`
/// backend.
#[derive(Default)]
pub struct MemoryStore {
    buckets: tokio::sync::RwLock<HashMap<String, Bucket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `bucket` already created.
    pub fn with_bucket(bucket: &str) -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(bucket.to_string(), Bucket::new());
        Self {
            buckets: tokio::sync::RwLock::new(buckets),
        }
    }

    fn no_such_bucket(operation: &str, bucket: &str) -> StoreError {
        StoreError::bucket(operation, format!("NoSuchBucket: {bucket}"))
    }

    fn list_bucket(bucket: &Bucket, query: &ListQuery) -> Vec<ObjectEntry> {
        let mut entries = Vec::new();
        let mut seen_prefixes = BTreeSet::new();
        let in_range = bucket
            .range(query.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&query.prefix));

        for (key, object) in in_range {
            if query.limit.is_some_and(|limit| entries.len() >= limit) {
                break;
            }
            let rest = &key[query.prefix.len()..];
            if !query.recursive {
                if let Some(slash) = rest.find('/') {
                    let common = format!("{}{}", query.prefix, &rest[..=slash]);
                    if seen_prefixes.insert(common.clone()) {
                        entries.push(ObjectEntry {
                            key: common,
                            size: 0,
                            last_modified: None,
                            is_dir: true,
                        });
                    }
                    continue;
                }
            }
            entries.push(ObjectEntry {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                is_dir: key.ends_with('/'),
            });
        }
        entries
    }
}

impl ObjectStore for MemoryStore {
    fn list_objects(
        &self,
        bucket: &str,
        query: ListQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectEntry>, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let objects = buckets
                .get(&bucket)
                .ok_or_else(|| Self::no_such_bucket("list_objects", &bucket))?;
            let entries = Self::list_bucket(objects, &query);
            debug!(
                "Memory list_objects: bucket={} prefix='{}' recursive={} -> {}",
                bucket,
                query.prefix,
                query.recursive,
                entries.len()
            );
            Ok(entries)
        })
    }

    fn stat_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectStat, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let objects = buckets
                .get(&bucket)
                .ok_or_else(|| Self::no_such_bucket("stat_object", &bucket))?;
            let object = objects.get(&key).ok_or(StoreError::NoSuchKey { key })?;
            Ok(ObjectStat {
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let objects = buckets
                .get(&bucket)
                .ok_or_else(|| Self::no_such_bucket("get_object", &bucket))?;
            objects
                .get(&key)
                .map(|object| object.data.clone())
                .ok_or(StoreError::NoSuchKey { key })
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let objects = buckets
                .get_mut(&bucket)
                .ok_or_else(|| Self::no_such_bucket("put_object", &bucket))?;
            debug!("Memory put_object: bucket={} key={} size={}", bucket, key, data.len());
            objects.insert(
                key,
                StoredObject {
                    data,
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn remove_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let objects = buckets
                .get_mut(&bucket)
                .ok_or_else(|| Self::no_such_bucket("remove_object", &bucket))?;
            objects.remove(&key);
            Ok(())
        })
    }

    fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let src_key = src_key.to_string();
        let dst_key = dst_key.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            let objects = buckets
                .get_mut(&bucket)
                .ok_or_else(|| Self::no_such_bucket("copy_object", &bucket))?;
            let data = objects
                .get(&src_key)
                .map(|object| object.data.clone())
                .ok_or(StoreError::NoSuchKey { key: src_key })?;
            objects.insert(
                dst_key,
                StoredObject {
                    data,
                    last_modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move { Ok(self.buckets.read().await.contains_key(&bucket)) })
    }

    fn make_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            if buckets.contains_key(&bucket) {
                return Err(StoreError::bucket(
                    "make_bucket",
                    format!("BucketAlreadyOwnedByYou: {bucket}"),
                ));
            }
            buckets.insert(bucket, Bucket::new());
            Ok(())
        })
    }

    fn remove_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            match buckets.get(&bucket) {
                None => Err(Self::no_such_bucket("remove_bucket", &bucket)),
                Some(objects) if !objects.is_empty() => Err(StoreError::bucket(
                    "remove_bucket",
                    format!("BucketNotEmpty: {bucket}"),
                )),
                Some(_) => {
                    buckets.remove(&bucket);
                    Ok(())
                }
            }
        })
    }

    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.buckets.read().await.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        expiry_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let method = match method {
                PresignMethod::Get => "GET",
                PresignMethod::Put => "PUT",
            };
            Ok(format!(
                "memory://{bucket}/{key}?method={method}&expires={expiry_secs}"
            ))
        })
    }
}

/// Wrapper that fails selected operations, for exercising error paths.
#[cfg(test)]
pub(crate) mod faults {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub(crate) struct FaultyStore {
        pub inner: Arc<MemoryStore>,
        pub fail_copy: AtomicBool,
        pub fail_remove: AtomicBool,
        pub fail_list: AtomicBool,
        pub fail_buckets: AtomicBool,
        /// Fail every put after this many successful ones.
        pub puts_before_failure: Option<AtomicUsize>,
        /// Fail puts to this one key.
        pub fail_put_key: Option<String>,
        /// Fail every remove after this many successful ones.
        pub removes_before_failure: Option<AtomicUsize>,
        /// Number of `list_buckets` calls seen.
        pub bucket_listings: AtomicUsize,
    }

    impl FaultyStore {
        pub fn wrapping(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                ..Default::default()
            }
        }

        fn injected(operation: &str) -> StoreError {
            StoreError::connection(operation, "injected failure")
        }

        fn take_allowance(budget: &Option<AtomicUsize>) -> bool {
            match budget {
                Some(remaining) => remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok(),
                None => true,
            }
        }
    }

    impl ObjectStore for FaultyStore {
        fn list_objects(
            &self,
            bucket: &str,
            query: ListQuery,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectEntry>, StoreError>> + Send + '_>>
        {
            if self.fail_list.load(Ordering::SeqCst) {
                return Box::pin(async { Err(Self::injected("list_objects")) });
            }
            self.inner.list_objects(bucket, query)
        }

        fn stat_object(
            &self,
            bucket: &str,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<ObjectStat, StoreError>> + Send + '_>> {
            self.inner.stat_object(bucket, key)
        }

        fn get_object(
            &self,
            bucket: &str,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + '_>> {
            self.inner.get_object(bucket, key)
        }

        fn put_object(
            &self,
            bucket: &str,
            key: &str,
            data: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            if self.fail_put_key.as_deref() == Some(key)
                || !Self::take_allowance(&self.puts_before_failure)
            {
                return Box::pin(async { Err(Self::injected("put_object")) });
            }
            self.inner.put_object(bucket, key, data)
        }

        fn remove_object(
            &self,
            bucket: &str,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            if self.fail_remove.load(Ordering::SeqCst)
                || !Self::take_allowance(&self.removes_before_failure)
            {
                return Box::pin(async { Err(Self::injected("remove_object")) });
            }
            self.inner.remove_object(bucket, key)
        }

        fn copy_object(
            &self,
            bucket: &str,
            src_key: &str,
            dst_key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            if self.fail_copy.load(Ordering::SeqCst) {
                return Box::pin(async { Err(Self::injected("copy_object")) });
            }
            self.inner.copy_object(bucket, src_key, dst_key)
        }

        fn bucket_exists(
            &self,
            bucket: &str,
        ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
            self.inner.bucket_exists(bucket)
        }

        fn make_bucket(
            &self,
            bucket: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            self.inner.make_bucket(bucket)
        }

        fn remove_bucket(
            &self,
            bucket: &str,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            self.inner.remove_bucket(bucket)
        }

        fn list_buckets(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
            self.bucket_listings.fetch_add(1, Ordering::SeqCst);
            if self.fail_buckets.load(Ordering::SeqCst) {
                return Box::pin(async { Err(Self::injected("list_buckets")) });
            }
            self.inner.list_buckets()
        }

        fn presigned_url(
            &self,
            bucket: &str,
            key: &str,
            method: PresignMethod,
            expiry_secs: u64,
        ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
            self.inner.presigned_url(bucket, key, method, expiry_secs)
        }
    }
}
