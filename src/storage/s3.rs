//! S3-compatible object store client.
//!
//! Wraps an `aws_sdk_s3::Client` configured with static credentials, an
//! explicit endpoint and path-style addressing, which is what MinIO and
//! most self-hosted S3 services expect.  SDK errors are classified into
//! [`StoreError`] variants by their service error code.

use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{ListQuery, ObjectEntry, ObjectStat, ObjectStore, PresignMethod};
use crate::config::ConnectionConfig;
use crate::errors::StoreError;

/// Characters left unescaped in the `x-amz-copy-source` header.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Region used when the connection does not name one.
const FALLBACK_REGION: &str = "us-east-1";

/// Page size requested from `ListObjectsV2`.
const PAGE_SIZE: i32 = 1000;

/// Object store backed by an S3-compatible service.
pub struct S3Store {
    client: Client,
    region: String,
}

impl S3Store {
    /// Build a client for `config`.  No network I/O happens here.
    pub fn new(config: &ConnectionConfig) -> Self {
        let region = config.region().unwrap_or(FALLBACK_REGION).to_string();
        let credentials = Credentials::new(
            config.access_key(),
            config.secret_key(),
            None, // session_token
            None, // expiry
            "bucketfs-config",
        );
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .operation_attempt_timeout(config.write_timeout().max(config.read_timeout()))
            .build();

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(timeouts)
            .build();

        info!("S3 client created: {}", config);

        Self {
            client: Client::from_conf(s3_config),
            region,
        }
    }

    /// Classify an SDK error.
    fn map_sdk_error<E, R>(operation: &str, key: Option<&str>, err: SdkError<E, R>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                StoreError::connection(operation, DisplayErrorContext(&err).to_string())
            }
            SdkError::ConstructionFailure(_) => {
                StoreError::Configuration(format!("{operation}: {}", DisplayErrorContext(&err)))
            }
            SdkError::ServiceError(service) => match service.err().code() {
                Some(code) => StoreError::from_service_code(
                    operation,
                    key,
                    code,
                    service.err().message().unwrap_or_default(),
                ),
                None => StoreError::Unknown {
                    operation: operation.to_string(),
                    message: DisplayErrorContext(&err).to_string(),
                },
            },
            _ => StoreError::Unknown {
                operation: operation.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            },
        }
    }

    fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
        ts.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
    }
}

impl ObjectStore for S3Store {
    fn list_objects(
        &self,
        bucket: &str,
        query: ListQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectEntry>, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!(
                "S3 list_objects_v2: bucket={} prefix='{}' recursive={}",
                bucket, query.prefix, query.recursive
            );

            let mut entries = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let page_size = match query.limit {
                    Some(limit) => i32::try_from(limit - entries.len().min(limit))
                        .unwrap_or(PAGE_SIZE)
                        .clamp(1, PAGE_SIZE),
                    None => PAGE_SIZE,
                };
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&query.prefix)
                    .max_keys(page_size);
                if !query.recursive {
                    request = request.delimiter("/");
                }
                if let Some(token) = &continuation_token {
                    request = request.continuation_token(token);
                }

                let resp = request
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("list_objects", None, e))?;

                for object in resp.contents() {
                    let Some(key) = object.key() else { continue };
                    entries.push(ObjectEntry {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                        last_modified: Self::to_chrono(object.last_modified()),
                        is_dir: key.ends_with('/'),
                    });
                }
                for common in resp.common_prefixes() {
                    if let Some(prefix) = common.prefix() {
                        entries.push(ObjectEntry {
                            key: prefix.to_string(),
                            size: 0,
                            last_modified: None,
                            is_dir: true,
                        });
                    }
                }

                if query.limit.is_some_and(|limit| entries.len() >= limit) {
                    break;
                }
                match resp.next_continuation_token() {
                    Some(token) if resp.is_truncated().unwrap_or(false) => {
                        continuation_token = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            entries.sort_by(|a, b| a.key.cmp(&b.key));
            if let Some(limit) = query.limit {
                entries.truncate(limit);
            }
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
            debug!("S3 head_object: bucket={} key={}", bucket, key);

            let resp = self
                .client
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("stat_object", Some(&key), e))?;

            Ok(ObjectStat {
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified: Self::to_chrono(resp.last_modified()),
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
            debug!("S3 get_object: bucket={} key={}", bucket, key);

            let resp = self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("get_object", Some(&key), e))?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| StoreError::connection("get_object body", e.to_string()))?;

            Ok(body.into_bytes())
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
            debug!("S3 put_object: bucket={} key={} size={}", bucket, key, data.len());

            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", Some(&key), e))?;

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
            debug!("S3 delete_object: bucket={} key={}", bucket, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("remove_object", Some(&key), e))?;

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
            debug!(
                "S3 copy_object: bucket={} src={} dst={}",
                bucket, src_key, dst_key
            );

            let copy_source = copy_source(&bucket, &src_key);
            self.client
                .copy_object()
                .bucket(&bucket)
                .key(&dst_key)
                .copy_source(copy_source)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("copy_object", Some(&src_key), e))?;

            Ok(())
        })
    }

    fn bucket_exists(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("S3 head_bucket: bucket={}", bucket);

            match self.client.head_bucket().bucket(&bucket).send().await {
                Ok(_) => Ok(true),
                Err(SdkError::ServiceError(service)) if service.err().is_not_found() => Ok(false),
                Err(e) => Err(Self::map_sdk_error("bucket_exists", None, e)),
            }
        })
    }

    fn make_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut request = self.client.create_bucket().bucket(&bucket);
            // us-east-1 rejects an explicit location constraint.
            if self.region != FALLBACK_REGION {
                request = request.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                        .build(),
                );
            }
            request
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("make_bucket", None, e))?;

            info!("S3 bucket created: {}", bucket);
            Ok(())
        })
    }

    fn remove_bucket(
        &self,
        bucket: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            self.client
                .delete_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("remove_bucket", None, e))?;

            info!("S3 bucket removed: {}", bucket);
            Ok(())
        })
    }

    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let resp = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("list_buckets", None, e))?;

            Ok(resp
                .buckets()
                .iter()
                .filter_map(|b| b.name().map(str::to_string))
                .collect())
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
            let presigning = PresigningConfig::expires_in(Duration::from_secs(expiry_secs))
                .map_err(|e| StoreError::object("presigned_url", e.to_string()))?;

            let request = match method {
                PresignMethod::Get => self
                    .client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| Self::map_sdk_error("presigned_url", Some(&key), e))?,
                PresignMethod::Put => self
                    .client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| Self::map_sdk_error("presigned_url", Some(&key), e))?,
            };

            Ok(request.uri().to_string())
        })
    }
}

/// `x-amz-copy-source` value for `key` in `bucket`.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionParams;

    #[test]
    fn test_copy_source_keeps_slashes() {
        assert_eq!(copy_source("b", "a/b/c.txt"), "b/a/b/c.txt");
    }

    #[test]
    fn test_copy_source_escapes_specials() {
        assert_eq!(
            copy_source("b", "dir/key with spaces+plus.txt"),
            "b/dir/key%20with%20spaces%2Bplus.txt"
        );
        assert_eq!(copy_source("b", "ü"), "b/%C3%BC");
    }

    #[test]
    fn test_new_does_no_io() {
        let config = ConnectionConfig::new(ConnectionParams {
            region: None,
            ..Default::default()
        })
        .unwrap();
        let store = S3Store::new(&config);
        assert_eq!(store.region, FALLBACK_REGION);
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        let converted = S3Store::to_chrono(Some(&ts)).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert!(S3Store::to_chrono(None).is_none());
    }
}
