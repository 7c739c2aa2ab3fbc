//! Error taxonomy for object-store access.
//!
//! Every failure surfaced by the store clients, the pool and the virtual
//! filesystem is a [`StoreError`].  Variants fold onto a small set of
//! [`ErrorKind`] categories so callers can decide between retrying,
//! reconfiguring and reporting without matching on raw S3 error codes.

use thiserror::Error;
use tracing::warn;

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Authentication,
    Bucket,
    Object,
    Permission,
    RateLimited,
    Unknown,
}

/// Errors produced while talking to an object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection parameters are missing or malformed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The store could not be reached or the transport failed.
    #[error("{operation}: connection failed: {message}")]
    Connection { operation: String, message: String },

    /// Credentials were rejected.
    #[error("{operation}: authentication failed: {message}")]
    Authentication { operation: String, message: String },

    /// Bucket-level failure (missing, already exists, not empty, bad name).
    #[error("{operation}: {message}")]
    Bucket { operation: String, message: String },

    /// The requested key does not exist.
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    /// Object-level failure other than a missing key.
    #[error("{operation}: {message}")]
    Object { operation: String, message: String },

    /// The caller lacks permission for the operation.
    #[error("{operation}: access denied: {message}")]
    Permission { operation: String, message: String },

    /// The store asked us to slow down.
    #[error("{operation}: rate limited: {message}")]
    RateLimited { operation: String, message: String },

    /// A rename copied the object but could not delete the original, so both
    /// keys now exist.
    #[error("rename incomplete: copied {from} to {to} but could not remove {from}: {message}")]
    RenameIncomplete {
        from: String,
        to: String,
        message: String,
    },

    /// Anything the store reported that has no better classification.
    #[error("{operation}: {message}")]
    Unknown { operation: String, message: String },
}

impl StoreError {
    /// Build an [`StoreError::Object`] for `operation`.
    pub fn object(operation: &str, message: impl Into<String>) -> Self {
        Self::Object {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Build a [`StoreError::Bucket`] for `operation`.
    pub fn bucket(operation: &str, message: impl Into<String>) -> Self {
        Self::Bucket {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Build a [`StoreError::Connection`] for `operation`.
    pub fn connection(operation: &str, message: impl Into<String>) -> Self {
        Self::Connection {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Bucket { .. } => ErrorKind::Bucket,
            Self::NoSuchKey { .. } | Self::Object { .. } | Self::RenameIncomplete { .. } => {
                ErrorKind::Object
            }
            Self::Permission { .. } => ErrorKind::Permission,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Stable error code string, suitable for logs and client responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Connection { .. } => "ConnectionError",
            Self::Authentication { .. } => "AuthenticationError",
            Self::Bucket { .. } => "BucketError",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::Object { .. } => "ObjectError",
            Self::Permission { .. } => "PermissionDenied",
            Self::RateLimited { .. } => "RateLimited",
            Self::RenameIncomplete { .. } => "RenameIncomplete",
            Self::Unknown { .. } => "UnknownError",
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::RateLimited)
    }

    /// Whether the error means "the key is not there".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchKey { .. })
    }

    /// Classify an S3 service error code.
    ///
    /// `key` names the object involved, if any, so a missing-key response
    /// can be reported against it.
    pub fn from_service_code(operation: &str, key: Option<&str>, code: &str, message: &str) -> Self {
        let operation = operation.to_string();
        let message = if message.is_empty() {
            code.to_string()
        } else {
            message.to_string()
        };
        match code {
            "NoSuchKey" | "NotFound" => Self::NoSuchKey {
                key: key.unwrap_or_default().to_string(),
            },
            "AccessDenied" | "AllAccessDisabled" => Self::Permission { operation, message },
            "NoSuchBucket" | "BucketAlreadyExists" | "BucketAlreadyOwnedByYou"
            | "BucketNotEmpty" | "InvalidBucketName" => Self::Bucket {
                operation,
                message: format!("{code}: {message}"),
            },
            "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
            | "InvalidToken" => Self::Authentication { operation, message },
            "InternalError" | "ServiceUnavailable" | "RequestTimeout" => {
                Self::Connection { operation, message }
            }
            "SlowDown" | "TooManyRequests" | "Throttling" => {
                Self::RateLimited { operation, message }
            }
            other => {
                warn!("Unhandled store error code {} during {}", other, operation);
                Self::Unknown {
                    operation,
                    message: format!("{other}: {message}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_code_classification() {
        let cases = [
            ("AccessDenied", ErrorKind::Permission),
            ("NoSuchBucket", ErrorKind::Bucket),
            ("BucketAlreadyExists", ErrorKind::Bucket),
            ("BucketNotEmpty", ErrorKind::Bucket),
            ("NoSuchKey", ErrorKind::Object),
            ("InvalidAccessKeyId", ErrorKind::Authentication),
            ("SignatureDoesNotMatch", ErrorKind::Authentication),
            ("InternalError", ErrorKind::Connection),
            ("SlowDown", ErrorKind::RateLimited),
            ("SomethingNew", ErrorKind::Unknown),
        ];
        for (code, kind) in cases {
            let err = StoreError::from_service_code("op", None, code, "msg");
            assert_eq!(err.kind(), kind, "code {code}");
        }
    }

    #[test]
    fn test_not_found_keeps_key() {
        let err = StoreError::from_service_code("stat", Some("a/b.txt"), "NotFound", "");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no such key: a/b.txt");
    }

    #[test]
    fn test_retryable() {
        assert!(StoreError::connection("list", "reset").is_retryable());
        assert!(StoreError::from_service_code("put", None, "SlowDown", "").is_retryable());
        assert!(!StoreError::Configuration("bad".into()).is_retryable());
        assert!(!StoreError::object("put", "nope").is_retryable());
    }

    #[test]
    fn test_rename_incomplete_is_object_error() {
        let err = StoreError::RenameIncomplete {
            from: "a.txt".into(),
            to: "b.txt".into(),
            message: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Object);
        assert_eq!(err.code(), "RenameIncomplete");
        let text = err.to_string();
        assert!(text.contains("a.txt") && text.contains("b.txt"));
    }

    #[test]
    fn test_empty_message_falls_back_to_code() {
        let err = StoreError::from_service_code("put", None, "AccessDenied", "");
        assert_eq!(err.to_string(), "put: access denied: AccessDenied");
    }
}
