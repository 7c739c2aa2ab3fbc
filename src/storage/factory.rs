//! Client construction.
//!
//! A [`ClientFactory`] turns validated connection parameters into a store
//! handle.  Construction must not perform network I/O; connectivity is
//! probed separately by the pool.

use std::sync::Arc;

use super::backend::StoreHandle;
use super::memory::MemoryStore;
use super::s3::S3Store;
use crate::config::ConnectionConfig;
use crate::errors::StoreError;

/// Builds store clients for the pool.
pub trait ClientFactory: Send + Sync {
    fn build(&self, config: &ConnectionConfig) -> Result<StoreHandle, StoreError>;
}

/// Factory for [`S3Store`] clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3ClientFactory;

impl ClientFactory for S3ClientFactory {
    fn build(&self, config: &ConnectionConfig) -> Result<StoreHandle, StoreError> {
        Ok(Arc::new(S3Store::new(config)))
    }
}

/// Factory that hands out one shared [`MemoryStore`] for every connection.
#[derive(Default, Clone)]
pub struct MemoryClientFactory {
    store: Arc<MemoryStore>,
}

impl MemoryClientFactory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }
}

impl ClientFactory for MemoryClientFactory {
    fn build(&self, _config: &ConnectionConfig) -> Result<StoreHandle, StoreError> {
        Ok(self.store.clone())
    }
}

/// Factory for the backend named in the config file (`s3` or `memory`).
pub fn for_backend(backend: &str) -> Result<Arc<dyn ClientFactory>, StoreError> {
    match backend {
        "s3" => Ok(Arc::new(S3ClientFactory)),
        "memory" => Ok(Arc::new(MemoryClientFactory::default())),
        other => Err(StoreError::Configuration(format!(
            "unknown store backend '{other}', expected 's3' or 'memory'"
        ))),
    }
}
