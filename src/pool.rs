//! Bounded, expiring cache of store clients.
//!
//! Clients are keyed by [`ConnectionConfig::fingerprint`], so two
//! configurations that differ only in their secret share a client.  Lookups
//! take the read lock and bump the entry's access stamp atomically; misses
//! upgrade to the write lock, re-check, sweep expired entries, evict the
//! least recently used entry when full, then construct and insert.
//!
//! New clients are probed with `list_buckets` after insertion.  The probe
//! only logs: an unreachable store still gets a cached client, and the
//! first real operation reports the failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, PoolConfig};
use crate::errors::StoreError;
use crate::metrics::{
    POOL_EVICTIONS_TOTAL, POOL_EXPIRED_TOTAL, POOL_HITS_TOTAL, POOL_MISSES_TOTAL, POOL_SIZE,
};
use crate::storage::backend::StoreHandle;
use crate::storage::factory::ClientFactory;

/// Pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: usize,
    pub expiry: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_size: config.max_size.max(1),
            expiry: Duration::from_secs(config.expiry_seconds),
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Entries currently cached.
    pub size: usize,
    /// Entries accessed within the expiry window.
    pub active: usize,
    pub max_size: usize,
}

struct PooledClient {
    handle: StoreHandle,
    /// Nanoseconds since the pool epoch.
    last_access: AtomicU64,
    /// Pool-wide access counter value at the last access; orders entries
    /// for LRU eviction without ties.
    access_seq: AtomicU64,
}

/// Cache of store clients keyed by connection fingerprint.
pub struct ClientPool {
    factory: Arc<dyn ClientFactory>,
    settings: PoolSettings,
    entries: tokio::sync::RwLock<HashMap<String, PooledClient>>,
    epoch: Instant,
    access_counter: AtomicU64,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>, settings: PoolSettings) -> Self {
        Self {
            factory,
            settings,
            entries: tokio::sync::RwLock::new(HashMap::new()),
            epoch: Instant::now(),
            access_counter: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn touch(&self, client: &PooledClient) {
        client.last_access.store(self.now_nanos(), Ordering::Relaxed);
        client.access_seq.store(
            self.access_counter.fetch_add(1, Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }

    fn is_expired(&self, client: &PooledClient, now: u64) -> bool {
        let idle = now.saturating_sub(client.last_access.load(Ordering::Relaxed));
        Duration::from_nanos(idle) > self.settings.expiry
    }

    /// Client for `config`, reusing a cached one when the fingerprint
    /// matches.  Fails only if the factory cannot construct a client.
    pub async fn get(&self, config: &ConnectionConfig) -> Result<StoreHandle, StoreError> {
        self.lookup(config).await.map(|(handle, _)| handle)
    }

    /// Cached or new client, plus the probe result when the client is new.
    async fn lookup(
        &self,
        config: &ConnectionConfig,
    ) -> Result<(StoreHandle, Option<bool>), StoreError> {
        let fingerprint = config.fingerprint();

        {
            let entries = self.entries.read().await;
            if let Some(client) = entries.get(&fingerprint) {
                self.touch(client);
                counter!(POOL_HITS_TOTAL).increment(1);
                return Ok((Arc::clone(&client.handle), None));
            }
        }

        let handle = {
            let mut entries = self.entries.write().await;
            if let Some(client) = entries.get(&fingerprint) {
                self.touch(client);
                counter!(POOL_HITS_TOTAL).increment(1);
                return Ok((Arc::clone(&client.handle), None));
            }

            self.sweep_locked(&mut entries);
            if entries.len() >= self.settings.max_size {
                self.evict_oldest_locked(&mut entries);
            }

            let handle = self.factory.build(config)?;
            let client = PooledClient {
                handle: Arc::clone(&handle),
                last_access: AtomicU64::new(0),
                access_seq: AtomicU64::new(0),
            };
            self.touch(&client);
            entries.insert(fingerprint.clone(), client);
            counter!(POOL_MISSES_TOTAL).increment(1);
            gauge!(POOL_SIZE).set(entries.len() as f64);
            info!(
                "Cached new store client {} (pool size {}/{})",
                config,
                entries.len(),
                self.settings.max_size
            );
            handle
        };

        let reachable = Self::probe(&handle, config).await;
        Ok((handle, Some(reachable)))
    }

    /// Connectivity probe.  Failures are logged, never returned.
    async fn probe(handle: &StoreHandle, config: &ConnectionConfig) -> bool {
        match handle.list_buckets().await {
            Ok(buckets) => {
                debug!(
                    "Store client probe ok: {} ({} buckets)",
                    config.endpoint(),
                    buckets.len()
                );
                true
            }
            Err(e) => {
                warn!(
                    "Store client probe failed for {}: {} (client kept)",
                    config.endpoint(),
                    e
                );
                false
            }
        }
    }

    /// Drop expired entries.  Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        self.sweep_locked(&mut entries)
    }

    fn sweep_locked(&self, entries: &mut HashMap<String, PooledClient>) -> usize {
        let now = self.now_nanos();
        let before = entries.len();
        entries.retain(|fingerprint, client| {
            let keep = !self.is_expired(client, now);
            if !keep {
                debug!("Expiring idle store client {}", fingerprint);
            }
            keep
        });
        let removed = before - entries.len();
        if removed > 0 {
            counter!(POOL_EXPIRED_TOTAL).increment(removed as u64);
            gauge!(POOL_SIZE).set(entries.len() as f64);
        }
        removed
    }

    fn evict_oldest_locked(&self, entries: &mut HashMap<String, PooledClient>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, client)| client.access_seq.load(Ordering::Relaxed))
            .map(|(fingerprint, _)| fingerprint.clone());
        if let Some(fingerprint) = oldest {
            entries.remove(&fingerprint);
            counter!(POOL_EVICTIONS_TOTAL).increment(1);
            info!("Evicted least recently used store client {}", fingerprint);
        }
    }

    /// Drop every cached client.
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        gauge!(POOL_SIZE).set(0.0);
        info!("Store client pool cleared ({} clients)", count);
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.read().await;
        let now = self.now_nanos();
        PoolStats {
            size: entries.len(),
            active: entries
                .values()
                .filter(|client| !self.is_expired(client, now))
                .count(),
            max_size: self.settings.max_size,
        }
    }

    /// Create and probe a client ahead of first use.  Returns whether the
    /// probe succeeded; construction errors are logged.  A client built by
    /// this call is probed once, on creation.
    pub async fn warmup(&self, config: &ConnectionConfig) -> bool {
        match self.lookup(config).await {
            Ok((_, Some(reachable))) => reachable,
            Ok((handle, None)) => Self::probe(&handle, config).await,
            Err(e) => {
                warn!("Store client warmup failed for {}: {}", config.endpoint(), e);
                false
            }
        }
    }
}
