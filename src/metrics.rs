//! Prometheus metrics for bucketfs.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric name constants recorded by the pool and the
//! dispatcher.  Recording without an installed recorder is a no-op, so the
//! library works unchanged when the embedding application ignores metrics.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Pool lookups answered from the cache (counter).
pub const POOL_HITS_TOTAL: &str = "bucketfs_pool_hits_total";

/// Pool lookups that constructed a new client (counter).
pub const POOL_MISSES_TOTAL: &str = "bucketfs_pool_misses_total";

/// Clients evicted because the pool was full (counter).
pub const POOL_EVICTIONS_TOTAL: &str = "bucketfs_pool_evictions_total";

/// Clients dropped after sitting idle past the expiry (counter).
pub const POOL_EXPIRED_TOTAL: &str = "bucketfs_pool_expired_total";

/// Clients currently cached (gauge).
pub const POOL_SIZE: &str = "bucketfs_pool_size";

/// Dispatched commands (counter). Labels: command, status.
pub const COMMANDS_TOTAL: &str = "bucketfs_commands_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder and register metric
/// descriptions.  Idempotent; later calls return the existing handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(POOL_HITS_TOTAL, "Client pool cache hits");
    describe_counter!(POOL_MISSES_TOTAL, "Client pool cache misses");
    describe_counter!(POOL_EVICTIONS_TOTAL, "Clients evicted from a full pool");
    describe_counter!(POOL_EXPIRED_TOTAL, "Clients expired after idling");
    describe_gauge!(POOL_SIZE, "Clients currently cached");
    describe_counter!(COMMANDS_TOTAL, "Dispatched file manager commands");
}

/// Prometheus exposition text, if the recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}
