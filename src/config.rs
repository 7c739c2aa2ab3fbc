//! Configuration loading and types for bucketfs.
//!
//! Two layers live here.  [`Config`] is the YAML file, deserialized with
//! serde defaults for every field.  [`ConfigSource`] is the key/value view
//! used to resolve connection parameters: explicit overrides win over
//! environment variables, which win over the file, which wins over the
//! built-in defaults.  [`ConnectionConfig`] is the validated result that the
//! client pool is keyed on.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::errors::StoreError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Object store connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Client pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Command dispatcher settings.
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Object store section of the config file.
///
/// Every field is optional here; unset fields fall through to the
/// environment and the built-in defaults when resolved by [`LayeredSource`].
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend type: `s3` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub secure: Option<bool>,
    pub connect_timeout_ms: Option<i64>,
    pub read_timeout_ms: Option<i64>,
    pub write_timeout_ms: Option<i64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
            secure: None,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
        }
    }
}

impl StoreConfig {
    /// Flatten the set fields into a resolver layer keyed like
    /// [`keys::ENDPOINT`].
    pub fn to_layer(&self) -> HashMap<String, String> {
        let mut layer = HashMap::new();
        let mut set = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                layer.insert(key.to_string(), value);
            }
        };
        set(keys::ENDPOINT, self.endpoint.clone());
        set(keys::ACCESS_KEY, self.access_key.clone());
        set(keys::SECRET_KEY, self.secret_key.clone());
        set(keys::REGION, self.region.clone());
        set(keys::SECURE, self.secure.map(|v| v.to_string()));
        set(keys::CONNECT_TIMEOUT_MS, self.connect_timeout_ms.map(|v| v.to_string()));
        set(keys::READ_TIMEOUT_MS, self.read_timeout_ms.map(|v| v.to_string()));
        set(keys::WRITE_TIMEOUT_MS, self.write_timeout_ms.map(|v| v.to_string()));
        layer
    }
}

/// Client pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of cached clients.
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Idle time after which a cached client is dropped, in seconds.
    #[serde(default = "default_pool_expiry_seconds")]
    pub expiry_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            expiry_seconds: default_pool_expiry_seconds(),
        }
    }
}

/// Command dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Largest accepted upload, with an optional K/M/G suffix.
    #[serde(default = "default_upload_max_size")]
    pub upload_max_size: String,

    /// Lifetime of presigned download links, in seconds.
    #[serde(default = "default_link_expiry_seconds")]
    pub link_expiry_seconds: u64,

    /// UI features reported as disabled to the file manager.
    #[serde(default = "default_disabled")]
    pub disabled: Vec<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            upload_max_size: default_upload_max_size(),
            link_expiry_seconds: default_link_expiry_seconds(),
            disabled: default_disabled(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Resolver keys -----------------------------------------------------------

/// Keys understood by [`ConnectionConfig::from_source`].
///
/// The matching environment variable is the key with `.` replaced by `_`
/// and upper-cased, e.g. `BUCKETFS_ENDPOINT`.
pub mod keys {
    pub const ENDPOINT: &str = "bucketfs.endpoint";
    pub const ACCESS_KEY: &str = "bucketfs.access_key";
    pub const SECRET_KEY: &str = "bucketfs.secret_key";
    pub const REGION: &str = "bucketfs.region";
    pub const SECURE: &str = "bucketfs.secure";
    pub const CONNECT_TIMEOUT_MS: &str = "bucketfs.connect_timeout_ms";
    pub const READ_TIMEOUT_MS: &str = "bucketfs.read_timeout_ms";
    pub const WRITE_TIMEOUT_MS: &str = "bucketfs.write_timeout_ms";
}

/// Resolves a configuration key to a string value.  Never fails: the
/// default is returned when no layer has a value.
pub trait ConfigSource: Send + Sync {
    fn resolve(&self, key: &str, default: &str) -> String;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Override > environment > file > default resolution.
pub struct LayeredSource {
    overrides: HashMap<String, String>,
    env: EnvLookup,
    file: HashMap<String, String>,
}

impl LayeredSource {
    /// Source backed by the process environment and nothing else.
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
            env: Box::new(|name| std::env::var(name).ok()),
            file: HashMap::new(),
        }
    }

    /// Replace the environment lookup.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    /// Use `layer` as the config-file layer.
    pub fn with_file_layer(mut self, layer: HashMap<String, String>) -> Self {
        self.file = layer;
        self
    }

    /// Set an explicit override for `key`.
    pub fn set_override(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.insert(key.into(), value.into());
    }

    /// Environment variable name for `key`.
    pub fn env_name(key: &str) -> String {
        key.replace('.', "_").to_uppercase()
    }
}

impl Default for LayeredSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for LayeredSource {
    fn resolve(&self, key: &str, default: &str) -> String {
        if let Some(v) = self.overrides.get(key).filter(|v| !v.trim().is_empty()) {
            return v.trim().to_string();
        }
        if let Some(v) = (self.env)(&Self::env_name(key)).filter(|v| !v.trim().is_empty()) {
            return v.trim().to_string();
        }
        if let Some(v) = self.file.get(key).filter(|v| !v.trim().is_empty()) {
            return v.trim().to_string();
        }
        default.to_string()
    }
}

// -- Connection config -------------------------------------------------------

/// Validated connection parameters for one object store account.
///
/// Construct through [`ConnectionConfig::new`] or
/// [`ConnectionConfig::from_source`]; both reject invalid values, so a value
/// of this type is always usable.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    endpoint: String,
    access_key: String,
    secret_key: String,
    region: Option<String>,
    secure: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

/// Raw, unvalidated connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    pub secure: bool,
    pub connect_timeout_ms: i64,
    pub read_timeout_ms: i64,
    pub write_timeout_ms: i64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            region: Some(default_region()),
            secure: false,
            connect_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    /// Validate `params`.
    pub fn new(params: ConnectionParams) -> Result<Self, StoreError> {
        let endpoint = params.endpoint.trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(StoreError::Configuration("endpoint must not be empty".into()));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(StoreError::Configuration(format!(
                "endpoint must start with http:// or https://, got {endpoint}"
            )));
        }
        if params.secure && endpoint.starts_with("http://") {
            return Err(StoreError::Configuration(
                "secure is enabled but the endpoint uses http://".into(),
            ));
        }
        if params.access_key.trim().is_empty() {
            return Err(StoreError::Configuration("access key must not be empty".into()));
        }
        if params.secret_key.trim().is_empty() {
            return Err(StoreError::Configuration("secret key must not be empty".into()));
        }
        let timeout = |name: &str, ms: i64| {
            u64::try_from(ms).map(Duration::from_millis).map_err(|_| {
                StoreError::Configuration(format!("{name} must not be negative, got {ms}"))
            })
        };
        let region = params
            .region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        Ok(Self {
            endpoint,
            access_key: params.access_key.trim().to_string(),
            secret_key: params.secret_key,
            region,
            secure: params.secure,
            connect_timeout: timeout("connect timeout", params.connect_timeout_ms)?,
            read_timeout: timeout("read timeout", params.read_timeout_ms)?,
            write_timeout: timeout("write timeout", params.write_timeout_ms)?,
        })
    }

    /// Resolve every connection key through `source`, then validate.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, StoreError> {
        let secure_raw = source.resolve(keys::SECURE, "false");
        let secure = secure_raw.to_ascii_lowercase().parse::<bool>().map_err(|_| {
            StoreError::Configuration(format!("{} is not a boolean: {secure_raw}", keys::SECURE))
        })?;
        let millis = |key: &str| -> Result<i64, StoreError> {
            let raw = source.resolve(key, &default_timeout_ms().to_string());
            raw.parse::<i64>().map_err(|_| {
                StoreError::Configuration(format!("{key} is not an integer: {raw}"))
            })
        };
        let region = source.resolve(keys::REGION, &default_region());

        Self::new(ConnectionParams {
            endpoint: source.resolve(keys::ENDPOINT, &default_endpoint()),
            access_key: source.resolve(keys::ACCESS_KEY, &default_access_key()),
            secret_key: source.resolve(keys::SECRET_KEY, &default_secret_key()),
            region: Some(region),
            secure,
            connect_timeout_ms: millis(keys::CONNECT_TIMEOUT_MS)?,
            read_timeout_ms: millis(keys::READ_TIMEOUT_MS)?,
            write_timeout_ms: millis(keys::WRITE_TIMEOUT_MS)?,
        })
    }

    /// Pool key: every identifying field except the secret.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.endpoint,
            self.access_key,
            self.region.as_deref().unwrap_or("default"),
            self.secure
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Access key with everything after the first three characters hidden.
    pub fn masked_access_key(&self) -> String {
        let visible: String = self.access_key.chars().take(3).collect();
        format!("{visible}***")
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.masked_access_key())
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("secure", &self.secure)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "endpoint={} access_key={} region={} secure={} timeouts(ms)={}/{}/{}",
            self.endpoint,
            self.masked_access_key(),
            self.region.as_deref().unwrap_or("default"),
            self.secure,
            self.connect_timeout.as_millis(),
            self.read_timeout.as_millis(),
            self.write_timeout.as_millis()
        )
    }
}

/// Parse a size such as `32M`, `512K`, `1G` or a plain byte count.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last()?.to_ascii_uppercase() {
        'K' => (&raw[..raw.len() - 1], 1u64 << 10),
        'M' => (&raw[..raw.len() - 1], 1u64 << 20),
        'G' => (&raw[..raw.len() - 1], 1u64 << 30),
        _ => (raw, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

// -- Defaults ----------------------------------------------------------------

fn default_backend() -> String {
    "s3".to_string()
}

fn default_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_access_key() -> String {
    "admin".to_string()
}

fn default_secret_key() -> String {
    "admin123".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_timeout_ms() -> i64 {
    10_000
}

fn default_pool_max_size() -> usize {
    10
}

fn default_pool_expiry_seconds() -> u64 {
    30 * 60
}

fn default_upload_max_size() -> String {
    "32M".to_string()
}

fn default_link_expiry_seconds() -> u64 {
    3600
}

fn default_disabled() -> Vec<String> {
    [
        "tmb", "size", "dim", "duplicate", "paste", "archive", "extract", "search", "resize",
        "netmount",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_resolve_without_layers() {
        let source = LayeredSource::new().with_env(|_| None);
        let config = ConnectionConfig::from_source(&source).unwrap();
        assert_eq!(config.endpoint(), "http://localhost:9000");
        assert_eq!(config.access_key(), "admin");
        assert_eq!(config.secret_key(), "admin123");
        assert_eq!(config.region(), Some("us-east-1"));
        assert!(!config.secure());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_layer_priority() {
        let mut file = HashMap::new();
        file.insert(keys::ENDPOINT.to_string(), "http://file:9000".to_string());
        file.insert(keys::REGION.to_string(), "eu-west-1".to_string());
        file.insert(keys::ACCESS_KEY.to_string(), "file-key".to_string());

        let mut source = LayeredSource::new()
            .with_env(env_of(&[
                ("BUCKETFS_ENDPOINT", "http://env:9000"),
                ("BUCKETFS_ACCESS_KEY", "env-key"),
            ]))
            .with_file_layer(file);
        source.set_override(keys::ACCESS_KEY, "override-key");

        assert_eq!(source.resolve(keys::ACCESS_KEY, "d"), "override-key");
        assert_eq!(source.resolve(keys::ENDPOINT, "d"), "http://env:9000");
        assert_eq!(source.resolve(keys::REGION, "d"), "eu-west-1");
        assert_eq!(source.resolve(keys::SECRET_KEY, "d"), "d");
    }

    #[test]
    fn test_blank_env_value_is_ignored() {
        let source = LayeredSource::new().with_env(env_of(&[("BUCKETFS_REGION", "   ")]));
        assert_eq!(source.resolve(keys::REGION, "us-east-1"), "us-east-1");
    }

    #[test]
    fn test_env_name() {
        assert_eq!(LayeredSource::env_name("bucketfs.read_timeout_ms"), "BUCKETFS_READ_TIMEOUT_MS");
    }

    #[test]
    fn test_validation_failures() {
        let bad = [
            ConnectionParams {
                endpoint: "".into(),
                ..Default::default()
            },
            ConnectionParams {
                endpoint: "ftp://host".into(),
                ..Default::default()
            },
            ConnectionParams {
                access_key: " ".into(),
                ..Default::default()
            },
            ConnectionParams {
                secret_key: "".into(),
                ..Default::default()
            },
            ConnectionParams {
                read_timeout_ms: -1,
                ..Default::default()
            },
            ConnectionParams {
                secure: true,
                ..Default::default()
            },
        ];
        for params in bad {
            let err = ConnectionConfig::new(params).unwrap_err();
            assert!(matches!(err, StoreError::Configuration(_)), "{err}");
        }
    }

    #[test]
    fn test_unparsable_values_are_configuration_errors() {
        let source =
            LayeredSource::new().with_env(env_of(&[("BUCKETFS_CONNECT_TIMEOUT_MS", "soon")]));
        assert!(matches!(
            ConnectionConfig::from_source(&source),
            Err(StoreError::Configuration(_))
        ));

        let source = LayeredSource::new().with_env(env_of(&[("BUCKETFS_SECURE", "maybe")]));
        assert!(matches!(
            ConnectionConfig::from_source(&source),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_fingerprint_excludes_secret() {
        let a = ConnectionConfig::new(ConnectionParams::default()).unwrap();
        let b = ConnectionConfig::new(ConnectionParams {
            secret_key: "other-secret".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(a.fingerprint(), "http://localhost:9000:admin:us-east-1:false");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_blank_region_fingerprints_as_default() {
        let config = ConnectionConfig::new(ConnectionParams {
            region: Some(" ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.region(), None);
        assert!(config.fingerprint().ends_with(":default:false"));
    }

    #[test]
    fn test_masked_output_hides_secrets() {
        let config = ConnectionConfig::new(ConnectionParams {
            access_key: "AKIAEXAMPLE".into(),
            secret_key: "topsecret".into(),
            ..Default::default()
        })
        .unwrap();
        let shown = format!("{config} {config:?}");
        assert!(shown.contains("AKI***"));
        assert!(!shown.contains("AKIAEXAMPLE"));
        assert!(!shown.contains("topsecret"));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("32M"), Some(32 * 1024 * 1024));
        assert_eq!(parse_size("512k"), Some(512 * 1024));
        assert_eq!(parse_size("1G"), Some(1 << 30));
        assert_eq!(parse_size("100"), Some(100));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_load_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "store:\n  backend: memory\n  endpoint: http://minio:9000\n  secure: false\npool:\n  max_size: 3\nconnector:\n  upload_max_size: 1M\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.pool.max_size, 3);
        assert_eq!(config.pool.expiry_seconds, 1800);
        assert_eq!(config.connector.upload_max_size, "1M");
        assert_eq!(config.connector.link_expiry_seconds, 3600);
        assert!(config.connector.disabled.contains(&"netmount".to_string()));
        assert_eq!(config.logging.level, "info");

        let layer = config.store.to_layer();
        assert_eq!(layer.get(keys::ENDPOINT).map(String::as_str), Some("http://minio:9000"));
        assert_eq!(layer.get(keys::SECURE).map(String::as_str), Some("false"));
        assert!(!layer.contains_key(keys::ACCESS_KEY));
    }
}
