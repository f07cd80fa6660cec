//! Configuration loading and types for bucketdesk.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  A handful of environment variables then override
//! the storage section so deployments can keep the bucket layout out of
//! the file.

use serde::Deserialize;
use std::path::Path;

/// Comma-separated list of public prefixes searched by `/public-objects/*`.
pub const ENV_PUBLIC_OBJECT_SEARCH_PATHS: &str = "PUBLIC_OBJECT_SEARCH_PATHS";

/// Root directory for private object entities.
pub const ENV_PRIVATE_OBJECT_DIR: &str = "PRIVATE_OBJECT_DIR";

/// Name of the backing bucket.
pub const ENV_BUCKET: &str = "BUCKETDESK_BUCKET";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted multipart upload in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_size: default_max_upload_size(),
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

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Object storage configuration.
///
/// `public_object_search_paths` and `private_object_dir` may legitimately
/// be empty at startup; the operations that need them fail at call time.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `gcs` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Backing bucket name.
    #[serde(default)]
    pub bucket: String,

    /// Base URL of the credential / URL-signing sidecar.
    #[serde(default = "default_sidecar_endpoint")]
    pub sidecar_endpoint: String,

    /// Public prefixes, searched in order.
    #[serde(default)]
    pub public_object_search_paths: Vec<String>,

    /// Root directory for private object entities.
    #[serde(default)]
    pub private_object_dir: String,

    /// Directory that receives public uploads.
    #[serde(default = "default_public_upload_dir")]
    pub public_upload_dir: String,

    /// Top-level folder of the public file browser.
    #[serde(default = "default_browse_root")]
    pub browse_root: String,

    /// Timeout for every outbound HTTP request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: String::new(),
            sidecar_endpoint: default_sidecar_endpoint(),
            public_object_search_paths: Vec::new(),
            private_object_dir: String::new(),
            public_upload_dir: default_public_upload_dir(),
            browse_root: default_browse_root(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl StorageConfig {
    /// Apply environment overrides using the given lookup function.
    ///
    /// Taking the lookup as a closure keeps tests away from the process
    /// environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(paths) = lookup(ENV_PUBLIC_OBJECT_SEARCH_PATHS) {
            self.public_object_search_paths =
                paths.split(',').map(|p| p.trim().to_string()).collect();
        }
        if let Some(dir) = lookup(ENV_PRIVATE_OBJECT_DIR) {
            self.private_object_dir = dir;
        }
        if let Some(bucket) = lookup(ENV_BUCKET) {
            self.bucket = bucket;
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_upload_size() -> usize {
    10 * 1024 * 1024
}

fn default_storage_backend() -> String {
    "gcs".to_string()
}

fn default_sidecar_endpoint() -> String {
    "http://127.0.0.1:1106".to_string()
}

fn default_public_upload_dir() -> String {
    "PROSPERAR_FUNCIONARIOS_DOS_CLIENTES".to_string()
}

fn default_browse_root() -> String {
    "prosperar-publico".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`, then apply
/// environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let mut config: Config = serde_yaml::from_str(&contents)?;
    config.storage.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}
