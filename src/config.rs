use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

// =============================================================================
// Defaults
// =============================================================================

/// Number of most recent opaque tags retained per repository
pub const DEFAULT_KEEP_COUNT: usize = 5;

/// Mutable alias tag excluded from comparison and never deleted
pub const DEFAULT_ALIAS_TAG: &str = "latest";

/// Images checked concurrently
pub const DEFAULT_WORKERS: usize = 8;

/// Outbound requests allowed in flight per registry host
pub const DEFAULT_CONNECTIONS_PER_HOST: usize = 4;

/// Timeout for a single registry call in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// Overall deadline for one reconciliation pass in milliseconds (15 minutes)
pub const RUN_TIMEOUT_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Options for one reconciliation run
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub keep_count: usize,
    /// Deletion only happens when this is set
    pub cleanup_enabled: bool,
    /// Repositories evaluated for cleanup even when nothing deploys them.
    /// Either `host/repo` or a bare name on the OCIR registry.
    pub extra_repositories: Vec<String>,
    pub alias_tag: String,
    pub workers: usize,
    pub connections_per_host: usize,
    pub fetch_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub registries: RegistriesConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keep_count: DEFAULT_KEEP_COUNT,
            cleanup_enabled: false,
            extra_repositories: Vec::new(),
            alias_tag: DEFAULT_ALIAS_TAG.to_string(),
            workers: DEFAULT_WORKERS,
            connections_per_host: DEFAULT_CONNECTIONS_PER_HOST,
            fetch_timeout_ms: FETCH_TIMEOUT_MS,
            run_timeout_ms: RUN_TIMEOUT_MS,
            registries: RegistriesConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_count == 0 {
            return Err(ConfigError::Invalid("keepCount must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.connections_per_host == 0 {
            return Err(ConfigError::Invalid(
                "connectionsPerHost must be at least 1".into(),
            ));
        }
        if self.fetch_timeout_ms == 0 || self.run_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.alias_tag.is_empty() {
            return Err(ConfigError::Invalid("aliasTag must not be empty".into()));
        }
        if self
            .registries
            .ocir
            .as_ref()
            .is_some_and(|ocir| ocir.compartment_id.is_none() && ocir.tenancy_id.is_none())
        {
            return Err(ConfigError::Invalid(
                "registries.ocir needs compartmentId or tenancyId".into(),
            ));
        }
        Ok(())
    }
}

/// Registry-specific configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RegistriesConfig {
    pub ocir: Option<OcirConfig>,
    pub distribution: Vec<DistributionConfig>,
}

/// Oracle Cloud Infrastructure Registry
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OcirConfig {
    /// Registry host as it appears in image references (e.g. "iad.ocir.io")
    pub registry: String,
    /// Artifacts API base URL
    pub endpoint: String,
    /// Tenancy object storage namespace prefixed to repository paths
    pub namespace: Option<String>,
    /// Compartment holding every repository. Without it, each repository is
    /// looked up across the compartments of `tenancyId`.
    pub compartment_id: Option<String>,
    /// Tenancy OCID, the root of the compartment search
    pub tenancy_id: Option<String>,
    /// Identity API base URL, defaults to the region's identity endpoint
    /// derived from `endpoint`
    pub identity_endpoint: Option<String>,
    pub username: String,
    pub token: String,
}

/// A registry speaking the OCI distribution API
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionConfig {
    pub host: String,
    /// API base URL, defaults to `https://{host}`
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Whether stale tags on this host may be planned for cleanup
    #[serde(default)]
    pub cleanup: bool,
}

/// Reads and validates a JSON run configuration.
pub fn load(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: RunConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Returns `$XDG_CONFIG_HOME/image-reconciler/config.json`,
/// falling back to `~/.config`, or `./image-reconciler` if neither is available.
pub fn default_config_path() -> PathBuf {
    config_path_with_env(std::env::var("XDG_CONFIG_HOME").ok(), dirs::home_dir())
}

fn config_path_with_env(xdg_config_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let config_dir = xdg_config_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    config_dir.join("image-reconciler").join("config.json")
}
