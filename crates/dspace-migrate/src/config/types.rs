//! Configuration type definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source repository database.
    pub source: SourceDbConfig,

    /// Target repository REST backend.
    pub backend: BackendConfig,

    /// Engine behavior (chunking, retry, timeouts).
    #[serde(default)]
    pub engine: EngineConfig,

    /// Ignore rules applied during migration.
    #[serde(default)]
    pub ignore: IgnoreConfig,

    /// Ordered candidate fields for version-date resolution.
    /// Required before any item-version migration runs.
    #[serde(default)]
    pub version_date_fields: Option<Vec<String>>,

    /// Test-mode overrides.
    #[serde(default)]
    pub test: TestConfig,
}

/// Source database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDbConfig {
    /// Database name.
    pub name: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

/// Target REST backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API endpoint, e.g. `http://localhost:8080/server/api/`.
    pub endpoint: String,

    /// Admin user for authentication.
    pub user: String,

    /// Admin password.
    pub password: String,

    /// Whether to authenticate before importing (default: true).
    #[serde(default = "default_true")]
    pub authentication: bool,
}

/// Engine behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows per chunk for large tables.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum attempts for a fallible operation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in seconds; doubles per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    /// Backoff cap in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    /// Connection establishment timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle seconds before a keepalive ping.
    #[serde(default = "default_keepalive_idle")]
    pub keepalive_idle_secs: u64,

    /// TCP keepalive probe interval in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Failed TCP keepalive probes before the connection is dead.
    #[serde(default = "default_keepalive_retries")]
    pub keepalive_retries: u32,

    /// Pause between chunk fetches in milliseconds, to avoid
    /// overwhelming the source database.
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            connect_timeout_secs: default_connect_timeout(),
            keepalive_idle_secs: default_keepalive_idle(),
            keepalive_interval_secs: default_keepalive_interval(),
            keepalive_retries: default_keepalive_retries(),
            chunk_delay_ms: default_chunk_delay(),
        }
    }
}

impl EngineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

/// Ignore rules: named categories of values suppressed during migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// License-icon labels whose missing icon is not an error.
    #[serde(default, rename = "missing-icons")]
    pub missing_icons: Vec<String>,

    /// Person ids excluded from migration.
    #[serde(default)]
    pub epersons: Vec<i64>,

    /// Metadata field names dropped from payloads before submission.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Test-mode configuration: tables run against a fixture instead of the
/// real reader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    /// Table names to substitute with the fixture source.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Path of the fixture JSON file (an explicit no-rows marker or an
    /// array of row objects).
    #[serde(default)]
    pub fixture: Option<PathBuf>,
}

// Default value functions for serde

fn default_pg_port() -> u16 {
    5432
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    50_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    5
}

fn default_retry_max_delay() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_keepalive_idle() -> u64 {
    600
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_keepalive_retries() -> u32 {
    3
}

fn default_chunk_delay() -> u64 {
    100
}
