//! Configuration types and parsing for harness.yml

use crate::error::{CoreError, CoreResult};
use crate::serde_helpers::{deserialize_duration, serialize_duration};
use crate::table_name::ClusterName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of concurrent assertion workers
pub const DEFAULT_WORKERS: usize = 5;

/// Default number of concurrent parquet load workers
pub const DEFAULT_LOAD_WORKERS: usize = 10;

/// Default per-assertion deadline
pub const DEFAULT_ASSERTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-statement deadline for DDL and loads
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default upper bound on waiting for the replication queue to drain
pub const DEFAULT_SYNC_MAX_WAIT: Duration = Duration::from_secs(30);

/// Default replication queue polling interval
pub const DEFAULT_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default prefix of per-database migration state tables
pub const DEFAULT_SCHEMA_MIGRATIONS_PREFIX: &str = "schema_migrations_";

/// Default system view polled by the sync gate
pub const DEFAULT_REPLICATION_QUEUE_TABLE: &str = "system.replication_queue";

/// Harness configuration from harness.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// DSN of the cluster holding externally supplied fixture tables
    #[serde(default = "default_source_connection")]
    pub source_connection: String,

    /// DSN of the cluster holding per-test derived databases
    #[serde(default = "default_derived_connection")]
    pub derived_connection: String,

    /// Cluster identifier for `ON CLUSTER` clauses on the source cluster
    #[serde(default = "default_source_cluster_name")]
    pub source_cluster_name: ClusterName,

    /// Cluster identifier for `ON CLUSTER` clauses on the derived cluster
    #[serde(default = "default_derived_cluster_name")]
    pub derived_cluster_name: ClusterName,

    /// Migrations applied to the source cluster `default` database
    #[serde(default)]
    pub source_migration_dir: Option<PathBuf>,

    /// Migrations applied to every derived test database
    #[serde(default)]
    pub derived_migration_dir: Option<PathBuf>,

    /// Concurrent assertion workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Concurrent parquet load workers
    #[serde(default = "default_load_workers")]
    pub load_workers: usize,

    /// Deadline of a single assertion (session checkout, `USE`, query)
    #[serde(
        default = "default_assertion_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub assertion_timeout: Duration,

    /// Deadline of a single DDL or load statement
    #[serde(
        default = "default_query_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub query_timeout: Duration,

    /// Upper bound on waiting for the replication queue to drain
    #[serde(
        default = "default_sync_max_wait",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub sync_max_wait: Duration,

    /// Replication queue polling interval
    #[serde(
        default = "default_sync_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub sync_poll_interval: Duration,

    /// Clear and re-migrate the source cluster even if it is already prepared
    #[serde(default)]
    pub force_rebuild: bool,

    /// Prefix of migration state tables (`<prefix><database>` in `default`)
    #[serde(default = "default_schema_migrations_prefix")]
    pub schema_migrations_prefix: String,

    /// System view polled by the sync gate
    #[serde(default = "default_replication_queue_table")]
    pub replication_queue_table: String,

    /// Maximum pinned sessions checked out of one pool at a time
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Extra attempts for an assertion that returned no rows or mismatched
    #[serde(default)]
    pub assertion_max_retries: usize,

    /// Delay before the first retry; doubles on each further retry
    #[serde(
        default = "default_assertion_retry_delay",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub assertion_retry_delay: Duration,

    /// Hostnames that destructive operations may target. Empty disables the check.
    #[serde(default)]
    pub safe_hostnames: Vec<String>,
}

fn default_source_connection() -> String {
    "http://localhost:8123".to_string()
}

fn default_derived_connection() -> String {
    "http://localhost:8124".to_string()
}

fn default_source_cluster_name() -> ClusterName {
    ClusterName::new("source_cluster")
}

fn default_derived_cluster_name() -> ClusterName {
    ClusterName::new("derived_cluster")
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_load_workers() -> usize {
    DEFAULT_LOAD_WORKERS
}

fn default_assertion_timeout() -> Duration {
    DEFAULT_ASSERTION_TIMEOUT
}

fn default_query_timeout() -> Duration {
    DEFAULT_QUERY_TIMEOUT
}

fn default_sync_max_wait() -> Duration {
    DEFAULT_SYNC_MAX_WAIT
}

fn default_sync_poll_interval() -> Duration {
    DEFAULT_SYNC_POLL_INTERVAL
}

fn default_schema_migrations_prefix() -> String {
    DEFAULT_SCHEMA_MIGRATIONS_PREFIX.to_string()
}

fn default_replication_queue_table() -> String {
    DEFAULT_REPLICATION_QUEUE_TABLE.to_string()
}

fn default_max_sessions() -> usize {
    16
}

fn default_assertion_retry_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            source_connection: default_source_connection(),
            derived_connection: default_derived_connection(),
            source_cluster_name: default_source_cluster_name(),
            derived_cluster_name: default_derived_cluster_name(),
            source_migration_dir: None,
            derived_migration_dir: None,
            workers: default_workers(),
            load_workers: default_load_workers(),
            assertion_timeout: default_assertion_timeout(),
            query_timeout: default_query_timeout(),
            sync_max_wait: default_sync_max_wait(),
            sync_poll_interval: default_sync_poll_interval(),
            force_rebuild: false,
            schema_migrations_prefix: default_schema_migrations_prefix(),
            replication_queue_table: default_replication_queue_table(),
            max_sessions: default_max_sessions(),
            assertion_max_retries: 0,
            assertion_retry_delay: default_assertion_retry_delay(),
            safe_hostnames: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a directory
    /// Looks for harness.yml or harness.yaml
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        let yml_path = dir.join("harness.yml");
        let yaml_path = dir.join("harness.yaml");

        if yml_path.exists() {
            Self::load(&yml_path)
        } else if yaml_path.exists() {
            Self::load(&yaml_path)
        } else {
            Err(CoreError::ConfigNotFound {
                path: yml_path.display().to_string(),
            })
        }
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        let config: HarnessConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.source_connection.trim().is_empty() {
            return Err(invalid("source_connection cannot be empty"));
        }
        if self.derived_connection.trim().is_empty() {
            return Err(invalid("derived_connection cannot be empty"));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if self.load_workers == 0 {
            return Err(invalid("load_workers must be at least 1"));
        }
        if self.max_sessions == 0 {
            return Err(invalid("max_sessions must be at least 1"));
        }
        for (field, value) in [
            ("assertion_timeout", self.assertion_timeout),
            ("query_timeout", self.query_timeout),
            ("sync_max_wait", self.sync_max_wait),
            ("sync_poll_interval", self.sync_poll_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{field} must be greater than zero")));
            }
        }
        if self.sync_poll_interval > self.sync_max_wait {
            return Err(invalid("sync_poll_interval must not exceed sync_max_wait"));
        }
        if self.schema_migrations_prefix.is_empty() {
            return Err(invalid("schema_migrations_prefix cannot be empty"));
        }
        if self.replication_queue_table.trim().is_empty() {
            return Err(invalid("replication_queue_table cannot be empty"));
        }
        Ok(())
    }

    /// Name of the migration state table kept in `default` for `database`
    pub fn migrations_table(&self, database: &str) -> String {
        format!("{}{}", self.schema_migrations_prefix, database)
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::ConfigInvalid {
        message: message.to_string(),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
