//! Engine configuration structures.
//!
//! One `EngineConfig` describes one partition's engine instance: where it
//! sits in the cluster, how tables are laid out in memory, and which
//! storage backend handles eviction, saved tables and log records.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ROWS_PER_BLOCK, DEFAULT_TEMP_TABLE_BYTES_PER_NODE, MAX_BATCH_COUNT, MAX_PARAM_COUNT,
};

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Keep evicted blocks, saved tables and log records in memory.
    Memory,
    /// Write evicted blocks and saved tables under a directory.
    File {
        /// Root directory of the backend.
        dir: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cluster index.
    #[serde(default)]
    pub cluster_index: i32,

    /// Site id of this engine.
    #[serde(default)]
    pub site_id: i32,

    /// Partition id owned by this engine.
    #[serde(default)]
    pub partition_id: i32,

    /// Host id.
    #[serde(default)]
    pub host_id: i32,

    /// Hostname, used in stats rows and logs.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Total number of partitions in the cluster.
    #[serde(default = "default_total_partitions")]
    pub total_partitions: i32,

    /// Tuple slots per table block.
    #[serde(default = "default_rows_per_block")]
    pub rows_per_block: usize,

    /// Temp-table memory allotted per plan node.
    #[serde(default = "default_temp_table_bytes")]
    pub temp_table_bytes_per_node: usize,

    /// Emit a log record into the log buffer for each undo-logged mutation.
    #[serde(default)]
    pub log_records: bool,

    /// Maximum parameters per fragment.
    #[serde(default = "default_max_params")]
    pub max_params: usize,

    /// Maximum fragments per batch.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Storage backend.
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_total_partitions() -> i32 {
    1
}

fn default_rows_per_block() -> usize {
    DEFAULT_ROWS_PER_BLOCK
}

fn default_temp_table_bytes() -> usize {
    DEFAULT_TEMP_TABLE_BYTES_PER_NODE
}

fn default_max_params() -> usize {
    MAX_PARAM_COUNT
}

fn default_max_batch() -> usize {
    MAX_BATCH_COUNT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_index: 0,
            site_id: 0,
            partition_id: 0,
            host_id: 0,
            hostname: default_hostname(),
            total_partitions: default_total_partitions(),
            rows_per_block: default_rows_per_block(),
            temp_table_bytes_per_node: default_temp_table_bytes(),
            log_records: false,
            max_params: default_max_params(),
            max_batch: default_max_batch(),
            backend: BackendConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks the values that would make the engine unusable.
    pub fn validate(&self) -> Result<()> {
        if self.rows_per_block == 0 {
            bail!("rows_per_block must be greater than zero");
        }
        if self.total_partitions <= 0 {
            bail!("total_partitions must be positive, got {}", self.total_partitions);
        }
        if self.partition_id < 0 || self.partition_id >= self.total_partitions {
            bail!(
                "partition_id {} outside of 0..{}",
                self.partition_id,
                self.total_partitions
            );
        }
        if self.max_params == 0 || self.max_batch == 0 {
            bail!("max_params and max_batch must be greater than zero");
        }
        Ok(())
    }

    /// Creates a builder for configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for engine configuration.
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition id.
    pub fn partition_id(mut self, id: i32) -> Self {
        self.config.partition_id = id;
        self
    }

    /// Sets the total partition count.
    pub fn total_partitions(mut self, count: i32) -> Self {
        self.config.total_partitions = count;
        self
    }

    /// Sets the site id.
    pub fn site_id(mut self, id: i32) -> Self {
        self.config.site_id = id;
        self
    }

    /// Sets the hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// Sets tuple slots per block.
    pub fn rows_per_block(mut self, rows: usize) -> Self {
        self.config.rows_per_block = rows;
        self
    }

    /// Sets the temp-table memory per plan node.
    pub fn temp_table_bytes_per_node(mut self, bytes: usize) -> Self {
        self.config.temp_table_bytes_per_node = bytes;
        self
    }

    /// Enables log records.
    pub fn log_records(mut self, enabled: bool) -> Self {
        self.config.log_records = enabled;
        self
    }

    /// Selects the storage backend.
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
