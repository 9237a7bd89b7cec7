//! Bridge configuration structures.
//!
//! These structures define every tunable of an engine bridge: buffer sizes,
//! protocol limits, and the identity the engine is initialized with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_COMPACTION_THRESHOLD, DEFAULT_DR_BUFFER_SIZE, DEFAULT_ERROR_BUFFER_SIZE,
    DEFAULT_MAX_TABLE_SIZE, DEFAULT_REQUEST_BUFFER_SIZE, DEFAULT_RESPONSE_BUFFER_SIZE,
    DEFAULT_TEMP_TABLE_MEMORY_MB, MAX_BUFFER_CAPACITY, RESPONSE_HEADER_SIZE,
};
use crate::error::ConfigError;
use crate::types::{ClusterId, PartitionId};

/// Main bridge configuration.
///
/// # Example
///
/// ```rust
/// use ee_common::config::BridgeConfig;
///
/// let config = BridgeConfig::default().with_request_buffer_size(64 * 1024);
/// assert_eq!(config.request_buffer_size, 64 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Initial capacity of the request buffer. It grows on demand.
    #[serde(default = "default_request_buffer_size")]
    pub request_buffer_size: usize,

    /// Capacity of the response buffer.
    #[serde(default = "default_response_buffer_size")]
    pub response_buffer_size: usize,

    /// Capacity of the error buffer.
    #[serde(default = "default_error_buffer_size")]
    pub error_buffer_size: usize,

    /// Largest request the encoder will ever grow the request buffer to.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    /// Hard limit on the size of a single result table.
    #[serde(default = "default_max_table_size")]
    pub max_table_size: usize,

    /// Identity the engine is initialized with.
    #[serde(default)]
    pub engine: EngineIdentity,
}

fn default_request_buffer_size() -> usize {
    DEFAULT_REQUEST_BUFFER_SIZE
}

fn default_response_buffer_size() -> usize {
    DEFAULT_RESPONSE_BUFFER_SIZE
}

fn default_error_buffer_size() -> usize {
    DEFAULT_ERROR_BUFFER_SIZE
}

fn default_max_request_size() -> usize {
    MAX_BUFFER_CAPACITY
}

fn default_max_table_size() -> usize {
    DEFAULT_MAX_TABLE_SIZE
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_buffer_size: default_request_buffer_size(),
            response_buffer_size: default_response_buffer_size(),
            error_buffer_size: default_error_buffer_size(),
            max_request_size: default_max_request_size(),
            max_table_size: default_max_table_size(),
            engine: EngineIdentity::default(),
        }
    }
}

impl BridgeConfig {
    /// Creates a configuration with small buffers for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_buffer_size: 4 * 1024,
            response_buffer_size: 1024 * 1024,
            error_buffer_size: 64 * 1024,
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be rendered or written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Converts configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be rendered.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Sets the initial request buffer size.
    #[must_use]
    pub fn with_request_buffer_size(mut self, size: usize) -> Self {
        self.request_buffer_size = size;
        self
    }

    /// Sets the response buffer size.
    #[must_use]
    pub fn with_response_buffer_size(mut self, size: usize) -> Self {
        self.response_buffer_size = size;
        self
    }

    /// Sets the error buffer size.
    #[must_use]
    pub fn with_error_buffer_size(mut self, size: usize) -> Self {
        self.error_buffer_size = size;
        self
    }

    /// Sets the largest request the encoder accepts.
    #[must_use]
    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    /// Sets the result table size limit.
    #[must_use]
    pub fn with_max_table_size(mut self, size: usize) -> Self {
        self.max_table_size = size;
        self
    }

    /// Sets the engine identity.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineIdentity) -> Self {
        self.engine = engine;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_buffer_size == 0 {
            return Err(ConfigError::invalid("request_buffer_size must be > 0"));
        }
        if self.response_buffer_size < RESPONSE_HEADER_SIZE {
            return Err(ConfigError::invalid(format!(
                "response_buffer_size must be at least {RESPONSE_HEADER_SIZE} bytes"
            )));
        }
        if self.error_buffer_size < 4 {
            return Err(ConfigError::invalid("error_buffer_size must be at least 4 bytes"));
        }
        for (name, size) in [
            ("request_buffer_size", self.request_buffer_size),
            ("response_buffer_size", self.response_buffer_size),
            ("error_buffer_size", self.error_buffer_size),
            ("max_request_size", self.max_request_size),
        ] {
            if size > MAX_BUFFER_CAPACITY {
                return Err(ConfigError::invalid(format!(
                    "{name} must be at most {MAX_BUFFER_CAPACITY} bytes"
                )));
            }
        }
        if self.max_request_size < self.request_buffer_size {
            return Err(ConfigError::invalid(
                "max_request_size must be at least request_buffer_size",
            ));
        }
        if self.max_table_size == 0 {
            return Err(ConfigError::invalid("max_table_size must be > 0"));
        }
        self.engine.validate()
    }
}

/// Identity and tuning an engine instance is initialized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineIdentity {
    /// Index of the cluster in the catalog.
    #[serde(default)]
    pub cluster_index: i32,

    /// Execution site id.
    #[serde(default)]
    pub site_id: i64,

    /// Partition owned by the site.
    #[serde(default = "default_partition_id")]
    pub partition_id: PartitionId,

    /// Host the site runs on.
    #[serde(default)]
    pub host_id: i32,

    /// Host name, used in engine log output.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Cluster id used for replication.
    #[serde(default = "default_dr_cluster_id")]
    pub dr_cluster_id: ClusterId,

    /// Default buffer size of the replication stream.
    #[serde(default = "default_dr_buffer_size")]
    pub default_dr_buffer_size: usize,

    /// Memory limit for temporary tables in megabytes.
    #[serde(default = "default_temp_table_memory_mb")]
    pub temp_table_memory_mb: usize,

    /// Whether the engine creates a stream for replicated tables.
    #[serde(default)]
    pub create_dr_replicated_stream: bool,

    /// Table block compaction threshold in percent (0-99, 0 disables).
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: u8,
}

fn default_partition_id() -> PartitionId {
    PartitionId::new(0)
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_dr_cluster_id() -> ClusterId {
    ClusterId::new(0)
}

fn default_dr_buffer_size() -> usize {
    DEFAULT_DR_BUFFER_SIZE
}

fn default_temp_table_memory_mb() -> usize {
    DEFAULT_TEMP_TABLE_MEMORY_MB
}

fn default_compaction_threshold() -> u8 {
    DEFAULT_COMPACTION_THRESHOLD
}

impl Default for EngineIdentity {
    fn default() -> Self {
        Self {
            cluster_index: 0,
            site_id: 0,
            partition_id: default_partition_id(),
            host_id: 0,
            hostname: default_hostname(),
            dr_cluster_id: default_dr_cluster_id(),
            default_dr_buffer_size: default_dr_buffer_size(),
            temp_table_memory_mb: default_temp_table_memory_mb(),
            create_dr_replicated_stream: false,
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

impl EngineIdentity {
    /// Creates an identity for the given site and partition.
    #[must_use]
    pub fn new(site_id: i64, partition_id: PartitionId) -> Self {
        Self {
            site_id,
            partition_id,
            ..Self::default()
        }
    }

    /// Returns the temp table memory limit in bytes.
    #[must_use]
    pub fn temp_table_memory_bytes(&self) -> usize {
        self.temp_table_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Validates the identity.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the compaction threshold is out of
    /// range or the partition id is negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compaction_threshold > 99 {
            return Err(ConfigError::invalid(format!(
                "compaction_threshold {} is not valid, must be between 0 and 99",
                self.compaction_threshold
            )));
        }
        if self.partition_id.as_i32() < 0 {
            return Err(ConfigError::invalid("partition_id must not be negative"));
        }
        Ok(())
    }
}
