//! Node configuration for the Flows indexer.
//!
//! [`NodeConfig`] has defaults for every field. [`NodeConfig::load`] layers
//! an optional TOML file and `FLOWS_*` environment variables on top of
//! them; the binary applies its CLI flags last.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use flows_core::constants::{DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_RPC_PORT};
use flows_core::error::FlowsError;
use flows_engine::EngineConfig;

/// Environment variable prefix. Nested keys use `__`, e.g.
/// `FLOWS_ENGINE__BATCH_ALLOCATIONS=false`.
pub const ENV_PREFIX: &str = "FLOWS";

/// Configuration for an indexing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "flows_engine=debug").
    pub log_level: String,
    /// Newline-delimited JSON event log. `None` reads stdin.
    pub events_path: Option<PathBuf>,
    /// HTTP gateway for `ipfs://` metadata URIs. `None` disables resolution.
    pub metadata_gateway: Option<String>,
    pub metadata_timeout_secs: u64,
    /// Seconds between aggregate refreshes.
    pub refresh_interval_secs: u64,
    pub engine: EngineConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flows");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            events_path: None,
            metadata_gateway: None,
            metadata_timeout_secs: 10,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            engine: EngineConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load defaults, then `file` (if given), then `FLOWS_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, FlowsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<NodeConfig>())
            .map_err(|e| FlowsError::Config(e.to_string()))
    }

    /// Path to the RocksDB index directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("indexdata")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}
