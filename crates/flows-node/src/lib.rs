//! # flows-node: Persistent indexing node.
//!
//! Wires the flows engine to durable storage and the outside world:
//! - [`storage::RocksStore`]: `FlowStore` backed by RocksDB column families
//! - [`node::Node`]: block-atomic driver over a stream of decoded events
//! - [`metadata`]: off-chain metadata resolution before events are applied
//! - [`rpc`]: read-only JSON-RPC over indexed state
//! - [`config::NodeConfig`]: node configuration

pub mod config;
pub mod metadata;
pub mod node;
pub mod rpc;
pub mod storage;

pub use config::NodeConfig;
pub use node::Node;
pub use rpc::start_rpc_server;
pub use storage::RocksStore;
