//! Flows indexer binary.
//!
//! Reduces a newline-delimited stream of decoded chain events into RocksDB,
//! keeps grant flow rates consistent block by block, and serves the indexed
//! state over JSON-RPC.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

use flows_node_lib::metadata::{HttpMetadataResolver, MetadataResolver, NullResolver};
use flows_node_lib::{start_rpc_server, Node, NodeConfig};

/// Flows indexer: flow-rate propagation for recurring-payment budget trees.
#[derive(Parser, Debug)]
#[command(name = "flows-indexer", version, about = "Flows event indexer with RocksDB storage and JSON-RPC server")]
struct Args {
    /// TOML config file. `FLOWS_*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for index storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Event log to ingest ("-" for stdin)
    #[arg(long)]
    events: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// HTTP gateway for ipfs:// metadata URIs
    #[arg(long)]
    metadata_gateway: Option<String>,

    /// Run recomputes immediately on every allocation instead of batching per commit
    #[arg(long)]
    no_batch_allocations: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Exit once the event log is drained instead of serving RPC until Ctrl+C
    #[arg(long)]
    exit_on_eof: bool,
}

impl Args {
    /// Layer CLI flags over the file/environment configuration.
    fn into_config(self) -> Result<(NodeConfig, String, bool)> {
        let mut config = NodeConfig::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(events) = self.events {
            config.events_path = Some(events);
        }
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(gateway) = self.metadata_gateway {
            config.metadata_gateway = Some(gateway);
        }
        if self.no_batch_allocations {
            config.engine.batch_allocations = false;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok((config, self.log_format, self.exit_on_eof))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, log_format, exit_on_eof) = Args::parse().into_config()?;
    init_logging(&config.log_level, &log_format);

    info!("Flows indexer v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!(
        batch_allocations = config.engine.batch_allocations,
        freshness_window_secs = config.engine.freshness_window_secs,
        "engine configured"
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data_dir {}", config.data_dir.display()))?;

    let resolver: Arc<dyn MetadataResolver> = match &config.metadata_gateway {
        Some(gateway) => {
            info!("metadata gateway: {gateway}");
            Arc::new(HttpMetadataResolver::new(
                gateway,
                Duration::from_secs(config.metadata_timeout_secs),
            )?)
        }
        None => Arc::new(NullResolver),
    };

    let node = Node::new(config.clone(), resolver).context("opening index")?;
    let rpc_handle = start_rpc_server(&config.rpc_addr(), Arc::clone(&node)).await?;
    info!("RPC server listening on {}", config.rpc_addr());

    let refresh = tokio::spawn(Arc::clone(&node).run_refresh());

    let driver = {
        let node = Arc::clone(&node);
        let source = config.events_path.clone();
        async move {
            let reader = open_source(source.as_ref()).await?;
            let stats = node.ingest(reader).await?;
            anyhow::Ok(stats)
        }
    };

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down...");
    };
    tokio::pin!(shutdown_signal);

    let mut failed = None;
    tokio::select! {
        result = driver => match result {
            Ok(stats) => {
                info!(blocks = stats.blocks, events = stats.events, "event log drained");
                if !exit_on_eof {
                    info!("serving RPC (Ctrl+C to stop)");
                    (&mut shutdown_signal).await;
                }
            }
            Err(e) => {
                error!("indexing stopped: {e:#}");
                failed = Some(e);
            }
        },
        _ = &mut shutdown_signal => {}
    }

    refresh.abort();
    rpc_handle.stop().ok();
    info!("RPC server stopped");
    info!("Flows indexer shutdown complete");

    match failed {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn open_source(path: Option<&PathBuf>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            let file = tokio::fs::File::open(p)
                .await
                .with_context(|| format!("opening event log {}", p.display()))?;
            info!("reading events from {}", p.display());
            Ok(Box::new(BufReader::new(file)))
        }
        _ => {
            info!("reading events from stdin");
            Ok(Box::new(BufReader::new(tokio::io::stdin())))
        }
    }
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
