//! peerlink daemon: entry point for running an overlay node.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use peerlink_node::{init_logging, LogFormat, NodeConfig, PeerlinkNode};

#[derive(Parser)]
#[command(name = "peerlink-daemon", about = "peerlink validator overlay daemon")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base; flags
    /// and environment variables override them.
    #[arg(long, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Network passphrase; peers on other networks are refused.
    #[arg(long, env = "PEERLINK_NETWORK_PASSPHRASE")]
    network_passphrase: Option<String>,

    /// Address to listen on.
    #[arg(long, env = "PEERLINK_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Port for peer connections.
    #[arg(long, env = "PEERLINK_PEER_PORT")]
    port: Option<u16>,

    /// Peers to dial (comma-separated: "1.2.3.4:11625,5.6.7.8:11625").
    #[arg(long, env = "PEERLINK_KNOWN_PEERS", value_delimiter = ',')]
    known_peers: Vec<String>,

    /// Hex-encoded 32-byte identity seed.
    #[arg(long, env = "PEERLINK_NODE_SEED")]
    node_seed: Option<String>,

    /// Maximum authenticated peers.
    #[arg(long, env = "PEERLINK_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Log a periodic metrics snapshot.
    #[arg(long, env = "PEERLINK_ENABLE_METRICS")]
    metrics: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "PEERLINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "PEERLINK_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the effective configuration as TOML.
    #[command(name = "config")]
    Config,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
    /// Print the node id derived from the configured seed.
    Id,
}

impl Cli {
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str::<NodeConfig>(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => NodeConfig::default(),
        };

        if let Some(passphrase) = &self.network_passphrase {
            config.network_passphrase = passphrase.clone();
        }
        if let Some(address) = &self.listen_address {
            config.listen_address = address.clone();
        }
        if let Some(port) = self.port {
            config.overlay.peer_port = port;
        }
        if !self.known_peers.is_empty() {
            config.known_peers = self.known_peers.clone();
        }
        if let Some(seed) = &self.node_seed {
            config.node_seed = Some(seed.clone());
        }
        if let Some(max) = self.max_peers {
            config.max_authenticated_peers = max;
        }
        config.enable_metrics |= self.metrics;
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string());
        }
        Command::Node {
            action: NodeAction::Id,
        } => {
            let keypair = config.node_keypair()?;
            println!("{}", keypair.public);
        }
        Command::Node {
            action: NodeAction::Run,
        } => {
            let format: LogFormat = config.log_format.parse()?;
            init_logging(format, &config.log_level)?;

            if config.node_seed.is_none() {
                tracing::warn!("no node_seed configured; using a fresh identity for this run");
            }
            if !config.known_peers.is_empty() {
                tracing::info!(peers = %config.known_peers.join(", "), "known peers");
            }

            let mut node = PeerlinkNode::new(config).await?;
            tracing::info!(
                node = %node.node_id(),
                listen = %node.local_addr(),
                "starting peerlink node"
            );
            node.start().await?;

            node.shutdown_controller().wait_for_signal().await;

            tracing::info!("shutdown signal received, stopping node");
            node.stop().await?;
            tracing::info!("peerlink daemon exited cleanly");
        }
    }

    Ok(())
}
