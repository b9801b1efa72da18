//! Command-line interfaces for the two tail-based sampling binaries.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, Result, TailSampleError};
use clap::Parser;
use std::path::PathBuf;

/// Shared config/logging loading behind both binaries' CLIs.
async fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    let mut builder = ConfigBuilder::new();

    let path = match config_path {
        Some(path) => Some(path.clone()),
        None => {
            let default_path = dirs::config_dir().map(|d| d.join("tailsample").join("config.yaml"));
            default_path.filter(|p| p.exists())
        },
    };

    if let Some(path) = path {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                tracing::info!(?path, "loaded configuration file");
            },
            Err(e) if config_path.is_some() => {
                return Err(TailSampleError::config(format!("failed to read config file {path:?}: {e}")));
            },
            Err(_) => {
                tracing::debug!(?path, "no config file found, using defaults");
            },
        }
    }

    builder.from_env().build()
}

/// Initializes `tracing` logging per [`crate::core::config::LoggingConfig`].
fn init_logging(config: &crate::core::config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| TailSampleError::config(format!("failed to initialize logging: {e}")))?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| TailSampleError::config(format!("failed to initialize logging: {e}")))?;
    }

    Ok(())
}

/// Runs an agent process: buffers spans and serves `RetrievalService`.
#[derive(Parser, Debug)]
#[command(name = "tailsample-agent")]
#[command(version, about, long_about = None)]
pub struct AgentCli {
    /// Configuration file path (default: `~/.config/tailsample/config.yaml`).
    #[arg(short, long, env = "TAILSAMPLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the `RetrievalService` listen port.
    #[arg(long, env = "TAILSAMPLE_AGENT_GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// Override the `WindowBuffer` window size, in seconds.
    #[arg(long, env = "TAILSAMPLE_WINDOW_SECONDS")]
    pub window_seconds: Option<u64>,

    /// Validate configuration and exit.
    #[arg(long)]
    pub check_config: bool,
}

impl AgentCli {
    /// Parses arguments from `std::env::args`.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Runs the agent binary's `main`.
pub async fn run_agent(cli: AgentCli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref()).await?;
    init_logging(&config.logging)?;

    if let Some(port) = cli.grpc_port {
        config.agent.grpc_port = port;
    }
    if let Some(secs) = cli.window_seconds {
        config.agent.window_seconds = secs;
    }
    config.validate()?;

    if cli.check_config {
        println!("configuration is valid");
        println!("  agent grpc_port: {}", config.agent.grpc_port);
        println!("  agent window_seconds: {}", config.agent.window_seconds);
        return Ok(());
    }

    tracing::info!(
        grpc_port = config.agent.grpc_port,
        ingest_port = config.agent.ingest_grpc_port,
        window_seconds = config.agent.window_seconds,
        "starting tail-based sampling agent"
    );

    crate::AgentRuntime::new(config.agent)?.run().await
}

/// Runs a collector process: detects self-errors and fans out to peers.
#[derive(Parser, Debug)]
#[command(name = "tailsample-collector")]
#[command(version, about, long_about = None)]
pub struct CollectorCli {
    /// Configuration file path (default: `~/.config/tailsample/config.yaml`).
    #[arg(short, long, env = "TAILSAMPLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the normal-path ingest listen port.
    #[arg(long, env = "TAILSAMPLE_COLLECTOR_GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// Override the max per-call peer retry count.
    #[arg(long)]
    pub retry_max: Option<u32>,

    /// Validate configuration and exit.
    #[arg(long)]
    pub check_config: bool,
}

impl CollectorCli {
    /// Parses arguments from `std::env::args`.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Runs the collector binary's `main`.
pub async fn run_collector(cli: CollectorCli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref()).await?;
    init_logging(&config.logging)?;

    if let Some(port) = cli.grpc_port {
        config.collector.grpc_port = port;
    }
    if let Some(retries) = cli.retry_max {
        config.collector.retry_max = retries;
    }
    config.validate()?;

    if cli.check_config {
        println!("configuration is valid");
        println!("  collector grpc_port: {}", config.collector.grpc_port);
        println!("  collector retry_max: {}", config.collector.retry_max);
        println!("  collector max_hops: {}", config.collector.max_hops);
        return Ok(());
    }

    tracing::info!(
        grpc_port = config.collector.grpc_port,
        retry_max = config.collector.retry_max,
        max_hops = config.collector.max_hops,
        "starting tail-based sampling collector"
    );

    crate::CollectorRuntime::new(config.collector).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_cli_defaults() {
        let cli = AgentCli { config: None, grpc_port: None, window_seconds: None, check_config: false };
        assert!(cli.grpc_port.is_none());
    }

    #[test]
    fn test_collector_cli_defaults() {
        let cli = CollectorCli { config: None, grpc_port: None, retry_max: None, check_config: false };
        assert!(cli.retry_max.is_none());
    }

    #[tokio::test]
    async fn test_load_config_reads_yaml_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(
            &path,
            r#"
agent:
  open: true
  reporter_type: grpc
  bind_address: "127.0.0.1"
  grpc_port: 7001
  window_seconds: 20
collector:
  open: true
  bind_address: "127.0.0.1"
  grpc_port: 7002
  retry_max: 3
  max_hops: 8
  request_channel_capacity: 512
"#,
        )
        .await
        .unwrap();

        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config.agent.grpc_port, 7001);
        assert_eq!(config.agent.window_seconds, 20);
        assert_eq!(config.collector.retry_max, 3);
    }

    #[tokio::test]
    async fn test_load_config_reports_error_for_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.yaml");
        let err = load_config(Some(&missing)).await.unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
