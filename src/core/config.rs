//! Configuration for the tail-based sampling agent and collector roles.
//!
//! Supports YAML file loading, environment variable overrides
//! (`TAILSAMPLE_*`), and CLI argument overrides, with the same precedence
//! order end to end: CLI > env > file > defaults.

use crate::core::error::{Result, TailSampleError};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for either binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent-side (`reporter.tail-based-sampling.*`) configuration.
    pub agent: AgentConfig,
    /// Collector-side (`collector.tail-based-sampling.*`) configuration.
    pub collector: CollectorConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Agent-side reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Master switch for the agent-side sampling subsystem
    /// (`reporter.tail-based-sampling.open`).
    pub open: bool,
    /// Upstream reporter implementation, opaque to the core
    /// (`reporter.type`, default `grpc`).
    pub reporter_type: String,
    /// Bind address for the `RetrievalService` gRPC listener.
    pub bind_address: IpAddr,
    /// Port for the `RetrievalService` gRPC listener.
    pub grpc_port: u16,
    /// Port for the normal-path span ingest receiver (application/forwarder
    /// -> agent leg). Distinct from `grpc_port` since both listeners run
    /// in the same process.
    pub ingest_grpc_port: u16,
    /// `WindowBuffer` window size in seconds (`W`).
    pub window_seconds: u64,
    /// Optional hard cap on buffered trace keys; when exceeded, the oldest
    /// keys are dropped and the drop is reported via the metric callback.
    pub max_buffered_traces: Option<usize>,
    /// Server TLS for the `RetrievalService`
    /// (`reporter.tail-based-sampling.grpc.*`).
    pub tls: TlsOptions,
}

/// Collector-side tail-based sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Master switch for the detection+fan-out subsystem
    /// (`collector.tail-based-sampling.open`).
    pub open: bool,
    /// Bind address for the normal-path span receiver.
    pub bind_address: IpAddr,
    /// Port for the normal-path span receiver.
    pub grpc_port: u16,
    /// Max per-call retry count for peer RPCs
    /// (`collector.tail-based-sampling.grpc.retry.max`, default 3).
    pub retry_max: u32,
    /// Dial timeout for opening a new peer connection.
    #[serde(with = "humantime_serde")]
    pub peer_dial_timeout: Duration,
    /// Per-call deadline attached to every peer RPC (§9: implementers MUST
    /// attach one; the source has none).
    #[serde(with = "humantime_serde")]
    pub peer_call_deadline: Duration,
    /// Maximum downstream hop count before the walk is aborted (§9:
    /// implementers MUST cap this; recommended 32).
    pub max_hops: usize,
    /// Capacity of the bounded request channel feeding `PeerFanOut`.
    pub request_channel_capacity: usize,
    /// Client TLS for outbound peer calls
    /// (`collector.tail-based-sampling.grpc.*`).
    pub tls: TlsOptions,
}

/// TLS options, consumed opaquely: the core only decides whether to wrap
/// the transport, never inspects certificate contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Whether TLS is enabled for this listener/dialer.
    pub enabled: bool,
    /// Server certificate path.
    pub cert_path: Option<PathBuf>,
    /// Server private key path.
    pub key_path: Option<PathBuf>,
    /// Client CA bundle path, for verifying peer certificates.
    pub client_ca_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter.
    pub level: LogLevel,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json: bool,
}

/// Log levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to a `tracing_subscriber::EnvFilter` directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Default agent gRPC port, derived from the tail-based-sampling slot in
/// the internal ports registry (spec.md §6: "a default port derived from
/// the ports registry for tail-based-sampling gRPC").
pub const DEFAULT_AGENT_GRPC_PORT: u16 = 14271;

/// Default collector normal-path ingestion port.
pub const DEFAULT_COLLECTOR_GRPC_PORT: u16 = 14250;

/// Default agent normal-path ingestion port (application/forwarder ->
/// agent), distinct from the `RetrievalService` port.
pub const DEFAULT_AGENT_INGEST_GRPC_PORT: u16 = 4317;

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig::default(),
            collector: CollectorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            open: true,
            reporter_type: "grpc".to_string(),
            bind_address: "0.0.0.0".parse().expect("valid default IP address"),
            grpc_port: DEFAULT_AGENT_GRPC_PORT,
            ingest_grpc_port: DEFAULT_AGENT_INGEST_GRPC_PORT,
            window_seconds: 60,
            max_buffered_traces: None,
            tls: TlsOptions::default(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            open: true,
            bind_address: "0.0.0.0".parse().expect("valid default IP address"),
            grpc_port: DEFAULT_COLLECTOR_GRPC_PORT,
            retry_max: 3,
            peer_dial_timeout: Duration::from_secs(2),
            peer_call_deadline: Duration::from_secs(5),
            max_hops: 32,
            request_channel_capacity: 10_240,
            tls: TlsOptions::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            json: false,
        }
    }
}

impl Config {
    /// Creates a new config with defaults, validated.
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.agent.window_seconds == 0 {
            return Err(TailSampleError::config("agent.window_seconds must be > 0"));
        }
        if self.collector.max_hops == 0 {
            return Err(TailSampleError::config("collector.max_hops must be > 0"));
        }
        if self.collector.request_channel_capacity == 0 {
            return Err(TailSampleError::config("collector.request_channel_capacity must be > 0"));
        }
        if self.agent.tls.enabled && (self.agent.tls.cert_path.is_none() || self.agent.tls.key_path.is_none()) {
            return Err(TailSampleError::config(
                "agent.tls.enabled requires cert_path and key_path",
            ));
        }
        if self.collector.tls.enabled && self.collector.tls.client_ca_path.is_none() {
            return Err(TailSampleError::config(
                "collector.tls.enabled requires client_ca_path to verify agents",
            ));
        }
        Ok(())
    }
}

/// Builder for programmatic / layered configuration construction.
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Creates a new builder seeded with defaults.
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Loads configuration from a YAML string, replacing the current state.
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)?;
        Ok(self)
    }

    /// Applies `TAILSAMPLE_*` environment variable overrides.
    pub fn from_env(mut self) -> Self {
        if let Ok(v) = std::env::var("TAILSAMPLE_AGENT_GRPC_PORT") {
            if let Ok(port) = v.parse() {
                self.config.agent.grpc_port = port;
            }
        }
        if let Ok(v) = std::env::var("TAILSAMPLE_COLLECTOR_GRPC_PORT") {
            if let Ok(port) = v.parse() {
                self.config.collector.grpc_port = port;
            }
        }
        if let Ok(v) = std::env::var("TAILSAMPLE_WINDOW_SECONDS") {
            if let Ok(secs) = v.parse() {
                self.config.agent.window_seconds = secs;
            }
        }
        self
    }

    /// Overrides the agent gRPC port.
    pub fn agent_grpc_port(mut self, port: u16) -> Self {
        self.config.agent.grpc_port = port;
        self
    }

    /// Overrides the collector gRPC port.
    pub fn collector_grpc_port(mut self, port: u16) -> Self {
        self.config.collector.grpc_port = port;
        self
    }

    /// Overrides the window size in seconds.
    pub fn window_seconds(mut self, secs: u64) -> Self {
        self.config.agent.window_seconds = secs;
        self
    }

    /// Overrides the max per-call peer retry count.
    pub fn retry_max(mut self, retries: u32) -> Self {
        self.config.collector.retry_max = retries;
        self
    }

    /// Finishes building, validating the result.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
