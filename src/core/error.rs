use thiserror::Error;

/// Error kinds produced by the tail-based sampling core.
#[derive(Error, Debug)]
pub enum TailSampleError {
    /// Fatal at startup: bad TLS material, unusable listen address, bad config.
    #[error("configuration error: {0}")]
    Config(String),

    /// `GetTrace` found no buffered spans for the requested trace ID.
    #[error("trace not found: {0}")]
    TraceNotFound(String),

    /// Network, TLS handshake, or stream send/receive failure.
    #[error("transport error: {0}")]
    Network(String),

    /// The processing sink rejected a reconstructed batch.
    #[error("processing sink rejected batch: {0}")]
    ProcessingSink(String),

    /// `tag.services.ips` had fewer than two comma-separated elements.
    #[error("malformed services-ips tag: {0}")]
    MalformedTag(String),

    /// Span failed basic validation (missing trace/span id, etc).
    #[error("invalid span: {0}")]
    InvalidSpan(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("grpc error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("channel send error")]
    ChannelSend,

    #[error("channel receive error")]
    ChannelReceive,

    #[error("timeout: operation took longer than {timeout_ms}ms")]
    Timeout {
        /// Configured timeout, in milliseconds.
        timeout_ms: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Result type alias for tail-based sampling core operations.
pub type Result<T> = std::result::Result<T, TailSampleError>;

impl TailSampleError {
    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network/transport error.
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Returns true if the error represents a transient condition worth
    /// retrying (used by the peer fan-out's retry policy).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Timeout { .. } => true,
            Self::ChannelSend | Self::ChannelReceive => true,
            Self::Grpc(status) => {
                matches!(status.code(), tonic::Code::Unavailable | tonic::Code::DeadlineExceeded)
            },
            _ => false,
        }
    }

    /// Returns a short category label for structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::TraceNotFound(_) => "not_found",
            Self::Network(_) | Self::Grpc(_) => "network",
            Self::ProcessingSink(_) => "sink",
            Self::MalformedTag(_) => "malformed_tag",
            Self::InvalidSpan(_) => "validation",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
            Self::ChannelSend | Self::ChannelReceive => "channel",
            Self::Timeout { .. } => "timeout",
            Self::Serialization(_) => "serialization",
        }
    }
}
