//! The opaque span-processing sink that reconstructed traces are
//! re-injected into. Out of scope per the core's design: this module only
//! defines the contract `PeerFanOut` calls through.

use crate::core::{Result, Span};
use async_trait::async_trait;

/// Transport the batch is reported as having arrived over, mirroring the
/// options struct the upstream span-processing pipeline expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTransport {
    /// Reconstructed via the tail-based-sampling gRPC fan-out.
    Grpc,
}

/// Wire format the batch is reported as having arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanFormat {
    /// Protobuf-encoded spans (the only format the fan-out produces).
    Proto,
}

/// Options accompanying a reconstructed batch, so the sink can attribute
/// it correctly in its own metrics/logging.
#[derive(Debug, Clone, Copy)]
pub struct SpansOptions {
    /// How the batch arrived.
    pub inbound_transport: InboundTransport,
    /// What format the batch arrived in.
    pub span_format: SpanFormat,
}

impl Default for SpansOptions {
    fn default() -> Self {
        Self { inbound_transport: InboundTransport::Grpc, span_format: SpanFormat::Proto }
    }
}

/// The opaque span-processing pipeline `PeerFanOut` re-injects
/// reconstructed traces into. Implementations live outside the tail-based
/// sampling core; this crate only defines the contract.
#[async_trait]
pub trait ProcessingSink: Send + Sync {
    /// Accepts a reconstructed batch of spans.
    async fn process_spans(&self, batch: Vec<Span>, options: SpansOptions) -> Result<()>;
}

/// A sink that logs every batch it receives and otherwise discards it.
/// Useful as the default wiring for the collector binary until a real
/// storage/export pipeline is plugged in.
pub struct LoggingSink;

#[async_trait]
impl ProcessingSink for LoggingSink {
    async fn process_spans(&self, batch: Vec<Span>, options: SpansOptions) -> Result<()> {
        tracing::info!(
            count = batch.len(),
            transport = ?options.inbound_transport,
            format = ?options.span_format,
            "processing reconstructed span batch"
        );
        Ok(())
    }
}
