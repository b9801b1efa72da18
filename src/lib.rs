//! Tail-based sampling core for a distributed tracing pipeline.
//!
//! Two process roles share this crate. An **agent** buffers recently seen
//! spans in a [`buffer::WindowBuffer`] and serves them back to collectors
//! through [`agent::RetrievalService`]. A **collector** scans incoming
//! spans for a self-error marker ([`collector::error_detector`]) and, for
//! each match, reconstructs the full trace by fanning out to the peer
//! agents encoded in the span's `tag.services.ips` tag
//! ([`collector::peer_fanout`]).
//!
//! # Architecture
//!
//! - `core`: shared domain model (`Span`, `TraceId`, tags), configuration,
//!   errors, and retry/circuit-breaker utilities.
//! - `buffer`: the agent-side `WindowBuffer`.
//! - `agent`: the agent-side `RetrievalService` and normal-path receiver.
//! - `collector`: the collector-side `ErrorDetector`, `PeerFanOut`, peer
//!   connection pool, normal-path receiver, and processing-sink contract.
//! - `proto`: generated gRPC/protobuf code for the wire contracts above.
//! - `monitoring`: drop/failure counters for operating the subsystem.
//!
//! # Example
//!
//! ```no_run
//! use tailsample::core::Config;
//! use tailsample::AgentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let runtime = AgentRuntime::new(config.agent)?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod agent;
pub mod buffer;
pub mod cli;
pub mod collector;
pub mod core;
pub mod monitoring;
pub mod proto;

use crate::agent::{AgentIngestReceiver, RetrievalService};
use crate::buffer::WindowBuffer;
use crate::collector::error_detector::{Backpressure, ErrorDetector};
use crate::collector::peer_fanout::{FanOutConfig, PeerFanOut};
use crate::collector::sink::{LoggingSink, ProcessingSink};
use crate::collector::CollectorIngestReceiver;
use crate::core::config::{AgentConfig, CollectorConfig};
use crate::core::Result;
use crate::monitoring::SamplingStats;
use std::net::SocketAddr;
use std::sync::Arc;

/// Wires and runs the agent-side subsystem: a `WindowBuffer`, its
/// `RetrievalService`, and the normal-path ingest receiver that feeds it.
pub struct AgentRuntime {
    config: AgentConfig,
    buffer: Arc<WindowBuffer>,
    stats: Arc<SamplingStats>,
}

impl AgentRuntime {
    /// Builds the runtime. Does not bind any sockets yet.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let stats = Arc::new(SamplingStats::new());
        let drop_stats = stats.clone();
        let drop_callback: crate::buffer::DropCallback =
            Arc::new(move |n| drop_stats.record_buffer_drop(n as u64));
        let buffer = WindowBuffer::with_options(
            config.window_seconds,
            config.max_buffered_traces,
            Some(drop_callback),
        );
        Ok(Self { config, buffer, stats })
    }

    /// Returns the runtime's operational counters.
    pub fn stats(&self) -> Arc<SamplingStats> {
        self.stats.clone()
    }

    /// Runs the retrieval service and ingest receiver until a shutdown
    /// signal or a fatal transport error.
    pub async fn run(self) -> Result<()> {
        let retrieval_addr = SocketAddr::new(self.config.bind_address, self.config.grpc_port);
        let retrieval = RetrievalService::new(self.buffer.clone());
        let retrieval_handle = tokio::spawn(async move { retrieval.serve(retrieval_addr).await });

        let ingest_addr = SocketAddr::new(self.config.bind_address, self.config.ingest_grpc_port);
        let ingest = AgentIngestReceiver::new(self.buffer.clone());
        let ingest_handle = tokio::spawn(async move { ingest.serve(ingest_addr).await });

        tokio::select! {
            result = retrieval_handle => {
                result.map_err(crate::core::TailSampleError::from)??;
            }
            result = ingest_handle => {
                result.map_err(crate::core::TailSampleError::from)??;
            }
        }

        self.buffer.close();
        Ok(())
    }
}

/// Wires and runs the collector-side subsystem: the `ErrorDetector`, the
/// `PeerFanOut` engine, and the normal-path ingest receiver.
pub struct CollectorRuntime {
    config: CollectorConfig,
    sink: Arc<dyn ProcessingSink>,
    stats: Arc<SamplingStats>,
}

impl CollectorRuntime {
    /// Builds the runtime with a default logging sink. Use
    /// [`CollectorRuntime::with_sink`] to plug in a real processing
    /// pipeline.
    pub fn new(config: CollectorConfig) -> Self {
        Self { config, sink: Arc::new(LoggingSink), stats: Arc::new(SamplingStats::new()) }
    }

    /// Builds the runtime with a caller-supplied processing sink.
    pub fn with_sink(config: CollectorConfig, sink: Arc<dyn ProcessingSink>) -> Self {
        Self { config, sink, stats: Arc::new(SamplingStats::new()) }
    }

    /// Returns the runtime's operational counters.
    pub fn stats(&self) -> Arc<SamplingStats> {
        self.stats.clone()
    }

    /// Runs the ingest receiver and fan-out daemon until a shutdown signal
    /// or a fatal transport error.
    pub async fn run(self) -> Result<()> {
        let fanout_config = FanOutConfig {
            request_channel_capacity: self.config.request_channel_capacity,
            peer_dial_timeout: self.config.peer_dial_timeout,
            peer_call_deadline: self.config.peer_call_deadline,
            max_hops: self.config.max_hops,
            retry_max: self.config.retry_max,
        };
        let (_fanout, request_tx) =
            PeerFanOut::with_stats(self.sink.clone(), fanout_config, self.stats.clone());
        let detector =
            Arc::new(ErrorDetector::with_stats(request_tx, Backpressure::Blocking, self.stats.clone()));

        let ingest_addr = SocketAddr::new(self.config.bind_address, self.config.grpc_port);
        let ingest = CollectorIngestReceiver::new(detector, self.sink.clone());
        ingest.serve(ingest_addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AgentConfig;

    #[test]
    fn test_agent_runtime_builds() {
        let runtime = AgentRuntime::new(AgentConfig::default());
        assert!(runtime.is_ok());
    }

    #[test]
    fn test_collector_runtime_builds() {
        let runtime = CollectorRuntime::new(CollectorConfig::default());
        assert_eq!(runtime.config.max_hops, 32);
    }

    #[test]
    fn test_agent_runtime_buffer_drop_reaches_shared_stats() {
        let mut config = AgentConfig::default();
        config.max_buffered_traces = Some(1);
        let runtime = AgentRuntime::new(config).unwrap();
        let stats = runtime.stats();

        for i in 0..5 {
            let key = crate::core::TraceId::new(format!("t{i}")).unwrap();
            let span = crate::core::Span::builder()
                .trace_id(key.clone())
                .span_id(crate::core::SpanId::new("s1").unwrap())
                .service_name(crate::core::ServiceName::new("svc"))
                .build()
                .unwrap();
            runtime.buffer.put(key, span);
        }

        assert!(stats.snapshot().buffered_traces_dropped > 0);
    }
}
