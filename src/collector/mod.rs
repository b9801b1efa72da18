//! Collector-side gRPC surface and tail-based sampling engine: the
//! normal-path span receiver, the `ErrorDetector`, and the `PeerFanOut`
//! reconstruction engine.

pub mod error_detector;
pub mod peer_client;
pub mod peer_fanout;
pub mod sink;

use crate::core::Result;
use crate::proto::ingest_service_server::{IngestService, IngestServiceServer};
use crate::proto::{ExportSpansRequest, ExportSpansResponse};
use error_detector::ErrorDetector;
use sink::{ProcessingSink, SpansOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::{transport::Server, Request, Response, Status};

/// Normal-path span receiver at the collector: accepts spans forwarded by
/// agents, hands them to the processing sink, and scans each batch for
/// self-errors via the `ErrorDetector`.
pub struct CollectorIngestReceiver {
    detector: Arc<ErrorDetector>,
    sink: Arc<dyn ProcessingSink>,
}

impl CollectorIngestReceiver {
    /// Creates a new receiver.
    pub fn new(detector: Arc<ErrorDetector>, sink: Arc<dyn ProcessingSink>) -> Self {
        Self { detector, sink }
    }

    /// Binds and serves the ingest endpoint until shutdown.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        tracing::info!(%addr, "starting collector ingest receiver");
        Server::builder()
            .add_service(IngestServiceServer::new(self))
            .serve_with_shutdown(addr, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|e| crate::core::TailSampleError::network(e.to_string()))
    }
}

#[tonic::async_trait]
impl IngestService for CollectorIngestReceiver {
    async fn export(
        &self,
        request: Request<ExportSpansRequest>,
    ) -> std::result::Result<Response<ExportSpansResponse>, Status> {
        let batch = request.into_inner().spans;
        let mut spans = Vec::with_capacity(batch.len());
        for proto_span in batch {
            match crate::agent::span_from_proto(proto_span) {
                Ok(span) => spans.push(span),
                Err(e) => tracing::warn!(error = %e, "dropping malformed span on collector ingest"),
            }
        }

        let accepted = spans.len() as u32;

        if let Err(e) = self.detector.inspect(spans.clone()).await {
            tracing::error!(error = %e, "error detector failed to inspect batch");
        }

        if let Err(e) = self.sink.process_spans(spans, SpansOptions::default()).await {
            tracing::error!(error = %e, "processing sink rejected normal-path batch");
        }

        Ok(Response::new(ExportSpansResponse { accepted }))
    }
}
