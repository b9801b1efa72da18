//! Agent-side gRPC surface: the `RetrievalService` that serves buffered
//! spans back to collectors, and the normal-path span receiver that feeds
//! the `WindowBuffer`.

use crate::buffer::WindowBuffer;
use crate::core::{Result, ServiceName, Span, SpanId, TagValue, TraceId};
use crate::proto::query_service_server::{QueryService, QueryServiceServer};
use crate::proto::ingest_service_server::{IngestService, IngestServiceServer};
use crate::proto::{
    tag::Value as ProtoTagValue, ArchiveTraceRequest, ArchiveTraceResponse, ExportSpansRequest,
    ExportSpansResponse, FindTracesRequest, GetDependenciesRequest, GetDependenciesResponse,
    GetOperationsRequest, GetOperationsResponse, GetServicesRequest, GetServicesResponse,
    GetTraceRequest, SpansResponseChunk, Tag as ProtoTag,
};
use futures::Stream;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tonic::{transport::Server, Request, Response, Status};

/// Number of spans per streamed chunk in `GetTrace` (spec-mandated: `K=10`).
const CHUNK_SIZE: usize = 10;

/// Converts a core [`Span`] into its wire representation.
pub(crate) fn span_to_proto(span: &Span) -> crate::proto::Span {
    crate::proto::Span {
        trace_id: span.trace_id.as_str().to_string(),
        span_id: span.span_id.as_str().to_string(),
        service_name: span.service_name.as_str().to_string(),
        tags: span
            .tags
            .iter()
            .map(|tag| ProtoTag {
                key: tag.key.to_string(),
                value: Some(match &tag.value {
                    TagValue::Int64(v) => ProtoTagValue::VInt64(*v),
                    TagValue::Str(v) => ProtoTagValue::VStr(v.to_string()),
                }),
            })
            .collect(),
    }
}

/// Converts a wire span into a core [`Span`], rejecting malformed input.
pub(crate) fn span_from_proto(span: crate::proto::Span) -> Result<Span> {
    let mut builder = Span::builder()
        .trace_id(TraceId::new(span.trace_id)?)
        .span_id(SpanId::new(span.span_id)?)
        .service_name(ServiceName::new(span.service_name));

    for tag in span.tags {
        let Some(value) = tag.value else { continue };
        builder = match value {
            ProtoTagValue::VInt64(v) => builder.tag(tag.key, v),
            ProtoTagValue::VStr(v) => builder.tag(tag.key, v),
        };
    }

    builder.build()
}

/// Serves `QueryService.GetTrace` (and the rest of the query surface, as
/// stubs) from a single agent's [`WindowBuffer`].
pub struct RetrievalService {
    buffer: Arc<WindowBuffer>,
}

impl RetrievalService {
    /// Creates a new retrieval service over `buffer`.
    pub fn new(buffer: Arc<WindowBuffer>) -> Self {
        Self { buffer }
    }

    /// Binds and serves the `QueryService` until `shutdown` or a fatal
    /// transport error.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        tracing::info!(%addr, "starting retrieval service");
        Server::builder()
            .add_service(QueryServiceServer::new(self))
            .serve_with_shutdown(addr, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|e| crate::core::TailSampleError::network(e.to_string()))
    }
}

type TraceStream = Pin<Box<dyn Stream<Item = std::result::Result<SpansResponseChunk, Status>> + Send>>;

#[tonic::async_trait]
impl QueryService for RetrievalService {
    type GetTraceStream = TraceStream;
    type FindTracesStream = TraceStream;

    async fn get_trace(
        &self,
        request: Request<GetTraceRequest>,
    ) -> std::result::Result<Response<Self::GetTraceStream>, Status> {
        let trace_id = TraceId::new(request.into_inner().trace_id)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let (spans, present) = self.buffer.get(&trace_id);
        if !present {
            return Err(Status::not_found(format!("trace {trace_id} not found")));
        }

        let chunks: Vec<_> = spans
            .chunks(CHUNK_SIZE)
            .map(|chunk| {
                Ok(SpansResponseChunk {
                    spans: chunk.iter().map(span_to_proto).collect(),
                })
            })
            .collect();

        let stream = futures::stream::iter(chunks);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn archive_trace(
        &self,
        _request: Request<ArchiveTraceRequest>,
    ) -> std::result::Result<Response<ArchiveTraceResponse>, Status> {
        Ok(Response::new(ArchiveTraceResponse {}))
    }

    async fn find_traces(
        &self,
        _request: Request<FindTracesRequest>,
    ) -> std::result::Result<Response<Self::FindTracesStream>, Status> {
        let empty = futures::stream::empty();
        Ok(Response::new(Box::pin(empty)))
    }

    async fn get_services(
        &self,
        _request: Request<GetServicesRequest>,
    ) -> std::result::Result<Response<GetServicesResponse>, Status> {
        Ok(Response::new(GetServicesResponse { services: Vec::new() }))
    }

    async fn get_operations(
        &self,
        _request: Request<GetOperationsRequest>,
    ) -> std::result::Result<Response<GetOperationsResponse>, Status> {
        Ok(Response::new(GetOperationsResponse { operations: Vec::new() }))
    }

    async fn get_dependencies(
        &self,
        _request: Request<GetDependenciesRequest>,
    ) -> std::result::Result<Response<GetDependenciesResponse>, Status> {
        Ok(Response::new(GetDependenciesResponse {}))
    }
}

/// Normal-path span receiver: accepts spans from instrumented applications
/// (at the agent) or from forwarding agents (at the collector) and hands
/// each one to a sink closure. Does not sanitize or convert spans.
pub struct AgentIngestReceiver {
    buffer: Arc<WindowBuffer>,
}

impl AgentIngestReceiver {
    /// Creates a receiver that puts every accepted span into `buffer`.
    pub fn new(buffer: Arc<WindowBuffer>) -> Self {
        Self { buffer }
    }

    /// Binds and serves the ingest endpoint until shutdown.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        tracing::info!(%addr, "starting agent ingest receiver");
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
impl IngestService for AgentIngestReceiver {
    async fn export(
        &self,
        request: Request<ExportSpansRequest>,
    ) -> std::result::Result<Response<ExportSpansResponse>, Status> {
        let batch = request.into_inner().spans;
        let mut accepted = 0u32;
        for proto_span in batch {
            match span_from_proto(proto_span) {
                Ok(span) => {
                    self.buffer.put(span.trace_id.clone(), span);
                    accepted += 1;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed span on agent ingest");
                },
            }
        }
        Ok(Response::new(ExportSpansResponse { accepted }))
    }
}
