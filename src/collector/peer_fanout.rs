//! Reconstructs full traces by fanning out to the peer agents listed in a
//! marked span's `tag.services.ips` tag, then re-injects the result into
//! the processing sink.

use crate::collector::peer_client::PeerConnectionPool;
use crate::collector::sink::{ProcessingSink, SpansOptions};
use crate::core::retry::{retry_with_config, CircuitBreaker, RetryConfig};
use crate::core::{Result, Span, TailSampleError, SERVICES_IPS_TAG_KEY};
use crate::monitoring::SamplingStats;
use crate::proto::query_service_client::QueryServiceClient;
use crate::proto::GetTraceRequest;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Configuration for the fan-out daemon, sourced from
/// `CollectorConfig`.
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Capacity of the bounded request channel.
    pub request_channel_capacity: usize,
    /// Dial timeout for opening a peer connection.
    pub peer_dial_timeout: Duration,
    /// Per-RPC deadline attached to every peer call (§9 MUST).
    pub peer_call_deadline: Duration,
    /// Maximum downstream hop count before the walk is aborted (§9 MUST).
    pub max_hops: usize,
    /// Max per-call retry count for peer RPCs.
    pub retry_max: u32,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            request_channel_capacity: 10_240,
            peer_dial_timeout: Duration::from_secs(2),
            peer_call_deadline: Duration::from_secs(5),
            max_hops: 32,
            retry_max: 3,
        }
    }
}

/// The `P` in `up1,...,upN,self,down` split on `,`, classified per §4.4.
struct PeerList {
    upstream: Vec<String>,
    downstream_head: Option<String>,
}

/// Parses a `tag.services.ips` value. Requires at least two comma-split
/// elements; the last is the downstream head (empty means none), and all
/// elements before the second-to-last are upstream peers.
fn parse_peer_list(value: &str) -> Result<PeerList> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() < 2 {
        return Err(TailSampleError::MalformedTag(format!(
            "tag.services.ips has {} element(s), need at least 2: {value:?}",
            parts.len()
        )));
    }

    let upstream = parts[..parts.len() - 2].iter().map(|s| s.to_string()).collect();
    let last = parts[parts.len() - 1];
    let downstream_head = if last.is_empty() { None } else { Some(last.to_string()) };

    Ok(PeerList { upstream, downstream_head })
}

/// Consumes marked spans from a bounded channel and reconstructs their
/// traces from peer agents. The daemon starts eagerly at construction
/// (re-architected per §9 away from the source's lazy once-guard).
pub struct PeerFanOut {
    pool: PeerConnectionPool,
    sink: Arc<dyn ProcessingSink>,
    config: FanOutConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    stats: Arc<SamplingStats>,
}

impl PeerFanOut {
    /// Creates the fan-out engine and starts its daemon task, returning
    /// the sender the `ErrorDetector` enqueues onto. Stats are private and
    /// unshared; use [`PeerFanOut::with_stats`] to report into a runtime's
    /// shared counters instead.
    pub fn new(sink: Arc<dyn ProcessingSink>, config: FanOutConfig) -> (Arc<Self>, mpsc::Sender<Span>) {
        Self::with_stats(sink, config, Arc::new(SamplingStats::new()))
    }

    /// Creates the fan-out engine recording peer-fetch failures and sink
    /// rejections into the shared `stats`.
    pub fn with_stats(
        sink: Arc<dyn ProcessingSink>,
        config: FanOutConfig,
        stats: Arc<SamplingStats>,
    ) -> (Arc<Self>, mpsc::Sender<Span>) {
        let (tx, mut rx) = mpsc::channel(config.request_channel_capacity);
        let pool = PeerConnectionPool::new(config.peer_dial_timeout);
        let fanout =
            Arc::new(PeerFanOut { pool, sink, config, breakers: Mutex::new(HashMap::new()), stats });

        let daemon_fanout = fanout.clone();
        tokio::spawn(async move {
            while let Some(span) = rx.recv().await {
                if let Err(e) = daemon_fanout.handle_marked_span(span).await {
                    tracing::error!(error = %e, "fan-out daemon failed to process marked span");
                }
            }
            tracing::warn!("fan-out request channel closed, daemon exiting");
        });

        (fanout, tx)
    }

    async fn handle_marked_span(&self, span: Span) -> Result<()> {
        let trace_id = span.trace_id.clone();
        let Some(ips) = span.services_ips() else {
            tracing::warn!(%trace_id, "marked span has no services-ips tag, skipping");
            return Ok(());
        };

        let peer_list = match parse_peer_list(ips) {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(%trace_id, error = %e, "malformed services-ips tag");
                return Ok(());
            },
        };

        if !peer_list.upstream.is_empty() {
            self.upstream_pass(&peer_list.upstream, &trace_id).await?;
        }

        if let Some(downstream_head) = peer_list.downstream_head {
            self.downstream_walk(downstream_head, &trace_id).await?;
        }

        Ok(())
    }

    /// Concurrently fetches one span per upstream peer, joins all before
    /// proceeding, omits failed fetches, and submits the rest as a batch.
    async fn upstream_pass(&self, upstream: &[String], trace_id: &crate::core::TraceId) -> Result<()> {
        let fetches = upstream.iter().map(|peer| self.fetch_one(peer, trace_id));
        let results = futures::future::join_all(fetches).await;
        let spans: Vec<Span> = results.into_iter().flatten().collect();

        if spans.is_empty() {
            return Ok(());
        }

        self.submit(spans).await
    }

    /// Iteratively fetches from the downstream chain, following each
    /// returned span's own `tag.services.ips` to find the next hop, with a
    /// visited-set and hop cap (§9 MUST — the source has neither).
    async fn downstream_walk(&self, first_hop: String, trace_id: &crate::core::TraceId) -> Result<()> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        let mut current = Some(first_hop);
        let mut hops = 0usize;

        while let Some(peer) = current.take() {
            if hops >= self.config.max_hops {
                tracing::warn!(%trace_id, hops, "downstream walk hit max hop cap, truncating");
                break;
            }
            if !visited.insert(peer.clone()) {
                tracing::warn!(%trace_id, peer = %peer, "downstream walk detected a cycle, truncating");
                break;
            }
            hops += 1;

            let Some(span) = self.fetch_one(&peer, trace_id).await else {
                break;
            };

            current = span
                .services_ips()
                .and_then(|ips| parse_peer_list(ips).ok())
                .and_then(|list| list.downstream_head);

            chain.push(span);
        }

        if chain.is_empty() {
            return Ok(());
        }

        self.submit(chain).await
    }

    /// Returns this peer's circuit breaker, creating one on first use. A
    /// tripped breaker short-circuits fan-out to a peer that's already
    /// failing instead of burning the full retry budget on every span.
    async fn breaker_for(&self, peer: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(peer.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(5, 2, Duration::from_secs(30))))
            .clone()
    }

    /// Calls `GetTrace` on `peer`, reads the first chunk, and returns its
    /// first span. Returns `None` on any failure; failures are logged, not
    /// propagated (§4.4 failure semantics).
    async fn fetch_one(&self, peer: &str, trace_id: &crate::core::TraceId) -> Option<Span> {
        let breaker = self.breaker_for(peer).await;
        let retry_config = RetryConfig { max_attempts: self.config.retry_max.max(1), ..RetryConfig::default() };

        let result = breaker
            .call(|| retry_with_config(retry_config, || self.fetch_one_attempt(peer, trace_id)))
            .await;

        match result {
            Ok(span) => Some(span),
            Err(e) => {
                self.stats.record_peer_fetch_failure();
                tracing::error!(peer = %peer, %trace_id, error = %e, "peer fetch failed");
                None
            },
        }
    }

    async fn fetch_one_attempt(&self, peer: &str, trace_id: &crate::core::TraceId) -> Result<Span> {
        let channel = self.pool.get(peer).await?;
        let mut client = QueryServiceClient::new(channel);

        let mut request = tonic::Request::new(GetTraceRequest { trace_id: trace_id.as_str().to_string() });
        request.set_timeout(self.config.peer_call_deadline);

        let mut stream = client.get_trace(request).await.map_err(TailSampleError::from)?.into_inner();

        let first_chunk = stream
            .next()
            .await
            .ok_or_else(|| TailSampleError::network(format!("peer {peer} returned an empty stream")))?
            .map_err(TailSampleError::from)?;

        let first_proto_span = first_chunk
            .spans
            .into_iter()
            .next()
            .ok_or_else(|| TailSampleError::network(format!("peer {peer} returned an empty chunk")))?;

        crate::agent::span_from_proto(first_proto_span)
    }

    /// Submits a reconstructed batch to the processing sink. Sink errors
    /// are logged and discarded, never retried (§7).
    async fn submit(&self, batch: Vec<Span>) -> Result<()> {
        if let Err(e) = self.sink.process_spans(batch, SpansOptions::default()).await {
            self.stats.record_sink_error();
            tracing::error!(error = %e, "processing sink rejected reconstructed batch");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer_list_upstream_and_downstream() {
        let list = parse_peer_list("a,b,c,d").unwrap();
        assert_eq!(list.upstream, vec!["a", "b"]);
        assert_eq!(list.downstream_head, Some("d".to_string()));
    }

    #[test]
    fn test_parse_peer_list_no_upstream() {
        let list = parse_peer_list("a,b").unwrap();
        assert!(list.upstream.is_empty());
        assert_eq!(list.downstream_head, Some("b".to_string()));
    }

    #[test]
    fn test_parse_peer_list_single_element_is_malformed() {
        assert!(parse_peer_list("a").is_err());
    }

    #[test]
    fn test_parse_peer_list_empty_downstream_means_none() {
        let list = parse_peer_list("U1,U2,self,").unwrap();
        assert_eq!(list.upstream, vec!["U1", "U2"]);
        assert_eq!(list.downstream_head, None);
    }
}
