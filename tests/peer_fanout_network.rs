//! Network-level fan-out scenarios from spec.md §8: the downstream chain
//! walk and a partial upstream-peer failure, driven against real
//! `RetrievalService` listeners on loopback rather than mocked peers.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tailsample::agent::RetrievalService;
use tailsample::buffer::WindowBuffer;
use tailsample::collector::peer_fanout::{FanOutConfig, PeerFanOut};
use tailsample::collector::sink::{ProcessingSink, SpansOptions};
use tailsample::core::{
    Result, ServiceName, Span, SpanId, TraceId, ERROR_TAG_KEY, SELF_ERROR_VALUE,
    SERVICES_IPS_TAG_KEY,
};

struct RecordingSink {
    batches: Mutex<Vec<Vec<Span>>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self { batches: Mutex::new(Vec::new()) }
    }

    fn all_span_ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|s| s.span_id.as_str().to_string())
            .collect()
    }

    fn total_spans(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl ProcessingSink for RecordingSink {
    async fn process_spans(&self, batch: Vec<Span>, _options: SpansOptions) -> Result<()> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

fn span(trace_id: &str, span_id: &str, services_ips: &str) -> Span {
    Span::builder()
        .trace_id(TraceId::new(trace_id).unwrap())
        .span_id(SpanId::new(span_id).unwrap())
        .service_name(ServiceName::new("checkout"))
        .tag(SERVICES_IPS_TAG_KEY, services_ips)
        .build()
        .unwrap()
}

fn marked_span(trace_id: &str, services_ips: &str) -> Span {
    Span::builder()
        .trace_id(TraceId::new(trace_id).unwrap())
        .span_id(SpanId::new("origin").unwrap())
        .service_name(ServiceName::new("checkout"))
        .tag(ERROR_TAG_KEY, SELF_ERROR_VALUE)
        .tag(SERVICES_IPS_TAG_KEY, services_ips)
        .build()
        .unwrap()
}

async fn spawn_retrieval_service(addr: SocketAddr, spans: Vec<Span>) {
    let buffer = WindowBuffer::new(60);
    for s in spans {
        buffer.put(s.trace_id.clone(), s);
    }
    let service = RetrievalService::new(buffer);
    tokio::spawn(async move {
        let _ = service.serve(addr).await;
    });
    // Give the listener a moment to bind before peers dial it.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn wait_for(sink: &RecordingSink, min_spans: usize) {
    for _ in 0..50 {
        if sink.total_spans() >= min_spans {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Scenario 2: a downstream chain `self,D1` -> D1 returns `self,D2` -> D2
/// returns `self,` reconstructs as `[D1, D2]` in order.
#[tokio::test]
async fn scenario_downstream_chain_walks_to_completion() {
    let d1_addr: SocketAddr = "127.0.0.1:18081".parse().unwrap();
    let d2_addr: SocketAddr = "127.0.0.1:18082".parse().unwrap();

    spawn_retrieval_service(d1_addr, vec![span("t-chain", "d1", "self,127.0.0.1:18082")]).await;
    spawn_retrieval_service(d2_addr, vec![span("t-chain", "d2", "self,")]).await;

    let sink = Arc::new(RecordingSink::new());
    let config = FanOutConfig { peer_dial_timeout: Duration::from_secs(1), ..FanOutConfig::default() };
    let (_fanout, tx) = PeerFanOut::new(sink.clone(), config);

    tx.send(marked_span("t-chain", "self,127.0.0.1:18081")).await.unwrap();

    wait_for(&sink, 2).await;

    let mut ids = sink.all_span_ids();
    ids.sort();
    let mut expected = vec!["d1".to_string(), "d2".to_string()];
    expected.sort();
    assert_eq!(ids, expected);
}

/// Scenario 4: of two upstream peers, one is unreachable. The sink
/// receives only the successful peer's span; the daemon keeps running.
#[tokio::test]
async fn scenario_one_upstream_peer_failure_does_not_block_the_other() {
    let u1_addr: SocketAddr = "127.0.0.1:18091".parse().unwrap();
    // 18092 is deliberately left unbound to simulate an unreachable peer.

    spawn_retrieval_service(u1_addr, vec![span("t-fail", "u1", "self,")]).await;

    let sink = Arc::new(RecordingSink::new());
    let config = FanOutConfig {
        peer_dial_timeout: Duration::from_millis(200),
        retry_max: 1,
        ..FanOutConfig::default()
    };
    let (_fanout, tx) = PeerFanOut::new(sink.clone(), config);

    tx.send(marked_span("t-fail", "127.0.0.1:18091,127.0.0.1:18092,self,")).await.unwrap();

    wait_for(&sink, 1).await;

    let ids = sink.all_span_ids();
    assert_eq!(ids, vec!["u1".to_string()]);
}
