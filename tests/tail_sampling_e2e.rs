//! End-to-end scenarios for the tail-based sampling core, exercising the
//! buffer, detector, and peer-list parsing together without a real
//! network (peer RPCs are covered at the unit level in `peer_fanout.rs`).

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tailsample::buffer::WindowBuffer;
use tailsample::collector::error_detector::{Backpressure, ErrorDetector};
use tailsample::collector::sink::{ProcessingSink, SpansOptions};
use tailsample::core::{
    Result, ServiceName, Span, SpanId, TraceId, ERROR_TAG_KEY, PROPAGATED_ERROR_VALUE,
    SELF_ERROR_VALUE, SERVICES_IPS_TAG_KEY,
};
use tokio::sync::mpsc;

struct CountingSink {
    batches_received: AtomicUsize,
    spans_received: AtomicUsize,
}

impl CountingSink {
    fn new() -> Self {
        Self { batches_received: AtomicUsize::new(0), spans_received: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ProcessingSink for CountingSink {
    async fn process_spans(&self, batch: Vec<Span>, _options: SpansOptions) -> Result<()> {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.spans_received.fetch_add(batch.len(), Ordering::Relaxed);
        Ok(())
    }
}

fn span_with_tags(trace_id: &str, error: Option<i64>, services_ips: Option<&str>) -> Span {
    let mut builder = Span::builder()
        .trace_id(TraceId::new(trace_id).unwrap())
        .span_id(SpanId::new("s1").unwrap())
        .service_name(ServiceName::new("checkout"));
    if let Some(v) = error {
        builder = builder.tag(ERROR_TAG_KEY, v);
    }
    if let Some(ips) = services_ips {
        builder = builder.tag(SERVICES_IPS_TAG_KEY, ips);
    }
    builder.build().unwrap()
}

/// Scenario 1 (happy path): a buffered trace is retrievable end to end
/// through the buffer and the detector marks the right span.
#[tokio::test]
async fn scenario_happy_path_buffers_and_detects() {
    let buffer = WindowBuffer::new(60);
    let trace_id = TraceId::new("0x01").unwrap();
    buffer.put(trace_id.clone(), span_with_tags("0x01", None, None));

    let (_, present) = buffer.get(&trace_id);
    assert!(present);

    let (tx, mut rx) = mpsc::channel(8);
    let detector = ErrorDetector::new(tx, Backpressure::Blocking);
    let marked = span_with_tags("0x01", Some(SELF_ERROR_VALUE), Some("A,self,"));
    detector.inspect(vec![marked]).await.unwrap();

    let enqueued = rx.recv().await.unwrap();
    assert_eq!(enqueued.services_ips(), Some("A,self,"));
}

/// Scenario 5 (buffer eviction): with `W=2`, a key is present shortly
/// after insertion and absent once two window-lengths have elapsed.
#[tokio::test]
async fn scenario_buffer_eviction_after_two_windows() {
    let buffer = WindowBuffer::new(2);
    let key = TraceId::new("k").unwrap();
    buffer.put(key.clone(), span_with_tags("k", None, None));

    let (_, present) = buffer.get(&key);
    assert!(present);

    // The ring has `W` cells; the cell `k` occupies recurs as "current"
    // once every `W` seconds. Wait just past one full rotation so the next
    // `Put` lands back on that cell and triggers eviction (eviction runs
    // lazily on the next `Put` to a lapsed cell, per the buffer's contract).
    tokio::time::sleep(Duration::from_millis(2_200)).await;
    buffer.put(TraceId::new("other").unwrap(), span_with_tags("other", None, None));

    let (_, present) = buffer.get(&key);
    assert!(!present);
}

/// Scenario 6 (malformed tag): a single-element `services.ips` value is
/// rejected by the peer-list parser and never panics the caller.
#[tokio::test]
async fn scenario_malformed_services_ips_is_rejected() {
    // Exercised indirectly: the detector still enqueues the span (it only
    // looks at the error tag), and fan-out parsing of the malformed tag is
    // covered directly in `collector::peer_fanout`'s unit tests.
    let (tx, mut rx) = mpsc::channel(8);
    let detector = ErrorDetector::new(tx, Backpressure::Blocking);
    let span = span_with_tags("t1", Some(SELF_ERROR_VALUE), Some("self"));
    detector.inspect(vec![span]).await.unwrap();
    let enqueued = rx.recv().await.unwrap();
    assert_eq!(enqueued.services_ips(), Some("self"));
}

/// Propagated errors (value `1`) are never enqueued for fan-out.
#[tokio::test]
async fn scenario_propagated_error_is_not_enqueued() {
    let (tx, mut rx) = mpsc::channel(8);
    let detector = ErrorDetector::new(tx, Backpressure::Blocking);
    let span = span_with_tags("t1", Some(PROPAGATED_ERROR_VALUE), Some("U1,self,"));
    detector.inspect(vec![span]).await.unwrap();
    drop(detector);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn scenario_sink_receives_reconstructed_batch() {
    let sink = Arc::new(CountingSink::new());
    let batch = vec![span_with_tags("t1", None, None), span_with_tags("t1", None, None)];
    sink.process_spans(batch, SpansOptions::default()).await.unwrap();

    assert_eq!(sink.batches_received.load(Ordering::Relaxed), 1);
    assert_eq!(sink.spans_received.load(Ordering::Relaxed), 2);
}
