//! `WindowBuffer`: a bounded, time-windowed, thread-safe span buffer.
//!
//! Each agent keeps one of these. Spans arriving on the normal path are
//! `put` into the buffer keyed by trace ID; the `RetrievalService` reads
//! them back out with `get` when a collector asks for a trace. Entries
//! expire as a sliding window of `W` seconds elapses.

use crate::core::{Span, TraceId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// One cell of the ring: the set of trace-ID keys first observed while
/// this cell was current, and when the cell started accepting keys.
#[derive(Default)]
struct Cell {
    created_at: Option<Instant>,
    keys: HashSet<TraceId>,
}

struct BufferState {
    map: HashMap<TraceId, Vec<Span>>,
    ring: Vec<Cell>,
    current: usize,
}

/// Callback invoked when the optional hard memory cap forces a drop.
pub type DropCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// A bounded, time-windowed, thread-safe span buffer indexed by trace ID.
///
/// A single read-write lock guards both the trace map and the ring (spec
/// invariant: "a single read-write mutex guards both `bufferMap` and the
/// ring"). `get` takes the read lock; `put` and the ticker take the write
/// lock. No operation blocks on I/O.
pub struct WindowBuffer {
    state: RwLock<BufferState>,
    window: Duration,
    max_buffered_traces: Option<usize>,
    dropped: AtomicU64,
    drop_callback: Option<DropCallback>,
    ticker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WindowBuffer {
    /// Creates a new buffer with the given window size in seconds.
    pub fn new(window_seconds: u64) -> Arc<Self> {
        Self::with_options(window_seconds, None, None)
    }

    /// Creates a new buffer with an optional hard cap on buffered trace
    /// keys and an optional callback reporting drops (spec.md §4.1:
    /// "implementations may add a hard cap and drop oldest-first if
    /// exceeded (report the drop through an optional metric callback)").
    pub fn with_options(
        window_seconds: u64,
        max_buffered_traces: Option<usize>,
        drop_callback: Option<DropCallback>,
    ) -> Arc<Self> {
        let window = Duration::from_secs(window_seconds.max(1));
        let ring_len = window_seconds.max(1) as usize;
        let state = RwLock::new(BufferState {
            map: HashMap::new(),
            ring: (0..ring_len).map(|_| Cell::default()).collect(),
            current: 0,
        });

        let buffer = Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    let Some(buffer) = weak.upgrade() else {
                        break;
                    };
                    buffer.advance_ring();
                }
            });

            WindowBuffer {
                state,
                window,
                max_buffered_traces,
                dropped: AtomicU64::new(0),
                drop_callback,
                ticker: parking_lot::Mutex::new(Some(handle)),
            }
        });

        buffer
    }

    fn advance_ring(&self) {
        let mut state = self.state.write();
        let len = state.ring.len();
        state.current = (state.current + 1) % len;
    }

    /// Appends `span` to the sequence stored for `key`, marking `key` as
    /// seen in the current ring cell. May evict an entire cell's worth of
    /// keys first if the current cell has lapped.
    pub fn put(&self, key: TraceId, span: Span) {
        let now = Instant::now();
        let mut state = self.state.write();
        let idx = state.current;

        let should_evict = match state.ring[idx].created_at {
            None => {
                state.ring[idx].created_at = Some(now);
                false
            },
            Some(created_at) => created_at + self.window <= now,
        };

        if should_evict {
            let cell = &mut state.ring[idx];
            for evicted_key in cell.keys.drain() {
                state.map.remove(&evicted_key);
            }
            state.ring[idx].created_at = Some(now);
        }

        state.ring[idx].keys.insert(key.clone());
        state.map.entry(key).or_default().push(span);

        if let Some(max) = self.max_buffered_traces {
            if state.map.len() > max {
                self.evict_oldest(&mut state, max);
            }
        }
    }

    /// Drops the oldest-inserted trace keys until `map.len() <= max`,
    /// reporting the drop count through the configured callback.
    fn evict_oldest(&self, state: &mut BufferState, max: usize) {
        let overflow = state.map.len().saturating_sub(max);
        if overflow == 0 {
            return;
        }
        // Oldest-first by ring cell order, starting just after `current`
        // (the cell that will lapse soonest holds the oldest keys).
        let len = state.ring.len();
        let mut removed = 0;
        for offset in 1..=len {
            if removed >= overflow {
                break;
            }
            let idx = (state.current + offset) % len;
            let keys: Vec<TraceId> = state.ring[idx].keys.iter().cloned().collect();
            for key in keys {
                if removed >= overflow {
                    break;
                }
                state.ring[idx].keys.remove(&key);
                state.map.remove(&key);
                removed += 1;
            }
        }
        self.dropped.fetch_add(removed as u64, Ordering::Relaxed);
        if let Some(cb) = &self.drop_callback {
            cb(removed);
        }
    }

    /// Returns the current sequence for `key` without mutation, and
    /// whether the key is present.
    pub fn get(&self, key: &TraceId) -> (Vec<Span>, bool) {
        let state = self.state.read();
        match state.map.get(key) {
            Some(spans) => (spans.clone(), true),
            None => (Vec::new(), false),
        }
    }

    /// Total number of dropped trace keys since construction (only
    /// nonzero when a hard cap is configured).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops the background ticker. Idempotent.
    pub fn close(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for WindowBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ServiceName;

    fn test_span(trace_id: &str) -> Span {
        Span::builder()
            .trace_id(TraceId::new(trace_id).unwrap())
            .span_id(crate::core::SpanId::new("span1").unwrap())
            .service_name(ServiceName::new("svc"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let buffer = WindowBuffer::new(60);
        let key = TraceId::new("t1").unwrap();
        buffer.put(key.clone(), test_span("t1"));

        let (spans, present) = buffer.get(&key);
        assert!(present);
        assert_eq!(spans.len(), 1);
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let buffer = WindowBuffer::new(60);
        let (spans, present) = buffer.get(&TraceId::new("missing").unwrap());
        assert!(!present);
        assert!(spans.is_empty());
    }

    #[tokio::test]
    async fn test_insertion_order_preserved() {
        let buffer = WindowBuffer::new(60);
        let key = TraceId::new("t1").unwrap();
        for i in 0..5 {
            let mut span = test_span("t1");
            span.span_id = crate::core::SpanId::new(format!("span{i}")).unwrap();
            buffer.put(key.clone(), span);
        }

        let (spans, present) = buffer.get(&key);
        assert!(present);
        let ids: Vec<_> = spans.iter().map(|s| s.span_id.as_str().to_string()).collect();
        pretty_assertions::assert_eq!(
            ids,
            vec!["span0", "span1", "span2", "span3", "span4"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_distinct_keys() {
        let buffer = WindowBuffer::new(60);
        let mut handles = Vec::new();
        for i in 0..50 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                let key = TraceId::new(format!("trace-{i}")).unwrap();
                buffer.put(key, test_span("x"));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for i in 0..50 {
            let key = TraceId::new(format!("trace-{i}")).unwrap();
            let (_, present) = buffer.get(&key);
            assert!(present);
        }
    }

    #[tokio::test]
    async fn test_eviction_after_window_laps() {
        // Window of 1 second: put, confirm present, then wait past the
        // lap point and put again (for a different key) to trigger
        // eviction of the first cell.
        let buffer = WindowBuffer::new(1);
        let key = TraceId::new("k").unwrap();
        buffer.put(key.clone(), test_span("k"));
        let (_, present) = buffer.get(&key);
        assert!(present);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Touch the same cell again with a different key; this forces
        // the lapsed cell's keys (including `k`) to be evicted.
        let other = TraceId::new("other").unwrap();
        buffer.put(other, test_span("other"));

        let (_, present) = buffer.get(&key);
        assert!(!present);
    }

    #[tokio::test]
    async fn test_hard_cap_drops_oldest() {
        let dropped = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let dropped_clone = dropped.clone();
        let buffer = WindowBuffer::with_options(
            60,
            Some(3),
            Some(Arc::new(move |n| {
                dropped_clone.fetch_add(n, Ordering::Relaxed);
            })),
        );

        for i in 0..10 {
            let key = TraceId::new(format!("k{i}")).unwrap();
            buffer.put(key, test_span("x"));
        }

        assert!(dropped.load(Ordering::Relaxed) > 0);
        assert!(buffer.dropped_count() > 0);
    }
}
