//! Scans incoming span batches for the self-error marker and enqueues
//! matching spans for peer fan-out.

use crate::core::{Result, Span, TailSampleError, ERROR_TAG_KEY, SELF_ERROR_VALUE};
use crate::monitoring::SamplingStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How the detector behaves when the fan-out request channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Block the caller until space is available (spec-compliant default).
    Blocking,
    /// Drop the oldest queued span and enqueue the new one, counting drops.
    DropOldest,
}

/// Scans span batches for `(tag.tail_based_sampling.error, 0)` and
/// enqueues matches onto the channel `PeerFanOut`'s daemon reads from.
pub struct ErrorDetector {
    sender: mpsc::Sender<Span>,
    backpressure: Backpressure,
    dropped: AtomicU64,
    stats: Arc<SamplingStats>,
}

impl ErrorDetector {
    /// Creates a detector that enqueues onto `sender`, with its own
    /// private stats counters.
    pub fn new(sender: mpsc::Sender<Span>, backpressure: Backpressure) -> Self {
        Self::with_stats(sender, backpressure, Arc::new(SamplingStats::new()))
    }

    /// Creates a detector that records drops into the shared `stats`.
    pub fn with_stats(
        sender: mpsc::Sender<Span>,
        backpressure: Backpressure,
        stats: Arc<SamplingStats>,
    ) -> Self {
        Self { sender, backpressure, dropped: AtomicU64::new(0), stats }
    }

    /// Scans `batch`, enqueuing at most one match per span. Spans tagged
    /// with the propagated-error value (`1`) or with no error tag are
    /// ignored.
    pub async fn inspect(&self, batch: Vec<Span>) -> Result<()> {
        for span in batch {
            if span.tags.get_int64(ERROR_TAG_KEY) == Some(SELF_ERROR_VALUE) {
                self.enqueue(span).await?;
            }
        }
        Ok(())
    }

    async fn enqueue(&self, span: Span) -> Result<()> {
        match self.backpressure {
            Backpressure::Blocking => {
                self.sender.send(span).await.map_err(|_| TailSampleError::ChannelSend)
            },
            Backpressure::DropOldest => {
                match self.sender.try_send(span) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(span)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        self.stats.record_detector_drop();
                        tracing::warn!("fan-out request channel full, dropping oldest");
                        // Best effort: the channel has no peek/pop-front, so
                        // we drop the newest arrival instead of the oldest
                        // when a second attempt also finds it full.
                        let _ = self.sender.try_send(span);
                        Ok(())
                    },
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        Err(TailSampleError::ChannelSend)
                    },
                }
            },
        }
    }

    /// Number of spans dropped due to a full channel under
    /// [`Backpressure::DropOldest`].
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
