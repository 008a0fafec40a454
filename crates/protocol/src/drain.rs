//! Stream draining for graceful shutdown and restart.
//!
//! Every long-lived RPC stream holds a [`StreamGuard`]; shutdown waits for
//! the count to reach zero before the listener is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Tracks active streams
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    active: Arc<AtomicUsize>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream; it stays counted until the guard is dropped
    pub fn track(&self) -> StreamGuard {
        let count = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(active_streams = count, "Stream started");
        StreamGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Get active stream count
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Wait for active streams to drain
    ///
    /// Returns `true` if all streams ended within `max_drain_time`,
    /// `false` if the timeout was reached with streams still active.
    pub async fn wait_for_drain(&self, max_drain_time: Duration) -> bool {
        let start = Instant::now();
        let initial_count = self.active_count();

        info!(
            active_streams = initial_count,
            max_drain_time_secs = max_drain_time.as_secs(),
            "Starting stream drain"
        );

        let mut last_logged_count = initial_count;

        while self.active_count() > 0 {
            if start.elapsed() > max_drain_time {
                warn!(
                    remaining_streams = self.active_count(),
                    elapsed_secs = start.elapsed().as_secs(),
                    "Drain timeout reached, streams still active"
                );
                return false;
            }

            let current_count = self.active_count();
            if current_count != last_logged_count {
                debug!(
                    remaining_streams = current_count,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Draining streams"
                );
                last_logged_count = current_count;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!(
            elapsed_ms = start.elapsed().as_millis(),
            initial_streams = initial_count,
            "All streams drained"
        );
        true
    }
}

/// Keeps a stream counted while alive
#[derive(Debug)]
pub struct StreamGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let count = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(active_streams = count, "Stream ended");
    }
}
