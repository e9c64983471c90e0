//! Size/timeout dynamic batcher.
//!
//! [`Batcher`] consumes single items from an input queue and emits
//! [`Batch`]es downstream. A batch closes when it reaches the configured
//! size, when its window deadline passes, or when the input closes:
//!
//! ```text
//! input ──► [ accumulate up to batch_size, bounded by timeout ] ──► output
//! ```
//!
//! The timeout bounds the *whole* batch window, not the gap between
//! items: the deadline is fixed when a batch opens and is only re-armed
//! when the batch is emitted or discarded. Deadlines are absolute
//! [`tokio::time::Instant`]s recomputed after every suspension, so the
//! window does not drift.
//!
//! Every item received appears in exactly one emitted batch, in arrival
//! order, and batches are emitted in the order their closing condition
//! was met.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::queue::{BoundedQueue, Recv};

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached the configured maximum size.
    SizeReached,
    /// The batch window deadline passed before the batch filled.
    TimedOut,
    /// The input closed with a partially filled batch outstanding.
    FinalFlush,
}

/// An ordered group of 1..=`batch_size` items, consumed exactly once by
/// the next stage.
///
/// Empty batches are never emitted; an empty timeout window is discarded
/// and a fresh window armed instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Items in original arrival order.
    pub items: Vec<T>,
    /// The condition that closed this batch.
    pub reason: FlushReason,
}

impl<T> Batch<T> {
    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Groups single items into size- and time-bounded batches.
#[derive(Debug, Clone)]
pub struct Batcher {
    batch_size: usize,
    timeout: Duration,
}

impl Batcher {
    /// Creates a batcher emitting batches of at most `batch_size` items,
    /// flushing a partial batch after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `batch_size` is zero or `timeout` is a
    /// zero duration.
    pub fn new(batch_size: usize, timeout: Duration) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if timeout.is_zero() {
            return Err(ConfigError::ZeroBatchTimeout);
        }
        Ok(Self {
            batch_size,
            timeout,
        })
    }

    /// Returns the configured maximum batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the configured batch window length.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Long-lived grouping loop.
    ///
    /// Consumes `input` until it closes, emitting batches to `output`.
    /// Each consumed item is acknowledged on `input` via `task_done`, so
    /// upstream `join()` tracks the batcher's progress. On input close,
    /// any partial batch is emitted as [`FlushReason::FinalFlush`] and
    /// the close is propagated to `output`.
    pub async fn run<T: Send>(
        &self,
        input: Arc<BoundedQueue<T>>,
        output: Arc<BoundedQueue<Batch<T>>>,
    ) {
        let mut items: Vec<T> = Vec::with_capacity(self.batch_size);
        let mut deadline = Instant::now() + self.timeout;

        loop {
            match timeout_at(deadline, input.recv()).await {
                Ok(Recv::Item(item)) => {
                    items.push(item);
                    if input.task_done().is_err() {
                        // Accounting went negative: another consumer is
                        // misusing this queue. Bail out rather than emit
                        // inconsistent batches.
                        warn!("batcher input accounting underflow, stopping");
                        output.close();
                        return;
                    }
                    if items.len() >= self.batch_size {
                        if !self.emit(&output, &mut items, FlushReason::SizeReached).await {
                            return;
                        }
                        deadline = Instant::now() + self.timeout;
                    }
                }
                Ok(Recv::Closed) => {
                    if !items.is_empty()
                        && !self.emit(&output, &mut items, FlushReason::FinalFlush).await
                    {
                        return;
                    }
                    debug!("batcher input closed, propagating close");
                    output.close();
                    return;
                }
                Ok(Recv::Cancelled) => {
                    // recv() never resolves to Cancelled; kept for match
                    // completeness.
                    return;
                }
                Err(_elapsed) => {
                    if !items.is_empty() {
                        if !self.emit(&output, &mut items, FlushReason::TimedOut).await {
                            return;
                        }
                    }
                    // Empty windows are discarded silently.
                    deadline = Instant::now() + self.timeout;
                }
            }
        }
    }

    /// Emits the accumulated items as one batch. Returns false if the
    /// output has been closed underneath us.
    async fn emit<T: Send>(
        &self,
        output: &BoundedQueue<Batch<T>>,
        items: &mut Vec<T>,
        reason: FlushReason,
    ) -> bool {
        let batch = Batch {
            items: std::mem::take(items),
            reason,
        };
        debug!(size = batch.len(), reason = ?reason, "emitting batch");
        if output.send(batch).await.is_err() {
            warn!("batch output closed, batcher stopping");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wiring<T: Send>() -> (Arc<BoundedQueue<T>>, Arc<BoundedQueue<Batch<T>>>) {
        (Arc::new(BoundedQueue::new(0)), Arc::new(BoundedQueue::new(0)))
    }

    async fn collect<T>(output: &BoundedQueue<Batch<T>>) -> Vec<Batch<T>> {
        let mut batches = Vec::new();
        loop {
            match output.recv().await {
                Recv::Item(batch) => batches.push(batch),
                Recv::Closed => return batches,
                Recv::Cancelled => unreachable!(),
            }
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = Batcher::new(0, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchSize);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = Batcher::new(4, Duration::ZERO).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batches_flush_on_size() {
        let (input, output) = wiring();
        let batcher = Batcher::new(3, Duration::from_secs(10)).unwrap();

        for i in 0..6 {
            input.send(i).await.unwrap();
        }
        input.close();

        let runner = tokio::spawn({
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            async move { batcher.run(input, output).await }
        });

        let batches = collect(&output).await;
        runner.await.unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].items, vec![0, 1, 2]);
        assert_eq!(batches[0].reason, FlushReason::SizeReached);
        assert_eq!(batches[1].items, vec![3, 4, 5]);
        assert_eq!(batches[1].reason, FlushReason::SizeReached);
        assert_eq!(input.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_flushes_on_close() {
        let (input, output) = wiring();
        let batcher = Batcher::new(4, Duration::from_secs(10)).unwrap();

        input.send("x").await.unwrap();
        input.send("y").await.unwrap();
        input.close();

        let runner = tokio::spawn({
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            async move { batcher.run(input, output).await }
        });

        let batches = collect(&output).await;
        runner.await.unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].items, vec!["x", "y"]);
        assert_eq!(batches[0].reason, FlushReason::FinalFlush);
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_no_items_emits_nothing() {
        let (input, output) = wiring::<u32>();
        let batcher = Batcher::new(4, Duration::from_secs(10)).unwrap();
        input.close();

        batcher.run(Arc::clone(&input), Arc::clone(&output)).await;
        let batches = collect(&output).await;
        assert!(batches.is_empty());
        assert!(output.is_closed());
    }

    /// Boundary case from the window contract: size 3, timeout 1s, items
    /// arriving at t = 0, 0.2, 0.9 and 2.5. The first three close a
    /// SizeReached batch at t=0.9; the fourth sits alone until its
    /// window deadline flushes it as TimedOut.
    #[tokio::test(start_paused = true)]
    async fn size_then_timeout_boundary() {
        let (input, output) = wiring();
        let batcher = Batcher::new(3, Duration::from_secs(1)).unwrap();

        let runner = tokio::spawn({
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            async move { batcher.run(input, output).await }
        });

        let feeder = tokio::spawn({
            let input = Arc::clone(&input);
            async move {
                input.send(0).await.unwrap(); // t = 0
                tokio::time::sleep(Duration::from_millis(200)).await;
                input.send(1).await.unwrap(); // t = 0.2
                tokio::time::sleep(Duration::from_millis(700)).await;
                input.send(2).await.unwrap(); // t = 0.9
                tokio::time::sleep(Duration::from_millis(1600)).await;
                input.send(3).await.unwrap(); // t = 2.5
                input.close();
            }
        });

        let first = output.recv().await.into_item().unwrap();
        assert_eq!(first.items, vec![0, 1, 2]);
        assert_eq!(first.reason, FlushReason::SizeReached);

        let second = output.recv().await.into_item().unwrap();
        assert_eq!(second.items, vec![3]);
        assert_eq!(second.reason, FlushReason::TimedOut);

        feeder.await.unwrap();
        assert_eq!(output.recv().await, Recv::Closed);
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_whole_window_not_gaps() {
        let (input, output) = wiring();
        let batcher = Batcher::new(10, Duration::from_secs(1)).unwrap();

        let runner = tokio::spawn({
            let (input, output) = (Arc::clone(&input), Arc::clone(&output));
            async move { batcher.run(input, output).await }
        });

        // Items trickle in every 400ms. If the timeout were re-armed per
        // item the batch would never flush; the fixed window must close
        // it with whatever arrived within 1s.
        let feeder = tokio::spawn({
            let input = Arc::clone(&input);
            async move {
                for i in 0..5 {
                    input.send(i).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(400)).await;
                }
                input.close();
            }
        });

        let first = output.recv().await.into_item().unwrap();
        assert_eq!(first.reason, FlushReason::TimedOut);
        assert!(first.items.len() < 5, "window never closed");

        let mut all = first.items;
        loop {
            match output.recv().await {
                Recv::Item(batch) => all.extend(batch.items),
                Recv::Closed => break,
                Recv::Cancelled => unreachable!(),
            }
        }
        // Order-preserving, no loss, no duplication.
        assert_eq!(all, vec![0, 1, 2, 3, 4]);

        feeder.await.unwrap();
        runner.await.unwrap();
    }

    /// Concatenation property across batch sizes: emitted batches always
    /// reproduce the input sequence exactly.
    #[tokio::test(start_paused = true)]
    async fn concatenation_reproduces_input_for_all_sizes() {
        for batch_size in 1..=5 {
            let (input, output) = wiring();
            let batcher = Batcher::new(batch_size, Duration::from_secs(10)).unwrap();

            for i in 0..17 {
                input.send(i).await.unwrap();
            }
            input.close();

            let runner = tokio::spawn({
                let (input, output) = (Arc::clone(&input), Arc::clone(&output));
                async move { batcher.run(input, output).await }
            });

            let batches = collect(&output).await;
            runner.await.unwrap();

            let flattened: Vec<i32> = batches.iter().flat_map(|b| b.items.clone()).collect();
            assert_eq!(flattened, (0..17).collect::<Vec<_>>(), "size {batch_size}");
            for batch in &batches {
                assert!(!batch.is_empty());
                assert!(batch.len() <= batch_size);
            }
        }
    }
}
