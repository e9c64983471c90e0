//! Worker pool stage.
//!
//! A [`WorkerPool`] runs N independent worker loops sharing one input and
//! one output queue. Each worker dequeues an item, invokes the
//! user-supplied async handler, forwards the result downstream, and
//! acknowledges the item on the input queue.
//!
//! # Shutdown modes
//!
//! - **Drain-then-cancel** ([`spawn`]): workers wait with a
//!   [`CancellationToken`]. An external supervisor awaits the input
//!   queue's `join()`, then cancels; a worker blocked in receive exits
//!   immediately, while a worker mid-handler finishes its current item
//!   first. No in-flight work is aborted.
//! - **Sentinel** ([`spawn_sentinel`]): a reserved terminal value flows
//!   through the queue itself. The first worker to see it re-enqueues it
//!   so every peer also observes it, then exits.
//!
//! # Failure policy
//!
//! Handler errors are caught at the pool boundary per item and never
//! terminate a worker. [`FailurePolicy::Drop`] logs and skips the item;
//! [`FailurePolicy::Requeue`] sends it back to the input queue. Requeue
//! does not bound retries by itself; callers that need a cap must embed
//! an attempt counter in the item.
//!
//! [`spawn`]: WorkerPool::spawn
//! [`spawn_sentinel`]: WorkerPool::spawn_sentinel

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{ConfigError, HandlerError};
use crate::queue::{BoundedQueue, Recv};

/// What to do with an item whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure, acknowledge the item, and continue. The item is
    /// dropped.
    #[default]
    Drop,
    /// Re-enqueue the item on the input queue for another attempt.
    /// Unbounded unless the caller embeds an attempt counter in the item.
    Requeue,
}

/// Counters shared between a running pool and its handle.
#[derive(Debug, Default)]
pub struct PoolStats {
    processed: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
}

impl PoolStats {
    /// Items whose handler succeeded and whose result was forwarded.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Items whose handler failed (regardless of policy).
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Failed items that were re-enqueued under [`FailurePolicy::Requeue`].
    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }
}

/// A pool of concurrent workers bridging two queues through a handler.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    policy: FailurePolicy,
}

impl WorkerPool {
    /// Creates a pool that will run `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `concurrency` is zero.
    pub fn new(concurrency: usize) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::ZeroWorkerCount);
        }
        Ok(Self {
            concurrency,
            policy: FailurePolicy::default(),
        })
    }

    /// Sets the per-item failure policy (default: [`FailurePolicy::Drop`]).
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the configured worker count.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawns the workers in drain-then-cancel mode.
    ///
    /// Workers exit when the input closes or when the handle's
    /// cancellation token fires. The caller coordinates shutdown by
    /// awaiting `input.join()` and then calling [`PoolHandle::cancel`],
    /// guaranteeing no enqueued item is abandoned.
    pub fn spawn<T, U, F, Fut>(
        &self,
        input: Arc<BoundedQueue<T>>,
        output: Arc<BoundedQueue<U>>,
        handler: F,
    ) -> PoolHandle
    where
        T: Clone + Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<U, HandlerError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());
        let mut workers = JoinSet::new();

        for idx in 0..self.concurrency {
            let input = Arc::clone(&input);
            let output = Arc::clone(&output);
            let handler = handler.clone();
            let cancel = cancel.clone();
            let stats = Arc::clone(&stats);
            let policy = self.policy;

            workers.spawn(async move {
                loop {
                    match input.recv_cancellable(&cancel).await {
                        Recv::Item(item) => {
                            if !process_item(
                                idx, &input, &output, &handler, policy, &stats, item,
                            )
                            .await
                            {
                                return;
                            }
                        }
                        Recv::Closed => {
                            debug!(worker = idx, "input closed, worker exiting");
                            return;
                        }
                        Recv::Cancelled => {
                            debug!(worker = idx, "cancelled, worker exiting");
                            return;
                        }
                    }
                }
            });
        }

        PoolHandle {
            cancel,
            workers,
            stats,
        }
    }

    /// Spawns the workers in sentinel mode.
    ///
    /// Workers run until they dequeue an item equal to `sentinel`. The
    /// observer re-enqueues the sentinel before exiting so every peer
    /// eventually sees it too (at-least-once propagation). After the pool
    /// has joined, the sentinel is still resident in the input queue;
    /// the caller typically closes the queue afterwards.
    pub fn spawn_sentinel<T, U, F, Fut>(
        &self,
        input: Arc<BoundedQueue<T>>,
        output: Arc<BoundedQueue<U>>,
        handler: F,
        sentinel: T,
    ) -> PoolHandle
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        U: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<U, HandlerError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());
        let mut workers = JoinSet::new();

        for idx in 0..self.concurrency {
            let input = Arc::clone(&input);
            let output = Arc::clone(&output);
            let handler = handler.clone();
            let sentinel = sentinel.clone();
            let stats = Arc::clone(&stats);
            let policy = self.policy;

            workers.spawn(async move {
                loop {
                    match input.recv().await {
                        Recv::Item(item) if item == sentinel => {
                            // Re-enqueue so the remaining workers also
                            // observe it, then exit.
                            if input.send(item).await.is_err() {
                                debug!(worker = idx, "input closed during sentinel relay");
                            }
                            if let Err(e) = input.task_done() {
                                error!(worker = idx, error = %e, "sentinel accounting underflow");
                            }
                            debug!(worker = idx, "sentinel observed, worker exiting");
                            return;
                        }
                        Recv::Item(item) => {
                            if !process_item(
                                idx, &input, &output, &handler, policy, &stats, item,
                            )
                            .await
                            {
                                return;
                            }
                        }
                        Recv::Closed => {
                            debug!(worker = idx, "input closed, worker exiting");
                            return;
                        }
                        Recv::Cancelled => return,
                    }
                }
            });
        }

        PoolHandle {
            cancel,
            workers,
            stats,
        }
    }
}

/// Runs the handler for one item and applies the failure policy.
///
/// Returns false if the worker should stop (fatal accounting error).
async fn process_item<T, U, F, Fut>(
    idx: usize,
    input: &BoundedQueue<T>,
    output: &BoundedQueue<U>,
    handler: &F,
    policy: FailurePolicy,
    stats: &PoolStats,
    item: T,
) -> bool
where
    T: Clone + Send,
    U: Send,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, HandlerError>>,
{
    // Retain a copy only when the policy may need to re-enqueue.
    let retained = matches!(policy, FailurePolicy::Requeue).then(|| item.clone());

    match handler(item).await {
        Ok(result) => {
            if output.send(result).await.is_err() {
                warn!(worker = idx, "output closed, result dropped");
            }
            stats.processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            match policy {
                FailurePolicy::Drop => {
                    warn!(worker = idx, error = %err, "handler failed, item dropped");
                }
                FailurePolicy::Requeue => {
                    let item = retained.expect("retained copy exists under Requeue");
                    if input.send(item).await.is_err() {
                        warn!(worker = idx, error = %err, "handler failed, input closed, item dropped");
                    } else {
                        stats.requeued.fetch_add(1, Ordering::Relaxed);
                        warn!(worker = idx, error = %err, "handler failed, item requeued");
                    }
                }
            }
        }
    }

    if let Err(e) = input.task_done() {
        error!(worker = idx, error = %e, "input accounting underflow, worker stopping");
        return false;
    }
    true
}

/// Handle to a running pool: cancellation, join, and stats.
pub struct PoolHandle {
    cancel: CancellationToken,
    workers: JoinSet<()>,
    stats: Arc<PoolStats>,
}

impl PoolHandle {
    /// Signals all workers to stop once their current item completes.
    /// Workers blocked waiting for input exit immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a clone of the pool's cancellation token for external
    /// coordination.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the shared stats counters.
    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Waits for every worker to exit.
    ///
    /// Worker panics are logged, not propagated; one misbehaving handler
    /// does not take the join down with it.
    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("workers", &self.workers.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
