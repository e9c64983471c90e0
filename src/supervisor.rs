//! Pipeline supervision and ordered shutdown.
//!
//! [`PipelineSupervisor`] owns the lifecycle of a chain of stages wired
//! through [`BoundedQueue`]s:
//!
//! ```text
//! source ──► queue ──► stage A ──► queue ──► stage B ──► queue ──► sink
//! ```
//!
//! Stages are registered in producer-to-consumer order and stopped in
//! the same order. For each stage the supervisor waits for the stage's
//! input queue to drain, cancels the stage's workers, joins them, and
//! only then closes the stage's output queue. Because a stage's input
//! can only be written by already-stopped upstream stages at that point,
//! no stage is ever torn down while something might still enqueue into
//! it, and no enqueued item is lost.
//!
//! Per-stage state is published through a [`watch`] channel:
//! `Idle → Running → Draining → Stopped`.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pool::PoolHandle;
use crate::queue::BoundedQueue;

/// Lifecycle state of a managed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Constructed, not yet running.
    Idle,
    /// Workers are consuming from the stage's input.
    Running,
    /// Upstream is finished; waiting for in-flight items to complete.
    Draining,
    /// All workers have exited and the output has been closed.
    Stopped,
}

/// A running stage under supervision.
///
/// Built from a spawned worker pool or a single long-lived task (such as
/// a batcher), plus the stage's input queue for drain tracking.
pub struct StageHandle {
    name: String,
    state_tx: watch::Sender<StageState>,
    cancel: CancellationToken,
    /// Resolves once the stage's input queue has fully drained.
    drain: BoxFuture<'static, ()>,
    /// Resolves once every stage task has exited.
    join: BoxFuture<'static, ()>,
    /// Closes the stage's output queue, cascading shutdown downstream.
    close_output: Option<Box<dyn FnOnce() + Send>>,
}

impl StageHandle {
    /// Wraps a spawned [`WorkerPool`](crate::pool::WorkerPool) as a
    /// supervised stage.
    pub fn from_pool<T>(
        name: impl Into<String>,
        input: Arc<BoundedQueue<T>>,
        pool: PoolHandle,
    ) -> Self
    where
        T: Send + Sync + 'static,
    {
        let name = name.into();
        let cancel = pool.cancellation_token();
        let drain = {
            let input = Arc::clone(&input);
            async move { input.join().await }.boxed()
        };
        let join = pool.join().boxed();
        Self::new_inner(name, cancel, drain, join)
    }

    /// Wraps a single long-lived task (a batcher loop, a sink writer) as
    /// a supervised stage.
    ///
    /// Close-driven tasks ignore the cancellation token and exit when
    /// their input closes; cancelling them is a harmless no-op.
    pub fn from_task<T>(
        name: impl Into<String>,
        input: Arc<BoundedQueue<T>>,
        task: JoinHandle<()>,
    ) -> Self
    where
        T: Send + Sync + 'static,
    {
        let name = name.into();
        let stage_name = name.clone();
        let drain = {
            let input = Arc::clone(&input);
            async move { input.join().await }.boxed()
        };
        let join = async move {
            if let Err(e) = task.await {
                error!(stage = %stage_name, error = %e, "stage task panicked");
            }
        }
        .boxed();
        Self::new_inner(name, CancellationToken::new(), drain, join)
    }

    fn new_inner(
        name: String,
        cancel: CancellationToken,
        drain: BoxFuture<'static, ()>,
        join: BoxFuture<'static, ()>,
    ) -> Self {
        let (state_tx, _) = watch::channel(StageState::Idle);
        // The tasks behind this handle are already spawned.
        state_tx.send_replace(StageState::Running);
        Self {
            name,
            state_tx,
            cancel,
            drain,
            join,
            close_output: None,
        }
    }

    /// Registers the stage's output queue so the supervisor closes it
    /// once the stage stops, signalling end-of-stream downstream.
    pub fn with_output<U>(mut self, output: Arc<BoundedQueue<U>>) -> Self
    where
        U: Send + Sync + 'static,
    {
        self.close_output = Some(Box::new(move || output.close()));
        self
    }

    /// Returns the stage's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to the stage's lifecycle state.
    pub fn state(&self) -> watch::Receiver<StageState> {
        self.state_tx.subscribe()
    }
}

impl std::fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageHandle")
            .field("name", &self.name)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

/// Composes stages into a directed chain and owns the shutdown sequence.
#[derive(Default)]
pub struct PipelineSupervisor {
    stages: Vec<StageHandle>,
}

impl PipelineSupervisor {
    /// Creates a supervisor with no stages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage. Stages must be registered in
    /// producer-to-consumer order; shutdown walks them in the same
    /// order.
    pub fn register(&mut self, stage: StageHandle) {
        info!(stage = %stage.name, "stage registered");
        self.stages.push(stage);
    }

    /// Returns the number of registered stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Drives the pipeline to a deterministic stop.
    ///
    /// The caller is responsible for finishing the external source first
    /// (no more sends into the first stage's input). For each stage, in
    /// registration order: wait for the input to drain, cancel and join
    /// the workers, close the output. By the time a stage is cancelled,
    /// everything upstream has already stopped, so nothing can enqueue
    /// into it anymore.
    pub async fn run_to_completion(mut self) {
        for mut stage in std::mem::take(&mut self.stages) {
            stage.state_tx.send_replace(StageState::Draining);
            info!(stage = %stage.name, "draining stage");

            (&mut stage.drain).await;
            stage.cancel.cancel();
            (&mut stage.join).await;

            if let Some(close_output) = stage.close_output.take() {
                close_output();
            }
            stage.state_tx.send_replace(StageState::Stopped);
            info!(stage = %stage.name, "stage stopped");
        }
        info!("pipeline shut down");
    }

    /// Cancels every stage immediately without draining.
    ///
    /// For fatal errors only: in-flight items finish their current
    /// handler invocation, but pending queue contents are abandoned.
    pub fn abort(&self) {
        for stage in &self.stages {
            stage.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for PipelineSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSupervisor")
            .field("stages", &self.stages)
            .finish()
    }
}
