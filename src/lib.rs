//! Flowline: a bounded, multi-stage concurrent pipeline engine.
//!
//! Flowline moves units of work through producer/consumer stages with
//! flow control (backpressure, rate limiting, dynamic batching),
//! coordinates shared mutable state safely, and shuts down
//! deterministically without losing or duplicating work. It is a
//! single-process, in-memory concurrency library meant to be embedded
//! inside one executable, not a distributed queue or broker.
//!
//! # Architecture
//!
//! ```text
//! source ─► BoundedQueue ─► WorkerPool ─► BoundedQueue ─► Batcher ─► sink
//!               │          (rate-limited       │
//!               │           handlers)          │
//!               └── join() ◄── PipelineSupervisor ──► join() ──┘
//! ```
//!
//! # Components
//!
//! - [`BoundedQueue`]: ordered, capacity-limited work queue with
//!   completion tracking (`send` / `recv` / `task_done` / `join`) and an
//!   explicit close state.
//! - [`SlidingWindowLimiter`]: suspends callers so admissions never
//!   exceed `limit` events per rolling `interval`.
//! - [`Batcher`]: groups items into size- and time-bounded [`Batch`]es.
//! - [`WorkerPool`]: N concurrent workers bridging two queues through a
//!   user handler, with drain-then-cancel and sentinel shutdown modes.
//! - [`Frontier`]: deduplicated, capacity-capped admission gate for
//!   crawl-style workloads.
//! - [`PipelineSupervisor`]: composes stages into a chain and owns the
//!   ordered shutdown sequence.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowline::{BoundedQueue, PipelineSupervisor, StageHandle, WorkerPool};
//!
//! let input = Arc::new(BoundedQueue::new(100));
//! let output = Arc::new(BoundedQueue::new(100));
//!
//! let pool = WorkerPool::new(8)?;
//! let handle = pool.spawn(Arc::clone(&input), Arc::clone(&output), |item| async move {
//!     Ok(process(item).await?)
//! });
//!
//! let mut supervisor = PipelineSupervisor::new();
//! supervisor.register(
//!     StageHandle::from_pool("process", Arc::clone(&input), handle)
//!         .with_output(Arc::clone(&output)),
//! );
//!
//! // ... feed `input`, then:
//! supervisor.run_to_completion().await;
//! ```

pub mod batcher;
pub mod config;
pub mod error;
pub mod frontier;
pub mod limiter;
pub mod logging;
pub mod pool;
pub mod queue;
pub mod supervisor;

pub use batcher::{Batch, Batcher, FlushReason};
pub use config::PipelineConfig;
pub use error::{ConfigError, HandlerError, InvariantError, SendError};
pub use frontier::Frontier;
pub use limiter::SlidingWindowLimiter;
pub use pool::{FailurePolicy, PoolHandle, PoolStats, WorkerPool};
pub use queue::{BoundedQueue, Recv};
pub use supervisor::{PipelineSupervisor, StageHandle, StageState};

/// Version of the flowline library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
