//! Bounded FIFO work queue with completion tracking.
//!
//! [`BoundedQueue`] is the channel every pipeline stage reads from and
//! writes to. It differs from a plain mpsc channel in two ways:
//!
//! - **Completion tracking.** Every [`send`] increments an in-flight
//!   counter; consumers call [`task_done`] once an item is fully
//!   processed. [`join`] suspends until the counts balance, which is how
//!   the supervisor knows a stage has drained.
//! - **Explicit close.** [`close`] flips a flag instead of smuggling a
//!   sentinel through the payload type. Receivers drain any pending items
//!   first, then observe [`Recv::Closed`].
//!
//! # Backpressure
//!
//! With a non-zero capacity, [`send`] suspends while the queue is full.
//! This is the mechanism that slows a fast producer down to the pace of
//! its consumer. Capacity 0 means unbounded.
//!
//! # Locking discipline
//!
//! All state lives behind one `std::sync::Mutex` and every operation is a
//! single critical section. The lock is never held across an await point;
//! waiting happens on [`tokio::sync::Notify`] with the
//! notified-before-check pattern, so wakeups between releasing the lock
//! and suspending are not lost.
//!
//! [`send`]: BoundedQueue::send
//! [`task_done`]: BoundedQueue::task_done
//! [`join`]: BoundedQueue::join
//! [`close`]: BoundedQueue::close

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{InvariantError, SendError};

/// Outcome of a suspending receive.
///
/// Modelled as an explicit tri-state rather than an error so that
/// cancellation and end-of-stream are ordinary control flow, checkable by
/// a `match`, and never conflated with item-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv<T> {
    /// An item was dequeued.
    Item(T),
    /// The queue is closed and empty; no further items will arrive.
    Closed,
    /// The caller's cancellation token fired while waiting.
    Cancelled,
}

impl<T> Recv<T> {
    /// Returns the item, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            Recv::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Returns true if this is `Recv::Closed`.
    pub fn is_closed(&self) -> bool {
        matches!(self, Recv::Closed)
    }
}

/// Mutable queue state, guarded by a single mutex.
struct State<T> {
    /// Pending items in FIFO order.
    items: VecDeque<T>,
    /// Items sent but not yet acknowledged via `task_done`.
    in_flight: usize,
    /// Set once by `close`; never cleared.
    closed: bool,
}

/// An ordered, capacity-limited queue of work items with an in-flight
/// counter.
///
/// Shared between stages as `Arc<BoundedQueue<T>>`; the producing stage
/// holds the sender role, the consuming stage the receiver role, but the
/// type itself does not enforce the split.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    /// Maximum pending items; 0 means unbounded.
    capacity: usize,
    /// Signalled once per enqueued item, and broadcast on close.
    not_empty: Notify,
    /// Signalled once per dequeued item, and broadcast on close.
    not_full: Notify,
    /// Broadcast whenever in-flight drops to zero.
    drained: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue.
    ///
    /// `capacity` bounds the number of *pending* items; 0 means
    /// unbounded. In-flight accounting is unaffected by capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                in_flight: 0,
                closed: false,
            }),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Enqueues an item, suspending while the queue is at capacity.
    ///
    /// Increments the in-flight counter and wakes one waiting receiver.
    /// Fails only if the queue has been closed, returning the item.
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        loop {
            // Created before the check so a wakeup arriving between the
            // unlock and the await is not lost.
            let notified = self.not_full.notified();
            {
                let mut state = self.state.lock().expect("queue mutex poisoned");
                if state.closed {
                    return Err(SendError(item));
                }
                if self.capacity == 0 || state.items.len() < self.capacity {
                    state.items.push_back(item);
                    state.in_flight += 1;
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Dequeues the next item, suspending while the queue is empty and
    /// open.
    ///
    /// Pending items are always delivered before [`Recv::Closed`] is
    /// observed. Never resolves to [`Recv::Cancelled`]; use
    /// [`recv_cancellable`](Self::recv_cancellable) for that.
    pub async fn recv(&self) -> Recv<T> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut state = self.state.lock().expect("queue mutex poisoned");
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Recv::Item(item);
                }
                if state.closed {
                    return Recv::Closed;
                }
            }
            notified.await;
        }
    }

    /// As [`recv`](Self::recv), but resolves to [`Recv::Cancelled`] if
    /// the token fires while waiting.
    ///
    /// An item already dequeued is always returned; cancellation only
    /// interrupts the wait, never discards work.
    pub async fn recv_cancellable(&self, cancel: &CancellationToken) -> Recv<T> {
        tokio::select! {
            outcome = self.recv() => outcome,
            _ = cancel.cancelled() => Recv::Cancelled,
        }
    }

    /// Acknowledges one previously enqueued item as fully processed.
    ///
    /// Decrements the in-flight counter and releases [`join`](Self::join)
    /// waiters when it reaches zero. Calling this more times than items
    /// were enqueued is a caller bug and fails loudly.
    pub fn task_done(&self) -> Result<(), InvariantError> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.in_flight == 0 {
            return Err(InvariantError::TaskDoneUnderflow);
        }
        state.in_flight -= 1;
        if state.in_flight == 0 {
            drop(state);
            self.drained.notify_waiters();
        }
        Ok(())
    }

    /// Suspends until every enqueued item has been acknowledged via
    /// [`task_done`](Self::task_done).
    ///
    /// Returns immediately if nothing is in flight. All concurrent
    /// joiners are released together.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            {
                let state = self.state.lock().expect("queue mutex poisoned");
                if state.in_flight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue. Idempotent.
    ///
    /// Waiting receivers drain any pending items and then observe
    /// [`Recv::Closed`]; waiting senders fail with [`SendError`].
    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Returns the number of pending (not yet dequeued) items.
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").items.len()
    }

    /// Returns true if no items are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of items sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").in_flight
    }

    /// Returns true if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").closed
    }

    /// Returns the configured capacity (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("queue mutex poisoned");
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("pending", &state.items.len())
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .finish()
    }
}
