//! # Event Dispatcher
//!
//! Per-listener fan-out of [`MachineEvent`]s.
//!
//! ## Architecture
//!
//! - `dispatch` is synchronous: it stamps the event with a sequence number and
//!   pushes it into every listener's queue, never awaiting anything.
//! - Every listener owns a bounded min-heap ordered by
//!   `(occurred_at, sequence)` and a worker task draining it in that order.
//! - A full queue drops the incoming event and counts the drop.
//! - A listener invocation that errors, panics or exceeds the configured
//!   timeout is logged and counted; the worker carries on with the next event.
//! - `shutdown` stops intake, lets workers drain what is queued and waits
//!   for them.

use super::{EventListener, MachineEvent};
use crate::config::EngineConfig;
use crate::schematic::MachineValue;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct QueuedEvent<S, I> {
    occurred_at: DateTime<Utc>,
    sequence: u64,
    event: Arc<MachineEvent<S, I>>,
}

impl<S, I> PartialEq for QueuedEvent<S, I> {
    fn eq(&self, other: &Self) -> bool {
        self.occurred_at == other.occurred_at && self.sequence == other.sequence
    }
}

impl<S, I> Eq for QueuedEvent<S, I> {}

impl<S, I> PartialOrd for QueuedEvent<S, I> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<S, I> Ord for QueuedEvent<S, I> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.occurred_at
            .cmp(&other.occurred_at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Default)]
struct ListenerCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
}

struct ListenerQueue<S, I> {
    name: String,
    heap: Mutex<BinaryHeap<Reverse<QueuedEvent<S, I>>>>,
    notify: Notify,
    busy: AtomicBool,
    counters: ListenerCounters,
}

impl<S, I> ListenerQueue<S, I> {
    fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::SeqCst) && self.heap.lock().is_empty()
    }
}

struct DispatcherInner<S, I> {
    queues: Mutex<Vec<Arc<ListenerQueue<S, I>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sequence: AtomicU64,
    dispatched: AtomicU64,
    capacity: usize,
    listener_timeout: Duration,
    shutdown: CancellationToken,
}

impl<S, I> Drop for DispatcherInner<S, I> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Statistics for one registered listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub name: String,
    pub queued: usize,
    pub delivered: u64,
    pub failed: u64,
    pub panicked: u64,
    pub timed_out: u64,
    pub dropped: u64,
}

/// Dispatcher statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    pub listener_count: usize,
    pub queue_capacity: usize,
    pub dispatched: u64,
    pub dropped: u64,
    pub listeners: Vec<ListenerStats>,
}

/// Cheaply cloneable handle to a shared dispatcher
pub struct EventDispatcher<S, I> {
    inner: Arc<DispatcherInner<S, I>>,
}

impl<S: MachineValue, I: MachineValue> EventDispatcher<S, I> {
    pub fn new(capacity: usize, listener_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queues: Mutex::new(Vec::new()),
                workers: Mutex::new(Vec::new()),
                sequence: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                capacity: capacity.max(1),
                listener_timeout,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.event_queue_capacity, config.listener_timeout())
    }

    /// Register a listener and start its worker.
    ///
    /// Must be called from within a Tokio runtime. Events dispatched before
    /// registration are not replayed.
    pub fn add_listener(&self, listener: Arc<dyn EventListener<S, I>>) {
        let queue = Arc::new(ListenerQueue {
            name: listener.name().to_string(),
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            busy: AtomicBool::new(false),
            counters: ListenerCounters::default(),
        });

        let worker = tokio::spawn(run_worker(
            Arc::clone(&queue),
            listener,
            self.inner.listener_timeout,
            self.inner.shutdown.clone(),
        ));

        info!(
            listener = %queue.name,
            capacity = self.inner.capacity,
            "Event listener registered"
        );

        self.inner.queues.lock().push(queue);
        self.inner.workers.lock().push(worker);
    }

    /// Enqueue an event for every listener without waiting on any of them
    pub fn dispatch(&self, event: MachineEvent<S, I>) {
        if self.inner.shutdown.is_cancelled() {
            debug!(event_type = event.event_type(), "Dispatcher shut down, event discarded");
            return;
        }

        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
        let occurred_at = event.occurred_at();
        let event = Arc::new(event);

        for queue in self.inner.queues.lock().iter() {
            let mut heap = queue.heap.lock();
            if heap.len() >= self.inner.capacity {
                drop(heap);
                queue.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    listener = %queue.name,
                    event_type = event.event_type(),
                    machine_id = event.machine_id(),
                    capacity = self.inner.capacity,
                    "Listener queue full, event dropped"
                );
                continue;
            }

            heap.push(Reverse(QueuedEvent {
                occurred_at,
                sequence,
                event: Arc::clone(&event),
            }));
            drop(heap);
            queue.notify.notify_one();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.queues.lock().len()
    }

    /// True when no listener has queued or in-flight work
    pub fn is_idle(&self) -> bool {
        self.inner.queues.lock().iter().all(|queue| queue.is_idle())
    }

    /// Wait until every listener has processed what is queued so far
    pub async fn flush(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let listeners: Vec<ListenerStats> = self
            .inner
            .queues
            .lock()
            .iter()
            .map(|queue| ListenerStats {
                name: queue.name.clone(),
                queued: queue.heap.lock().len(),
                delivered: queue.counters.delivered.load(Ordering::Relaxed),
                failed: queue.counters.failed.load(Ordering::Relaxed),
                panicked: queue.counters.panicked.load(Ordering::Relaxed),
                timed_out: queue.counters.timed_out.load(Ordering::Relaxed),
                dropped: queue.counters.dropped.load(Ordering::Relaxed),
            })
            .collect();

        DispatcherStats {
            listener_count: listeners.len(),
            queue_capacity: self.inner.capacity,
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            dropped: listeners.iter().map(|l| l.dropped).sum(),
            listeners,
        }
    }

    /// Stop accepting events, drain the queues and wait for every worker
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        let count = workers.len();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Event listener worker terminated abnormally");
            }
        }

        info!(workers = count, "Event dispatcher shut down");
    }
}

impl<S: MachineValue, I: MachineValue> Default for EventDispatcher<S, I> {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl<S, I> Clone for EventDispatcher<S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, I> std::fmt::Debug for EventDispatcher<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.inner.queues.lock().len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

async fn run_worker<S: MachineValue, I: MachineValue>(
    queue: Arc<ListenerQueue<S, I>>,
    listener: Arc<dyn EventListener<S, I>>,
    listener_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        // Mark busy before popping so `is_idle` never sees an empty heap while
        // an event is between the heap and the listener.
        queue.busy.store(true, Ordering::SeqCst);
        let next = queue.heap.lock().pop();

        match next {
            Some(Reverse(item)) => {
                deliver(&queue, listener.as_ref(), &item.event, listener_timeout).await;
                queue.busy.store(false, Ordering::SeqCst);
            }
            None => {
                queue.busy.store(false, Ordering::SeqCst);
                if shutdown.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = queue.notify.notified() => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
    }

    debug!(listener = %queue.name, "Event listener worker stopped");
}

async fn deliver<S: MachineValue, I: MachineValue>(
    queue: &ListenerQueue<S, I>,
    listener: &dyn EventListener<S, I>,
    event: &MachineEvent<S, I>,
    listener_timeout: Duration,
) {
    let invocation = AssertUnwindSafe(listener.on_event(event)).catch_unwind();

    match timeout(listener_timeout, invocation).await {
        Ok(Ok(Ok(()))) => {
            queue.counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Ok(Err(e))) => {
            queue.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                listener = %queue.name,
                event_type = event.event_type(),
                machine_id = event.machine_id(),
                error = %e,
                "Event listener failed"
            );
        }
        Ok(Err(_)) => {
            queue.counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                listener = %queue.name,
                event_type = event.event_type(),
                machine_id = event.machine_id(),
                "Event listener panicked"
            );
        }
        Err(_) => {
            queue.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            error!(
                listener = %queue.name,
                event_type = event.event_type(),
                machine_id = event.machine_id(),
                timeout_ms = listener_timeout.as_millis() as u64,
                "Event listener timed out"
            );
        }
    }
}
