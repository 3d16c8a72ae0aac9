//! Bounded, drop-oldest SPSC queue connecting adjacent pipeline stages.
//!
//! `tokio::mpsc`'s bounded channel blocks the sender when full; spec §5
//! requires every stage to never block and instead evict the oldest pending
//! batch while counting the eviction as an overrun. This wraps a fixed-size
//! deque behind a `tokio::sync::Notify` so the consumer side can still
//! `await` cheaply, modeled on the teacher's per-stage queue split in
//! `audio/mixer/pipeline/queue_types.rs` (one queue type per pipeline
//! boundary) but with overwrite semantics instead of unbounded growth.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Shared<T> {
    queue: parking_lot::Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    overruns: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

pub struct OverwritingSender<T> {
    shared: Arc<Shared<T>>,
}

pub struct OverwritingReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a bounded channel of `capacity` batches (spec §5 default: 4).
pub fn channel<T>(capacity: usize) -> (OverwritingSender<T>, OverwritingReceiver<T>) {
    let shared = Arc::new(Shared {
        queue: parking_lot::Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        capacity: capacity.max(1),
        notify: Notify::new(),
        overruns: AtomicU64::new(0),
        closed: std::sync::atomic::AtomicBool::new(false),
    });
    (
        OverwritingSender { shared: shared.clone() },
        OverwritingReceiver { shared },
    )
}

impl<T> OverwritingSender<T> {
    /// Pushes a batch. If full, evicts the oldest entry and increments the
    /// overrun counter -- this call never blocks or fails.
    pub fn push(&self, item: T) {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            queue.pop_front();
            self.shared.overruns.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(item);
        drop(queue);
        self.shared.notify.notify_one();
    }

    pub fn overrun_count(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.notify.notify_waiters();
    }
}

impl<T> Clone for OverwritingSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> OverwritingReceiver<T> {
    /// Awaits the next batch, or `None` once the sender has closed and the
    /// queue has drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.shared.queue.lock().pop_front() {
                return Some(item);
            }
            if self.shared.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn overrun_count(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}
