//! Per-resource work queues.
//!
//! [`WorkQueues`] serializes all work sharing a key (a resource name, or
//! a group label) while letting distinct keys run in parallel on the
//! shared blocking pool:
//!
//! ```text
//!  run_with("lib.a", t1) ──►  ┌──────────────┐
//!  run_with("lib.a", t2) ──►  │ "lib.a" FIFO │──► worker (one at a time)
//!                             ├──────────────┤
//!  run_with("lib.b", t3) ──►  │ "lib.b" FIFO │──► worker (in parallel)
//!                             └──────────────┘
//! ```
//!
//! The first submission for a key creates its record and dispatches a
//! worker; the worker pops until the FIFO is empty, deletes the record,
//! and exits. Tasks always execute outside the lock.
//!
//! The acceptance flag lives inside the same mutex as the queue map, so
//! "service is accepting work" is checked atomically with the enqueue:
//! once [`WorkQueues::deactivate`] returns, no further task can slip in,
//! and [`WorkQueues::drain`] completes when the already-queued tail has
//! run out.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

/// A unit of serialized work.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueuesInner {
    accepting: bool,
    handle: Option<tokio::runtime::Handle>,
    queues: HashMap<String, VecDeque<Task>>,
}

/// Keyed FIFO queues executed on the shared blocking pool.
pub(crate) struct WorkQueues {
    inner: Arc<Mutex<QueuesInner>>,
    drained: Arc<Notify>,
}

impl WorkQueues {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueuesInner::default())),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Starts accepting work, dispatching workers on `handle`'s blocking
    /// pool.
    pub(crate) fn activate(&self, handle: tokio::runtime::Handle) {
        let mut inner = self.inner.lock();
        inner.accepting = true;
        inner.handle = Some(handle);
    }

    /// Stops accepting work. Queued tasks still run to completion.
    pub(crate) fn deactivate(&self) {
        self.inner.lock().accepting = false;
    }

    /// Schedules a task on the key's queue. Tasks sharing a key run in
    /// submission order, one at a time.
    ///
    /// Returns `false` without scheduling when the queues are not
    /// accepting work.
    pub(crate) fn run_with(&self, key: &str, task: Task) -> bool {
        let handle = {
            let mut inner = self.inner.lock();
            if !inner.accepting {
                return false;
            }
            if let Some(queue) = inner.queues.get_mut(key) {
                queue.push_back(task);
                return true;
            }
            let Some(handle) = inner.handle.clone() else {
                return false;
            };
            inner.queues.insert(key.to_string(), VecDeque::from_iter([task]));
            handle
        };
        self.spawn_worker(handle, key.to_string());
        true
    }

    /// Number of keys with queued or running work.
    pub(crate) fn active(&self) -> usize {
        self.inner.lock().queues.len()
    }

    /// Waits until every queue has run dry. Call after
    /// [`WorkQueues::deactivate`]; new work cannot arrive while waiting.
    pub(crate) async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.lock().queues.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn spawn_worker(&self, handle: tokio::runtime::Handle, key: String) {
        let inner = Arc::clone(&self.inner);
        let drained = Arc::clone(&self.drained);
        handle.spawn_blocking(move || loop {
            let task = {
                let mut guard = inner.lock();
                match guard.queues.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(task) => task,
                    None => {
                        guard.queues.remove(&key);
                        if guard.queues.is_empty() {
                            drained.notify_waiters();
                        }
                        return;
                    }
                }
            };
            task();
        });
    }
}
