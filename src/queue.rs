//! Work Queue (spec §4.2): a deduplicating, rate-limited, in-flight-tracked
//! FIFO queue of `namespace/name` keys. This is a from-scratch
//! reimplementation of the classic `queue`/`dirty`/`processing` three-set
//! design used by most Kubernetes controller runtimes — public prior art,
//! not proprietary to any one codebase.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(60);

struct Inner {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Keys that became dirty again while they were processing; re-added
    /// to `queue` exactly once when `done` is called.
    reinsert_on_done: HashSet<String>,
    attempts: HashMap<String, u32>,
    shutting_down: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            reinsert_on_done: HashSet::new(),
            attempts: HashMap::new(),
            shutting_down: false,
        }
    }
}

/// A deduplicating, rate-limited, in-flight-tracked work queue of string
/// keys, exactly the semantics spec §4.2 describes.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key` now. A no-op if `key` is already queued.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut inner = self.inner.lock().unwrap();
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            inner.reinsert_on_done.insert(key);
        } else {
            inner.queue.push_back(key);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Enqueue `key` after this key's current exponential backoff delay.
    pub fn add_rate_limited(self: &std::sync::Arc<Self>, key: impl Into<String>) {
        let key = key.into();
        let attempt = {
            let mut inner = self.inner.lock().unwrap();
            let attempt = inner.attempts.entry(key.clone()).or_insert(0);
            let current = *attempt;
            *attempt = attempt.saturating_add(1);
            current
        };
        let delay = backoff(attempt);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.add(key);
        });
    }

    /// Blocks until a key is ready, or the queue has been shut down.
    /// Returns `None` on shutdown.
    pub async fn get(&self) -> Option<String> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `key` as done processing. If it was re-added while processing,
    /// it becomes eligible again exactly once.
    pub fn done(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.reinsert_on_done.remove(key) {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Resets the rate-limiter state for `key` (called on success).
    pub fn forget(&self, key: &str) {
        self.inner.lock().unwrap().attempts.remove(key);
    }

    /// Drains and disables further adds; subsequent `get` calls return
    /// `None` once the queue empties.
    pub fn shut_down(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutting_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Number of keys currently ready to be pulled by `get` (excludes
    /// in-flight and delayed-by-backoff keys).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

fn backoff(attempt: u32) -> Duration {
    let base_ms = BASE_DELAY.as_millis() as u64;
    let cap_ms = MAX_DELAY.as_millis() as u64;
    let pow = if attempt >= 63 { u64::MAX } else { 1u64 << attempt };
    let exp_ms = base_ms.saturating_mul(pow);
    Duration::from_millis(exp_ms.min(cap_ms))
}
