//! Priority queue of repositories waiting to be fetched.

use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

use crate::heap::{IndexedHeap, Keyed};
use crate::{ConfiguredRepo, Priority, QueueState};

#[derive(Debug, Clone)]
struct RepoUpdate {
    repo: ConfiguredRepo,
    priority: Priority,
    /// Enqueue order; renumbered when the priority is raised.
    seq: u64,
    /// Handed out by `acquire_next` and not yet removed.
    updating: bool,
}

impl Keyed for RepoUpdate {
    fn key(&self) -> &str {
        &self.repo.name
    }
}

/// Pending entries before in-flight ones, then higher priority, then FIFO.
fn update_less(a: &RepoUpdate, b: &RepoUpdate) -> bool {
    if a.updating != b.updating {
        return !a.updating;
    }
    if a.priority != b.priority {
        return a.priority > b.priority;
    }
    a.seq < b.seq
}

struct QueueInner {
    heap: IndexedHeap<RepoUpdate>,
    seq: u64,
}

impl QueueInner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Repositories waiting for a fetch, at most one entry per name.
pub struct UpdateQueue {
    inner: Mutex<QueueInner>,
    work: Notify,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: IndexedHeap::<RepoUpdate>::new(update_less),
                seq: 0,
            }),
            work: Notify::new(),
        }
    }

    /// Queue `repo` at `priority`.
    ///
    /// An entry already queued at an equal or higher priority is left as is;
    /// use [`update`](Self::update) to refresh its payload. A lower one is
    /// raised and moved to the back of its new priority band. Entries being
    /// fetched are left alone. Returns whether new work was signalled.
    pub fn enqueue(&self, repo: &ConfiguredRepo, priority: Priority) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .heap
            .get(&repo.name)
            .map(|u| (u.updating, u.priority));
        let Some((updating, current)) = existing else {
            let seq = inner.next_seq();
            inner.heap.push(RepoUpdate {
                repo: repo.clone(),
                priority,
                seq,
                updating: false,
            });
            drop(inner);
            trace!(repo = %repo.name, ?priority, "enqueued");
            self.work.notify_one();
            return true;
        };

        if updating || priority <= current {
            return false;
        }
        let seq = inner.next_seq();
        inner.heap.modify(&repo.name, |u| {
            u.repo = repo.clone();
            u.priority = priority;
            u.seq = seq;
        });
        drop(inner);

        trace!(repo = %repo.name, ?priority, "raised priority");
        self.work.notify_one();
        true
    }

    /// Replace the payload of a queued entry that is not being fetched.
    pub fn update(&self, repo: &ConfiguredRepo) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let pending = inner.heap.get(&repo.name).is_some_and(|u| !u.updating);
        pending && inner.heap.modify(&repo.name, |u| u.repo = repo.clone())
    }

    /// Remove the entry for `name` if its updating flag equals `updating`.
    pub fn remove(&self, name: &str, updating: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let matches = inner.heap.get(name).is_some_and(|u| u.updating == updating);
        matches && inner.heap.remove(name).is_some()
    }

    /// Mark the next pending entry as updating and return it.
    ///
    /// The caller must `remove(name, true)` once the fetch is done.
    pub fn acquire_next(&self) -> Option<ConfiguredRepo> {
        let mut inner = self.inner.lock().unwrap();
        let root = inner.heap.peek()?;
        if root.updating {
            return None;
        }
        let repo = root.repo.clone();
        inner.heap.modify_root(|u| u.updating = true);
        Some(repo)
    }

    /// Wait until work may be available.
    ///
    /// Signals coalesce: many enqueues before a wait wake it once, so the
    /// waiter must drain the queue after waking.
    pub async fn notified(&self) {
        self.work.notified().await;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, name: &str) -> Option<QueueState> {
        let inner = self.inner.lock().unwrap();
        let index = inner.heap.position(name)?;
        let u = inner.heap.get(name)?;
        Some(QueueState {
            priority: u.priority,
            updating: u.updating,
            index,
            total: inner.heap.len(),
        })
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        self.inner.lock().unwrap().heap.check_invariants();
    }
}
