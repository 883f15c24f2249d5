//! Due-time ordered schedule of periodic fetches.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::heap::{IndexedHeap, Keyed};
use crate::{ConfiguredRepo, ScheduleState};

/// Shortest interval between two scheduled fetches of a repository.
pub const MIN_DELAY: Duration = Duration::from_secs(45);

/// Longest interval between two scheduled fetches of a repository.
pub const MAX_DELAY: Duration = Duration::from_secs(8 * 60 * 60);

/// Slack when deciding whether an entry is due.
pub const DUE_TOLERANCE: Duration = Duration::from_millis(1);

/// Clamp an interval to `[MIN_DELAY, MAX_DELAY]`.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_DELAY, MAX_DELAY)
}

#[derive(Debug, Clone)]
struct ScheduledRepoUpdate {
    repo: ConfiguredRepo,
    interval: Duration,
    due: Instant,
}

impl Keyed for ScheduledRepoUpdate {
    fn key(&self) -> &str {
        &self.repo.name
    }
}

fn due_less(a: &ScheduledRepoUpdate, b: &ScheduledRepoUpdate) -> bool {
    a.due < b.due
}

/// Repositories fetched periodically, soonest due first.
///
/// The schedule owns no timer task. Changes that may move the next due time
/// signal a wakeup; the promotion loop then re-reads [`Schedule::next_due`].
pub struct Schedule {
    heap: Mutex<IndexedHeap<ScheduledRepoUpdate>>,
    wakeup: Notify,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(IndexedHeap::<ScheduledRepoUpdate>::new(due_less)),
            wakeup: Notify::new(),
        }
    }

    /// Schedule `repo` one [`MIN_DELAY`] from now, unless already scheduled.
    pub fn add(&self, repo: &ConfiguredRepo) -> bool {
        let mut heap = self.heap.lock().unwrap();
        if heap.position(&repo.name).is_some() {
            return false;
        }
        heap.push(ScheduledRepoUpdate {
            repo: repo.clone(),
            interval: MIN_DELAY,
            due: Instant::now() + MIN_DELAY,
        });
        drop(heap);
        trace!(repo = %repo.name, "scheduled");
        self.reschedule_timer();
        true
    }

    /// Replace the payload of a scheduled repository, keeping its timing.
    pub fn update(&self, repo: &ConfiguredRepo) -> bool {
        self.heap
            .lock()
            .unwrap()
            .modify(&repo.name, |s| s.repo = repo.clone())
    }

    /// Set the interval (clamped) and make the repository due one interval
    /// from now.
    pub fn update_interval(&self, name: &str, interval: Duration) -> bool {
        let interval = clamp_interval(interval);
        let due = Instant::now() + interval;
        let found = self.heap.lock().unwrap().modify(name, |s| {
            s.interval = interval;
            s.due = due;
        });
        if found {
            trace!(repo = %name, ?interval, "interval updated");
            self.reschedule_timer();
        }
        found
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut heap = self.heap.lock().unwrap();
        let was_root = heap.position(name) == Some(0);
        let removed = heap.remove(name).is_some();
        drop(heap);
        if was_root {
            self.reschedule_timer();
        }
        removed
    }

    /// Wake the promotion loop so it re-arms for the soonest due entry.
    pub fn reschedule_timer(&self) {
        self.wakeup.notify_one();
    }

    /// Due time of the soonest entry.
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.lock().unwrap().peek().map(|s| s.due)
    }

    /// Take every entry due at `now`, pushing each one interval further out.
    pub fn pop_due(&self, now: Instant) -> Vec<ConfiguredRepo> {
        let mut heap = self.heap.lock().unwrap();
        let mut due = Vec::new();
        while let Some(root) = heap.peek() {
            if root.due > now + DUE_TOLERANCE {
                break;
            }
            due.push(root.repo.clone());
            heap.modify_root(|s| s.due = now + s.interval);
        }
        due
    }

    /// Wait for a [`Schedule::reschedule_timer`] signal.
    pub async fn rescheduled(&self) {
        self.wakeup.notified().await;
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }

    pub fn state(&self, name: &str) -> Option<ScheduleState> {
        let heap = self.heap.lock().unwrap();
        let index = heap.position(name)?;
        let s = heap.get(name)?;
        Some(ScheduleState {
            due: s.due,
            interval: s.interval,
            index,
            total: heap.len(),
        })
    }
}
