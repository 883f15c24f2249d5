//! Counting semaphore whose capacity can change at runtime.
//!
//! Lowering the limit cancels the most recently acquired permits above the
//! new limit. Their holders observe this through [`Permit::cancelled`]; the
//! slot is freed immediately.

use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, watch};
use tracing::debug;

use crate::LimiterError;

struct Held {
    id: u64,
    cancel: watch::Sender<bool>,
}

struct LimiterState {
    limit: usize,
    next_id: u64,
    /// Oldest first.
    held: Vec<Held>,
}

struct Shared {
    state: Mutex<LimiterState>,
    released: Notify,
}

/// Global bound on concurrent fetches.
#[derive(Clone)]
pub struct MutableLimiter {
    shared: Arc<Shared>,
}

impl MutableLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LimiterState {
                    limit,
                    next_id: 0,
                    held: Vec::new(),
                }),
                released: Notify::new(),
            }),
        }
    }

    /// Wait for a free slot, giving up once `shutdown` is true.
    pub async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Permit, LimiterError> {
        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();

            if let Some(permit) = self.try_acquire() {
                return Ok(permit);
            }

            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => return Err(LimiterError::Cancelled),
                _ = &mut released => {}
            }
        }
    }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.shared.state.lock().unwrap();
        if state.held.len() >= state.limit {
            return None;
        }
        state.next_id += 1;
        let id = state.next_id;
        let (cancel, cancelled) = watch::channel(false);
        state.held.push(Held { id, cancel });
        Some(Permit {
            id,
            shared: Arc::clone(&self.shared),
            cancelled,
        })
    }

    /// Change the capacity, cancelling the newest permits above it.
    pub fn set_limit(&self, limit: usize) {
        let mut state = self.shared.state.lock().unwrap();
        let previous = state.limit;
        state.limit = limit;
        let mut cancelled = 0;
        while state.held.len() > limit {
            if let Some(held) = state.held.pop() {
                held.cancel.send_replace(true);
                cancelled += 1;
            }
        }
        drop(state);

        if limit != previous {
            debug!(previous, limit, cancelled, "concurrency limit changed");
        }
        if limit > previous {
            self.shared.released.notify_waiters();
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.state.lock().unwrap().limit
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().unwrap().held.len()
    }
}

/// One acquired slot, released on drop.
pub struct Permit {
    id: u64,
    shared: Arc<Shared>,
    cancelled: watch::Receiver<bool>,
}

impl Permit {
    /// Resolves once a lower limit has cancelled this permit.
    pub async fn cancelled(&mut self) {
        // The sender only goes away after flagging cancellation.
        let _ = self.cancelled.wait_for(|c| *c).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        let before = state.held.len();
        state.held.retain(|h| h.id != self.id);
        let freed = state.held.len() < before;
        drop(state);
        if freed {
            self.shared.released.notify_waiters();
        }
    }
}
