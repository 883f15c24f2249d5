//! Update scheduler: promotion loop, dispatch loop and catalog sync.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};

use mirrorsync_repos::{Diff, Repo};

use crate::config::IntervalRules;
use crate::limiter::{MutableLimiter, Permit};
use crate::queue::UpdateQueue;
use crate::schedule::Schedule;
use crate::{
    ConfiguredRepo, FetchBackend, FetchError, Priority, RepoScheduleInfo, RepoUpdateResponse,
    SchedulerConfig, SchedulerError, SourceRepoList,
};

/// Pending wakeups a loop notification holds; further signals coalesce.
pub const NOTIFICATION_CAPACITY: usize = 1;

/// Bound on a single repository update request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Updates are skipped for repositories fetched more recently than this.
pub const MIN_FETCH_AGE: Duration = Duration::from_secs(1);

struct Settings {
    disable_auto_updates: bool,
    rules: IntervalRules,
}

/// Keeps mirrors fresh by fetching each known repository periodically.
///
/// Scheduled repositories are promoted into the update queue when due; the
/// dispatch loop drains the queue under a global concurrency limit and
/// feeds fetch results back into the schedule.
pub struct UpdateScheduler {
    schedule: Schedule,
    queue: UpdateQueue,
    limiter: MutableLimiter,
    backend: Arc<dyn FetchBackend>,
    /// Last repository list seen from each source.
    sources: Mutex<HashMap<String, SourceRepoList>>,
    settings: RwLock<Settings>,
}

impl UpdateScheduler {
    /// Create a scheduler with default settings.
    pub fn new(backend: Arc<dyn FetchBackend>) -> Self {
        let config = SchedulerConfig::default();
        Self {
            schedule: Schedule::new(),
            queue: UpdateQueue::new(),
            limiter: MutableLimiter::new(config.max_concurrent_fetches),
            backend,
            sources: Mutex::new(HashMap::new()),
            settings: RwLock::new(Settings {
                disable_auto_updates: config.disable_auto_updates,
                rules: IntervalRules::default(),
            }),
        }
    }

    pub fn with_config(backend: Arc<dyn FetchBackend>, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = Self::new(backend);
        scheduler.apply_config(config)?;
        Ok(scheduler)
    }

    /// Apply new settings. Invalid settings are rejected as a whole.
    pub fn apply_config(&self, config: &SchedulerConfig) -> Result<(), SchedulerError> {
        let rules = config.validate()?;
        self.limiter.set_limit(config.max_concurrent_fetches);
        {
            let mut settings = self.settings.write().unwrap();
            settings.disable_auto_updates = config.disable_auto_updates;
            settings.rules = rules;
        }
        // The promotion loop re-reads the auto-update flag on wakeup.
        self.schedule.reschedule_timer();
        info!(
            max_concurrent_fetches = config.max_concurrent_fetches,
            disable_auto_updates = config.disable_auto_updates,
            interval_rules = config.update_intervals.len(),
            "scheduler config applied"
        );
        Ok(())
    }

    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn limiter(&self) -> &MutableLimiter {
        &self.limiter
    }

    fn auto_updates_disabled(&self) -> bool {
        self.settings.read().unwrap().disable_auto_updates
    }

    /// Replace the repositories known from `source` with `new_list`.
    ///
    /// Repositories that left the list or were disabled are unscheduled and
    /// dropped from the queue unless a fetch is in flight or another source
    /// still lists them as enabled. Newly enabled ones
    /// are scheduled and queued at low priority; the rest only get their
    /// payload refreshed. Returns `(enqueued, dequeued)`.
    #[tracing::instrument(skip(self, new_list), fields(repos = new_list.len()))]
    pub fn update_source(&self, source: &str, mut new_list: SourceRepoList) -> (usize, usize) {
        new_list.retain(|name, _| {
            if name.is_empty() {
                warn!("ignoring repo without a name");
            }
            !name.is_empty()
        });

        let mut sources = self.sources.lock().unwrap();
        let prev_list = sources.remove(source).unwrap_or_default();

        let mut dequeued = 0;
        for (name, _) in prev_list.iter().filter(|(_, r)| r.enabled) {
            if new_list.get(name).is_some_and(|r| r.enabled) {
                continue;
            }
            // Still listed and enabled by another source.
            if sources.values().any(|list| list.get(name).is_some_and(|r| r.enabled)) {
                continue;
            }
            self.schedule.remove(name);
            self.queue.remove(name, false);
            dequeued += 1;
        }

        let mut enqueued = 0;
        for (name, repo) in new_list.iter().filter(|(_, r)| r.enabled) {
            if prev_list.get(name).is_some_and(|r| r.enabled) {
                if !self.schedule.update(repo) {
                    self.schedule.add(repo);
                }
                self.queue.update(repo);
            } else {
                if !self.schedule.add(repo) {
                    self.schedule.update(repo);
                }
                if !self.queue.enqueue(repo, Priority::Low) {
                    self.queue.update(repo);
                }
                enqueued += 1;
            }
        }

        if new_list.is_empty() {
            debug!("source has no repos left");
        } else {
            sources.insert(source.to_string(), new_list);
        }
        if enqueued > 0 || dequeued > 0 {
            info!(enqueued, dequeued, "updated source");
        }
        (enqueued, dequeued)
    }

    /// Fetch `name` as soon as possible, outside the periodic schedule.
    pub fn update_once(&self, name: impl Into<String>, url: impl Into<String>) {
        let repo = ConfiguredRepo::new(name, url);
        debug!(repo = %repo.name, "update requested");
        self.queue.enqueue(&repo, Priority::High);
    }

    /// Apply a catalog diff directly to the schedule and queue.
    pub fn update_from_diff(&self, diff: &Diff<Repo>) {
        for repo in &diff.deleted {
            self.remove(&repo.name);
        }
        for repo in diff.added.iter().chain(&diff.modified) {
            self.upsert(repo, true);
        }
        let mut known = 0;
        for repo in &diff.unmodified {
            if repo.is_deleted() {
                self.remove(&repo.name);
                continue;
            }
            known += 1;
            self.upsert(repo, false);
        }
        debug!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            deleted = diff.deleted.len(),
            known,
            "applied diff to schedule"
        );
    }

    fn upsert(&self, repo: &Repo, enqueue: bool) {
        if !repo.enabled || repo.is_deleted() {
            self.remove(&repo.name);
            return;
        }
        let configured = ConfiguredRepo::from(repo);
        let known = self.schedule.update(&configured);
        if !known {
            self.schedule.add(&configured);
        }
        if (!known || enqueue) && self.queue.enqueue(&configured, Priority::Low) {
            return;
        }
        self.queue.update(&configured);
    }

    fn remove(&self, name: &str) {
        self.schedule.remove(name);
        self.queue.remove(name, false);
    }

    /// Where `name` sits in the schedule and queue, if anywhere.
    pub fn repo_info(&self, name: &str) -> Option<RepoScheduleInfo> {
        let info = RepoScheduleInfo {
            schedule: self.schedule.state(name),
            queue: self.queue.state(name),
        };
        (info.schedule.is_some() || info.queue.is_some()).then_some(info)
    }

    /// Promote due repositories into the update queue until shutdown.
    pub async fn run_schedule_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!("schedule loop started");
        loop {
            let next_due = if self.auto_updates_disabled() {
                None
            } else {
                self.schedule.next_due()
            };
            let timer = async {
                match next_due {
                    Some(due) => sleep_until(due).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = self.schedule.rescheduled() => {}
                _ = timer => {}
            }

            if self.auto_updates_disabled() {
                continue;
            }
            let due = self.schedule.pop_due(Instant::now());
            for repo in &due {
                self.queue.enqueue(repo, Priority::Low);
            }
            if !due.is_empty() {
                debug!(count = due.len(), "promoted due repos");
            }
        }
        info!("schedule loop stopped");
    }

    /// Dispatch queued repositories to the fetch backend until shutdown.
    pub async fn run_update_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("update loop started");
        'outer: loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = self.queue.notified() => {}
            }

            loop {
                let Ok(permit) = self.limiter.acquire(&mut shutdown).await else {
                    break 'outer;
                };
                let Some(repo) = self.queue.acquire_next() else {
                    drop(permit);
                    break;
                };

                debug!(repo = %repo.name, "dispatching update");
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move { scheduler.dispatch(repo, permit).await });
            }
        }
        info!("update loop stopped");
    }

    async fn dispatch(&self, repo: ConfiguredRepo, mut permit: Permit) {
        let request = timeout(
            REQUEST_TIMEOUT,
            self.backend.request_repo_update(&repo, MIN_FETCH_AGE),
        );
        let result = tokio::select! {
            result = request => Some(result.unwrap_or(Err(FetchError::Timeout))),
            _ = permit.cancelled() => None,
        };
        drop(permit);
        self.queue.remove(&repo.name, true);

        match result {
            Some(Ok(response)) => self.record_fetch(&repo.name, &response),
            Some(Err(e)) => warn!(repo = %repo.name, error = %e, "repo update failed"),
            None => debug!(repo = %repo.name, "update cancelled by lower concurrency limit"),
        }
    }

    /// Adjust the interval of `name` from a fetch result.
    ///
    /// A matching interval rule wins; otherwise the interval is half the
    /// time between the last change and the last fetch.
    fn record_fetch(&self, name: &str, response: &RepoUpdateResponse) {
        let (Some(fetched), Some(changed)) = (response.last_fetched, response.last_changed) else {
            return;
        };
        let custom = self.settings.read().unwrap().rules.interval_for(name);
        let interval = custom.unwrap_or_else(|| (fetched - changed).to_std().unwrap_or_default() / 2);
        self.schedule.update_interval(name, interval);
    }

    /// Apply every configuration published on `config` until shutdown.
    pub async fn watch_config(
        &self,
        mut config: watch::Receiver<SchedulerConfig>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let current = config.borrow_and_update().clone();
            if let Err(e) = self.apply_config(&current) {
                warn!(error = %e, "ignoring invalid scheduler config");
            }

            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                changed = config.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

impl From<&Repo> for ConfiguredRepo {
    fn from(repo: &Repo) -> Self {
        let url = repo
            .sources
            .values()
            .next()
            .map(|info| info.clone_url.clone())
            .unwrap_or_default();
        ConfiguredRepo {
            name: repo.name.clone(),
            url,
            enabled: repo.enabled,
        }
    }
}
