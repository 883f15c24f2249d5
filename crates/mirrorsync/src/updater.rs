//! Wiring the catalog sync into the fetch scheduler.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use mirrorsync_repos::{Diff, MemoryStore, Repo, Store, Syncer};
use mirrorsync_scheduler::{HttpFetchClient, SchedulerConfig, SourceRepoList, UpdateScheduler};

use crate::catalog::configured_repos_by_source;
use crate::{Config, ConfigError, UpdaterError};

/// Default time between sync passes.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps the catalog synced and every cataloged repository scheduled.
///
/// After each sync pass the stored catalog is re-read and handed to the
/// scheduler one source at a time.
pub struct Updater {
    syncer: Syncer,
    scheduler: Arc<UpdateScheduler>,
    store: Arc<dyn Store>,
    kinds: Vec<String>,
    sync_interval: Duration,
    synced: Mutex<Option<mpsc::Receiver<Diff<Repo>>>>,
    config_updates: Option<watch::Receiver<SchedulerConfig>>,
    /// Sources handed to the scheduler by the last refresh.
    fed: Mutex<BTreeSet<String>>,
}

impl Updater {
    pub fn new(syncer: Syncer, scheduler: Arc<UpdateScheduler>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let syncer = syncer.with_synced(tx);
        let store = syncer.store();
        Self {
            syncer,
            scheduler,
            store,
            kinds: Vec::new(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            synced: Mutex::new(Some(rx)),
            config_updates: None,
            fed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Assemble an updater backed by an in-memory catalog and the HTTP
    /// fetch backend at `config.fetcher_url`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let store = Arc::new(MemoryStore::new());
        let syncer = Syncer::new(config.sources()?, store)
            .with_source_timeout(config.syncer.source_timeout())
            .with_failure_policy(config.syncer.on_source_failure);
        let backend = Arc::new(HttpFetchClient::new(&config.fetcher_url)?);
        let scheduler = UpdateScheduler::with_config(backend, &config.scheduler)?;

        Ok(Self::new(syncer, Arc::new(scheduler))
            .with_kinds(config.syncer.kinds.clone())
            .with_sync_interval(config.syncer.interval()))
    }

    /// Only sync services of these kinds.
    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Apply scheduler settings published on `config` while running.
    pub fn with_config_updates(mut self, config: watch::Receiver<SchedulerConfig>) -> Self {
        self.config_updates = Some(config);
        self
    }

    pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    pub fn syncer(&self) -> &Syncer {
        &self.syncer
    }

    /// Fetch `name` as soon as a slot frees up.
    pub fn update_once(&self, name: impl Into<String>, url: impl Into<String>) {
        self.scheduler.update_once(name, url);
    }

    /// Run the sync loop and the scheduler loops until `shutdown` flips to
    /// true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), UpdaterError> {
        let synced = self
            .synced
            .lock()
            .unwrap()
            .take()
            .ok_or(UpdaterError::AlreadyRunning)?;
        info!(interval = ?self.sync_interval, kinds = ?self.kinds, "updater started");

        // Schedule what is already stored before the first pass completes.
        self.refresh_schedule().await;

        let config_watch = async {
            if let Some(config) = self.config_updates.clone() {
                self.scheduler.watch_config(config, shutdown.clone()).await;
            }
        };

        tokio::join!(
            self.syncer.run(&self.kinds, self.sync_interval, shutdown.clone()),
            self.scheduler.run_schedule_loop(shutdown.clone()),
            Arc::clone(&self.scheduler).run_update_loop(shutdown.clone()),
            self.follow_catalog(synced, shutdown.clone()),
            config_watch,
        );

        info!("updater stopped");
        Ok(())
    }

    async fn follow_catalog(
        &self,
        mut synced: mpsc::Receiver<Diff<Repo>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                diff = synced.recv() => {
                    let Some(diff) = diff else { break };
                    debug!(repos = diff.len(), changed = !diff.is_empty(), "sync pass finished");
                    self.refresh_schedule().await;
                }
            }
        }
    }

    /// Hand the stored catalog to the scheduler, one source at a time.
    ///
    /// Sources that no longer list anything get an empty list so their
    /// repositories are unscheduled.
    pub async fn refresh_schedule(&self) -> (usize, usize) {
        let repos = match self.store.list_repos(&[]).await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(error = %e, "failed to read catalog");
                return (0, 0);
            }
        };

        let by_source = configured_repos_by_source(&repos);
        let current: BTreeSet<String> = by_source.keys().cloned().collect();
        let vanished: Vec<String> = {
            let mut fed = self.fed.lock().unwrap();
            let vanished = fed.difference(&current).cloned().collect();
            *fed = current;
            vanished
        };

        let (mut enqueued, mut dequeued) = (0, 0);
        let lists = by_source
            .into_iter()
            .chain(vanished.into_iter().map(|urn| (urn, SourceRepoList::new())));
        for (urn, list) in lists {
            let (enq, deq) = self.scheduler.update_source(&urn, list);
            enqueued += enq;
            dequeued += deq;
        }
        debug!(repos = repos.len(), enqueued, dequeued, "refreshed schedule");
        (enqueued, dequeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mirrorsync_repos::{ExternalService, Source, Sources, StaticSource};
    use mirrorsync_scheduler::{ConfiguredRepo, FetchBackend, FetchError, RepoUpdateResponse};
    use pretty_assertions::assert_eq;

    struct Idle;

    #[async_trait]
    impl FetchBackend for Idle {
        async fn request_repo_update(
            &self,
            _: &ConfiguredRepo,
            _: Duration,
        ) -> Result<RepoUpdateResponse, FetchError> {
            Ok(RepoUpdateResponse::default())
        }

        async fn is_repo_cloned(&self, _: &str) -> Result<bool, FetchError> {
            Ok(false)
        }

        async fn list_cloned(&self) -> Result<Vec<String>, FetchError> {
            Ok(Vec::new())
        }

        async fn remove(&self, _: &str) -> Result<(), FetchError> {
            Ok(())
        }
    }

    fn source(id: i64, repos: &[&str]) -> StaticSource {
        let service = ExternalService::new(id, "OTHER", "config").unwrap();
        repos
            .iter()
            .try_fold(StaticSource::new(service), |s, name| {
                s.with_repo(*name, format!("https://git.example.com/{name}"))
            })
            .unwrap()
    }

    fn updater(sources: Vec<StaticSource>) -> Updater {
        let sources = Sources::new(sources.into_iter().map(|s| Arc::new(s) as Arc<dyn Source>).collect());
        let syncer = Syncer::new(sources, Arc::new(MemoryStore::new()));
        Updater::new(syncer, Arc::new(UpdateScheduler::new(Arc::new(Idle))))
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_schedules_every_cataloged_repo() {
        let updater = updater(vec![source(1, &["a", "b"]), source(2, &["c"])]);
        updater.syncer().sync(&[]).await.unwrap();

        assert_eq!(updater.refresh_schedule().await, (3, 0));
        assert_eq!(updater.scheduler().schedule().len(), 3);

        // Unchanged catalog, nothing to do.
        assert_eq!(updater.refresh_schedule().await, (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_source_is_unscheduled() {
        let updater = updater(vec![source(1, &["a"])]);
        updater.syncer().sync(&[]).await.unwrap();
        updater.refresh_schedule().await;

        // Soft-delete the only repo; its source drops out of the catalog.
        let mut rows = updater.store.list_repos(&[]).await.unwrap();
        rows[0].deleted_at = Some(chrono::Utc::now());
        updater.store.upsert_repos(&mut rows).await.unwrap();

        assert_eq!(updater.refresh_schedule().await, (0, 1));
        assert!(updater.scheduler().repo_info("a").is_none());
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let updater = updater(Vec::new());
        let (stop, rx) = watch::channel(true);
        updater.run(rx.clone()).await.unwrap();
        assert!(matches!(updater.run(rx).await, Err(UpdaterError::AlreadyRunning)));
        drop(stop);
    }
}
