//! The updater end to end: sources, catalog, schedule and fetch backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio::time::sleep;

use mirrorsync::Updater;
use mirrorsync_repos::{
    ExternalRepoSpec, ExternalService, MemoryStore, Repo, Source, SourceError, Sources, Store,
    Syncer,
};
use mirrorsync_scheduler::{
    ConfiguredRepo, FetchBackend, FetchError, RepoUpdateResponse, SchedulerConfig, UpdateScheduler,
};

/// A code host whose listing the test can change.
struct MutableSource {
    service: ExternalService,
    names: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MutableSource {
    fn new(names: &[&str]) -> Self {
        Self::with_id(1, names)
    }

    fn with_id(id: i64, names: &[&str]) -> Self {
        Self {
            service: ExternalService::new(id, "GITHUB", "GitHub").unwrap(),
            names: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            failing: AtomicBool::new(false),
        }
    }

    fn set(&self, names: &[&str]) {
        *self.names.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }
}

#[async_trait]
impl Source for MutableSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self) -> Result<Vec<Repo>, SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Unauthorized);
        }
        let urn = self.service.urn();
        Ok(self
            .names
            .lock()
            .unwrap()
            .iter()
            .map(|name| {
                Repo::new(format!("github.com/{name}"))
                    .with_external(ExternalRepoSpec::new(name.clone(), "github", urn.clone()))
                    .with_source(urn.clone(), format!("https://github.com/{name}"))
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl FetchBackend for RecordingBackend {
    async fn request_repo_update(
        &self,
        repo: &ConfiguredRepo,
        _since: Duration,
    ) -> Result<RepoUpdateResponse, FetchError> {
        self.calls.lock().unwrap().push(repo.name.clone());
        let fetched = Utc::now();
        Ok(RepoUpdateResponse {
            last_fetched: Some(fetched),
            last_changed: Some(fetched - chrono::Duration::minutes(10)),
            error: None,
        })
    }

    async fn is_repo_cloned(&self, _name: &str) -> Result<bool, FetchError> {
        Ok(true)
    }

    async fn list_cloned(&self) -> Result<Vec<String>, FetchError> {
        Ok(Vec::new())
    }

    async fn remove(&self, _name: &str) -> Result<(), FetchError> {
        Ok(())
    }
}

struct Fixture {
    updater: Arc<Updater>,
    source: Arc<MutableSource>,
    store: Arc<MemoryStore>,
    backend: Arc<RecordingBackend>,
}

fn fixture(names: &[&str]) -> Fixture {
    let source = Arc::new(MutableSource::new(names));
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(RecordingBackend::default());

    let syncer = Syncer::new(Sources::new(vec![source.clone() as Arc<dyn Source>]), store.clone());
    let scheduler = Arc::new(UpdateScheduler::new(backend.clone()));
    let updater = Updater::new(syncer, scheduler).with_sync_interval(Duration::from_secs(60));

    Fixture {
        updater: Arc::new(updater),
        source,
        store,
        backend,
    }
}

#[tokio::test(start_paused = true)]
async fn test_synced_repos_are_fetched_and_rescheduled() {
    let f = fixture(&["acme/a", "acme/b"]);
    let (stop, shutdown) = watch::channel(false);
    let run = tokio::spawn({
        let updater = Arc::clone(&f.updater);
        async move { updater.run(shutdown).await }
    });

    sleep(Duration::from_secs(1)).await;
    assert_eq!(f.backend.count("github.com/acme/a"), 1);
    assert_eq!(f.backend.count("github.com/acme/b"), 1);

    // Ten minutes between change and fetch: refetch in five.
    let state = f
        .updater
        .scheduler()
        .repo_info("github.com/acme/a")
        .unwrap()
        .schedule
        .unwrap();
    assert_eq!(state.interval, Duration::from_secs(5 * 60));

    sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(f.backend.count("github.com/acme/a"), 2);

    stop.send_replace(true);
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repo_gone_from_source_is_unscheduled() {
    let f = fixture(&["acme/a", "acme/b"]);
    let (stop, shutdown) = watch::channel(false);
    let run = tokio::spawn({
        let updater = Arc::clone(&f.updater);
        async move { updater.run(shutdown).await }
    });

    sleep(Duration::from_secs(1)).await;
    assert_eq!(f.updater.scheduler().schedule().len(), 2);

    f.source.set(&["acme/a"]);
    sleep(Duration::from_secs(61)).await;

    assert!(f.updater.scheduler().repo_info("github.com/acme/b").is_none());
    assert_eq!(f.updater.scheduler().schedule().len(), 1);

    let rows = f.store.all_repos().await;
    let b = rows.iter().find(|r| r.name == "github.com/acme/b").unwrap();
    assert!(b.is_deleted());

    stop.send_replace(true);
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repo_dropped_by_one_of_two_sources_stays_scheduled() {
    let one = Arc::new(MutableSource::new(&["acme/shared"]));
    let two = Arc::new(MutableSource::with_id(2, &["acme/shared"]));
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(RecordingBackend::default());
    let syncer = Syncer::new(
        Sources::new(vec![one.clone() as Arc<dyn Source>, two as Arc<dyn Source>]),
        store.clone(),
    );
    let updater = Arc::new(
        Updater::new(syncer, Arc::new(UpdateScheduler::new(backend)))
            .with_sync_interval(Duration::from_secs(60)),
    );

    let (stop, shutdown) = watch::channel(false);
    let run = tokio::spawn({
        let updater = Arc::clone(&updater);
        async move { updater.run(shutdown).await }
    });

    sleep(Duration::from_secs(1)).await;
    assert_eq!(store.all_repos().await[0].sources.len(), 2);

    one.set(&[]);
    sleep(Duration::from_secs(61)).await;

    let rows = store.all_repos().await;
    assert_eq!(
        rows[0].sources.keys().cloned().collect::<Vec<_>>(),
        vec!["extsvc:github:2"]
    );
    assert!(!rows[0].is_deleted());
    let info = updater.scheduler().repo_info("github.com/acme/shared").unwrap();
    assert!(info.schedule.is_some());

    stop.send_replace(true);
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failing_source_keeps_stored_repos_scheduled() {
    let f = fixture(&[]);
    f.source.failing.store(true, Ordering::SeqCst);
    let mut rows = vec![
        Repo::new("github.com/acme/old").with_source("extsvc:github:1", "https://github.com/acme/old"),
    ];
    f.store.upsert_repos(&mut rows).await.unwrap();

    let (stop, shutdown) = watch::channel(false);
    let run = tokio::spawn({
        let updater = Arc::clone(&f.updater);
        async move { updater.run(shutdown).await }
    });

    sleep(Duration::from_secs(1)).await;
    assert_eq!(f.backend.count("github.com/acme/old"), 1);
    assert!(f.updater.scheduler().repo_info("github.com/acme/old").is_some());
    assert!(!f.store.all_repos().await[0].is_deleted());

    stop.send_replace(true);
    run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_update_and_live_config() {
    let source = Arc::new(MutableSource::new(&[]));
    let backend = Arc::new(RecordingBackend::default());
    let syncer = Syncer::new(
        Sources::new(vec![source as Arc<dyn Source>]),
        Arc::new(MemoryStore::new()),
    );
    let (config_tx, config_rx) = watch::channel(SchedulerConfig::default());
    let updater = Arc::new(
        Updater::new(syncer, Arc::new(UpdateScheduler::new(backend.clone())))
            .with_config_updates(config_rx),
    );

    let (stop, shutdown) = watch::channel(false);
    let run = tokio::spawn({
        let updater = Arc::clone(&updater);
        async move { updater.run(shutdown).await }
    });

    updater.update_once("github.com/acme/urgent", "https://github.com/acme/urgent");
    sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.count("github.com/acme/urgent"), 1);

    config_tx.send_replace(SchedulerConfig {
        max_concurrent_fetches: 1,
        ..Default::default()
    });
    sleep(Duration::from_millis(10)).await;
    assert_eq!(updater.scheduler().limiter().limit(), 1);

    stop.send_replace(true);
    run.await.unwrap().unwrap();
}
