//! Reconciling sourced repositories with the stored catalog.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::diff::{Diff, Matched};
use crate::{Repo, SourceErrors, Sources, Store, SyncError};

/// Default bound on a single source's listing.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(60);

/// What to do with stored repositories of a source whose listing failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailurePolicy {
    /// Keep them; they are reported as unmodified.
    #[default]
    RetainFailedSources,
    /// Treat them like any other repository no source lists.
    DeleteMissing,
}

/// Outcome of a sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// What changed, sorted.
    pub diff: Diff<Repo>,
    /// Sources that failed to list; the pass went ahead without them.
    pub source_errors: Option<SourceErrors>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Which services a pass heard from.
#[derive(Clone, Copy)]
struct PassScope<'a> {
    /// Services whose listing failed.
    failed: &'a BTreeSet<String>,
    /// Services whose entries are dropped from repos they no longer list.
    settled: &'a BTreeSet<String>,
}

/// Keeps the stored catalog in step with what the sources list.
pub struct Syncer {
    sources: Sources,
    store: Arc<dyn Store>,
    now: Clock,
    source_timeout: Duration,
    policy: SourceFailurePolicy,
    synced: Option<mpsc::Sender<Diff<Repo>>>,
}

impl fmt::Debug for Syncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Syncer")
            .field("sources", &self.sources.len())
            .field("source_timeout", &self.source_timeout)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Syncer {
    pub fn new(sources: Sources, store: Arc<dyn Store>) -> Self {
        Self {
            sources,
            store,
            now: Arc::new(Utc::now),
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            policy: SourceFailurePolicy::default(),
            synced: None,
        }
    }

    /// Use `now` for every timestamp written by a pass.
    pub fn with_clock(mut self, now: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.now = Arc::new(now);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: SourceFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Send every successful diff to `tx`.
    pub fn with_synced(mut self, tx: mpsc::Sender<Diff<Repo>>) -> Self {
        self.synced = Some(tx);
        self
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Run one reconciliation pass over the given kinds (all when empty).
    ///
    /// Store reads and writes share one transaction when the store offers
    /// them; any store error rolls the pass back.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, kinds: &[String]) -> Result<SyncReport, SyncError> {
        let sourced = self.sources.of_kinds(kinds).list_repos(self.source_timeout).await;
        let failed: BTreeSet<String> = sourced.errors.failed_urns().map(str::to_owned).collect();

        // Services whose word on which repos they list is final this pass.
        let mut settled = sourced.listed.clone();
        if self.policy == SourceFailurePolicy::DeleteMissing {
            settled.extend(failed.iter().cloned());
        }
        let scope = PassScope {
            failed: &failed,
            settled: &settled,
        };

        let diff = match self.store.transact().await? {
            Some(tx) => match self.apply(&*tx, kinds, sourced.repos, scope).await {
                Ok(diff) => {
                    tx.commit().await?;
                    diff
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "rollback failed");
                    }
                    return Err(e);
                }
            },
            None => self.apply(&*self.store, kinds, sourced.repos, scope).await?,
        };

        info!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            deleted = diff.deleted.len(),
            unmodified = diff.unmodified.len(),
            "synced repos"
        );

        if let Some(tx) = &self.synced {
            if tx.send(diff.clone()).await.is_err() {
                debug!("sync subscriber went away");
            }
        }

        let source_errors = (!sourced.errors.is_empty()).then_some(sourced.errors);
        Ok(SyncReport {
            diff,
            source_errors,
        })
    }

    async fn apply<S: Store + ?Sized>(
        &self,
        store: &S,
        kinds: &[String],
        sourced: Vec<Repo>,
        scope: PassScope<'_>,
    ) -> Result<Diff<Repo>, SyncError> {
        let stored = store.list_repos(kinds).await?;

        // Stored rows keep their ID, creation time and enabled flag.
        let mut diff = Diff::new_with(stored, sourced, |mut stored, sourced| {
            let dropped = stored.drop_unlisted_sources(&sourced, scope.settled);
            if dropped || stored.needs_update(&sourced) {
                stored.update_from(&sourced);
                Matched::Modified(stored)
            } else {
                Matched::Unmodified(stored)
            }
        });

        if self.policy == SourceFailurePolicy::RetainFailedSources && !scope.failed.is_empty() {
            let (retained, deleted): (Vec<_>, Vec<_>) = std::mem::take(&mut diff.deleted)
                .into_iter()
                .partition(|r| r.sources.keys().any(|urn| scope.failed.contains(urn)));
            if !retained.is_empty() {
                warn!(count = retained.len(), "keeping repos of failed sources");
            }
            diff.deleted = deleted;
            diff.unmodified.extend(retained);
        }

        let now = (self.now)();
        for repo in &mut diff.added {
            repo.created_at = Some(now);
            repo.updated_at = Some(now);
            repo.deleted_at = None;
        }
        for repo in &mut diff.modified {
            repo.updated_at = Some(now);
            repo.deleted_at = None;
        }
        for repo in &mut diff.deleted {
            repo.updated_at = Some(now);
            repo.deleted_at = Some(now);
        }

        store.upsert_repos(&mut diff.deleted).await?;
        store.upsert_repos(&mut diff.modified).await?;
        store.upsert_repos(&mut diff.added).await?;

        diff.sort();
        Ok(diff)
    }

    /// Sync every `interval` until `shutdown` flips to true, starting now.
    ///
    /// A failed pass is logged and retried on the next tick.
    pub async fn run(&self, kinds: &[String], interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?interval, "syncer started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }

            match self.sync(kinds).await {
                Ok(report) => {
                    if let Some(errors) = report.source_errors {
                        warn!(error = %errors, "sync pass was partial");
                    }
                }
                Err(e) => error!(error = %e, "sync pass failed"),
            }
        }
        info!("syncer stopped");
    }
}
