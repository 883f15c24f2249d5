//! Listing repositories from external code hosts.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::diff::Diffable;
use crate::{ExternalRepoSpec, ExternalService, Repo, RepoError, SourceError, SourceErrors, SourceFailure};

/// A code host connection that can list its repositories.
#[async_trait]
pub trait Source: Send + Sync {
    /// External services this source is backed by.
    fn external_services(&self) -> Vec<ExternalService>;

    /// Code host kind, e.g. `github`.
    fn kind(&self) -> String {
        self.external_services()
            .first()
            .map(|svc| svc.kind.to_lowercase())
            .unwrap_or_default()
    }

    /// URNs of the backing services, the keys it writes into [`Repo::sources`].
    fn urns(&self) -> Vec<String> {
        self.external_services().iter().map(ExternalService::urn).collect()
    }

    /// Every repository the code host currently reports.
    async fn list_repos(&self) -> Result<Vec<Repo>, SourceError>;
}

/// Result of one sourcing pass.
#[derive(Debug, Default)]
pub struct Sourced {
    /// Listed repositories, merged across sources.
    pub repos: Vec<Repo>,
    /// URNs of the services whose listing succeeded.
    pub listed: BTreeSet<String>,
    pub errors: SourceErrors,
}

/// The set of configured sources.
#[derive(Clone, Default)]
pub struct Sources {
    sources: Vec<Arc<dyn Source>>,
}

impl Sources {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }

    pub fn push(&mut self, source: Arc<dyn Source>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources whose kind is in `kinds`; all of them when `kinds` is empty.
    pub fn of_kinds(&self, kinds: &[String]) -> Sources {
        if kinds.is_empty() {
            return self.clone();
        }
        let sources = self
            .sources
            .iter()
            .filter(|s| {
                let kind = s.kind();
                kinds.iter().any(|k| k.eq_ignore_ascii_case(&kind))
            })
            .cloned()
            .collect();
        Sources { sources }
    }

    pub fn external_services(&self) -> Vec<ExternalService> {
        self.sources
            .iter()
            .flat_map(|s| s.external_services())
            .collect()
    }

    /// List every source concurrently, each bounded by `timeout`.
    ///
    /// A failing source only removes its own repositories from the result.
    pub async fn list_repos(&self, timeout: Duration) -> Sourced {
        let listings = join_all(self.sources.iter().map(|source| async move {
            let result = match tokio::time::timeout(timeout, source.list_repos()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(timeout)),
            };
            (source.urns(), result)
        }))
        .await;

        let mut sourced = Sourced::default();
        let mut listed = Vec::new();
        for (urns, result) in listings {
            match result {
                Ok(repos) => {
                    debug!(sources = ?urns, count = repos.len(), "listed repos");
                    listed.extend(repos);
                    sourced.listed.extend(urns);
                }
                Err(error) => {
                    warn!(sources = ?urns, error = %error, "source listing failed");
                    sourced.errors.0.push(SourceFailure { urns, error });
                }
            }
        }
        sourced.repos = merge_sourced(listed);
        sourced
    }
}

/// Collapse listings of the same repository from several sources into one
/// entry carrying every source's clone metadata.
fn merge_sourced(listed: Vec<Repo>) -> Vec<Repo> {
    let mut merged: Vec<Repo> = Vec::with_capacity(listed.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for mut repo in listed {
        let ids = repo.ids();
        if ids.is_empty() {
            let sources: Vec<_> = repo.sources.keys().collect();
            warn!(?sources, "ignoring listed repo without name or external id");
            continue;
        }
        match ids.iter().find_map(|id| index.get(id).copied()) {
            Some(pos) => {
                let earlier = std::mem::take(&mut merged[pos].sources);
                for (urn, info) in earlier {
                    repo.sources.entry(urn).or_insert(info);
                }
                merged[pos] = repo;
                for id in ids {
                    index.insert(id, pos);
                }
            }
            None => {
                for id in ids {
                    index.insert(id, merged.len());
                }
                merged.push(repo);
            }
        }
    }
    merged
}

/// A source serving a fixed list of repositories from configuration.
#[derive(Debug, Clone)]
pub struct StaticSource {
    service: ExternalService,
    repos: Vec<Repo>,
}

impl StaticSource {
    pub fn new(service: ExternalService) -> Self {
        Self {
            service,
            repos: Vec::new(),
        }
    }

    /// Add a repository cloned from `url`.
    pub fn with_repo(mut self, name: impl Into<String>, url: impl Into<String>) -> Result<Self, RepoError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RepoError::MissingName);
        }
        let urn = self.service.urn();
        let repo = Repo::new(name.clone())
            .with_external(ExternalRepoSpec::new(
                name,
                self.service.kind.to_lowercase(),
                urn.clone(),
            ))
            .with_source(urn, url);
        self.repos.push(repo);
        Ok(self)
    }
}

#[async_trait]
impl Source for StaticSource {
    fn external_services(&self) -> Vec<ExternalService> {
        vec![self.service.clone()]
    }

    async fn list_repos(&self) -> Result<Vec<Repo>, SourceError> {
        Ok(self.repos.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Failing(ExternalService);

    #[async_trait]
    impl Source for Failing {
        fn external_services(&self) -> Vec<ExternalService> {
            vec![self.0.clone()]
        }

        async fn list_repos(&self) -> Result<Vec<Repo>, SourceError> {
            Err(SourceError::Request("boom".into()))
        }
    }

    struct Hanging(ExternalService);

    #[async_trait]
    impl Source for Hanging {
        fn external_services(&self) -> Vec<ExternalService> {
            vec![self.0.clone()]
        }

        async fn list_repos(&self) -> Result<Vec<Repo>, SourceError> {
            std::future::pending().await
        }
    }

    fn service(id: i64, kind: &str) -> ExternalService {
        ExternalService::new(id, kind, format!("{kind} {id}")).unwrap()
    }

    #[tokio::test]
    async fn failing_source_only_drops_its_own_repos() {
        let ok = StaticSource::new(service(1, "other"))
            .with_repo("a", "https://a")
            .unwrap();
        let sources = Sources::new(vec![Arc::new(ok), Arc::new(Failing(service(2, "github")))]);

        let sourced = sources.list_repos(Duration::from_secs(5)).await;

        assert_eq!(sourced.repos.len(), 1);
        assert_eq!(sourced.repos[0].name, "a");
        assert_eq!(sourced.errors.len(), 1);
        assert_eq!(
            sourced.errors.failed_urns().collect::<Vec<_>>(),
            vec!["extsvc:github:2"]
        );
        assert_eq!(
            sourced.listed.into_iter().collect::<Vec<_>>(),
            vec!["extsvc:other:1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let sources = Sources::new(vec![Arc::new(Hanging(service(3, "gitlab")))]);

        let sourced = sources.list_repos(Duration::from_secs(60)).await;

        assert!(sourced.repos.is_empty());
        assert!(matches!(
            sourced.errors.0[0].error,
            SourceError::Timeout(d) if d == Duration::from_secs(60)
        ));
    }

    #[test]
    fn of_kinds_filters_case_insensitively() {
        let sources = Sources::new(vec![
            Arc::new(StaticSource::new(service(1, "GitHub"))),
            Arc::new(StaticSource::new(service(2, "gitlab"))),
        ]);

        assert_eq!(sources.of_kinds(&[]).len(), 2);
        assert_eq!(sources.of_kinds(&["github".into()]).len(), 1);
        assert!(sources.of_kinds(&["bitbucket".into()]).is_empty());
    }

    #[test]
    fn same_repo_from_two_sources_keeps_both_entries() {
        let a = Repo::new("r").with_source("extsvc:github:1", "https://one");
        let b = Repo::new("r")
            .with_description("newer")
            .with_source("extsvc:github:2", "https://two");

        let merged = merge_sourced(vec![a, b]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].description, "newer");
        assert_eq!(
            merged[0].sources.keys().cloned().collect::<Vec<_>>(),
            vec!["extsvc:github:1", "extsvc:github:2"]
        );
    }

    #[test]
    fn repos_without_identity_are_skipped() {
        let anonymous = Repo::new("").with_source("extsvc:github:1", "https://anon");
        let named = Repo::new("r").with_source("extsvc:github:1", "https://r");

        let merged = merge_sourced(vec![anonymous, named]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "r");
    }

    #[test]
    fn static_source_rejects_empty_name() {
        let result = StaticSource::new(service(1, "other")).with_repo("", "https://x");
        assert!(matches!(result, Err(RepoError::MissingName)));
    }
}
