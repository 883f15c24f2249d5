//! Configuration file for a mirrorsync deployment.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use mirrorsync_repos::{ExternalService, Source, SourceFailurePolicy, Sources, StaticSource};
use mirrorsync_scheduler::SchedulerConfig;

use crate::ConfigError;

/// Default fetch backend address.
pub const DEFAULT_FETCHER_URL: &str = "http://127.0.0.1:3178";

/// Top-level configuration, usually read from a JSON file.
///
/// ```json
/// {
///   "fetcher_url": "http://gitserver:3178",
///   "syncer": { "interval_secs": 120 },
///   "scheduler": {
///     "max_concurrent_fetches": 10,
///     "update_intervals": [{ "pattern": "^github\\.com/acme/", "interval_minutes": 5 }]
///   },
///   "sources": [{
///     "id": 1,
///     "kind": "OTHER",
///     "display_name": "Internal",
///     "repos": [{ "name": "acme/tools", "url": "https://git.acme.dev/tools" }]
///   }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the fetch backend.
    pub fetcher_url: String,
    pub syncer: SyncerConfig,
    pub scheduler: SchedulerConfig,
    /// Repositories listed directly in configuration, grouped by service.
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetcher_url: DEFAULT_FETCHER_URL.to_string(),
            syncer: SyncerConfig::default(),
            scheduler: SchedulerConfig::default(),
            sources: Vec::new(),
        }
    }
}

/// Settings of the catalog sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Seconds between sync passes.
    pub interval_secs: u64,
    /// Bound on a single source's listing, in seconds.
    pub source_timeout_secs: u64,
    /// Kinds of services to sync; all when empty.
    pub kinds: Vec<String>,
    pub on_source_failure: SourceFailurePolicy,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            source_timeout_secs: 60,
            kinds: Vec::new(),
            on_source_failure: SourceFailurePolicy::default(),
        }
    }
}

impl SyncerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

/// A code host whose repositories are listed in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: i64,
    pub kind: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub repos: Vec<ListedRepo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedRepo {
    pub name: String,
    pub url: String,
}

impl Config {
    /// Read and validate the configuration at `path`.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.syncer.interval_secs == 0 {
            return Err(ConfigError::ZeroSyncInterval);
        }
        self.scheduler.validate()?;
        self.sources()?;
        Ok(())
    }

    /// Build one [`StaticSource`] per configured service.
    pub fn sources(&self) -> Result<Sources, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut sources = Sources::default();
        for config in &self.sources {
            let source = config.build()?;
            let urn = source.urns().into_iter().next().unwrap_or_default();
            if !seen.insert(urn.clone()) {
                return Err(ConfigError::DuplicateSource(urn));
            }
            sources.push(Arc::new(source));
        }
        Ok(sources)
    }
}

impl SourceConfig {
    fn build(&self) -> Result<StaticSource, ConfigError> {
        let wrap = |source| ConfigError::Source {
            id: self.id,
            source,
        };
        let display_name = if self.display_name.is_empty() {
            self.kind.clone()
        } else {
            self.display_name.clone()
        };
        let service = ExternalService::new(self.id, &self.kind, display_name).map_err(wrap)?;
        self.repos
            .iter()
            .try_fold(StaticSource::new(service), |source, repo| {
                source.with_repo(&repo.name, &repo.url)
            })
            .map_err(wrap)
    }
}
