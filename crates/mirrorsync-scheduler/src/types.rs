//! Scheduler-facing repository types.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The scheduler's view of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfiguredRepo {
    pub name: String,
    /// URL the fetch backend clones from.
    pub url: String,
    pub enabled: bool,
}

impl ConfiguredRepo {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Repositories one source contributes, keyed by name.
pub type SourceRepoList = BTreeMap<String, ConfiguredRepo>;

/// Build a [`SourceRepoList`] from repositories.
pub fn source_repo_list(repos: impl IntoIterator<Item = ConfiguredRepo>) -> SourceRepoList {
    repos.into_iter().map(|r| (r.name.clone(), r)).collect()
}

/// Dispatch priority. Higher priorities dispatch first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    High,
}

/// Where a repository sits in the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    pub due: Instant,
    pub interval: Duration,
    /// Heap slot, zero being the next to come due.
    pub index: usize,
    pub total: usize,
}

/// Where a repository sits in the update queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueState {
    pub priority: Priority,
    pub updating: bool,
    pub index: usize,
    pub total: usize,
}

/// Scheduling state of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepoScheduleInfo {
    pub schedule: Option<ScheduleState>,
    pub queue: Option<QueueState>,
}
