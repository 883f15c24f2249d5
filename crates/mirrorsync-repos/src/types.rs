//! Catalog record types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RepoError;
use crate::diff::Diffable;

/// Identity a code host assigns to a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRepoSpec {
    /// Repository ID on the code host.
    pub id: String,
    /// Kind of code host, e.g. `github`.
    pub service_type: String,
    /// Base URL of the code host instance.
    pub service_id: String,
}

impl ExternalRepoSpec {
    pub fn new(
        id: impl Into<String>,
        service_type: impl Into<String>,
        service_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_type: service_type.into(),
            service_id: service_id.into(),
        }
    }

    /// Whether all three parts are set.
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.service_type.is_empty() && !self.service_id.is_empty()
    }

    /// Matching key, present only for a complete spec.
    pub fn key(&self) -> Option<String> {
        self.is_complete()
            .then(|| format!("{}:{}:{}", self.service_type, self.service_id, self.id))
    }
}

/// Clone metadata one source reported for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// URN of the external service that listed the repository.
    pub id: String,
    pub clone_url: String,
}

/// A configured connection to a code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalService {
    pub id: i64,
    pub kind: String,
    pub display_name: String,
}

impl ExternalService {
    pub fn new(
        id: i64,
        kind: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, RepoError> {
        let kind = kind.into();
        if kind.is_empty() || kind.contains(':') {
            return Err(RepoError::InvalidKind(kind));
        }
        Ok(Self {
            id,
            kind,
            display_name: display_name.into(),
        })
    }

    /// Key used for this service in [`Repo::sources`].
    pub fn urn(&self) -> String {
        format!("extsvc:{}:{}", self.kind.to_lowercase(), self.id)
    }
}

/// A repository in the catalog.
///
/// Rows are never removed; a non-empty `deleted_at` marks a repository no
/// source lists anymore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Store-assigned ID, zero until first persisted.
    pub id: u32,
    pub name: String,
    pub description: String,
    pub language: String,
    pub fork: bool,
    pub archived: bool,
    /// Managed by the store, never overwritten from a listing.
    pub enabled: bool,
    pub external_repo: ExternalRepoSpec,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Clone metadata keyed by source URN.
    pub sources: BTreeMap<String, SourceInfo>,
}

impl Repo {
    /// A new, enabled repository.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_external(mut self, spec: ExternalRepoSpec) -> Self {
        self.external_repo = spec;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Record that the service at `urn` lists this repository.
    pub fn with_source(mut self, urn: impl Into<String>, clone_url: impl Into<String>) -> Self {
        let urn = urn.into();
        self.sources.insert(
            urn.clone(),
            SourceInfo {
                id: urn,
                clone_url: clone_url.into(),
            },
        );
        self
    }

    /// Code host kind this repository comes from.
    pub fn kind(&self) -> &str {
        &self.external_repo.service_type
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `sourced` differs from this stored row in any field a source
    /// is authoritative for.
    ///
    /// Source entries are compared one way: an entry the listing reports
    /// must match, entries it omits are left alone.
    pub fn needs_update(&self, sourced: &Repo) -> bool {
        self.name != sourced.name
            || self.language != sourced.language
            || self.fork != sourced.fork
            || self.archived != sourced.archived
            || self.description != sourced.description
            || self.external_repo != sourced.external_repo
            || sourced
                .sources
                .iter()
                .any(|(urn, info)| self.sources.get(urn) != Some(info))
    }

    /// Drop the entries of services in `settled` that did not report this
    /// repository in `sourced`. Returns whether any entry was dropped.
    pub fn drop_unlisted_sources(&mut self, sourced: &Repo, settled: &BTreeSet<String>) -> bool {
        let before = self.sources.len();
        self.sources
            .retain(|urn, _| !settled.contains(urn) || sourced.sources.contains_key(urn));
        self.sources.len() != before
    }

    /// Copy the source-authoritative fields of `sourced` onto this row.
    pub fn update_from(&mut self, sourced: &Repo) {
        self.name.clone_from(&sourced.name);
        self.language.clone_from(&sourced.language);
        self.fork = sourced.fork;
        self.archived = sourced.archived;
        self.description.clone_from(&sourced.description);
        self.external_repo.clone_from(&sourced.external_repo);
        for (urn, info) in &sourced.sources {
            self.sources.insert(urn.clone(), info.clone());
        }
    }
}

impl Diffable for Repo {
    fn ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(2);
        if !self.name.is_empty() {
            ids.push(self.name.clone());
        }
        if let Some(key) = self.external_repo.key() {
            ids.push(key);
        }
        ids
    }
}
