//! Error types for catalog reconciliation.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while building catalog records.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A repository without a name cannot be identified.
    #[error("repository has no name")]
    MissingName,

    /// The external service kind is not usable in a URN.
    #[error("invalid external service kind: {0:?}")]
    InvalidKind(String),
}

/// Errors a single source can report while listing.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The code host rejected our credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The listing request failed.
    #[error("request failed: {0}")]
    Request(String),

    /// The listing did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A source that failed during a sourcing pass.
#[derive(Debug, Clone, Error)]
#[error("{}: {error}", urns.join(","))]
pub struct SourceFailure {
    /// URNs of the external services backing the failed source.
    pub urns: Vec<String>,
    #[source]
    pub error: SourceError,
}

/// Every source failure from one sourcing pass.
#[derive(Debug, Clone, Default)]
pub struct SourceErrors(pub Vec<SourceFailure>);

impl SourceErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// URNs of every service whose listing failed.
    pub fn failed_urns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flat_map(|f| f.urns.iter().map(String::as_str))
    }
}

impl fmt::Display for SourceErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} source(s) failed", self.0.len())?;
        for (i, failure) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceErrors {}

/// Errors from the persistent catalog.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Upsert referenced a row that does not exist.
    #[error("repo {0} not found")]
    NotFound(u32),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Backend(String),
}

/// Errors that abort a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Reading or writing the catalog failed; the pass was rolled back.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
