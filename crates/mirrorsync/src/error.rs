//! Error types for mirrorsync wiring.

use std::path::PathBuf;

use thiserror::Error;

use mirrorsync_repos::RepoError;
use mirrorsync_scheduler::{FetchError, SchedulerError};

/// Errors loading configuration or assembling an [`Updater`](crate::Updater).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sync interval must be positive")]
    ZeroSyncInterval,

    #[error("source {id}: {source}")]
    Source {
        id: i64,
        #[source]
        source: RepoError,
    },

    #[error("source {0} is configured twice")]
    DuplicateSource(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("fetch backend: {0}")]
    Fetch(#[from] FetchError),
}

/// Errors running an [`Updater`](crate::Updater).
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("updater is already running")]
    AlreadyRunning,
}
