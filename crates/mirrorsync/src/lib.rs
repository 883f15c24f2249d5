//! mirrorsync: keeps a catalog of mirrored repositories reconciled with
//! the code hosts that list them, and every mirror fresh.
//!
//! The [`Updater`] ties the pieces together:
//! - the [`Syncer`](mirrorsync_repos::Syncer) reconciles sources with the
//!   stored catalog on a fixed interval
//! - after each pass the catalog is projected per source and handed to the
//!   [`UpdateScheduler`](mirrorsync_scheduler::UpdateScheduler)
//! - the scheduler promotes due repositories and dispatches fetches

pub mod catalog;
pub mod config;
mod error;
pub mod telemetry;
mod updater;

pub use catalog::configured_repos_by_source;
pub use config::{Config, DEFAULT_FETCHER_URL, ListedRepo, SourceConfig, SyncerConfig};
pub use error::{ConfigError, UpdaterError};
pub use telemetry::init_tracing;
pub use updater::{DEFAULT_SYNC_INTERVAL, Updater};
