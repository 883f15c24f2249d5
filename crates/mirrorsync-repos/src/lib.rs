//! Repository catalog reconciliation for mirrorsync.
//!
//! This crate keeps a persisted catalog of mirrored repositories in step
//! with what the configured code hosts currently report:
//!
//! - **Diff**: generic four-way set diff between two snapshots of entities
//!   that carry one or more identities
//! - **Sources**: the listing side, queried concurrently under a timeout
//! - **Store**: the persistence side, optionally transactional
//! - **Syncer**: applies each diff to the store with soft-delete bookkeeping

pub mod diff;
mod error;
pub mod sources;
pub mod store;
pub mod syncer;
mod types;

pub use diff::{Diff, Diffable, Matched};
pub use error::{RepoError, SourceError, SourceErrors, SourceFailure, StoreError, SyncError};
pub use sources::{Source, Sourced, Sources, StaticSource};
pub use store::{MemoryStore, Store, Transaction};
pub use syncer::{SourceFailurePolicy, SyncReport, Syncer};
pub use types::{ExternalRepoSpec, ExternalService, Repo, SourceInfo};
