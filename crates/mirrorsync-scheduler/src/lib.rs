//! Fetch scheduler for mirrorsync.
//!
//! This crate keeps mirrored repositories fresh:
//! - A due-time ordered schedule holds one entry per enabled repository with
//!   an adaptive fetch interval
//! - Due repositories are promoted into a priority update queue
//! - A dispatch loop drains the queue under a resizable concurrency limit
//!   and feeds fetch results back into the schedule

pub mod config;
mod error;
pub mod fetch;
mod heap;
pub mod limiter;
pub mod queue;
pub mod schedule;
mod scheduler;
mod types;

pub use config::{DEFAULT_MAX_CONCURRENT_FETCHES, IntervalRule, IntervalRules, SchedulerConfig};
pub use error::{FetchError, LimiterError, SchedulerError};
pub use fetch::{FetchBackend, HttpFetchClient, RepoUpdateResponse};
pub use limiter::{MutableLimiter, Permit};
pub use queue::UpdateQueue;
pub use schedule::{DUE_TOLERANCE, MAX_DELAY, MIN_DELAY, Schedule, clamp_interval};
pub use scheduler::{MIN_FETCH_AGE, NOTIFICATION_CAPACITY, REQUEST_TIMEOUT, UpdateScheduler};
pub use types::{
    ConfiguredRepo, Priority, QueueState, RepoScheduleInfo, ScheduleState, SourceRepoList,
    source_repo_list,
};
