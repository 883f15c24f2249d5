//! Live scheduler configuration.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Default bound on concurrent fetches.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// Fixed fetch interval for repositories whose name matches `pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalRule {
    /// Regular expression matched against the repository name.
    pub pattern: String,
    /// Interval in minutes, clamped like any other interval.
    pub interval_minutes: u64,
}

/// Settings that may change while the scheduler runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global bound on concurrent fetch requests.
    pub max_concurrent_fetches: usize,

    /// Stop promoting scheduled repositories into the update queue.
    ///
    /// On-demand updates are still dispatched.
    pub disable_auto_updates: bool,

    /// Custom intervals, first match wins.
    pub update_intervals: Vec<IntervalRule>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            disable_auto_updates: false,
            update_intervals: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Check every setting and compile the interval rules.
    pub fn validate(&self) -> Result<IntervalRules, SchedulerError> {
        if self.max_concurrent_fetches == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }
        self.interval_rules()
    }

    /// Compile the interval rules.
    pub fn interval_rules(&self) -> Result<IntervalRules, SchedulerError> {
        let rules = self
            .update_intervals
            .iter()
            .map(|rule| {
                if rule.interval_minutes == 0 {
                    return Err(SchedulerError::ZeroInterval(rule.pattern.clone()));
                }
                let re = Regex::new(&rule.pattern).map_err(|source| SchedulerError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    source,
                })?;
                let secs = rule
                    .interval_minutes
                    .checked_mul(60)
                    .ok_or_else(|| SchedulerError::IntervalOverflow(rule.pattern.clone()))?;
                Ok((re, Duration::from_secs(secs)))
            })
            .collect::<Result<_, _>>()?;
        Ok(IntervalRules(rules))
    }
}

/// Compiled [`IntervalRule`]s.
#[derive(Debug, Clone, Default)]
pub struct IntervalRules(Vec<(Regex, Duration)>);

impl IntervalRules {
    /// Interval of the first rule matching `name`.
    pub fn interval_for(&self, name: &str) -> Option<Duration> {
        self.0
            .iter()
            .find(|(re, _)| re.is_match(name))
            .map(|(_, interval)| *interval)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
