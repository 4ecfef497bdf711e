//! Configuration for the held-transaction manager

use std::time::Duration;

/// Tunables for holding transactions open.
///
/// The embedding application constructs one of these and passes it to
/// `Manager::new`; there is no environment or CLI surface.
#[derive(Debug, Clone)]
pub struct HoldConfig {
    /// Upper bound on simultaneously held transactions per process.
    pub max_concurrent: usize,

    /// Timeout applied when the caller does not request one, in seconds.
    pub default_timeout_secs: u64,

    /// Server-side ceiling; requested timeouts are clamped to it silently.
    pub max_timeout_secs: u64,

    /// Sleep between reaper sweeps, in seconds.
    pub reaper_interval_secs: u64,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            default_timeout_secs: 30,
            max_timeout_secs: 60,
            reaper_interval_secs: 5,
        }
    }
}

impl HoldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_default_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn with_max_timeout_secs(mut self, secs: u64) -> Self {
        self.max_timeout_secs = secs;
        self
    }

    pub fn with_reaper_interval_secs(mut self, secs: u64) -> Self {
        self.reaper_interval_secs = secs;
        self
    }

    /// Resolve the timeout for a new held transaction:
    /// `min(requested ?? default, max)`, kept positive.
    pub fn clamp_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, self.max_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}
