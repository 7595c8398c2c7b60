//! The two environment knobs that drive the scheduler (spec §6), following
//! the teacher's `env::var(...).unwrap_or_else(...)` idiom rather than a
//! config-file format — these two values are deliberately boot-time-only.

use std::time::Duration;

pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL";
pub const ENV_MAX_CONCURRENT_SYNCS: &str = "MAX_CONCURRENT_SYNCS";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_SYNCS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerEnv {
    pub poll_interval: Duration,
    pub max_concurrent_syncs: usize,
}

impl SchedulerEnv {
    /// Reads `POLL_INTERVAL` and `MAX_CONCURRENT_SYNCS` from the process
    /// environment, falling back to spec defaults for anything unset or
    /// unparseable rather than failing startup over it.
    pub fn from_env() -> Self {
        let poll_interval = std::env::var(ENV_POLL_INTERVAL)
            .ok()
            .map(|s| crate::parse_schedule(&s))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let max_concurrent_syncs = std::env::var(ENV_MAX_CONCURRENT_SYNCS)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_SYNCS);
        Self { poll_interval, max_concurrent_syncs }
    }
}

impl Default for SchedulerEnv {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        std::env::remove_var(ENV_POLL_INTERVAL);
        std::env::remove_var(ENV_MAX_CONCURRENT_SYNCS);
        let env = SchedulerEnv::from_env();
        assert_eq!(env.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(env.max_concurrent_syncs, DEFAULT_MAX_CONCURRENT_SYNCS);
    }
}
