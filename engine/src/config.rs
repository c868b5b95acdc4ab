//! Engine configuration.

use crate::conflict::ResolutionStrategy;
use std::time::Duration;

/// Tunable parameters for a [`SyncQueue`](crate::SyncQueue) and its
/// [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the scheduler attempts a periodic sync while online with a
    /// non-empty queue.
    pub periodic_interval: Duration,
    /// Retry budget applied to actions that don't specify their own.
    pub default_max_retries: u32,
    /// Strategy used when an update meets a concurrently-modified remote.
    pub update_strategy: ResolutionStrategy,
    /// Resolver fallback when no override or per-kind default applies.
    pub default_strategy: ResolutionStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            periodic_interval: Duration::from_secs(300),
            default_max_retries: 3,
            update_strategy: ResolutionStrategy::SmartMerge,
            default_strategy: ResolutionStrategy::LatestWins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.periodic_interval, Duration::from_secs(300));
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.update_strategy, ResolutionStrategy::SmartMerge);
        assert_eq!(config.default_strategy, ResolutionStrategy::LatestWins);
    }
}
