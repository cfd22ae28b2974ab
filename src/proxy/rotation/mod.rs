//! Proxy selection strategies
//!
//! This module provides the strategies used to hand out proxies from the store.

mod round_robin;
mod weighted;

pub use round_robin::RoundRobinSelector;
pub use weighted::{roulette_index, selection_weight, WeightedSelector, DEFAULT_COOLDOWN};

use crate::error::Result;
use crate::models::ProxyRecord;
use crate::pool::ProxyStore;

/// Strategy types for proxy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Health-aware weighted roulette
    #[default]
    Weighted,
    /// Health-unaware deterministic rotation
    RoundRobin,
}

impl SelectionStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "round-robin" => Self::RoundRobin,
            _ => Self::Weighted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::RoundRobin => "round_robin",
        }
    }
}

/// Trait for proxy selection strategies
///
/// Implementations pick one record from the store and leave the usage bookkeeping
/// (`usage_count`, `last_used_at`) to [`ProxyStore::checkout`].
pub trait ProxySelector: Send + Sync {
    /// Select the next proxy
    ///
    /// Returns [`crate::RunnerError::NoProxyAvailable`] only when the store is empty.
    fn select_next(&self, store: &ProxyStore) -> Result<ProxyRecord>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Create a proxy selector based on the strategy type
pub fn create_selector(
    strategy: SelectionStrategy,
    cooldown: std::time::Duration,
) -> Box<dyn ProxySelector> {
    match strategy {
        SelectionStrategy::Weighted => Box::new(WeightedSelector::new(cooldown)),
        SelectionStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_strategy_from_str() {
        assert_eq!(
            SelectionStrategy::from_str("weighted"),
            SelectionStrategy::Weighted
        );
        assert_eq!(
            SelectionStrategy::from_str("Round-Robin"),
            SelectionStrategy::RoundRobin
        );
        assert_eq!(
            SelectionStrategy::from_str("unknown"),
            SelectionStrategy::Weighted
        );
    }

    #[test]
    fn test_create_selector_strategy_name() {
        assert_eq!(
            create_selector(SelectionStrategy::Weighted, DEFAULT_COOLDOWN).strategy_name(),
            "weighted"
        );
        assert_eq!(
            create_selector(SelectionStrategy::RoundRobin, DEFAULT_COOLDOWN).strategy_name(),
            "round_robin"
        );
    }
}
