//! Adaptive pacing between cycles
//!
//! The base wait shrinks as the rolling success rate improves, every consecutive
//! failure adds a fixed penalty, and the total never exceeds the ceiling.

use std::time::Duration;

use crate::models::CycleState;

/// Inter-cycle delay policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Base delay when the success rate is above 40%
    pub fast: Duration,
    /// Above 25%
    pub steady: Duration,
    /// Above 15%
    pub slow: Duration,
    /// Anything lower, including no attempts yet
    pub crawl: Duration,
    /// Added per consecutive failure
    pub failure_step: Duration,
    /// Hard upper bound
    pub ceiling: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(3 * 60),
            steady: Duration::from_secs(4 * 60),
            slow: Duration::from_secs(5 * 60),
            crawl: Duration::from_secs(6 * 60),
            failure_step: Duration::from_secs(30),
            ceiling: Duration::from_secs(10 * 60),
        }
    }
}

impl DelayPolicy {
    /// Base delay bucket for a success rate in `[0, 1]`
    pub fn base_delay(&self, success_rate: f64) -> Duration {
        if success_rate > 0.40 {
            self.fast
        } else if success_rate > 0.25 {
            self.steady
        } else if success_rate > 0.15 {
            self.slow
        } else {
            self.crawl
        }
    }

    pub fn delay_for(&self, success_rate: f64, consecutive_failures: u32) -> Duration {
        let penalty = self.failure_step.saturating_mul(consecutive_failures);
        self.base_delay(success_rate)
            .saturating_add(penalty)
            .min(self.ceiling)
    }

    pub fn next_delay(&self, state: &CycleState) -> Duration {
        self.delay_for(state.success_rate(), state.consecutive_failures)
    }
}
