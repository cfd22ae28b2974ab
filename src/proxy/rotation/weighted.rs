//! Health-aware weighted proxy selection
//!
//! When any proxy is known healthy the pick is uniform over the healthy set. Otherwise
//! every proxy gets an integer weight from its history and one is drawn by cumulative
//! roulette.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use super::ProxySelector;
use crate::error::Result;
use crate::models::{HealthStatus, ProxyRecord};
use crate::pool::ProxyStore;

/// Default window after use during which a proxy is penalised
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(180);

const BASE_WEIGHT: i64 = 100;
const FAILURE_PENALTY: i64 = 15;
const SUCCESS_BONUS: i64 = 12;
const COOLDOWN_PENALTY: i64 = 25;
const HEALTHY_BONUS: i64 = 40;
const UNHEALTHY_PENALTY: i64 = 50;
const FAST_BONUS: i64 = 30;
const SLOW_PENALTY: i64 = 20;
const FAST_THRESHOLD_MS: u64 = 5_000;
const SLOW_THRESHOLD_MS: u64 = 15_000;
const UNTESTED_BONUS: i64 = 60;

/// Selection weight of one record, never below 1
pub fn selection_weight(
    record: &ProxyRecord,
    now: DateTime<Utc>,
    cooldown: chrono::Duration,
) -> u64 {
    let mut weight = BASE_WEIGHT;

    weight -= FAILURE_PENALTY * record.failure_count as i64;
    weight += SUCCESS_BONUS * record.success_count as i64;

    if record.used_within(cooldown, now) {
        weight -= COOLDOWN_PENALTY;
    }

    weight += match record.health_status {
        HealthStatus::Healthy => HEALTHY_BONUS,
        HealthStatus::Unhealthy => -UNHEALTHY_PENALTY,
        HealthStatus::Unknown => 0,
    };

    weight += match record.response_time_ms {
        Some(ms) if ms < FAST_THRESHOLD_MS => FAST_BONUS,
        Some(ms) if ms > SLOW_THRESHOLD_MS => -SLOW_PENALTY,
        _ => 0,
    };

    if record.usage_count == 0 {
        weight += UNTESTED_BONUS;
    }

    weight.max(1) as u64
}

/// Walk cumulative weights until `draw` is exhausted
///
/// `draw` must lie in `[0, sum(weights))`; anything past the end yields `None`.
pub fn roulette_index(weights: &[u64], draw: u64) -> Option<usize> {
    let mut remaining = draw;
    for (idx, &weight) in weights.iter().enumerate() {
        if remaining < weight {
            return Some(idx);
        }
        remaining -= weight;
    }
    None
}

/// Weighted roulette selector
pub struct WeightedSelector {
    cooldown: chrono::Duration,
}

impl WeightedSelector {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: chrono::Duration::seconds(cooldown.as_secs() as i64),
        }
    }

    /// Choose an index into `records` without touching any bookkeeping
    pub fn pick_index(&self, records: &[ProxyRecord], now: DateTime<Utc>) -> Option<usize> {
        if records.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();

        let healthy: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.health_status == HealthStatus::Healthy)
            .map(|(idx, _)| idx)
            .collect();

        if !healthy.is_empty() {
            return Some(healthy[rng.gen_range(0..healthy.len())]);
        }

        let weights: Vec<u64> = records
            .iter()
            .map(|r| selection_weight(r, now, self.cooldown))
            .collect();
        let total: u64 = weights.iter().sum();

        if total == 0 {
            return Some(rng.gen_range(0..records.len()));
        }

        let draw = rng.gen_range(0..total);
        roulette_index(&weights, draw).or_else(|| Some(records.len() - 1))
    }
}

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl ProxySelector for WeightedSelector {
    fn select_next(&self, store: &ProxyStore) -> Result<ProxyRecord> {
        let now = Utc::now();
        let selected = store.checkout(now, |records| self.pick_index(records, now))?;
        debug!(
            proxy = %selected.address(),
            status = %selected.health_status,
            usage = selected.usage_count,
            "Selected proxy"
        );
        Ok(selected)
    }

    fn strategy_name(&self) -> &'static str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::models::ProxySource;
    use std::collections::HashMap;

    fn fresh(i: u16) -> ProxyRecord {
        ProxyRecord::new(format!("10.0.0.{}", i), 8080, ProxySource::UserSupplied)
    }

    fn cooldown() -> chrono::Duration {
        chrono::Duration::minutes(3)
    }

    #[test]
    fn test_weight_untested_proxy() {
        let now = Utc::now();
        assert_eq!(selection_weight(&fresh(1), now, cooldown()), 160);
    }

    #[test]
    fn test_weight_terms() {
        let now = Utc::now();

        let mut record = fresh(1);
        record.usage_count = 4;
        record.success_count = 2;
        record.failure_count = 1;
        record.health_status = HealthStatus::Healthy;
        record.response_time_ms = Some(1_200);
        // 100 - 15 + 24 + 40 + 30
        assert_eq!(selection_weight(&record, now, cooldown()), 179);

        record.last_used_at = Some(now - chrono::Duration::seconds(30));
        assert_eq!(selection_weight(&record, now, cooldown()), 154);

        record.response_time_ms = Some(20_000);
        // 154 - 30 - 20
        assert_eq!(selection_weight(&record, now, cooldown()), 104);

        record.response_time_ms = Some(10_000);
        assert_eq!(selection_weight(&record, now, cooldown()), 124);
    }

    #[test]
    fn test_weight_floor() {
        let now = Utc::now();
        let mut record = fresh(1);
        record.usage_count = 30;
        record.failure_count = 25;
        record.health_status = HealthStatus::Unhealthy;
        record.last_used_at = Some(now);
        assert_eq!(selection_weight(&record, now, cooldown()), 1);
    }

    #[test]
    fn test_roulette_index_walk() {
        let weights = [3, 1, 6];
        assert_eq!(roulette_index(&weights, 0), Some(0));
        assert_eq!(roulette_index(&weights, 2), Some(0));
        assert_eq!(roulette_index(&weights, 3), Some(1));
        assert_eq!(roulette_index(&weights, 4), Some(2));
        assert_eq!(roulette_index(&weights, 9), Some(2));
        assert_eq!(roulette_index(&weights, 10), None);
        assert_eq!(roulette_index(&[], 0), None);
    }

    #[test]
    fn test_select_empty_store() {
        let selector = WeightedSelector::default();
        let store = ProxyStore::default();
        assert!(matches!(
            selector.select_next(&store),
            Err(RunnerError::NoProxyAvailable)
        ));
    }

    #[test]
    fn test_select_single_proxy() {
        let selector = WeightedSelector::default();
        let mut record = fresh(1);
        record.failure_count = 20;
        record.health_status = HealthStatus::Unhealthy;
        let store = ProxyStore::from_records(vec![record], 0);

        for i in 1..=5 {
            let selected = selector.select_next(&store).unwrap();
            assert_eq!(selected.address(), "10.0.0.1:8080");
            assert_eq!(selected.usage_count, i);
            assert!(selected.last_used_at.is_some());
        }
    }

    #[test]
    fn test_select_prefers_healthy_only() {
        let selector = WeightedSelector::default();
        let mut records: Vec<ProxyRecord> = (1..=6).map(fresh).collect();
        records[2].health_status = HealthStatus::Healthy;
        records[4].health_status = HealthStatus::Healthy;
        let store = ProxyStore::from_records(records, 0);

        for _ in 0..50 {
            let selected = selector.select_next(&store).unwrap();
            assert_eq!(selected.health_status, HealthStatus::Healthy);
        }
    }

    #[test]
    fn test_weighted_distribution_is_uniform_for_equal_weights() {
        let selector = WeightedSelector::default();
        let records: Vec<ProxyRecord> = (1..=10).map(fresh).collect();
        let now = Utc::now();

        let draws = 10_000;
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for _ in 0..draws {
            let idx = selector.pick_index(&records, now).unwrap();
            *counts.entry(idx).or_default() += 1;
        }

        let expected = draws as f64 / records.len() as f64;
        for idx in 0..records.len() {
            let got = *counts.get(&idx).unwrap_or(&0) as f64;
            assert!(
                (got - expected).abs() <= expected * 0.15,
                "proxy {} chosen {} times, expected ~{}",
                idx,
                got,
                expected
            );
        }
    }

    #[test]
    fn test_weighted_distribution_favours_heavier() {
        let selector = WeightedSelector::default();
        let now = Utc::now();

        let mut bad = fresh(1);
        bad.usage_count = 10;
        bad.failure_count = 6;
        bad.health_status = HealthStatus::Unhealthy;
        // weight 1
        let good = fresh(2);
        // weight 160
        let records = vec![bad, good];

        let mut good_hits = 0;
        for _ in 0..1_000 {
            if selector.pick_index(&records, now) == Some(1) {
                good_hits += 1;
            }
        }
        assert!(good_hits > 950, "good proxy chosen only {} times", good_hits);
    }
}
