//! In-memory proxy record store
//!
//! Owns every [`ProxyRecord`] for the lifetime of a run. All mutation goes through the
//! methods here so that health transitions stay in one place.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::{Result, RunnerError};
use crate::models::{HealthStatus, ProxyRecord, ProxySource, ProxyStatsRow, UNHEALTHY_THRESHOLD};

/// Default number of records below which cleanup reloads the fallback list
pub const DEFAULT_MIN_POOL_SIZE: usize = 3;

/// Result of a cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub reloaded: usize,
    pub remaining: usize,
}

/// Proxy record store
pub struct ProxyStore {
    records: RwLock<Vec<ProxyRecord>>,
    /// Pristine fallback entries, used to refill a depleted pool
    fallback: RwLock<Vec<ProxyRecord>>,
    min_pool_size: usize,
}

impl ProxyStore {
    pub fn new(min_pool_size: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            fallback: RwLock::new(Vec::new()),
            min_pool_size,
        }
    }

    /// Build a store from already-constructed records, keeping the first of any duplicates
    pub fn from_records(records: Vec<ProxyRecord>, min_pool_size: usize) -> Self {
        let store = Self::new(min_pool_size);
        let mut seen = HashSet::new();
        let unique = records
            .into_iter()
            .filter(|r| seen.insert(r.address()))
            .collect();
        *store.records.write() = unique;
        store
    }

    /// Load a newline-delimited user list merged with a disjoint fallback list
    ///
    /// Malformed and duplicate lines are skipped with a warning. The merged pool is
    /// shuffled so list position does not bias selection. Returns the number of loaded
    /// records, or [`RunnerError::EmptyPool`] when nothing usable was found.
    pub fn load(&self, user_list: &str, fallback_list: &str) -> Result<usize> {
        let mut seen = HashSet::new();

        let mut merged = parse_list(user_list, ProxySource::UserSupplied, &mut seen);
        let user_count = merged.len();

        let fallback = parse_list(fallback_list, ProxySource::FallbackPool, &mut seen);
        let fallback_count = fallback.len();
        merged.extend(fallback.iter().cloned());

        if merged.is_empty() {
            return Err(RunnerError::EmptyPool);
        }

        merged.shuffle(&mut rand::thread_rng());
        let count = merged.len();

        *self.records.write() = merged;
        *self.fallback.write() = fallback;

        info!(
            user_supplied = user_count,
            fallback = fallback_count,
            total = count,
            "Proxy pool loaded"
        );

        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every record
    pub fn all(&self) -> Vec<ProxyRecord> {
        self.records.read().clone()
    }

    /// Snapshot of records currently classified as healthy
    pub fn healthy(&self) -> Vec<ProxyRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.health_status == HealthStatus::Healthy)
            .cloned()
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.records
            .read()
            .iter()
            .filter(|r| r.health_status == HealthStatus::Healthy)
            .count()
    }

    pub fn get(&self, address: &str) -> Option<ProxyRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.address() == address)
            .cloned()
    }

    /// Up to `n` distinct records in random order
    pub fn random_sample(&self, n: usize) -> Vec<ProxyRecord> {
        let records = self.records.read();
        let mut rng = rand::thread_rng();
        let mut sample: Vec<ProxyRecord> = records.choose_multiple(&mut rng, n).cloned().collect();
        sample.shuffle(&mut rng);
        sample
    }

    /// Record a successful work unit or probe
    pub fn record_success(&self, address: &str) -> Result<()> {
        self.with_record(address, |record| {
            record.success_count += 1;
            record.health_status = HealthStatus::Healthy;
            record.last_error = None;
        })
    }

    /// Record a successful probe along with its latency
    pub fn record_probe_success(&self, address: &str, response_time_ms: u64) -> Result<()> {
        self.with_record(address, |record| {
            record.success_count += 1;
            record.health_status = HealthStatus::Healthy;
            record.last_error = None;
            record.response_time_ms = Some(response_time_ms);
        })
    }

    /// Record a failed work unit or probe
    ///
    /// A single failure only sets `last_error`; the proxy is condemned once its failure
    /// count reaches [`UNHEALTHY_THRESHOLD`].
    pub fn record_failure(&self, address: &str, message: &str) -> Result<()> {
        self.with_record(address, |record| {
            record.failure_count += 1;
            record.last_error = Some(message.to_string());
            if record.failure_count >= UNHEALTHY_THRESHOLD {
                if record.health_status != HealthStatus::Unhealthy {
                    debug!(
                        proxy = %record.address(),
                        failures = record.failure_count,
                        "Proxy marked unhealthy"
                    );
                }
                record.health_status = HealthStatus::Unhealthy;
            }
        })
    }

    /// Hand out one record chosen by `pick`, updating its usage bookkeeping
    ///
    /// `pick` receives every record and returns the index to use. The choice and the
    /// bookkeeping happen under a single write lock.
    pub fn checkout<F>(&self, now: DateTime<Utc>, pick: F) -> Result<ProxyRecord>
    where
        F: FnOnce(&[ProxyRecord]) -> Option<usize>,
    {
        let mut records = self.records.write();
        if records.is_empty() {
            return Err(RunnerError::NoProxyAvailable);
        }

        let idx = pick(&records).ok_or(RunnerError::NoProxyAvailable)?;
        let record = records.get_mut(idx).ok_or(RunnerError::NoProxyAvailable)?;
        record.usage_count += 1;
        record.last_used_at = Some(now);
        Ok(record.clone())
    }

    /// Drop records with `failure_count >= max_failures`, refilling from the fallback
    /// list when the pool shrinks below its floor
    pub fn cleanup(&self, max_failures: u32) -> CleanupReport {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.failure_count < max_failures);
        let removed = before - records.len();

        let mut reloaded = 0;
        if records.len() < self.min_pool_size {
            let present: HashSet<String> = records.iter().map(|r| r.address()).collect();
            let mut refill: Vec<ProxyRecord> = self
                .fallback
                .read()
                .iter()
                .filter(|r| !present.contains(&r.address()))
                .cloned()
                .collect();
            refill.shuffle(&mut rand::thread_rng());
            reloaded = refill.len();
            records.extend(refill);

            if reloaded > 0 {
                warn!(
                    remaining = before - removed,
                    floor = self.min_pool_size,
                    reloaded,
                    "Proxy pool below floor, reloaded fallback entries"
                );
            } else {
                debug!(
                    remaining = records.len(),
                    floor = self.min_pool_size,
                    "Proxy pool below floor, no fallback entries left to reload"
                );
            }
        }

        if removed > 0 {
            info!(removed, remaining = records.len(), "Removed failing proxies");
        }

        CleanupReport {
            removed,
            reloaded,
            remaining: records.len(),
        }
    }

    /// Per-proxy statistics rows for the outcome sink
    pub fn stats_rows(&self) -> Vec<ProxyStatsRow> {
        self.records.read().iter().map(ProxyStatsRow::from).collect()
    }

    fn with_record<F>(&self, address: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProxyRecord),
    {
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.address() == address)
            .ok_or_else(|| RunnerError::ProxyNotFound(address.to_string()))?;
        f(record);
        Ok(())
    }
}

impl Default for ProxyStore {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_POOL_SIZE)
    }
}

fn parse_list(raw: &str, source: ProxySource, seen: &mut HashSet<String>) -> Vec<ProxyRecord> {
    let mut out = Vec::new();

    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match ProxyRecord::parse_line(line, source) {
            Ok(record) => {
                if seen.insert(record.address()) {
                    out.push(record);
                } else if source == ProxySource::UserSupplied {
                    warn!(line = lineno + 1, proxy = %record.address(), "Duplicate proxy skipped");
                } else {
                    debug!(proxy = %record.address(), "Fallback proxy already supplied, skipped");
                }
            }
            Err(e) => {
                warn!(
                    line = lineno + 1,
                    source = source.as_str(),
                    "Skipping malformed proxy entry: {}",
                    e
                );
            }
        }
    }

    out
}
