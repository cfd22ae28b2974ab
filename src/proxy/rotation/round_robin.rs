//! Round-robin proxy selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use super::ProxySelector;
use crate::error::Result;
use crate::models::ProxyRecord;
use crate::pool::ProxyStore;

/// Selects proxies in store order regardless of health
///
/// Uses atomic operations for lock-free index tracking.
pub struct RoundRobinSelector {
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RoundRobinSelector {
    fn select_next(&self, store: &ProxyStore) -> Result<ProxyRecord> {
        store.checkout(Utc::now(), |records| {
            // Atomically increment and get the previous value, then wrap around
            let idx = self.index.fetch_add(1, Ordering::Relaxed) % records.len();
            Some(idx)
        })
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
