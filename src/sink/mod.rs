//! Outcome sinks
//!
//! Where run results end up. Every call is fire-and-forget from the orchestrator's side:
//! an `Err` is logged as a warning and the run carries on.

mod jsonl;
mod tracing_sink;

pub use jsonl::JsonlSink;
pub use tracing_sink::TracingSink;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{EmergencySnapshot, OutcomeRecord, ProxyStatsRow, RunSummary};

/// Receives run outcomes, statistics and reports
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Cheap readiness check run before the loop starts
    async fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn append_outcome(&self, record: &OutcomeRecord) -> Result<()>;

    async fn append_proxy_stats(&self, rows: &[ProxyStatsRow]) -> Result<()>;

    async fn append_summary(&self, summary: &RunSummary) -> Result<()>;

    async fn append_emergency_snapshot(&self, snapshot: &EmergencySnapshot) -> Result<()>;
}

/// Forwards every call to each inner sink
///
/// All sinks are attempted; the first error is returned afterwards.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn OutcomeSink>>) -> Self {
        Self { sinks }
    }
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
}

#[async_trait]
impl OutcomeSink for FanoutSink {
    async fn check_ready(&self) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.check_ready().await);
        }
        first_error(results)
    }

    async fn append_outcome(&self, record: &OutcomeRecord) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.append_outcome(record).await);
        }
        first_error(results)
    }

    async fn append_proxy_stats(&self, rows: &[ProxyStatsRow]) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.append_proxy_stats(rows).await);
        }
        first_error(results)
    }

    async fn append_summary(&self, summary: &RunSummary) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.append_summary(summary).await);
        }
        first_error(results)
    }

    async fn append_emergency_snapshot(&self, snapshot: &EmergencySnapshot) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.append_emergency_snapshot(snapshot).await);
        }
        first_error(results)
    }
}
