use async_trait::async_trait;
use tracing::{info, warn};

use super::OutcomeSink;
use crate::error::Result;
use crate::models::{EmergencySnapshot, HealthStatus, OutcomeRecord, ProxyStatsRow, RunSummary};

/// Mirrors outcomes into the tracing log stream
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl OutcomeSink for TracingSink {
    async fn append_outcome(&self, record: &OutcomeRecord) -> Result<()> {
        info!(
            run_id = %record.run_id,
            cycle = record.cycle,
            proxy = %record.proxy_address,
            success = record.success,
            duration_ms = record.duration_ms,
            "Cycle outcome: {}",
            record.detail
        );
        Ok(())
    }

    async fn append_proxy_stats(&self, rows: &[ProxyStatsRow]) -> Result<()> {
        let healthy = rows
            .iter()
            .filter(|r| r.health_status == HealthStatus::Healthy)
            .count();
        let used = rows.iter().filter(|r| r.usage_count > 0).count();
        info!(proxies = rows.len(), healthy, used, "Proxy statistics");
        Ok(())
    }

    async fn append_summary(&self, summary: &RunSummary) -> Result<()> {
        info!(
            run_id = %summary.run_id,
            outcome = summary.outcome.as_str(),
            attempts = summary.attempts_total,
            successes = summary.successes_total,
            target = summary.daily_target,
            success_rate = summary.success_rate,
            duration_secs = summary.duration_secs,
            "Run summary"
        );
        Ok(())
    }

    async fn append_emergency_snapshot(&self, snapshot: &EmergencySnapshot) -> Result<()> {
        warn!(
            run_id = %snapshot.run_id,
            attempts = snapshot.attempts_total,
            successes = snapshot.successes_total,
            consecutive_failures = snapshot.consecutive_failures,
            last_error = snapshot.last_error.as_deref().unwrap_or("-"),
            "Emergency snapshot"
        );
        Ok(())
    }
}
