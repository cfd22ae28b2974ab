use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Orchestrator lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Validating,
    Running,
    Succeeded,
    Aborted,
    Finalizing,
    Terminal,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Validating => "validating",
            RunPhase::Running => "running",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Aborted => "aborted",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Daily target reached
    Succeeded,
    /// Shutdown requested before the target was reached
    Stopped,
    /// Validation failure, circuit breaker trip or loop failure
    Aborted { reason: String },
}

impl RunOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Stopped => "stopped",
            RunOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// Orchestrator-owned run counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleState {
    pub attempts_total: u32,
    pub successes_total: u32,
    pub consecutive_failures: u32,
    pub daily_target: u32,
    pub session_start: DateTime<Utc>,
}

impl CycleState {
    pub fn new(daily_target: u32) -> Self {
        Self {
            attempts_total: 0,
            successes_total: 0,
            consecutive_failures: 0,
            daily_target,
            session_start: Utc::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.attempts_total += 1;
        self.successes_total += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.attempts_total += 1;
        self.consecutive_failures += 1;
    }

    /// Successes over attempts, 0 before the first attempt
    pub fn success_rate(&self) -> f64 {
        if self.attempts_total == 0 {
            0.0
        } else {
            self.successes_total as f64 / self.attempts_total as f64
        }
    }

    pub fn target_reached(&self) -> bool {
        self.successes_total >= self.daily_target
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.session_start)
            .num_seconds()
            .max(0)
    }
}

/// Result of one work unit as reported by the work runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOutcome {
    pub success: bool,
    /// Payload summary on success, failure reason otherwise
    pub detail: String,
}

impl WorkOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: reason.into(),
        }
    }
}

/// One cycle's outcome as written to the outcome sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub run_id: Uuid,
    pub cycle: u32,
    pub timestamp: DateTime<Utc>,
    pub proxy_address: String,
    pub success: bool,
    pub detail: String,
    pub duration_ms: u64,
}

/// End-of-run report, written for every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub attempts_total: u32,
    pub successes_total: u32,
    pub daily_target: u32,
    pub success_rate: f64,
    pub duration_secs: i64,
    pub pool_size: usize,
    pub healthy_proxies: usize,
    pub snapshot_path: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

/// Post-mortem record written only when a run aborts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencySnapshot {
    pub run_id: Uuid,
    pub attempts_total: u32,
    pub successes_total: u32,
    pub consecutive_failures: u32,
    pub daily_target: u32,
    pub last_error: Option<String>,
    pub elapsed_secs: i64,
    pub written_at: DateTime<Utc>,
}
