//! Cycle orchestrator
//!
//! Drives `select proxy -> attempt work unit -> record outcome -> wait` until the daily
//! target is met, the circuit breaker trips, or shutdown is requested. Finalisation
//! (summary, and an emergency snapshot on abort) runs on every exit path, including a
//! panic inside the loop body.

pub mod delay;
pub mod snapshot;

pub use delay::DelayPolicy;

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, RunnerError};
use crate::models::{
    CycleState, EmergencySnapshot, HealthStatus, OutcomeRecord, ProxyRecord, RunOutcome, RunPhase,
    RunSummary, WorkOutcome,
};
use crate::pool::ProxyStore;
use crate::proxy::{HealthProber, ProxySelector};
use crate::sink::OutcomeSink;
use crate::work::WorkRunner;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Successful work units that end the run
    pub daily_target: u32,
    /// Consecutive failures that trip the circuit breaker
    pub max_consecutive_failures: u32,
    /// Flush proxy statistics and clean the pool every N cycles
    pub stats_flush_every: u32,
    /// Re-run the sampled probe every N cycles (0 disables)
    pub probe_every: u32,
    /// Proxies probed per sampled pass (0 skips probing at validation)
    pub probe_sample_size: usize,
    /// Failure count at which cleanup removes a proxy
    pub max_proxy_failures: u32,
    /// Upper bound for one work unit
    pub work_timeout: Duration,
    /// Probe `Unknown` proxies right after selection
    pub jit_probe: bool,
    /// Selections tried per cycle when just-in-time probes fail
    pub selection_attempts: u32,
    /// Where emergency snapshots are written
    pub snapshot_dir: Option<PathBuf>,
    pub delay: DelayPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            daily_target: 1,
            max_consecutive_failures: 10,
            stats_flush_every: 10,
            probe_every: 25,
            probe_sample_size: 20,
            max_proxy_failures: 10,
            work_timeout: Duration::from_secs(120),
            jit_probe: true,
            selection_attempts: 3,
            snapshot_dir: None,
            delay: DelayPolicy::default(),
        }
    }
}

/// Runs work cycles against the proxy pool
pub struct CycleOrchestrator {
    config: OrchestratorConfig,
    store: Arc<ProxyStore>,
    selector: Box<dyn ProxySelector>,
    prober: Arc<HealthProber>,
    runner: Arc<dyn WorkRunner>,
    sink: Arc<dyn OutcomeSink>,
    shutdown: watch::Receiver<bool>,
    run_id: Uuid,
    phase: RunPhase,
    phase_history: Vec<RunPhase>,
    state: CycleState,
    cycles: u32,
    last_error: Option<String>,
    outcome: Option<RunOutcome>,
}

impl CycleOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<ProxyStore>,
        selector: Box<dyn ProxySelector>,
        prober: Arc<HealthProber>,
        runner: Arc<dyn WorkRunner>,
        sink: Arc<dyn OutcomeSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let state = CycleState::new(config.daily_target);
        Self {
            config,
            store,
            selector,
            prober,
            runner,
            sink,
            shutdown,
            run_id: Uuid::new_v4(),
            phase: RunPhase::Idle,
            phase_history: vec![RunPhase::Idle],
            state,
            cycles: 0,
            last_error: None,
            outcome: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Every phase entered so far, in order
    pub fn phase_history(&self) -> &[RunPhase] {
        &self.phase_history
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run to completion
    ///
    /// Returns the summary when the target is met or shutdown was requested. Validation
    /// failures and circuit-breaker trips are returned as errors after finalisation.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run(&mut self) -> Result<RunSummary> {
        info!(
            target = self.config.daily_target,
            strategy = self.selector.strategy_name(),
            pool = self.store.len(),
            "Starting run"
        );

        self.set_phase(RunPhase::Validating);
        if let Err(e) = self.validate().await {
            error!("Validation failed: {}", e);
            self.set_phase(RunPhase::Aborted);
            self.last_error = Some(e.to_string());
            self.finalize(RunOutcome::Aborted {
                reason: e.to_string(),
            })
            .await;
            return Err(e);
        }

        self.set_phase(RunPhase::Running);
        let loop_result = AssertUnwindSafe(self.run_loop()).catch_unwind().await;

        let (outcome, failure) = match loop_result {
            Ok(Ok(outcome)) => (outcome, None),
            Ok(Err(e)) => {
                error!("Run aborted: {}", e);
                self.last_error.get_or_insert_with(|| e.to_string());
                (
                    RunOutcome::Aborted {
                        reason: e.to_string(),
                    },
                    Some(e),
                )
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Cycle loop panicked: {}", message);
                let reason = format!("cycle loop panicked: {}", message);
                self.last_error = Some(reason.clone());
                (
                    RunOutcome::Aborted {
                        reason: reason.clone(),
                    },
                    Some(RunnerError::Internal(reason)),
                )
            }
        };

        // A stopped run goes straight from Running to Finalizing
        match outcome {
            RunOutcome::Succeeded => self.set_phase(RunPhase::Succeeded),
            RunOutcome::Aborted { .. } => self.set_phase(RunPhase::Aborted),
            RunOutcome::Stopped => {}
        }

        let summary = self.finalize(outcome).await;
        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        debug!(from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
        self.phase_history.push(phase);
    }

    async fn validate(&mut self) -> Result<()> {
        if self.config.daily_target == 0 {
            return Err(RunnerError::InvalidConfig(
                "daily target must be greater than zero".into(),
            ));
        }
        if self.config.max_consecutive_failures == 0 {
            return Err(RunnerError::InvalidConfig(
                "max consecutive failures must be greater than zero".into(),
            ));
        }
        if self.store.is_empty() {
            return Err(RunnerError::EmptyPool);
        }

        self.sink.check_ready().await?;
        self.runner.check_ready().await?;

        if self.config.probe_sample_size > 0 {
            let summary = self
                .prober
                .probe_sample(&self.store, self.config.probe_sample_size)
                .await;
            if summary.healthy == 0 {
                warn!(
                    sampled = summary.sampled,
                    "No healthy proxies in validation sample, continuing with weighted selection"
                );
            }
        }

        Ok(())
    }

    async fn run_loop(&mut self) -> Result<RunOutcome> {
        loop {
            if *self.shutdown.borrow() {
                info!(cycles = self.cycles, "Shutdown requested, leaving cycle loop");
                return Ok(RunOutcome::Stopped);
            }

            self.cycles += 1;
            let cycle = self.cycles;

            let proxy = self.acquire_proxy().await?;
            let outcome = self.attempt(&proxy).await;
            self.record_outcome(cycle, &proxy, outcome).await;

            if self.state.consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    consecutive_failures = self.state.consecutive_failures,
                    "Circuit breaker tripped"
                );
                return Err(RunnerError::CircuitBreakerTripped {
                    consecutive_failures: self.state.consecutive_failures,
                });
            }

            if self.state.target_reached() {
                info!(
                    successes = self.state.successes_total,
                    attempts = self.state.attempts_total,
                    "Daily target reached"
                );
                return Ok(RunOutcome::Succeeded);
            }

            if self.config.stats_flush_every > 0 && cycle % self.config.stats_flush_every == 0 {
                self.flush_stats().await;
                self.store.cleanup(self.config.max_proxy_failures);
            }

            if self.config.probe_every > 0
                && self.config.probe_sample_size > 0
                && cycle % self.config.probe_every == 0
            {
                self.prober
                    .probe_sample(&self.store, self.config.probe_sample_size)
                    .await;
            }

            let delay = self.config.delay.next_delay(&self.state);
            info!(
                cycle,
                successes = self.state.successes_total,
                attempts = self.state.attempts_total,
                consecutive_failures = self.state.consecutive_failures,
                delay_secs = delay.as_secs(),
                "Waiting before next cycle"
            );
            self.wait_or_shutdown(delay).await;
        }
    }

    /// Select a proxy, probing it first when its health is unknown
    async fn acquire_proxy(&mut self) -> Result<ProxyRecord> {
        let attempts = self.config.selection_attempts.max(1);
        let mut candidate = None;

        for attempt in 1..=attempts {
            let proxy = self.selector.select_next(&self.store)?;
            if !self.config.jit_probe || proxy.health_status != HealthStatus::Unknown {
                return Ok(proxy);
            }

            let address = proxy.address();
            if self.prober.probe(&self.store, &proxy).await {
                return Ok(self.store.get(&address).unwrap_or(proxy));
            }

            debug!(proxy = %address, attempt, "Just-in-time probe failed, reselecting");
            candidate = Some(proxy);
        }

        // Every probed candidate failed; use the last one rather than stall the cycle
        candidate.ok_or(RunnerError::NoProxyAvailable)
    }

    #[instrument(skip(self, proxy), fields(proxy = %proxy.address()))]
    async fn attempt(&self, proxy: &ProxyRecord) -> (WorkOutcome, Duration) {
        let started = Instant::now();
        let work = self.runner.attempt(proxy);
        let outcome = match tokio::time::timeout(self.config.work_timeout, work).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                if !e.is_transient() {
                    warn!("Work runner returned a non-network error: {}", e);
                }
                WorkOutcome::failure(e.to_string())
            }
            Err(_) => WorkOutcome::failure(format!(
                "work unit timed out after {}s",
                self.config.work_timeout.as_secs()
            )),
        };
        (outcome, started.elapsed())
    }

    async fn record_outcome(
        &mut self,
        cycle: u32,
        proxy: &ProxyRecord,
        (outcome, elapsed): (WorkOutcome, Duration),
    ) {
        let address = proxy.address();

        let recorded = if outcome.success {
            self.state.record_success();
            self.store.record_success(&address)
        } else {
            self.state.record_failure();
            self.last_error = Some(outcome.detail.clone());
            warn!(
                proxy = %address,
                consecutive_failures = self.state.consecutive_failures,
                "Work unit failed: {}",
                outcome.detail
            );
            self.store.record_failure(&address, &outcome.detail)
        };
        if let Err(e) = recorded {
            warn!(proxy = %address, "Outcome not recorded in pool: {}", e);
        }

        let record = OutcomeRecord {
            run_id: self.run_id,
            cycle,
            timestamp: Utc::now(),
            proxy_address: address,
            success: outcome.success,
            detail: outcome.detail,
            duration_ms: elapsed.as_millis() as u64,
        };
        if let Err(e) = self.sink.append_outcome(&record).await {
            warn!("Failed to log cycle outcome: {}", e);
        }
    }

    async fn flush_stats(&self) {
        let rows = self.store.stats_rows();
        if let Err(e) = self.sink.append_proxy_stats(&rows).await {
            warn!("Failed to flush proxy statistics: {}", e);
        }
    }

    /// Sleep for `delay`, returning early if shutdown is requested
    async fn wait_or_shutdown(&mut self, delay: Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = self.shutdown.changed() => match changed {
                    Ok(()) if *self.shutdown.borrow() => return,
                    Ok(()) => continue,
                    Err(_) => {
                        // Sender gone: nobody can request shutdown any more
                        (&mut sleep).await;
                        return;
                    }
                },
            }
        }
    }

    async fn finalize(&mut self, outcome: RunOutcome) -> RunSummary {
        self.set_phase(RunPhase::Finalizing);
        let now = Utc::now();

        self.flush_stats().await;

        let mut snapshot_path = None;
        if outcome.is_aborted() {
            let snapshot = EmergencySnapshot {
                run_id: self.run_id,
                attempts_total: self.state.attempts_total,
                successes_total: self.state.successes_total,
                consecutive_failures: self.state.consecutive_failures,
                daily_target: self.state.daily_target,
                last_error: self.last_error.clone(),
                elapsed_secs: self.state.elapsed_secs(now),
                written_at: now,
            };

            if let Some(dir) = &self.config.snapshot_dir {
                match snapshot::write_snapshot(dir, &snapshot).await {
                    Ok(path) => snapshot_path = Some(path),
                    Err(e) => error!("Failed to write emergency snapshot: {}", e),
                }
            }

            if let Err(e) = self.sink.append_emergency_snapshot(&snapshot).await {
                warn!("Failed to log emergency snapshot: {}", e);
            }
        }

        let summary = RunSummary {
            run_id: self.run_id,
            outcome: outcome.clone(),
            attempts_total: self.state.attempts_total,
            successes_total: self.state.successes_total,
            daily_target: self.state.daily_target,
            success_rate: self.state.success_rate(),
            duration_secs: self.state.elapsed_secs(now),
            pool_size: self.store.len(),
            healthy_proxies: self.store.healthy_count(),
            snapshot_path,
            finished_at: now,
        };

        if let Err(e) = self.sink.append_summary(&summary).await {
            warn!("Failed to log run summary: {}", e);
        }

        info!(
            outcome = outcome.as_str(),
            attempts = summary.attempts_total,
            successes = summary.successes_total,
            success_rate = summary.success_rate,
            duration_secs = summary.duration_secs,
            "Run finished"
        );

        self.outcome = Some(outcome);
        self.set_phase(RunPhase::Terminal);
        summary
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
