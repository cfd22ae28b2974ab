//! Health probing for upstream proxies
//!
//! A probe sends a GET through the proxy to a rotation of echo-IP targets. Any error or
//! non-2xx answer counts as "not healthy"; probes never fail the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{Result, RunnerError};
use crate::models::ProxyRecord;
use crate::pool::ProxyStore;
use crate::proxy::transport::{contains_ip_token, FetchResponse, ProxyTransport};

/// Echo-IP endpoints reachable over plain HTTP
pub const DEFAULT_PROBE_TARGETS: &[&str] = &[
    "http://api.ipify.org/?format=json",
    "http://httpbin.org/ip",
    "http://ifconfig.me/ip",
];

/// Health prober configuration
#[derive(Debug, Clone)]
pub struct HealthProberConfig {
    /// Targets tried in rotation; any one answering 2xx marks the proxy healthy
    pub targets: Vec<Url>,
    /// Timeout for a single request
    pub attempt_timeout: Duration,
    /// Extra rounds over the target list after the first one
    pub retries: u32,
    /// Pause between rounds
    pub retry_delay: Duration,
    /// Probes in flight per batch
    pub concurrency: usize,
    /// Pause between batches
    pub batch_pause: Duration,
    /// Upper bound for one probe across every round and target
    pub overall_timeout: Duration,
}

impl Default for HealthProberConfig {
    fn default() -> Self {
        Self {
            targets: DEFAULT_PROBE_TARGETS
                .iter()
                .filter_map(|t| Url::parse(t).ok())
                .collect(),
            attempt_timeout: Duration::from_secs(10),
            retries: 2,
            retry_delay: Duration::from_secs(2),
            concurrency: 5,
            batch_pause: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(30),
        }
    }
}

/// Network seam used by the prober
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn fetch(
        &self,
        proxy: &ProxyRecord,
        target: &Url,
        timeout: Duration,
    ) -> Result<FetchResponse>;
}

/// Probes over real HTTP through the proxy
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProbeTransport;

#[async_trait]
impl ProbeTransport for HttpProbeTransport {
    async fn fetch(
        &self,
        proxy: &ProxyRecord,
        target: &Url,
        timeout: Duration,
    ) -> Result<FetchResponse> {
        ProxyTransport::get(proxy, target, timeout).await
    }
}

/// Classification of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub healthy: bool,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// Outcome of a sampled validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeSummary {
    pub healthy: usize,
    pub sampled: usize,
}

/// Health prober for upstream proxies
pub struct HealthProber {
    config: HealthProberConfig,
    transport: Arc<dyn ProbeTransport>,
    next_target: AtomicUsize,
}

impl HealthProber {
    /// Create a prober that talks real HTTP
    pub fn new(config: HealthProberConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpProbeTransport))
    }

    pub fn with_transport(config: HealthProberConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        Self {
            config,
            transport,
            next_target: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &HealthProberConfig {
        &self.config
    }

    /// Probe one proxy without touching the store
    ///
    /// All rounds together are bounded by `overall_timeout`.
    #[instrument(skip(self, record), fields(proxy = %record.address()))]
    pub async fn check(&self, record: &ProxyRecord) -> ProbeResult {
        let overall = self.config.overall_timeout;
        let outcome = match tokio::time::timeout(overall, self.run_rounds(record)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RunnerError::ProbeFailed(format!(
                "timed out after {}s",
                overall.as_secs()
            ))),
        };

        match outcome {
            Ok(response_time_ms) => ProbeResult {
                healthy: true,
                response_time_ms: Some(response_time_ms),
                error: None,
            },
            Err(e) => ProbeResult {
                healthy: false,
                response_time_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Retry rounds over the rotated target list; returns the latency of the first 2xx
    async fn run_rounds(&self, record: &ProxyRecord) -> Result<u64> {
        let targets = &self.config.targets;
        if targets.is_empty() {
            return Err(RunnerError::ProbeFailed("no probe targets configured".to_string()));
        }

        // Spread consecutive probes over the target list
        let offset = self.next_target.fetch_add(1, Ordering::Relaxed);
        let mut last_error = String::new();

        for round in 0..=self.config.retries {
            if round > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            for i in 0..targets.len() {
                let target = &targets[(offset + i) % targets.len()];

                match self
                    .transport
                    .fetch(record, target, self.config.attempt_timeout)
                    .await
                {
                    Ok(response) if response.is_success() => {
                        let body = String::from_utf8_lossy(&response.body);
                        if !contains_ip_token(&body) {
                            debug!(target = %target, "Probe body carries no IP token");
                        }
                        return Ok(response.elapsed.as_millis() as u64);
                    }
                    Ok(response) => {
                        last_error = format!("HTTP {} from {}", response.status.as_u16(), target);
                    }
                    Err(e) => {
                        last_error = format!("{} ({})", e, target);
                    }
                }
            }

            debug!(round, "Probe round failed");
        }

        Err(RunnerError::ProbeFailed(last_error))
    }

    /// Probe one proxy and record the result in the store
    pub async fn probe(&self, store: &ProxyStore, record: &ProxyRecord) -> bool {
        let address = record.address();
        let result = self.check(record).await;

        let recorded = match (result.healthy, result.response_time_ms) {
            (true, Some(ms)) => store.record_probe_success(&address, ms),
            (true, None) => store.record_success(&address),
            (false, _) => {
                let message = result.error.as_deref().unwrap_or("probe failed");
                warn!(proxy = %address, "Proxy probe failed: {}", message);
                store.record_failure(&address, message)
            }
        };

        if let Err(e) = recorded {
            // Proxy was removed while the probe was in flight
            debug!(proxy = %address, "Probe result not recorded: {}", e);
        }

        result.healthy
    }

    /// Probe a random subset of the pool in bounded-concurrency batches
    #[instrument(skip(self, store))]
    pub async fn probe_sample(&self, store: &ProxyStore, sample_size: usize) -> ProbeSummary {
        let sample = store.random_sample(sample_size);
        if sample.is_empty() {
            return ProbeSummary::default();
        }

        let concurrency = self.config.concurrency.max(1);
        let mut healthy = 0;

        for (i, batch) in sample.chunks(concurrency).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
            }

            let results = join_all(batch.iter().map(|record| self.probe(store, record))).await;
            healthy += results.iter().filter(|&&ok| ok).count();
        }

        let summary = ProbeSummary {
            healthy,
            sampled: sample.len(),
        };

        info!(
            healthy = summary.healthy,
            sampled = summary.sampled,
            pool = store.len(),
            "Proxy sample probe complete"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HealthStatus, ProxySource};
    use bytes::Bytes;
    use hyper::StatusCode;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Status(u16),
        Refused,
        /// Fail the first target requested, answer the rest
        FirstTargetDown,
        /// Never answer within the attempt timeout
        Hang,
    }

    #[derive(Default)]
    struct StubTransport {
        behavior: HashMap<String, Behavior>,
        calls: Mutex<Vec<(String, String)>>,
        in_flight: Mutex<usize>,
        max_in_flight: Mutex<usize>,
    }

    impl StubTransport {
        fn with(entries: &[(&str, Behavior)]) -> Self {
            Self {
                behavior: entries
                    .iter()
                    .map(|(addr, b)| (addr.to_string(), *b))
                    .collect(),
                ..Default::default()
            }
        }

        fn calls_for(&self, address: &str) -> usize {
            self.calls.lock().iter().filter(|(a, _)| a == address).count()
        }
    }

    #[async_trait]
    impl ProbeTransport for StubTransport {
        async fn fetch(
            &self,
            proxy: &ProxyRecord,
            target: &Url,
            timeout: Duration,
        ) -> Result<FetchResponse> {
            let address = proxy.address();
            let behavior = self.behavior.get(&address).copied().unwrap_or(Behavior::Ok);
            if let Behavior::Hang = behavior {
                self.calls.lock().push((address, target.to_string()));
                tokio::time::sleep(timeout).await;
                return Err(RunnerError::Timeout);
            }
            let first_call = self.calls_for(&address) == 0;
            self.calls.lock().push((address.clone(), target.to_string()));

            {
                let mut in_flight = self.in_flight.lock();
                *in_flight += 1;
                let mut max = self.max_in_flight.lock();
                *max = (*max).max(*in_flight);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            *self.in_flight.lock() -= 1;

            let ok = FetchResponse {
                status: StatusCode::OK,
                body: Bytes::from_static(b"203.0.113.9"),
                elapsed: Duration::from_millis(120),
            };

            match behavior {
                Behavior::Ok => Ok(ok),
                Behavior::Status(code) => Ok(FetchResponse {
                    status: StatusCode::from_u16(code).unwrap(),
                    body: Bytes::new(),
                    elapsed: Duration::from_millis(10),
                }),
                Behavior::Refused => Err(RunnerError::ProxyConnectionFailed(
                    "connection refused".to_string(),
                )),
                Behavior::FirstTargetDown if first_call => Err(RunnerError::Timeout),
                Behavior::FirstTargetDown => Ok(ok),
                Behavior::Hang => unreachable!(),
            }
        }
    }

    fn config() -> HealthProberConfig {
        HealthProberConfig {
            targets: vec![
                Url::parse("http://echo-a.test/").unwrap(),
                Url::parse("http://echo-b.test/").unwrap(),
            ],
            attempt_timeout: Duration::from_secs(1),
            retries: 2,
            retry_delay: Duration::from_secs(2),
            concurrency: 5,
            batch_pause: Duration::from_millis(500),
            overall_timeout: Duration::from_secs(60),
        }
    }

    fn store_of(n: u16) -> ProxyStore {
        let records = (1..=n)
            .map(|i| ProxyRecord::new("10.0.0.1", 9000 + i, ProxySource::UserSupplied))
            .collect();
        ProxyStore::from_records(records, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_healthy_records_latency() {
        let transport = Arc::new(StubTransport::default());
        let prober = HealthProber::with_transport(config(), transport.clone());
        let store = store_of(1);
        let record = store.get("10.0.0.1:9001").unwrap();

        assert!(prober.probe(&store, &record).await);

        let updated = store.get("10.0.0.1:9001").unwrap();
        assert_eq!(updated.health_status, HealthStatus::Healthy);
        assert_eq!(updated.response_time_ms, Some(120));
        assert_eq!(transport.calls_for("10.0.0.1:9001"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_tolerates_one_target_down() {
        let transport = Arc::new(StubTransport::with(&[(
            "10.0.0.1:9001",
            Behavior::FirstTargetDown,
        )]));
        let prober = HealthProber::with_transport(config(), transport.clone());
        let store = store_of(1);
        let record = store.get("10.0.0.1:9001").unwrap();

        assert!(prober.probe(&store, &record).await);
        assert_eq!(transport.calls_for("10.0.0.1:9001"), 2);

        let calls = transport.calls.lock().clone();
        assert_ne!(calls[0].1, calls[1].1, "second attempt should use the other target");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retries_then_fails() {
        let transport = Arc::new(StubTransport::with(&[("10.0.0.1:9001", Behavior::Refused)]));
        let prober = HealthProber::with_transport(config(), transport.clone());
        let store = store_of(1);
        let record = store.get("10.0.0.1:9001").unwrap();

        let result = prober.check(&record).await;
        assert!(!result.healthy);
        assert!(result.error.unwrap().contains("connection refused"));
        // 3 rounds over 2 targets
        assert_eq!(transport.calls_for("10.0.0.1:9001"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_non_2xx_is_unhealthy_failure() {
        let transport = Arc::new(StubTransport::with(&[("10.0.0.1:9001", Behavior::Status(407))]));
        let prober = HealthProber::with_transport(config(), transport);
        let store = store_of(1);
        let record = store.get("10.0.0.1:9001").unwrap();

        assert!(!prober.probe(&store, &record).await);
        let updated = store.get("10.0.0.1:9001").unwrap();
        assert_eq!(updated.failure_count, 1);
        assert!(updated.last_error.unwrap().contains("HTTP 407"));

        // Two more failed probes condemn it
        prober.probe(&store, &record).await;
        prober.probe(&store, &record).await;
        assert_eq!(
            store.get("10.0.0.1:9001").unwrap().health_status,
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_without_targets() {
        let mut cfg = config();
        cfg.targets.clear();
        let prober = HealthProber::with_transport(cfg, Arc::new(StubTransport::default()));
        let record = ProxyRecord::new("10.0.0.1", 9001, ProxySource::UserSupplied);
        assert!(!prober.check(&record).await.healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_sample_bounded_batches() {
        let transport = Arc::new(StubTransport::with(&[
            ("10.0.0.1:9002", Behavior::Refused),
            ("10.0.0.1:9005", Behavior::Status(502)),
        ]));
        let prober = HealthProber::with_transport(config(), transport.clone());
        let store = store_of(12);

        let summary = prober.probe_sample(&store, 8).await;
        assert_eq!(summary.sampled, 8);
        assert!(summary.healthy <= 8);
        assert!(*transport.max_in_flight.lock() <= 5);

        let probed: Vec<ProxyRecord> = store
            .all()
            .into_iter()
            .filter(|r| r.health_status != HealthStatus::Unknown || r.failure_count > 0)
            .collect();
        assert_eq!(probed.len(), 8);
        assert_eq!(
            probed
                .iter()
                .filter(|r| r.health_status == HealthStatus::Healthy)
                .count(),
            summary.healthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_bounded_by_overall_timeout() {
        let transport = Arc::new(StubTransport::with(&[("10.0.0.1:9001", Behavior::Hang)]));
        let mut cfg = config();
        cfg.attempt_timeout = Duration::from_secs(10);
        cfg.overall_timeout = Duration::from_secs(15);
        let prober = HealthProber::with_transport(cfg, transport.clone());
        let record = ProxyRecord::new("10.0.0.1", 9001, ProxySource::UserSupplied);

        let started = tokio::time::Instant::now();
        let result = prober.check(&record).await;

        assert!(!result.healthy);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        // Second target was in flight when the deadline hit; no further rounds
        assert_eq!(transport.calls_for("10.0.0.1:9001"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_record_recovers_after_successful_check() {
        let store = store_of(1);
        for _ in 0..3 {
            store.record_failure("10.0.0.1:9001", "connection reset").unwrap();
        }
        let condemned = store.get("10.0.0.1:9001").unwrap();
        assert_eq!(condemned.health_status, HealthStatus::Unhealthy);

        let prober = HealthProber::with_transport(config(), Arc::new(StubTransport::default()));
        assert!(prober.probe(&store, &condemned).await);

        let recovered = store.get("10.0.0.1:9001").unwrap();
        assert_eq!(recovered.health_status, HealthStatus::Healthy);
        assert_eq!(recovered.response_time_ms, Some(120));
        assert!(recovered.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_sample_empty_store() {
        let prober = HealthProber::with_transport(config(), Arc::new(StubTransport::default()));
        let summary = prober.probe_sample(&ProxyStore::default(), 10).await;
        assert_eq!(summary, ProbeSummary::default());
    }
}
