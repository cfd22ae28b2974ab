use crate::error::{Result, RunnerError};
use crate::proxy::health::DEFAULT_PROBE_TARGETS;
use crate::proxy::SelectionStrategy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Run loop configuration
    pub runner: RunnerConfig,
    /// Proxy pool configuration
    pub pool: PoolConfig,
    /// Health probe configuration
    pub probe: ProbeConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Successful work units that end the run (required)
    pub daily_target: u32,
    /// Consecutive failures that trip the circuit breaker (default: 10)
    pub max_consecutive_failures: u32,
    /// Flush proxy stats every N cycles (default: 10)
    pub stats_flush_every: u32,
    /// Re-probe a sample every N cycles (default: 25)
    pub probe_every: u32,
    /// URL fetched through the proxy for each work unit
    pub work_url: Url,
    /// Work unit timeout in seconds (default: 120)
    pub work_timeout_secs: u64,
    /// Directory for JSONL outputs and emergency snapshots
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// User-supplied proxy list, one `host:port[:user:pass]` per line
    pub proxy_file: PathBuf,
    /// Optional fallback list used to refill the pool
    pub fallback_file: Option<PathBuf>,
    /// Recently used proxies are down-weighted for this long (default: 180)
    pub cooldown_secs: u64,
    /// Failure count at which cleanup drops a proxy (default: 10)
    pub max_failures: u32,
    /// Pool floor that triggers a fallback reload (default: 3)
    pub min_size: usize,
    /// Selection strategy (weighted, round_robin)
    pub selection_strategy: SelectionStrategy,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Proxies probed per sampled pass (default: 20)
    pub sample_size: usize,
    /// Per-request timeout in seconds (default: 10)
    pub timeout_secs: u64,
    /// Extra rounds after the first (default: 2)
    pub retries: u32,
    /// Pause between rounds in milliseconds (default: 2000)
    pub retry_delay_ms: u64,
    /// Probes per batch (default: 5)
    pub concurrency: usize,
    /// Bound on one probe across all rounds, in seconds (default: 30)
    pub overall_timeout_secs: u64,
    /// Echo endpoints probed in rotation
    pub targets: Vec<Url>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let daily_target = env::var("RUNNER_DAILY_TARGET")
            .map_err(|_| RunnerError::MissingEnvVar("RUNNER_DAILY_TARGET".into()))?;
        let daily_target: u32 = parse_value("RUNNER_DAILY_TARGET", &daily_target)?;
        if daily_target == 0 {
            return Err(RunnerError::InvalidConfig(
                "RUNNER_DAILY_TARGET must be greater than zero".into(),
            ));
        }

        let work_url = get_env_or("RUNNER_WORK_URL", "http://example.com/");
        let work_url = Url::parse(&work_url).map_err(|e| {
            RunnerError::InvalidConfig(format!("RUNNER_WORK_URL must be a valid URL: {}", e))
        })?;

        let fallback_file = get_env_or("RUNNER_FALLBACK_PROXY_FILE", "");
        let fallback_file = fallback_file.trim();

        Ok(Config {
            runner: RunnerConfig {
                daily_target,
                max_consecutive_failures: parse_env("RUNNER_MAX_CONSECUTIVE_FAILURES", "10")?,
                stats_flush_every: parse_env("RUNNER_STATS_FLUSH_EVERY", "10")?,
                probe_every: parse_env("RUNNER_PROBE_EVERY", "25")?,
                work_url,
                work_timeout_secs: parse_env("RUNNER_WORK_TIMEOUT_SECS", "120")?,
                output_dir: PathBuf::from(get_env_or("RUNNER_OUTPUT_DIR", "./runner-output")),
            },
            pool: PoolConfig {
                proxy_file: PathBuf::from(get_env_or("RUNNER_PROXY_FILE", "proxies.txt")),
                fallback_file: if fallback_file.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(fallback_file))
                },
                cooldown_secs: parse_env("POOL_COOLDOWN_SECS", "180")?,
                max_failures: parse_env("POOL_MAX_FAILURES", "10")?,
                min_size: parse_env("POOL_MIN_SIZE", "3")?,
                selection_strategy: SelectionStrategy::from_str(&get_env_or(
                    "POOL_SELECTION_STRATEGY",
                    "weighted",
                )),
            },
            probe: ProbeConfig {
                sample_size: parse_env("PROBE_SAMPLE_SIZE", "20")?,
                timeout_secs: parse_env("PROBE_TIMEOUT_SECS", "10")?,
                retries: parse_env("PROBE_RETRIES", "2")?,
                retry_delay_ms: parse_env("PROBE_RETRY_DELAY_MS", "2000")?,
                concurrency: parse_env("PROBE_CONCURRENCY", "5")?,
                overall_timeout_secs: parse_env("PROBE_OVERALL_TIMEOUT_SECS", "30")?,
                targets: parse_probe_targets()?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    pub fn work_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.work_timeout_secs)
    }

    pub fn pool_cooldown(&self) -> Duration {
        Duration::from_secs(self.pool.cooldown_secs)
    }
}

fn parse_probe_targets() -> Result<Vec<Url>> {
    let raw = env::var("PROBE_TARGETS").unwrap_or_default();
    let entries: Vec<&str> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if entries.is_empty() {
        return DEFAULT_PROBE_TARGETS
            .iter()
            .map(|t| Url::parse(t).map_err(RunnerError::from))
            .collect();
    }

    entries
        .into_iter()
        .map(|entry| {
            let url = Url::parse(entry).map_err(|e| {
                RunnerError::InvalidConfig(format!(
                    "PROBE_TARGETS entry {} is invalid: {}",
                    entry, e
                ))
            })?;
            if url.scheme() != "http" {
                return Err(RunnerError::InvalidConfig(format!(
                    "PROBE_TARGETS entry {} must use plain http",
                    entry
                )));
            }
            Ok(url)
        })
        .collect()
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    parse_value(key, &get_env_or(key, default))
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RunnerError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
