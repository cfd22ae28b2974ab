use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

/// Failure count at which a proxy is condemned as unhealthy
pub const UNHEALTHY_THRESHOLD: u32 = 3;

/// Proxy health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a proxy entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxySource {
    UserSupplied,
    FallbackPool,
}

impl ProxySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxySource::UserSupplied => "user_supplied",
            ProxySource::FallbackPool => "fallback_pool",
        }
    }
}

/// Basic auth credentials for an upstream proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One managed proxy endpoint with its usage and health statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub credentials: Option<Credentials>,
    pub usage_count: u64,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    pub health_status: HealthStatus,
    pub last_error: Option<String>,
    pub source: ProxySource,
}

impl ProxyRecord {
    pub fn new(host: impl Into<String>, port: u16, source: ProxySource) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
            response_time_ms: None,
            health_status: HealthStatus::Unknown,
            last_error: None,
            source,
        }
    }

    /// Parse a `host:port[:user:pass]` entry
    pub fn parse_line(line: &str, source: ProxySource) -> Result<Self> {
        let line = line.trim();
        let parts: Vec<&str> = line.split(':').collect();

        let (host, port, credentials) = match parts.as_slice() {
            [host, port] => (*host, *port, None),
            [host, port, user, pass] => (
                *host,
                *port,
                Some(Credentials {
                    username: user.to_string(),
                    password: pass.to_string(),
                }),
            ),
            _ => return Err(RunnerError::InvalidProxyLine(line.to_string())),
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(RunnerError::InvalidProxyLine(line.to_string()));
        }

        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| RunnerError::InvalidProxyLine(line.to_string()))?;

        if let Some(creds) = &credentials {
            if creds.username.is_empty() {
                return Err(RunnerError::InvalidProxyLine(line.to_string()));
            }
        }

        let mut record = ProxyRecord::new(host, port, source);
        record.credentials = credentials;
        Ok(record)
    }

    /// Unique `host:port` key of this proxy
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Success rate as a percentage of recorded outcomes
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count as u64 + self.failure_count as u64;
        if total == 0 {
            0.0
        } else {
            (self.success_count as f64 / total as f64) * 100.0
        }
    }

    /// Whether the proxy was handed out within `window` of `now`
    pub fn used_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.last_used_at
            .map(|used| now.signed_duration_since(used) < window)
            .unwrap_or(false)
    }
}

/// Flattened per-proxy statistics row handed to the outcome sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyStatsRow {
    pub address: String,
    pub source: ProxySource,
    pub health_status: HealthStatus,
    pub usage_count: u64,
    pub success_count: u32,
    pub failure_count: u32,
    pub success_rate: f64,
    pub response_time_ms: Option<u64>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&ProxyRecord> for ProxyStatsRow {
    fn from(record: &ProxyRecord) -> Self {
        ProxyStatsRow {
            address: record.address(),
            source: record.source,
            health_status: record.health_status,
            usage_count: record.usage_count,
            success_count: record.success_count,
            failure_count: record.failure_count,
            success_rate: record.success_rate(),
            response_time_ms: record.response_time_ms,
            last_used_at: record.last_used_at,
            last_error: record.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_host_port() {
        let record = ProxyRecord::parse_line("10.0.0.1:8080", ProxySource::UserSupplied).unwrap();
        assert_eq!(record.host, "10.0.0.1");
        assert_eq!(record.port, 8080);
        assert!(record.credentials.is_none());
        assert_eq!(record.health_status, HealthStatus::Unknown);
        assert_eq!(record.address(), "10.0.0.1:8080");
    }

    #[test]
    fn test_parse_line_with_credentials() {
        let record =
            ProxyRecord::parse_line(" proxy.example:3128:alice:s3cret ", ProxySource::FallbackPool)
                .unwrap();
        assert_eq!(record.host, "proxy.example");
        assert_eq!(record.port, 3128);
        assert_eq!(
            record.credentials,
            Some(Credentials {
                username: "alice".to_string(),
                password: "s3cret".to_string(),
            })
        );
        assert_eq!(record.source, ProxySource::FallbackPool);
    }

    #[test]
    fn test_parse_line_rejects_malformed() {
        for line in [
            "",
            "10.0.0.1",
            "10.0.0.1:notaport",
            "10.0.0.1:0",
            "10.0.0.1:70000",
            "10.0.0.1:8080:user",
            ":8080",
            "10.0.0.1:8080::pass",
            "a:1:b:c:d",
        ] {
            assert!(
                ProxyRecord::parse_line(line, ProxySource::UserSupplied).is_err(),
                "expected {:?} to be rejected",
                line
            );
        }
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::default(), HealthStatus::Unknown);
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy");
    }

    #[test]
    fn test_success_rate_and_cooldown() {
        let mut record = ProxyRecord::new("127.0.0.1", 8080, ProxySource::UserSupplied);
        assert_eq!(record.success_rate(), 0.0);

        record.success_count = 3;
        record.failure_count = 1;
        assert!((record.success_rate() - 75.0).abs() < 1e-9);

        let now = Utc::now();
        let window = chrono::Duration::minutes(3);
        assert!(!record.used_within(window, now));

        record.last_used_at = Some(now - chrono::Duration::minutes(1));
        assert!(record.used_within(window, now));

        record.last_used_at = Some(now - chrono::Duration::minutes(5));
        assert!(!record.used_within(window, now));
    }

    #[test]
    fn test_stats_row_hides_credentials() {
        let record =
            ProxyRecord::parse_line("1.2.3.4:1234:user:pass", ProxySource::UserSupplied).unwrap();
        assert_eq!(record.credentials.as_ref().unwrap().username, "user");

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("pass"));

        let row = ProxyStatsRow::from(&record);
        assert_eq!(row.address, "1.2.3.4:1234");
        assert_eq!(row.health_status, HealthStatus::Unknown);
    }
}
