//! Work units performed through a selected proxy
//!
//! The orchestrator only sees [`WorkRunner`]; what a unit of work does is up to the
//! implementation. [`HttpFetchRunner`] is the stock runner used by the binary.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{Result, RunnerError};
use crate::models::{ProxyRecord, WorkOutcome};
use crate::proxy::ProxyTransport;

/// Performs one unit of work through a proxy
#[async_trait]
pub trait WorkRunner: Send + Sync {
    /// Cheap readiness check run before the loop starts
    async fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Attempt one unit of work. An `Err` is recorded as a failed attempt.
    async fn attempt(&self, proxy: &ProxyRecord) -> Result<WorkOutcome>;
}

/// Fetches a fixed URL through the proxy; any 2xx is a success
pub struct HttpFetchRunner {
    url: Url,
    timeout: Duration,
}

impl HttpFetchRunner {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self { url, timeout }
    }
}

#[async_trait]
impl WorkRunner for HttpFetchRunner {
    async fn check_ready(&self) -> Result<()> {
        if self.url.scheme() != "http" {
            return Err(RunnerError::NotReady(format!(
                "work URL must use plain http: {}",
                self.url
            )));
        }
        if self.url.host_str().is_none() {
            return Err(RunnerError::NotReady(format!("work URL has no host: {}", self.url)));
        }
        Ok(())
    }

    async fn attempt(&self, proxy: &ProxyRecord) -> Result<WorkOutcome> {
        let response = ProxyTransport::get(proxy, &self.url, self.timeout).await?;
        debug!(
            proxy = %proxy.address(),
            status = response.status.as_u16(),
            elapsed_ms = response.elapsed.as_millis() as u64,
            "Work unit response"
        );

        if response.is_success() {
            Ok(WorkOutcome::success(format!(
                "HTTP {}, {} bytes",
                response.status.as_u16(),
                response.body.len()
            )))
        } else {
            Ok(WorkOutcome::failure(format!("HTTP {}", response.status.as_u16())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxySource;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn one_shot_proxy(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 2048];
            let _ = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "{}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                status_line
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_check_ready_rejects_https() {
        let runner = HttpFetchRunner::new(
            Url::parse("https://example.test/").unwrap(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            runner.check_ready().await,
            Err(RunnerError::NotReady(_))
        ));

        let runner = HttpFetchRunner::new(
            Url::parse("http://example.test/").unwrap(),
            Duration::from_secs(1),
        );
        assert!(runner.check_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_attempt_success_and_failure() {
        let url = Url::parse("http://example.test/job").unwrap();
        let runner = HttpFetchRunner::new(url, Duration::from_secs(5));

        let port = one_shot_proxy("HTTP/1.1 200 OK").await;
        let proxy = ProxyRecord::new("127.0.0.1", port, ProxySource::UserSupplied);
        let outcome = runner.attempt(&proxy).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.detail, "HTTP 200, 2 bytes");

        let port = one_shot_proxy("HTTP/1.1 503 Service Unavailable").await;
        let proxy = ProxyRecord::new("127.0.0.1", port, ProxySource::UserSupplied);
        let outcome = runner.attempt(&proxy).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.detail, "HTTP 503");
    }
}
