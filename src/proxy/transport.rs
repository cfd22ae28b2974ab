//! HTTP transport through an upstream proxy
//!
//! Plain-HTTP requests are sent to the proxy in absolute form, the way a forward proxy
//! expects them, over a hyper http1 connection.

use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONNECTION, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use tokio::net::TcpStream;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, RunnerError};
use crate::models::ProxyRecord;

const USER_AGENT_VALUE: &str = concat!("rota-runner/", env!("CARGO_PKG_VERSION"));

/// Response collected from a proxied request
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub elapsed: Duration,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Proxy transport handler
pub struct ProxyTransport;

impl ProxyTransport {
    /// GET `target` through `proxy`, bounded by `timeout` end to end
    #[instrument(skip(proxy, timeout), fields(proxy = %proxy.address(), target = %target))]
    pub async fn get(
        proxy: &ProxyRecord,
        target: &Url,
        timeout: Duration,
    ) -> Result<FetchResponse> {
        if target.scheme() != "http" {
            return Err(RunnerError::InvalidConfig(format!(
                "only plain http targets can be fetched through a forward proxy: {}",
                target
            )));
        }

        let started = Instant::now();
        let (status, body) = tokio::time::timeout(timeout, Self::send_get(proxy, target))
            .await
            .map_err(|_| RunnerError::Timeout)??;

        Ok(FetchResponse {
            status,
            body,
            elapsed: started.elapsed(),
        })
    }

    async fn send_get(proxy: &ProxyRecord, target: &Url) -> Result<(StatusCode, Bytes)> {
        let stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
            .await
            .map_err(|e| RunnerError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        let request = Self::build_request(proxy, target)?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RunnerError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RunnerError::ProxyConnectionFailed(format!("Request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| {
                RunnerError::ProxyConnectionFailed(format!("Failed to read response: {}", e))
            })?
            .to_bytes();

        Ok((parts.status, body))
    }

    /// Build an absolute-form GET request carrying proxy credentials when set
    fn build_request(proxy: &ProxyRecord, target: &Url) -> Result<Request<Full<Bytes>>> {
        let host = target
            .host_str()
            .ok_or_else(|| RunnerError::InvalidConfig(format!("target has no host: {}", target)))?;
        let authority = match target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(target.as_str())
            .header(HOST, authority)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(CONNECTION, "close");

        if let Some(creds) = &proxy.credentials {
            let credentials = format!("{}:{}", creds.username, creds.password);
            let encoded = BASE64.encode(credentials.as_bytes());
            builder = builder.header(PROXY_AUTHORIZATION, format!("Basic {}", encoded));
        }

        Ok(builder.body(Full::new(Bytes::new()))?)
    }
}

/// Whether `body` contains something shaped like an IPv4 or IPv6 address
pub fn contains_ip_token(body: &str) -> bool {
    body.split(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
        .any(|token| token.parse::<std::net::IpAddr>().is_ok())
}
