//! Low-level cluster REST transport.
//!
//! [`ClusterApi`] is the seam between the platform handlers and the
//! wire: handlers speak resource paths and JSON documents, the
//! transport deals with connections, auth headers and status codes.
//! Tests swap in an in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::debug;

use infergrid_core::ClusterConfig;

use crate::error::{PlatformError, PlatformResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("infergrid/", env!("CARGO_PKG_VERSION"));

/// JSON-over-HTTP access to a cluster API server.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_json(&self, config: &ClusterConfig, path: &str) -> PlatformResult<Value>;
    async fn post_json(
        &self,
        config: &ClusterConfig,
        path: &str,
        body: &Value,
    ) -> PlatformResult<Value>;
    async fn delete(&self, config: &ClusterConfig, path: &str) -> PlatformResult<Value>;
    /// Plain-text GET, used for pod logs.
    async fn get_text(&self, config: &ClusterConfig, path: &str) -> PlatformResult<String>;
}

/// Direct HTTP/1.1 transport. TLS termination is expected in front of
/// the API server address configured per cluster.
pub struct HttpClusterApi {
    timeout: Duration,
}

impl HttpClusterApi {
    pub fn new() -> Self {
        Self {
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Strips the scheme off the configured server address, leaving
    /// `host:port` for the TCP connect and the Host header.
    fn authority(config: &ClusterConfig) -> PlatformResult<String> {
        let server = config.server.trim();
        let authority = server
            .strip_prefix("https://")
            .or_else(|| server.strip_prefix("http://"))
            .unwrap_or(server)
            .trim_end_matches('/');
        if authority.is_empty() {
            return Err(PlatformError::Configuration(
                "cluster server address is empty".to_string(),
            ));
        }
        Ok(authority.to_string())
    }

    async fn request(
        &self,
        config: &ClusterConfig,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> PlatformResult<(u16, bytes::Bytes)> {
        let authority = Self::authority(config)?;
        let addr = if authority.contains(':') {
            authority.clone()
        } else {
            format!("{authority}:443")
        };

        let fut = async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| PlatformError::Connection(format!("connect {addr}: {e}")))?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| PlatformError::Connection(format!("handshake {addr}: {e}")))?;

            // Drive the connection until the exchange completes.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "cluster api connection closed");
                }
            });

            let payload = match body {
                Some(value) => serde_json::to_vec(value)
                    .map_err(|e| PlatformError::Configuration(format!("encode body: {e}")))?,
                None => Vec::new(),
            };

            let mut builder = Request::builder()
                .method(method)
                .uri(path)
                .header(http::header::HOST, authority.as_str())
                .header(http::header::USER_AGENT, USER_AGENT)
                .header(
                    http::header::AUTHORIZATION,
                    format!("Bearer {}", config.token),
                );
            if body.is_some() {
                builder = builder.header(http::header::CONTENT_TYPE, "application/json");
            }
            let request = builder
                .body(Full::new(bytes::Bytes::from(payload)))
                .map_err(|e| PlatformError::Configuration(format!("build request: {e}")))?;

            let response = sender
                .send_request(request)
                .await
                .map_err(|e| PlatformError::Connection(format!("send {method} {path}: {e}")))?;
            let status = response.status().as_u16();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| PlatformError::Connection(format!("read body: {e}")))?
                .to_bytes();
            Ok::<_, PlatformError>((status, bytes))
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Connection(format!(
                "timeout after {:?} for {method} {path}",
                self.timeout
            ))),
        }
    }

    fn check_status(status: u16, path: &str, bytes: &bytes::Bytes) -> PlatformResult<()> {
        if (200..300).contains(&status) {
            return Ok(());
        }
        if status == 404 {
            return Err(PlatformError::NotFound(path.to_string()));
        }
        let message = String::from_utf8_lossy(bytes).into_owned();
        Err(PlatformError::Api { status, message })
    }

    fn parse_json(bytes: &bytes::Bytes) -> PlatformResult<Value> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes)
            .map_err(|e| PlatformError::Connection(format!("invalid json response: {e}")))
    }
}

impl Default for HttpClusterApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn get_json(&self, config: &ClusterConfig, path: &str) -> PlatformResult<Value> {
        let (status, bytes) = self.request(config, "GET", path, None).await?;
        Self::check_status(status, path, &bytes)?;
        Self::parse_json(&bytes)
    }

    async fn post_json(
        &self,
        config: &ClusterConfig,
        path: &str,
        body: &Value,
    ) -> PlatformResult<Value> {
        let (status, bytes) = self.request(config, "POST", path, Some(body)).await?;
        // 409 means the resource already exists, callers treat creates
        // as idempotent.
        if status == 409 {
            return Ok(Value::Null);
        }
        Self::check_status(status, path, &bytes)?;
        Self::parse_json(&bytes)
    }

    async fn delete(&self, config: &ClusterConfig, path: &str) -> PlatformResult<Value> {
        let (status, bytes) = self.request(config, "DELETE", path, None).await?;
        // Deleting something already gone is success for our callers.
        if status == 404 {
            return Ok(Value::Null);
        }
        Self::check_status(status, path, &bytes)?;
        Self::parse_json(&bytes)
    }

    async fn get_text(&self, config: &ClusterConfig, path: &str) -> PlatformResult<String> {
        let (status, bytes) = self.request(config, "GET", path, None).await?;
        Self::check_status(status, path, &bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infergrid_core::Platform;

    fn config(server: &str) -> ClusterConfig {
        ClusterConfig {
            server: server.to_string(),
            token: "tok".to_string(),
            ingress_url: "http://ingress.local".to_string(),
            platform: Some(Platform::Kubernetes),
        }
    }

    #[test]
    fn authority_strips_scheme_and_trailing_slash() {
        let cfg = config("https://10.1.2.3:6443/");
        assert_eq!(HttpClusterApi::authority(&cfg).unwrap(), "10.1.2.3:6443");
        let cfg = config("http://cluster.local:8443");
        assert_eq!(HttpClusterApi::authority(&cfg).unwrap(), "cluster.local:8443");
    }

    #[test]
    fn empty_server_is_configuration_error() {
        let cfg = config("   ");
        assert!(matches!(
            HttpClusterApi::authority(&cfg),
            Err(PlatformError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_cluster_is_connection_error() {
        // Reserved TEST-NET address, nothing listens there.
        let api = HttpClusterApi::with_timeout(Duration::from_millis(200));
        let cfg = config("http://192.0.2.1:6443");
        let err = api.get_json(&cfg, "/version").await.unwrap_err();
        assert!(err.is_retryable(), "got {err}");
    }
}
