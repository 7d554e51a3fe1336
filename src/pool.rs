//! Connection pool for upstream HTTP connections
//!
//! One pooled client carries forwarded requests (streaming `Incoming` bodies),
//! a second one carries readiness probes, so probe traffic never competes with
//! request traffic for idle connections. Both speak plain HTTP and HTTPS;
//! TLS origins are verified against the bundled webpki roots.

use crate::endpoint::Endpoint;
use http_body_util::Empty;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use rustls::{ClientConfig, RootCertStore};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for connection pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// Error from the HTTP client (DNS, connect, read/write, early close)
    #[error("client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    /// Error building a request
    #[error("request build error: {0}")]
    RequestBuild(String),
}

impl PoolError {
    /// Short diagnostic suitable for a 502 body
    pub fn diagnostic(&self) -> &'static str {
        match self {
            PoolError::Client(e) if e.is_connect() => "could not connect to backend",
            PoolError::Client(_) => "backend request failed",
            PoolError::RequestBuild(_) => "could not build backend request",
        }
    }
}

/// Statistics for the connection pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Total number of requests forwarded through the pool
    pub total_requests: AtomicU64,
    /// Total number of readiness probes
    pub probes: AtomicU64,
}

impl PoolStats {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn get_probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }
}

/// Configuration for the connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Pooled HTTP clients shared by every route and endpoint
pub struct ConnectionPool {
    client: Client<HttpsConnector<HttpConnector>, Incoming>,
    probe_client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    stats: Arc<PoolStats>,
}

/// TLS client settings trusting the webpki root set
fn tls_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        // The TLS layer needs https URIs passed through
        http.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config())
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector.clone());

        let probe_client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Connection pool initialized"
        );

        Self {
            client,
            probe_client,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Send an already-rewritten request; the URI must be absolute
    pub async fn send(&self, req: Request<Incoming>) -> Result<Response<Incoming>, PoolError> {
        self.stats.record_request();
        Ok(self.client.request(req).await?)
    }

    /// GET `path` on the endpoint and return the status code
    pub async fn probe(&self, endpoint: &Endpoint, path: &str) -> Result<StatusCode, PoolError> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(endpoint.join(path))
            .body(Empty::<Bytes>::new())
            .map_err(|e| PoolError::RequestBuild(e.to_string()))?;

        self.stats.record_probe();

        let response = self.probe_client.request(req).await?;
        Ok(response.status())
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
