//! Reverse proxy engine for a single (route, endpoint) pair
//!
//! Rewrites the inbound request to target the endpoint, strips hop-by-hop
//! headers in both directions, stamps provenance headers and streams bodies
//! through untouched. Transport failures become a 502; there is no retry
//! against another endpoint.

use crate::endpoint::Endpoint;
use crate::error::{text_error_response, ProxyErrorCode, ProxyResponse};
use crate::pool::{ConnectionPool, PoolError};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Request, Uri, Version};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Value of the X-Proxy header on every forwarded request
pub const PROXY_IDENTIFIER: &str = "Pathgate-LoadBalancer-Proxy";

/// Header name for the client address as seen by the proxy
pub const X_REAL_IP: &str = "x-real-ip";
/// Header name for forwarded-for
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for the proxy identifier
pub const X_PROXY: &str = "x-proxy";
/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";

/// Headers that only apply to a single transport hop
const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Set X-Real-IP, append to X-Forwarded-For, set X-Proxy and X-Request-ID
pub fn apply_forwarding_headers(headers: &mut HeaderMap, client_ip: IpAddr, request_id: &str) {
    let client_ip = client_ip.to_string();

    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();
    let forwarded_for = if prior.is_empty() {
        client_ip.clone()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&client_ip) {
        headers.insert(X_REAL_IP, value);
    }
    headers.insert(X_PROXY, HeaderValue::from_static(PROXY_IDENTIFIER));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
}

/// Forwarder bound to one endpoint, cached per route entry
pub struct ProxyEngine {
    endpoint: Endpoint,
    connections: Arc<ConnectionPool>,
}

impl ProxyEngine {
    pub fn new(endpoint: Endpoint, connections: Arc<ConnectionPool>) -> Self {
        Self {
            endpoint,
            connections,
        }
    }

    /// Endpoint scheme/authority combined with the inbound path and query
    pub fn target_uri(&self, inbound: &Uri) -> Result<Uri, PoolError> {
        let path_and_query = inbound
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        self.endpoint
            .join(path_and_query)
            .parse::<Uri>()
            .map_err(|e| PoolError::RequestBuild(e.to_string()))
    }

    /// Forward the request; transport failures are answered with a 502
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
        request_id: &str,
    ) -> ProxyResponse {
        match self.try_forward(req, client_addr, request_id).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    request_id,
                    error = %e,
                    "Failed to forward request"
                );
                text_error_response(
                    ProxyErrorCode::UpstreamFailure,
                    format!("upstream error: {}", e.diagnostic()),
                )
            }
        }
    }

    async fn try_forward(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
        request_id: &str,
    ) -> Result<ProxyResponse, PoolError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = self.target_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        match HeaderValue::from_str(self.endpoint.authority()) {
            Ok(host) => {
                parts.headers.insert(HOST, host);
            }
            Err(_) => {
                parts.headers.remove(HOST);
            }
        }
        apply_forwarding_headers(&mut parts.headers, client_addr.ip(), request_id);

        debug!(endpoint = %self.endpoint, uri = %parts.uri, request_id, "Forwarding request");

        let response = self
            .connections
            .send(Request::from_parts(parts, body))
            .await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(hyper::Response::from_parts(parts, body.boxed()))
    }
}
