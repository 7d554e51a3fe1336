//! Integration tests for Pathgate
//!
//! Each test runs a real listener on an ephemeral port, in-process origin
//! servers, and talks to the load balancer over raw TCP.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pathgate::healthcheck::HealthCheckConfig;
use pathgate::pool::ConnectionPool;
use pathgate::proxy::ProxyServer;
use pathgate::routes::{RouteKey, RouteTable};
use pathgate::selector::{SelectorRegistry, ROUND_ROBIN};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// Origins
// ============================================================================

/// In-process origin: `/readyz` follows a toggle, everything else echoes the request as JSON
struct Origin {
    addr: SocketAddr,
    ready: Arc<AtomicBool>,
}

impl Origin {
    async fn start(name: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ready = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&ready);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let flag = Arc::clone(&flag);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let flag = Arc::clone(&flag);
                        async move { Ok::<_, Infallible>(origin_response(name, &flag, req).await) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, ready }
    }

    fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

async fn origin_response(
    name: &'static str,
    ready: &AtomicBool,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if req.uri().path() == "/readyz" {
        let status = if ready.load(Ordering::SeqCst) {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        return Response::builder()
            .status(status)
            .body(Full::new(Bytes::new()))
            .unwrap();
    }

    let (parts, body) = req.into_parts();
    let headers: serde_json::Map<String, Value> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();

    let echo = json!({
        "origin": name,
        "method": parts.method.as_str(),
        "uri": parts.uri.to_string(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });

    Response::builder()
        .header("Content-Type", "application/json")
        .header("Keep-Alive", "timeout=5")
        .body(Full::new(Bytes::from(echo.to_string())))
        .unwrap()
}

/// Origin that passes readiness probes but hangs up on every other request
async fn start_hangup_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..n]);
                if head.starts_with("GET /readyz ") {
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                }
            });
        }
    });
    addr
}

// ============================================================================
// Load balancer harness
// ============================================================================

struct Harness {
    addr: SocketAddr,
    routes: Arc<RouteTable>,
    connections: Arc<ConnectionPool>,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start(paths: &[&str]) -> Self {
        Self::start_with(paths, ROUND_ROBIN).await
    }

    async fn start_with(paths: &[&str], algorithm: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connections = Arc::new(ConnectionPool::default());
        let health = HealthCheckConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(1),
            ..HealthCheckConfig::default()
        };

        let routes = Arc::new(
            RouteTable::new(
                paths.iter().map(|p| RouteKey::parse(p).unwrap()).collect(),
                algorithm,
                &SelectorRegistry::default(),
                Arc::clone(&connections),
                health,
                shutdown_rx.clone(),
            )
            .unwrap(),
        );

        let server = ProxyServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&routes),
            shutdown_rx,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let server = tokio::spawn(server.run());

        Self {
            addr,
            routes,
            connections,
            shutdown_tx,
            server,
        }
    }

    fn admitted(&self, route: &str) -> usize {
        self.routes.lookup(route).unwrap().pool().len()
    }

    /// Poll until the route has exactly `count` admitted endpoints
    async fn wait_for_admitted(&self, route: &str, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.admitted(route) != count {
            assert!(
                Instant::now() < deadline,
                "route {} has {} admitted endpoints, expected {}",
                route,
                self.admitted(route),
                count
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn add(&self, route: &str, address: &str) -> HttpResponse {
        let body = json!({ "path": route, "address": address }).to_string();
        http_request(self.addr, "POST", "/addz", &[], &body).await
    }

    async fn remove(&self, route: &str, address: &str) -> HttpResponse {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("path", route)
            .append_pair("address", address)
            .finish();
        http_request(self.addr, "DELETE", &format!("/removez?{}", query), &[], "").await
    }

    async fn get(&self, path: &str) -> HttpResponse {
        http_request(self.addr, "GET", path, &[], "").await
    }

    async fn shutdown(self) {
        self.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server stops after shutdown")
            .unwrap()
            .unwrap();
    }
}

// ============================================================================
// Raw HTTP client
// ============================================================================

struct HttpResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: String,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("invalid JSON {:?}: {}", self.body, e))
    }
}

/// Send one HTTP/1.1 request with `Connection: close` and read the whole response
async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
        method, path, addr
    );
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !body.is_empty() {
        request.push_str("Content-Type: application/json\r\n");
    }
    request.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut raw))
        .await
        .expect("response within timeout")
        .unwrap();

    parse_response(&raw)
}

fn parse_response(raw: &str) -> HttpResponse {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_lowercase(), value.trim().to_string()))
        .collect();

    HttpResponse {
        status,
        headers,
        body: body.to_string(),
    }
}

// ============================================================================
// Data plane
// ============================================================================

#[tokio::test]
async fn test_round_robin_across_three_origins() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origins = [
        Origin::start("a").await,
        Origin::start("b").await,
        Origin::start("c").await,
    ];
    for origin in &origins {
        assert_eq!(lb.add("GET /posts", &origin.address()).await.status, 201);
    }
    lb.wait_for_admitted("GET /posts", 3).await;

    let mut seen = Vec::new();
    for _ in 0..6 {
        let response = lb.get("/posts").await;
        assert_eq!(response.status, 200);
        seen.push(response.json()["origin"].as_str().unwrap().to_string());
    }

    for name in ["a", "b", "c"] {
        assert_eq!(seen.iter().filter(|s| *s == name).count(), 2, "{:?}", seen);
    }
    for i in 0..3 {
        assert_eq!(seen[i], seen[i + 3], "selection is periodic: {:?}", seen);
    }

    lb.shutdown().await;
}

#[tokio::test]
async fn test_random_algorithm_serves_requests() {
    let lb = Harness::start_with(&["GET /posts"], "random").await;
    let origin = Origin::start("only").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;

    for _ in 0..3 {
        let response = lb.get("/posts").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.json()["origin"], "only");
    }

    lb.shutdown().await;
}

#[tokio::test]
async fn test_failover_when_probes_fail() {
    let lb = Harness::start(&["GET /posts"]).await;
    let a = Origin::start("a").await;
    let b = Origin::start("b").await;
    lb.add("GET /posts", &a.address()).await;
    lb.add("GET /posts", &b.address()).await;
    lb.wait_for_admitted("GET /posts", 2).await;

    a.set_ready(false);
    lb.wait_for_admitted("GET /posts", 1).await;
    for _ in 0..3 {
        assert_eq!(lb.get("/posts").await.json()["origin"], "b");
    }

    b.set_ready(false);
    lb.wait_for_admitted("GET /posts", 0).await;
    let response = lb.get("/posts").await;
    assert_eq!(response.status, 502);
    assert_eq!(response.body, "balance error: no healthy hosts available");
    assert_eq!(response.header("x-proxy-error"), Some("NO_HEALTHY_HOSTS"));

    // Recovery is driven by the prober as well
    a.set_ready(true);
    lb.wait_for_admitted("GET /posts", 1).await;
    assert_eq!(lb.get("/posts").await.json()["origin"], "a");

    lb.shutdown().await;
}

#[tokio::test]
async fn test_provenance_headers() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;

    let response = lb.get("/posts").await;
    assert_eq!(response.status, 200);
    let headers = &response.json()["headers"];
    assert_eq!(headers["x-real-ip"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-proxy"], "Pathgate-LoadBalancer-Proxy");
    assert_eq!(headers["host"], origin.addr.to_string());
    assert!(!headers["x-request-id"].as_str().unwrap().is_empty());

    lb.shutdown().await;
}

#[tokio::test]
async fn test_forwarding_chain_and_request_id_are_kept() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;

    let response = http_request(
        lb.addr,
        "GET",
        "/posts?page=2",
        &[
            ("X-Forwarded-For", "203.0.113.9"),
            ("X-Real-IP", "6.6.6.6"),
            ("X-Request-ID", "req-42"),
        ],
        "",
    )
    .await;

    let echo = response.json();
    assert_eq!(echo["uri"], "/posts?page=2");
    assert_eq!(echo["headers"]["x-forwarded-for"], "203.0.113.9, 127.0.0.1");
    assert_eq!(echo["headers"]["x-real-ip"], "127.0.0.1");
    assert_eq!(echo["headers"]["x-request-id"], "req-42");

    lb.shutdown().await;
}

#[tokio::test]
async fn test_hop_by_hop_headers_are_stripped() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;

    let response = http_request(
        lb.addr,
        "GET",
        "/posts",
        &[
            ("Proxy-Authorization", "Basic c2VjcmV0"),
            ("X-Session-Hint", "abc"),
            ("Connection", "X-Session-Hint"),
            ("Authorization", "Bearer token"),
        ],
        "",
    )
    .await;

    let headers = response.json()["headers"].clone();
    assert!(headers.get("proxy-authorization").is_none());
    assert!(headers.get("x-session-hint").is_none());
    assert_eq!(headers["authorization"], "Bearer token");
    // Origin sent Keep-Alive on the response
    assert!(response.header("keep-alive").is_none());

    lb.shutdown().await;
}

#[tokio::test]
async fn test_request_body_is_streamed_to_origin() {
    let lb = Harness::start(&["POST /posts"]).await;
    let origin = Origin::start("a").await;
    lb.add("POST /posts", &origin.address()).await;
    lb.wait_for_admitted("POST /posts", 1).await;

    let response = http_request(lb.addr, "POST", "/posts", &[], r#"{"title":"hello"}"#).await;
    assert_eq!(response.status, 200);
    let echo = response.json();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["body"], r#"{"title":"hello"}"#);

    lb.shutdown().await;
}

#[tokio::test]
async fn test_unknown_data_route_is_404() {
    let lb = Harness::start(&["GET /posts"]).await;

    for (method, path) in [("GET", "/comments"), ("POST", "/posts"), ("GET", "/posts/1")] {
        let response = http_request(lb.addr, method, path, &[], "").await;
        assert_eq!(response.status, 404, "{} {}", method, path);
        assert_eq!(
            response.body,
            r#"{"error":"Not Found","message":"Path not found."}"#
        );
        assert_eq!(response.header("x-proxy-error"), Some("ROUTE_UNKNOWN"));
    }

    lb.shutdown().await;
}

#[tokio::test]
async fn test_upstream_failure_is_502_without_retry() {
    let lb = Harness::start(&["GET /posts"]).await;
    let hangup = start_hangup_origin().await;
    lb.add("GET /posts", &format!("http://{}", hangup)).await;
    lb.wait_for_admitted("GET /posts", 1).await;

    let response = lb.get("/posts").await;
    assert_eq!(response.status, 502);
    assert_eq!(response.body, "upstream error: backend request failed");
    assert_eq!(response.header("x-proxy-error"), Some("UPSTREAM_FAILURE"));

    // A transport failure does not evict; only the prober does
    assert_eq!(lb.admitted("GET /posts"), 1);

    lb.shutdown().await;
}

// ============================================================================
// Control plane
// ============================================================================

#[tokio::test]
async fn test_livez() {
    let lb = Harness::start(&["GET /posts"]).await;
    let response = lb.get("/livez").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");
    lb.shutdown().await;
}

#[tokio::test]
async fn test_readyz_gating() {
    let lb = Harness::start(&[]).await;
    assert_eq!(lb.get("/readyz").await.status, 503);
    lb.shutdown().await;

    let lb = Harness::start(&["GET /posts", "POST /posts"]).await;
    let response = lb.get("/readyz").await;
    assert_eq!(response.status, 503);
    assert_eq!(response.body, "not ready");

    let origin = Origin::start("a").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;
    assert_eq!(lb.get("/readyz").await.status, 503);

    lb.add("POST /posts", &origin.address()).await;
    lb.wait_for_admitted("POST /posts", 1).await;
    let response = lb.get("/readyz").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");

    lb.shutdown().await;
}

#[tokio::test]
async fn test_addz_unknown_route() {
    let lb = Harness::start(&["GET /posts"]).await;

    let response = lb.add("GET /nope", "http://x").await;
    assert_eq!(response.status, 404);
    assert_eq!(
        response.body,
        r#"{"error":"Not Found","message":"Path not found."}"#
    );

    lb.shutdown().await;
}

#[tokio::test]
async fn test_addz_malformed_address() {
    let lb = Harness::start(&["GET /posts"]).await;

    for address in ["::not-a-url", "http://", "http://10.0.0.7/?q=1", "http://u:p@10.0.0.7"] {
        let response = lb.add("GET /posts", address).await;
        assert_eq!(response.status, 400, "{}", address);
        assert_eq!(
            response.body,
            r#"{"error":"Bad Request","message":"Address could not be parsed properly."}"#
        );
        assert_eq!(response.header("x-proxy-error"), Some("BAD_REQUEST"));
    }
    assert!(lb.routes.lookup("GET /posts").unwrap().registered().is_empty());

    lb.shutdown().await;
}

#[tokio::test]
async fn test_addz_unsupported_scheme() {
    let lb = Harness::start(&["GET /posts"]).await;

    for address in ["ftp://10.0.0.7", "ws://10.0.0.7:9000"] {
        let response = lb.add("GET /posts", address).await;
        assert_eq!(response.status, 400, "{}", address);
        assert_eq!(
            response.body,
            r#"{"error":"Bad Request","message":"Address scheme must be http or https."}"#
        );
        assert_eq!(response.header("x-proxy-error"), Some("BAD_REQUEST"));

        let response = lb.remove("GET /posts", address).await;
        assert_eq!(response.status, 400, "{}", address);
    }
    assert!(lb.routes.lookup("GET /posts").unwrap().registered().is_empty());

    lb.shutdown().await;
}

#[tokio::test]
async fn test_addz_accepts_https_origin() {
    let lb = Harness::start(&["GET /posts"]).await;

    // Nothing listens here, so the endpoint stays pending
    let response = lb.add("GET /posts", "https://127.0.0.1:1").await;
    assert_eq!(response.status, 201);
    assert_eq!(
        lb.routes.lookup("GET /posts").unwrap().registered(),
        vec!["https://127.0.0.1:1".to_string()]
    );
    assert_eq!(lb.admitted("GET /posts"), 0);

    let response = lb.remove("GET /posts", "https://127.0.0.1:1/").await;
    assert_eq!(response.status, 200);
    assert!(lb.routes.lookup("GET /posts").unwrap().registered().is_empty());

    lb.shutdown().await;
}

#[tokio::test]
async fn test_origin_base_path_is_prefixed() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;

    let response = lb.add("GET /posts", &format!("{}/api/", origin.address())).await;
    assert_eq!(response.status, 201);
    lb.wait_for_admitted("GET /posts", 1).await;

    let response = lb.get("/posts?page=2").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.json()["uri"], "/api/posts?page=2");

    lb.shutdown().await;
}

#[tokio::test]
async fn test_addz_malformed_body() {
    let lb = Harness::start(&["GET /posts"]).await;

    for body in [
        "not json",
        r#"{"path":"GET /posts"}"#,
        r#"{"path":"GET /posts","address":"http://x","weight":2}"#,
        r#"["GET /posts","http://x"]"#,
    ] {
        let response = http_request(lb.addr, "POST", "/addz", &[], body).await;
        assert_eq!(response.status, 400, "{}", body);
        assert_eq!(
            response.body,
            r#"{"error":"Bad Request","message":"Request body could not be parsed properly."}"#
        );
    }

    lb.shutdown().await;
}

#[tokio::test]
async fn test_addz_is_idempotent() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;

    assert_eq!(lb.add("GET /posts", &origin.address()).await.status, 201);
    assert_eq!(lb.add("GET /posts", &origin.address()).await.status, 201);
    // Equivalent spelling of the same origin
    let spelled = format!("HTTP://{}/", origin.addr);
    assert_eq!(lb.add("GET /posts", &spelled).await.status, 201);

    lb.wait_for_admitted("GET /posts", 1).await;
    assert_eq!(lb.routes.lookup("GET /posts").unwrap().registered().len(), 1);

    lb.shutdown().await;
}

#[tokio::test]
async fn test_removez_flow() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;

    let response = lb.remove("GET /posts", &origin.address()).await;
    assert_eq!(response.status, 200);
    assert_eq!(lb.admitted("GET /posts"), 0);

    let response = lb.get("/posts").await;
    assert_eq!(response.status, 502);
    assert_eq!(response.body, "balance error: no healthy hosts available");

    // Removed endpoints are not re-admitted by a lingering prober
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(lb.admitted("GET /posts"), 0);

    // Removing again is a no-op
    assert_eq!(lb.remove("GET /posts", &origin.address()).await.status, 200);

    lb.shutdown().await;
}

#[tokio::test]
async fn test_removez_errors() {
    let lb = Harness::start(&["GET /posts"]).await;

    let response = http_request(lb.addr, "DELETE", "/removez?path=GET%20%2Fposts", &[], "").await;
    assert_eq!(response.status, 400);
    assert_eq!(response.json()["error"], "Bad Request");

    let response = lb.remove("GET /posts", "::bad").await;
    assert_eq!(response.status, 400);
    assert_eq!(
        response.body,
        r#"{"error":"Bad Request","message":"Address could not be parsed properly."}"#
    );

    let response = lb.remove("GET /nope", "http://10.0.0.7:8080").await;
    assert_eq!(response.status, 404);
    assert_eq!(
        response.body,
        r#"{"error":"Not Found","message":"Path not found."}"#
    );

    lb.shutdown().await;
}

#[tokio::test]
async fn test_control_plane_shadows_data_route() {
    let lb = Harness::start(&["GET /livez"]).await;
    let origin = Origin::start("a").await;
    lb.add("GET /livez", &origin.address()).await;
    lb.wait_for_admitted("GET /livez", 1).await;

    let response = lb.get("/livez").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");

    lb.shutdown().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_listener_and_counts_traffic() {
    let lb = Harness::start(&["GET /posts"]).await;
    let origin = Origin::start("a").await;
    lb.add("GET /posts", &origin.address()).await;
    lb.wait_for_admitted("GET /posts", 1).await;
    assert_eq!(lb.get("/posts").await.status, 200);

    let stats = lb.connections.stats();
    assert_eq!(stats.get_total_requests(), 1);
    assert!(stats.get_probes() >= 1);

    let addr = lb.addr;
    lb.shutdown().await;
    assert!(TcpStream::connect(addr).await.is_err());
}
