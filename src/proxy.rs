use crate::admin::{handle_control_request, is_control_request};
use crate::engine::X_REQUEST_ID;
use crate::error::{json_error_response, text_error_response, ProxyErrorCode, ProxyResponse};
use crate::routes::{RouteKey, RouteTable};
use futures::FutureExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The load balancer's HTTP front end: control plane and data plane on one listener
pub struct ProxyServer {
    listener: TcpListener,
    routes: Arc<RouteTable>,
    shutdown_rx: watch::Receiver<bool>,
    /// How long open connections may drain after shutdown is signalled
    grace: Duration,
}

impl ProxyServer {
    /// Bind the listener. Port 0 picks an ephemeral port, see [`ProxyServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        routes: Arc<RouteTable>,
        shutdown_rx: watch::Receiver<bool>,
        grace: Duration,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

        Ok(Self {
            listener,
            routes,
            shutdown_rx,
            grace,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown, then drain open connections for up to the grace period
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!(addr = %addr, routes = ?self.routes.keys(), "Load balancer listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let routes = Arc::clone(&self.routes);
                            let shutdown_rx = self.shutdown_rx.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, routes, shutdown_rx).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
                _ = shutdown_signalled(&mut shutdown_rx) => {
                    info!("Load balancer shutting down");
                    break;
                }
            }
        }

        drop(self.listener);

        let open = connections.len();
        if open > 0 {
            info!(open, grace_secs = self.grace.as_secs(), "Draining open connections");
        }

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            warn!(
                remaining = connections.len(),
                "Grace period elapsed, closing remaining connections"
            );
            connections.shutdown().await;
        }

        info!("Load balancer stopped");
        Ok(())
    }
}

/// Resolves once shutdown is signalled or the sender is gone
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    routes: Arc<RouteTable>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let routes = Arc::clone(&routes);
        async move { Ok::<_, hyper::Error>(handle_request(req, routes, addr).await) }
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            result.map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;
        }
        _ = shutdown_signalled(&mut shutdown_rx) => {
            debug!(addr = %addr, "Closing connection for shutdown");
            conn.as_mut().graceful_shutdown();
            conn.await.map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;
        }
    }

    Ok(())
}

/// Dispatch one request; a panic anywhere below becomes a 502
async fn handle_request(
    req: Request<Incoming>,
    routes: Arc<RouteTable>,
    client_addr: SocketAddr,
) -> ProxyResponse {
    match AssertUnwindSafe(dispatch(req, &routes, client_addr))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(_) => {
            error!(client = %client_addr, "Request handler panicked");
            text_error_response(ProxyErrorCode::InternalError, "proxy error: internal failure")
        }
    }
}

async fn dispatch(
    req: Request<Incoming>,
    routes: &RouteTable,
    client_addr: SocketAddr,
) -> ProxyResponse {
    if is_control_request(req.method(), req.uri().path()) {
        return handle_control_request(req, routes).await;
    }

    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let key = RouteKey::from_request(req.method(), req.uri().path());
    debug!(route = %key, client = %client_addr, request_id, "Incoming request");

    let Some(entry) = routes.get(&key) else {
        debug!(route = %key, request_id, "No route for request");
        return json_error_response(ProxyErrorCode::RouteUnknown, "Path not found.");
    };

    let endpoint = match entry.pool().balance() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(route = %key, request_id, error = %e, "Balance failed");
            return text_error_response(
                ProxyErrorCode::NoHealthyHosts,
                format!("balance error: {}", e),
            );
        }
    };

    // The endpoint may have been unregistered between balance and lookup
    let Some(engine) = entry.engine(&endpoint) else {
        warn!(route = %key, endpoint = %endpoint, request_id, "Selected endpoint is no longer registered");
        return text_error_response(
            ProxyErrorCode::UpstreamFailure,
            "upstream error: backend was removed",
        );
    };

    engine.forward(req, client_addr, &request_id).await
}
