//! Route keys and the route table
//!
//! Routes are fixed at startup from configuration. Each entry owns its
//! endpoint pool, the cached proxy engine per registered endpoint, the
//! liveness map, and the stop handles of its probers. Registration and
//! unregistration of endpoints are serialized per entry.

use crate::endpoint::Endpoint;
use crate::engine::ProxyEngine;
use crate::error::{BalanceError, RouteError};
use crate::healthcheck::{HealthCheckConfig, LivenessMap, Prober, StopSignal};
use crate::loadbalancer::EndpointPool;
use crate::pool::ConnectionPool;
use crate::selector::SelectorRegistry;
use hyper::Method;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Methods accepted in a route key
pub const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
];

/// Exact-match key `<METHOD> <path>`, e.g. `GET /posts`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    method: Method,
    path: String,
}

impl RouteKey {
    pub fn parse(s: &str) -> Result<Self, RouteError> {
        let invalid = || RouteError::InvalidRouteKey(s.to_string());

        let (method, path) = s.split_once(' ').ok_or_else(invalid)?;
        let method = SUPPORTED_METHODS
            .iter()
            .find(|m| m.as_str() == method)
            .cloned()
            .ok_or_else(invalid)?;
        if !path.starts_with('/') {
            return Err(invalid());
        }

        Ok(Self {
            method,
            path: path.to_string(),
        })
    }

    /// Key for an inbound request (method + path, query excluded)
    pub fn from_request(method: &Method, path: &str) -> Self {
        Self {
            method: method.clone(),
            path: path.to_string(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FromStr for RouteKey {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Pool, engines, liveness and probers for one route
pub struct RouteEntry {
    key: RouteKey,
    pool: Arc<EndpointPool>,
    engines: RwLock<HashMap<String, Arc<ProxyEngine>>>,
    liveness: Arc<LivenessMap>,
    /// Stop handle per registered endpoint; also serializes register/unregister
    probers: Mutex<HashMap<String, watch::Sender<bool>>>,
    connections: Arc<ConnectionPool>,
    health: HealthCheckConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl RouteEntry {
    fn new(
        key: RouteKey,
        pool: EndpointPool,
        connections: Arc<ConnectionPool>,
        health: HealthCheckConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            key,
            pool: Arc::new(pool),
            engines: RwLock::new(HashMap::new()),
            liveness: Arc::new(RwLock::new(HashMap::new())),
            probers: Mutex::new(HashMap::new()),
            connections,
            health,
            shutdown_rx,
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Cached engine for a registered endpoint
    pub fn engine(&self, endpoint: &Endpoint) -> Option<Arc<ProxyEngine>> {
        self.engines.read().get(endpoint.as_str()).cloned()
    }

    /// Admission state: `None` if not registered
    pub fn liveness(&self, endpoint: &Endpoint) -> Option<bool> {
        self.liveness.read().get(endpoint.as_str()).copied()
    }

    /// Canonical URLs of every registered endpoint, sorted
    pub fn registered(&self) -> Vec<String> {
        let mut registered: Vec<_> = self.liveness.read().keys().cloned().collect();
        registered.sort();
        registered
    }

    /// Register an endpoint and start its prober. Returns false if already registered.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(&self, endpoint: Endpoint) -> bool {
        let key = endpoint.as_str().to_string();
        let mut probers = self.probers.lock();
        if probers.contains_key(&key) {
            debug!(route = %self.key, endpoint = %endpoint, "Endpoint already registered");
            return false;
        }

        // Pending until the first healthy probe
        self.liveness.write().insert(key.clone(), false);
        self.engines.write().insert(
            key.clone(),
            Arc::new(ProxyEngine::new(
                endpoint.clone(),
                Arc::clone(&self.connections),
            )),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        probers.insert(key, stop_tx);

        let prober = Prober::new(
            self.key.to_string(),
            endpoint.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.liveness),
            Arc::clone(&self.connections),
            self.health.clone(),
        );
        tokio::spawn(prober.run(StopSignal::new(stop_rx, self.shutdown_rx.clone())));

        info!(route = %self.key, endpoint = %endpoint, "Registered endpoint");
        true
    }

    /// Stop the prober, drop the engine and evict the endpoint. Returns false if unknown.
    pub fn unregister(&self, endpoint: &Endpoint) -> bool {
        let key = endpoint.as_str();
        let mut probers = self.probers.lock();
        let Some(stop_tx) = probers.remove(key) else {
            debug!(route = %self.key, endpoint = %endpoint, "Endpoint not registered");
            return false;
        };
        let _ = stop_tx.send(true);

        {
            let mut liveness = self.liveness.write();
            liveness.remove(key);
            self.pool.remove(endpoint);
        }
        self.engines.write().remove(key);

        info!(route = %self.key, endpoint = %endpoint, "Unregistered endpoint");
        true
    }
}

/// Route key -> entry; fixed after construction
pub struct RouteTable {
    routes: HashMap<RouteKey, Arc<RouteEntry>>,
}

impl RouteTable {
    /// Build one entry per route with a fresh selector of the named algorithm
    pub fn new(
        keys: Vec<RouteKey>,
        algorithm: &str,
        registry: &SelectorRegistry,
        connections: Arc<ConnectionPool>,
        health: HealthCheckConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, BalanceError> {
        let mut routes = HashMap::new();
        for key in keys {
            let selector = registry.build(algorithm)?;
            let pool = EndpointPool::new(key.to_string(), selector);
            let entry = RouteEntry::new(
                key.clone(),
                pool,
                Arc::clone(&connections),
                health.clone(),
                shutdown_rx.clone(),
            );
            routes.insert(key, Arc::new(entry));
        }

        info!(routes = routes.len(), algorithm, "Route table built");
        Ok(Self { routes })
    }

    pub fn get(&self, key: &RouteKey) -> Option<&Arc<RouteEntry>> {
        self.routes.get(key)
    }

    /// Look up a route from its textual key as given on the control plane
    pub fn lookup(&self, route: &str) -> Result<&Arc<RouteEntry>, RouteError> {
        RouteKey::parse(route)
            .ok()
            .and_then(|key| self.routes.get(&key))
            .ok_or_else(|| RouteError::RouteUnknown(route.to_string()))
    }

    pub fn register(&self, route: &str, endpoint: Endpoint) -> Result<bool, RouteError> {
        Ok(self.lookup(route)?.register(endpoint))
    }

    pub fn unregister(&self, route: &str, endpoint: &Endpoint) -> Result<bool, RouteError> {
        Ok(self.lookup(route)?.unregister(endpoint))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route keys, sorted by their textual form
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.routes.keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    /// True iff at least one route exists and every route has an admitted endpoint
    pub fn is_ready(&self) -> bool {
        !self.routes.is_empty() && self.routes.values().all(|entry| !entry.pool().is_empty())
    }
}
