//! Endpoint pool for distributing requests across the origins of one route
//!
//! The pool holds the admitted endpoints in insertion order behind a
//! readers/writer lock. Writers (`add`/`remove`) are exclusive; `len` and
//! `balance` share the read side, and the selector advances its own atomic
//! counter while the snapshot is held.

use crate::endpoint::Endpoint;
use crate::error::BalanceError;
use crate::selector::Selector;
use parking_lot::RwLock;
use tracing::{debug, info};

/// Ordered, concurrency-safe set of admitted endpoints for a single route
#[derive(Debug)]
pub struct EndpointPool {
    /// Route key this pool serves, for logging
    route: String,
    /// Admitted endpoints, insertion order, no duplicates
    endpoints: RwLock<Vec<Endpoint>>,
    selector: Box<dyn Selector>,
}

impl EndpointPool {
    pub fn new(route: impl Into<String>, selector: Box<dyn Selector>) -> Self {
        Self {
            route: route.into(),
            endpoints: RwLock::new(Vec::new()),
            selector,
        }
    }

    /// Append an endpoint; no-op if already present. Returns true if added.
    pub fn add(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.endpoints.write();
        if endpoints.contains(&endpoint) {
            return false;
        }
        info!(
            route = %self.route,
            endpoint = %endpoint,
            total_endpoints = endpoints.len() + 1,
            "Added endpoint to pool"
        );
        endpoints.push(endpoint);
        true
    }

    /// Remove an endpoint keeping the order of the rest. Returns true if removed.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut endpoints = self.endpoints.write();
        if let Some(pos) = endpoints.iter().position(|e| e == endpoint) {
            endpoints.remove(pos);
            info!(
                route = %self.route,
                endpoint = %endpoint,
                total_endpoints = endpoints.len(),
                "Removed endpoint from pool"
            );
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.read().contains(endpoint)
    }

    /// Copy of the admitted endpoints in pool order
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }

    /// Pick the next endpoint for a request
    pub fn balance(&self) -> Result<Endpoint, BalanceError> {
        let endpoints = self.endpoints.read();
        let selected = self.selector.select(&endpoints)?.clone();
        debug!(
            route = %self.route,
            endpoint = %selected,
            algorithm = self.selector.name(),
            "Selected endpoint"
        );
        Ok(selected)
    }
}
