//! Readiness probing for registered endpoints
//!
//! Every (route, endpoint) pair gets its own prober task. On each tick it GETs
//! the readiness path, classifies the result (healthy iff status is exactly
//! 200) and admits or evicts the endpoint. The liveness map and the pool are
//! updated together under the liveness write lock, so an endpoint is in the
//! pool iff its liveness entry is true. The stop signal is checked under the
//! same lock, so a stopped prober never touches a re-registered endpoint.

use crate::endpoint::Endpoint;
use crate::loadbalancer::EndpointPool;
use crate::pool::ConnectionPool;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Canonical endpoint URL -> admitted
pub type LivenessMap = RwLock<HashMap<String, bool>>;

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between probes
    pub interval: Duration,
    /// Hard deadline for each probe request
    pub timeout: Duration,
    /// Readiness path on each origin
    pub path: String,
    /// Consecutive failures before an admitted endpoint is evicted
    pub unhealthy_threshold: u32,
    /// Consecutive successes before a pending endpoint is admitted
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            path: "/readyz".to_string(),
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }
    }
}

/// Consecutive probe results for one endpoint
#[derive(Debug, Default)]
struct ProbeState {
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl ProbeState {
    fn record(&mut self, healthy: bool) {
        if healthy {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
        }
    }
}

/// Outcome of applying one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Admitted,
    Evicted,
    Unchanged,
}

/// Stop condition for a prober: its own stop flag or the root shutdown signal.
///
/// A dropped sender counts as a stop request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    local: watch::Receiver<bool>,
    root: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new(local: watch::Receiver<bool>, root: watch::Receiver<bool>) -> Self {
        Self { local, root }
    }

    pub fn is_stopped(&self) -> bool {
        *self.local.borrow()
            || *self.root.borrow()
            || self.local.has_changed().is_err()
            || self.root.has_changed().is_err()
    }

    /// Resolves once either signal fires
    pub async fn stopped(&mut self) {
        tokio::select! {
            _ = self.local.wait_for(|stop| *stop) => {}
            _ = self.root.wait_for(|stop| *stop) => {}
        }
    }
}

/// Periodic readiness prober for one endpoint of one route
pub struct Prober {
    route: String,
    endpoint: Endpoint,
    pool: Arc<EndpointPool>,
    liveness: Arc<LivenessMap>,
    connections: Arc<ConnectionPool>,
    config: HealthCheckConfig,
    state: ProbeState,
}

impl Prober {
    pub fn new(
        route: impl Into<String>,
        endpoint: Endpoint,
        pool: Arc<EndpointPool>,
        liveness: Arc<LivenessMap>,
        connections: Arc<ConnectionPool>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            route: route.into(),
            endpoint,
            pool,
            liveness,
            connections,
            config,
            state: ProbeState::default(),
        }
    }

    /// Run until stopped. The first probe happens one interval after start.
    pub async fn run(mut self, mut stop: StopSignal) {
        debug!(
            route = %self.route,
            endpoint = %self.endpoint,
            interval_ms = self.config.interval.as_millis() as u64,
            "Prober started"
        );

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => break,
            }

            // Dropping the probe future on stop also drops its HTTP request
            let healthy = tokio::select! {
                healthy = self.probe() => healthy,
                _ = stop.stopped() => break,
            };

            self.observe(healthy, &stop);
            if stop.is_stopped() {
                break;
            }
        }

        debug!(route = %self.route, endpoint = %self.endpoint, "Prober stopped");
    }

    /// Perform one readiness probe: healthy iff status is exactly 200
    pub async fn probe(&self) -> bool {
        let result = tokio::time::timeout(
            self.config.timeout,
            self.connections.probe(&self.endpoint, &self.config.path),
        )
        .await;

        match result {
            Ok(Ok(status)) if status == hyper::StatusCode::OK => {
                debug!(endpoint = %self.endpoint, "Probe passed");
                true
            }
            Ok(Ok(status)) => {
                debug!(endpoint = %self.endpoint, status = status.as_u16(), "Probe failed (status)");
                false
            }
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "Probe failed (connection error)");
                false
            }
            Err(_) => {
                debug!(endpoint = %self.endpoint, "Probe failed (timeout)");
                false
            }
        }
    }

    /// Apply one probe outcome to the liveness map and the pool
    pub fn observe(&mut self, healthy: bool, stop: &StopSignal) -> Transition {
        self.state.record(healthy);

        let mut liveness = self.liveness.write();
        // Unregister raises the stop flag before it takes this lock
        if stop.is_stopped() {
            return Transition::Unchanged;
        }
        let Some(admitted) = liveness.get_mut(self.endpoint.as_str()) else {
            // Unregistered while the probe was in flight
            return Transition::Unchanged;
        };

        if healthy && !*admitted && self.state.consecutive_successes >= self.config.healthy_threshold {
            *admitted = true;
            self.pool.add(self.endpoint.clone());
            info!(route = %self.route, endpoint = %self.endpoint, "Endpoint is now healthy");
            Transition::Admitted
        } else if !healthy
            && *admitted
            && self.state.consecutive_failures >= self.config.unhealthy_threshold
        {
            *admitted = false;
            self.pool.remove(&self.endpoint);
            warn!(
                route = %self.route,
                endpoint = %self.endpoint,
                failures = self.state.consecutive_failures,
                "Endpoint is now unhealthy"
            );
            Transition::Evicted
        } else {
            Transition::Unchanged
        }
    }
}
