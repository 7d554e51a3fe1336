//! Pathgate - A path-routed HTTP load balancer
//!
//! This library provides a reverse proxy that:
//! - Routes HTTP traffic by exact `<METHOD> <path>` keys fixed at startup
//! - Registers and unregisters upstream endpoints at runtime through a control-plane API
//! - Admits endpoints only after they pass periodic readiness probes
//! - Balances each route across its admitted endpoints (round-robin or random)
//! - Uses connection pooling for efficient upstream communication

pub mod admin;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod healthcheck;
pub mod loadbalancer;
pub mod pool;
pub mod proxy;
pub mod routes;
pub mod selector;
