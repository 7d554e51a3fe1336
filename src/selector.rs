//! Endpoint selection algorithms
//!
//! A selector picks the next endpoint from a snapshot of the admitted
//! endpoints of one route. Selectors are looked up by name in a
//! [`SelectorRegistry`] when the route table is built, so an unknown algorithm
//! is rejected at startup rather than per request.

use crate::endpoint::Endpoint;
use crate::error::BalanceError;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub const ROUND_ROBIN: &str = "round-robin";
pub const RANDOM: &str = "random";

/// Strategy for choosing one endpoint out of a snapshot
pub trait Selector: Send + Sync + fmt::Debug {
    /// Registry name of the algorithm
    fn name(&self) -> &'static str;

    /// Choose the next endpoint. Fails with `NoHealthyHosts` on an empty snapshot.
    fn select<'a>(&self, endpoints: &'a [Endpoint]) -> Result<&'a Endpoint, BalanceError>;
}

/// Round-robin: returns `endpoints[(c + 1) % n]` and advances `c`
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn name(&self) -> &'static str {
        ROUND_ROBIN
    }

    fn select<'a>(&self, endpoints: &'a [Endpoint]) -> Result<&'a Endpoint, BalanceError> {
        if endpoints.is_empty() {
            return Err(BalanceError::NoHealthyHosts);
        }
        let next = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let idx = (next % endpoints.len() as u64) as usize;
        Ok(&endpoints[idx])
    }
}

/// Random: uniform choice over the snapshot
#[derive(Debug, Default)]
pub struct Random;

impl Selector for Random {
    fn name(&self) -> &'static str {
        RANDOM
    }

    fn select<'a>(&self, endpoints: &'a [Endpoint]) -> Result<&'a Endpoint, BalanceError> {
        if endpoints.is_empty() {
            return Err(BalanceError::NoHealthyHosts);
        }
        let idx = rand::thread_rng().gen_range(0..endpoints.len());
        Ok(&endpoints[idx])
    }
}

/// Constructor for a fresh selector instance (one per route)
pub type SelectorFactory = fn() -> Box<dyn Selector>;

/// Name to constructor map, filled before the route table is built
pub struct SelectorRegistry {
    factories: HashMap<&'static str, SelectorFactory>,
}

impl SelectorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: SelectorFactory) {
        self.factories.insert(name, factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered algorithm names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build a new selector for the named algorithm
    pub fn build(&self, name: &str) -> Result<Box<dyn Selector>, BalanceError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BalanceError::AlgorithmNotSupported(name.to_string()))
    }
}

impl Default for SelectorRegistry {
    /// Registry with every built-in algorithm
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(ROUND_ROBIN, || Box::new(RoundRobin::new()));
        registry.register(RANDOM, || Box::new(Random));
        registry
    }
}
