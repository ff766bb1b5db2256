//! # Load Balancing
//!
//! A balancer picks one endpoint for a service key out of the endpoints that currently
//! have a live connection. The candidates are grouped into a [`RouteTable`], rebuilt
//! for every call, with each group in the order the endpoints became known.

use std::collections::HashMap;
use std::sync::Arc;

use driftwire::Endpoint;
use driftwire::Strategy;

use crate::error::Error;
use crate::error::Result;

pub mod consistent_hash;
pub mod lfu;
pub mod lru;
pub mod round_robin;

pub use consistent_hash::ConsistentHash;
pub use lfu::Lfu;
pub use lru::Lru;
pub use round_robin::RoundRobin;

/// Live endpoints grouped by the service keys they offer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: HashMap<String, Vec<Endpoint>>,
}

impl RouteTable {
    /// Groups `endpoints` by service key, keeping their relative order.
    pub fn from_endpoints<'a>(endpoints: impl IntoIterator<Item = &'a Endpoint>) -> Self {
        let mut routes: HashMap<String, Vec<Endpoint>> = HashMap::new();
        for endpoint in endpoints {
            for key in endpoint.service_keys() {
                let group = routes.entry(key).or_default();
                if !group.contains(endpoint) {
                    group.push(endpoint.clone());
                }
            }
        }
        Self { routes }
    }

    /// Endpoints offering `service_key`; empty if none.
    pub fn candidates(&self, service_key: &str) -> &[Endpoint] {
        self.routes.get(service_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn service_keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// A selection policy.
///
/// This trait is designed to be object-safe (`Arc<dyn LoadBalancer>`).
pub trait LoadBalancer: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Picks one of `candidates`, which is never empty.
    fn pick(&self, service_key: &str, candidates: &[Endpoint]) -> Endpoint;

    /// Picks an endpoint for `service_key`, or fails if nothing offers it.
    fn route(&self, service_key: &str, table: &RouteTable) -> Result<Endpoint> {
        let candidates = table.candidates(service_key);
        if candidates.is_empty() {
            return Err(Error::NoConnectionForService(service_key.to_string()));
        }
        Ok(self.pick(service_key, candidates))
    }
}

/// Builds the balancer for a configured strategy.
pub fn for_strategy(strategy: Strategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        Strategy::RoundRobin => Arc::new(RoundRobin::new()),
        Strategy::ConsistentHash => Arc::new(ConsistentHash::new()),
        Strategy::Lru => Arc::new(Lru::new()),
        Strategy::Lfu => Arc::new(Lfu::new()),
    }
}

#[cfg(test)]
pub(crate) fn endpoints(n: u16) -> Vec<Endpoint> {
    (0..n)
        .map(|i| Endpoint::new("10.0.0.1", 9000 + i).with_service("Hello", "1.0"))
        .collect()
}
