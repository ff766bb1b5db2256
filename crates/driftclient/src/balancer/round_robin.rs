use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use driftwire::Endpoint;

use crate::balancer::LoadBalancer;

/// Cycles through the candidates with one counter shared by all service keys.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn pick(&self, _service_key: &str, candidates: &[Endpoint]) -> Endpoint {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::RouteTable;
    use crate::balancer::endpoints;

    #[test]
    fn test_visits_each_once_per_cycle() {
        for n in 1..=5 {
            let eps = endpoints(n);
            let table = RouteTable::from_endpoints(&eps);
            let rr = RoundRobin::new();

            let picks: Vec<Endpoint> = (0..n * 2)
                .map(|_| rr.route("Hello#1.0", &table).unwrap())
                .collect();
            let expected: Vec<Endpoint> = eps.iter().chain(eps.iter()).cloned().collect();
            assert_eq!(picks, expected);
        }
    }

    #[test]
    fn test_three_endpoints_six_calls() {
        let eps = endpoints(3);
        let table = RouteTable::from_endpoints(&eps);
        let rr = RoundRobin::new();

        let ports: Vec<u16> = (0..6).map(|_| rr.route("Hello#1.0", &table).unwrap().port).collect();
        assert_eq!(ports, vec![9000, 9001, 9002, 9000, 9001, 9002]);
    }
}
