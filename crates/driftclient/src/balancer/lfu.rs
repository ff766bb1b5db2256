//! Least-frequently-used selection.
//!
//! Per service key, a use count per candidate. The lowest count wins (earliest in
//! route order on ties) and is incremented. Counts past [`COUNT_CEILING`] restart at
//! zero, and all tables reset once a day.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use driftwire::Endpoint;

use crate::balancer::LoadBalancer;
use crate::balancer::lru::REFRESH_INTERVAL;

pub const COUNT_CEILING: u64 = 1_000_000;

struct LfuState {
    valid_until: Instant,
    tables: HashMap<String, HashMap<Endpoint, u64>>,
}

pub struct Lfu {
    state: Mutex<LfuState>,
    refresh: Duration,
}

impl Lfu {
    pub fn new() -> Self {
        Self::with_refresh(REFRESH_INTERVAL)
    }

    pub fn with_refresh(refresh: Duration) -> Self {
        Self {
            state: Mutex::new(LfuState {
                valid_until: Instant::now() + refresh,
                tables: HashMap::new(),
            }),
            refresh,
        }
    }

    /// Current use count of `endpoint` for `service_key`.
    pub fn count(&self, service_key: &str, endpoint: &Endpoint) -> Option<u64> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tables.get(service_key)?.get(endpoint).copied()
    }

    #[cfg(test)]
    fn set_count(&self, service_key: &str, endpoint: &Endpoint, count: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .tables
            .entry(service_key.to_string())
            .or_default()
            .insert(endpoint.clone(), count);
    }
}

impl Default for Lfu {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for Lfu {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn pick(&self, service_key: &str, candidates: &[Endpoint]) -> Endpoint {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        if now > state.valid_until {
            state.tables.clear();
            state.valid_until = now + self.refresh;
        }

        let counts = state.tables.entry(service_key.to_string()).or_default();
        for endpoint in candidates {
            let count = counts.entry(endpoint.clone()).or_insert(0);
            if *count > COUNT_CEILING {
                *count = 0;
            }
        }
        counts.retain(|endpoint, _| candidates.contains(endpoint));

        let mut chosen = &candidates[0];
        let mut lowest = u64::MAX;
        for endpoint in candidates {
            let count = counts.get(endpoint).copied().unwrap_or(0);
            if count < lowest {
                lowest = count;
                chosen = endpoint;
            }
        }

        if let Some(count) = counts.get_mut(chosen) {
            *count += 1;
        }
        chosen.clone()
    }
}
