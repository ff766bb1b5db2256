//! Least-recently-used selection.
//!
//! Each service key has an [`AccessOrder`]: a doubly linked list threaded through a
//! slab, plus an index from endpoint to slot. New candidates are appended, absent ones
//! pruned, and the head (least recently used) is picked and moved to the tail. Every
//! table is dropped once a day so long-gone endpoints cannot linger.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use driftwire::Endpoint;

use crate::balancer::LoadBalancer;

/// Entries kept per service key.
pub const LRU_CAPACITY: usize = 1000;

/// How long tables live before a full reset.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

struct Node {
    endpoint: Endpoint,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Endpoints in access order, oldest first, bounded by `capacity`.
pub struct AccessOrder {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<Endpoint, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl AccessOrder {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.index.contains_key(endpoint)
    }

    /// The least recently used endpoint.
    pub fn eldest(&self) -> Option<&Endpoint> {
        self.head.and_then(|slot| self.node(slot)).map(|n| &n.endpoint)
    }

    /// Appends `endpoint` as most recently used, evicting the eldest when over capacity.
    /// Returns the evicted endpoint, if any.
    pub fn insert(&mut self, endpoint: Endpoint) -> Option<Endpoint> {
        if let Some(&slot) = self.index.get(&endpoint) {
            self.move_to_tail(slot);
            return None;
        }

        let node = Node {
            endpoint: endpoint.clone(),
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        if let Some(tail) = self.tail {
            if let Some(n) = self.node_mut(tail) {
                n.next = Some(slot);
            }
        } else {
            self.head = Some(slot);
        }
        self.tail = Some(slot);
        self.index.insert(endpoint, slot);

        if self.index.len() > self.capacity {
            let eldest = self.eldest().cloned()?;
            self.remove(&eldest);
            return Some(eldest);
        }
        None
    }

    /// Marks `endpoint` as most recently used. Returns false if absent.
    pub fn touch(&mut self, endpoint: &Endpoint) -> bool {
        match self.index.get(endpoint) {
            Some(&slot) => {
                self.move_to_tail(slot);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, endpoint: &Endpoint) -> bool {
        let Some(slot) = self.index.remove(endpoint) else {
            return false;
        };
        self.unlink(slot);
        self.slots[slot] = None;
        self.free.push(slot);
        true
    }

    /// Drops every endpoint for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&Endpoint) -> bool) {
        let doomed: Vec<Endpoint> = self.index.keys().filter(|e| !keep(*e)).cloned().collect();
        for endpoint in doomed {
            self.remove(&endpoint);
        }
    }

    /// Endpoints from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cursor?)?;
            cursor = node.next;
            Some(&node.endpoint)
        })
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node(slot).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(slot) {
            n.prev = None;
            n.next = None;
        }
    }

    fn move_to_tail(&mut self, slot: usize) {
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        let old_tail = self.tail;
        if let Some(n) = self.node_mut(slot) {
            n.prev = old_tail;
        }
        match old_tail {
            Some(t) => {
                if let Some(n) = self.node_mut(t) {
                    n.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

struct LruState {
    valid_until: Instant,
    tables: HashMap<String, AccessOrder>,
}

pub struct Lru {
    state: Mutex<LruState>,
    refresh: Duration,
}

impl Lru {
    pub fn new() -> Self {
        Self::with_refresh(REFRESH_INTERVAL)
    }

    pub fn with_refresh(refresh: Duration) -> Self {
        Self {
            state: Mutex::new(LruState {
                valid_until: Instant::now() + refresh,
                tables: HashMap::new(),
            }),
            refresh,
        }
    }

    /// Entries currently tracked for `service_key`.
    pub fn tracked(&self, service_key: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tables.get(service_key).map_or(0, AccessOrder::len)
    }
}

impl Default for Lru {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for Lru {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn pick(&self, service_key: &str, candidates: &[Endpoint]) -> Endpoint {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        if now > state.valid_until {
            state.tables.clear();
            state.valid_until = now + self.refresh;
        }

        let order = state
            .tables
            .entry(service_key.to_string())
            .or_insert_with(|| AccessOrder::new(LRU_CAPACITY));

        for endpoint in candidates {
            if !order.contains(endpoint) {
                order.insert(endpoint.clone());
            }
        }
        order.retain(|e| candidates.contains(e));

        match order.eldest().cloned() {
            Some(eldest) => {
                order.touch(&eldest);
                eldest
            }
            // More candidates than capacity can evict everything but the newest.
            None => candidates[0].clone(),
        }
    }
}
