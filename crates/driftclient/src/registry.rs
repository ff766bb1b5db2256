//! # Connection Registry
//!
//! Tracks which endpoints the registry reported (`known`) and which of them have an
//! open connection (`live`), and keeps the two converging:
//!
//! - membership changes schedule connects for new endpoints and close connections to
//!   departed ones;
//! - connects run on the I/O runtime, at most `connect_pool_size` at a time;
//! - a failed connect, or a connection that dies, drops the endpoint from both sets so
//!   the next membership event for it tries again.
//!
//! Callers routing a call block in `choose_connection` until at least one connection is
//! live, the wait timeout passes, or the registry stops.
//!
//! ## Invariants
//! - An endpoint is in `live` only while its connection is open.
//! - The stopped flag is read and written only under the lock that guards the
//!   availability condition, so a waiter cannot miss the final wake-up.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use driftreg::EventKind;
use driftwire::Endpoint;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::balancer::LoadBalancer;
use crate::balancer::RouteTable;
use crate::connection::BoxedStream;
use crate::connection::Connection;
use crate::connection::ConnectionOptions;
use crate::connection::Connector;
use crate::error::Error;
use crate::error::Result;

struct State {
    stopped: bool,
}

pub struct ConnectionRegistry {
    /// Endpoints the registry reported, with the order they became known.
    known: DashMap<Endpoint, u64>,
    live: DashMap<Endpoint, Arc<Connection>>,
    next_ordinal: AtomicU64,
    state: Mutex<State>,
    available: Condvar,
    balancer: Arc<dyn LoadBalancer>,
    connector: Arc<dyn Connector>,
    connect_permits: Arc<Semaphore>,
    options: ConnectionOptions,
    wait_timeout: Duration,
    handle: Handle,
    this: Weak<ConnectionRegistry>,
}

impl ConnectionRegistry {
    pub fn new(
        balancer: Arc<dyn LoadBalancer>,
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
        connect_pool_size: usize,
        wait_timeout: Duration,
        handle: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            known: DashMap::new(),
            live: DashMap::new(),
            next_ordinal: AtomicU64::new(0),
            state: Mutex::new(State { stopped: false }),
            available: Condvar::new(),
            balancer,
            connector,
            connect_permits: Arc::new(Semaphore::new(connect_pool_size.max(1))),
            options,
            wait_timeout,
            handle,
            this: this.clone(),
        })
    }

    pub fn balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.balancer
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_known(&self, endpoint: &Endpoint) -> bool {
        self.known.contains_key(endpoint)
    }

    pub fn is_live(&self, endpoint: &Endpoint) -> bool {
        self.live.contains_key(endpoint)
    }

    /// Brings the known set in line with `desired`: connects to new endpoints and
    /// closes the ones no longer listed.
    pub fn reconcile(&self, desired: Vec<Endpoint>) {
        if self.is_stopped() {
            return;
        }

        if desired.is_empty() {
            error!("no available service");
            let all: Vec<Endpoint> = self.known.iter().map(|e| e.key().clone()).collect();
            for endpoint in all {
                self.remove_and_close(&endpoint);
            }
            return;
        }

        let wanted: HashSet<&Endpoint> = desired.iter().collect();
        for endpoint in &desired {
            if !self.known.contains_key(endpoint) {
                self.connect_async(endpoint.clone());
            }
        }

        let stale: Vec<Endpoint> = self
            .known
            .iter()
            .filter(|e| !wanted.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for endpoint in stale {
            info!(%endpoint, "removing departed endpoint");
            self.remove_and_close(&endpoint);
        }
    }

    /// Applies one child event from the registry.
    ///
    /// An update replaces whatever was registered at the same host and port.
    pub fn apply_membership_event(&self, endpoint: Endpoint, kind: EventKind) {
        if self.is_stopped() {
            return;
        }
        debug!(%endpoint, %kind, "membership event");

        match kind {
            EventKind::Added => {
                if !self.known.contains_key(&endpoint) {
                    self.connect_async(endpoint);
                }
            }
            EventKind::Updated => {
                let previous: Vec<Endpoint> = self
                    .known
                    .iter()
                    .filter(|e| e.key().host == endpoint.host && e.key().port == endpoint.port)
                    .map(|e| e.key().clone())
                    .collect();
                for old in previous {
                    self.remove_and_close(&old);
                }
                self.connect_async(endpoint);
            }
            EventKind::Removed => self.remove_and_close(&endpoint),
        }
    }

    /// Marks `endpoint` known and opens a connection to it in the background.
    ///
    /// Endpoints without services are never connected. A failed attempt forgets the
    /// endpoint again.
    pub fn connect_async(&self, endpoint: Endpoint) {
        if endpoint.services.is_empty() {
            info!(%endpoint, "no service on node, skipping");
            return;
        }

        match self.known.entry(endpoint.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(self.next_ordinal.fetch_add(1, Ordering::Relaxed));
            }
        }

        info!(%endpoint, "new service node");
        for service in &endpoint.services {
            info!(name = %service.name, version = %service.version, "new service info");
        }

        let registry = self.this.clone();
        let connector = self.connector.clone();
        let permits = self.connect_permits.clone();

        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = connector.connect(&endpoint).await;

            let Some(registry) = registry.upgrade() else {
                return;
            };
            match result {
                Ok(stream) => registry.install(endpoint, stream),
                Err(e) => {
                    error!(%endpoint, error = %e, "can not connect to remote server");
                    registry.known.remove(&endpoint);
                }
            }
        });
    }

    fn install(&self, endpoint: Endpoint, stream: BoxedStream) {
        if self.is_stopped() || !self.known.contains_key(&endpoint) {
            debug!(%endpoint, "dropping connection to endpoint that is no longer wanted");
            return;
        }

        let conn = Connection::spawn(endpoint.clone(), stream, self.options.clone(), &self.handle);
        if let Some(old) = self.live.insert(endpoint.clone(), conn.clone()) {
            old.close();
        }
        info!(%endpoint, "connected to remote server");

        let registry = self.this.clone();
        let watched = conn.clone();
        self.handle.spawn(async move {
            watched.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.evict(&watched);
            }
        });

        self.signal_available();
    }

    /// Forgets a connection that closed on its own.
    fn evict(&self, conn: &Arc<Connection>) {
        let endpoint = conn.endpoint();
        let removed = self
            .live
            .remove_if(endpoint, |_, live| Arc::ptr_eq(live, conn))
            .is_some();
        if removed {
            warn!(%endpoint, "connection lost, endpoint forgotten until next membership event");
            self.known.remove(endpoint);
        }
    }

    fn remove_and_close(&self, endpoint: &Endpoint) {
        if let Some((_, conn)) = self.live.remove(endpoint) {
            conn.close();
        }
        self.known.remove(endpoint);
    }

    fn signal_available(&self) {
        let _state = self.state();
        self.available.notify_all();
    }

    /// The current live endpoints grouped by service key, in registration order.
    pub fn route_table(&self) -> RouteTable {
        let mut endpoints: Vec<(u64, Endpoint)> = self
            .live
            .iter()
            .map(|e| {
                let ordinal = self.known.get(e.key()).map_or(u64::MAX, |o| *o);
                (ordinal, e.key().clone())
            })
            .collect();
        endpoints.sort_by_key(|(ordinal, _)| *ordinal);
        RouteTable::from_endpoints(endpoints.iter().map(|(_, e)| e))
    }

    /// Picks a live connection for `service_key`, waiting up to the wait timeout for
    /// the first connection to appear.
    ///
    /// Blocks the calling thread; do not call from inside an async task.
    pub fn choose_connection(&self, service_key: &str) -> Result<Arc<Connection>> {
        let deadline = Instant::now() + self.wait_timeout;
        {
            let mut state = self.state();
            while !state.stopped && self.live.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                warn!("waiting for available service");
                state = self
                    .available
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
            if state.stopped {
                return Err(Error::NoAvailableConnection);
            }
        }

        if self.live.is_empty() {
            return Err(Error::NoAvailableConnection);
        }

        let endpoint = self.balancer.route(service_key, &self.route_table())?;
        self.live
            .get(&endpoint)
            .map(|c| c.value().clone())
            .ok_or(Error::NoAvailableConnection)
    }

    /// Closes everything and wakes all waiters. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.state();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }

        self.connect_permits.close();
        let all: Vec<Endpoint> = self.known.iter().map(|e| e.key().clone()).collect();
        for endpoint in all {
            self.remove_and_close(&endpoint);
        }
        for entry in self.live.iter() {
            entry.value().close();
        }
        self.live.clear();

        self.signal_available();
        info!("connection registry stopped");
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
