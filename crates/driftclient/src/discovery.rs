//! # Discovery
//!
//! Feeds registry membership into a [`ConnectionRegistry`]. On start, and whenever the
//! watch asks for a resync, the full child list is read and reconciled; in between,
//! each child event is applied on its own.

use std::sync::Arc;

use driftreg::ChildWatch;
use driftreg::REGISTRY_PATH;
use driftreg::Registry;
use driftreg::WatchEvent;
use driftreg::child_path;
use driftwire::Endpoint;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::error::Result;
use crate::registry::ConnectionRegistry;

pub struct Discovery {
    task: JoinHandle<()>,
}

impl Discovery {
    /// Subscribes to the registry and starts the bridge task on `handle`.
    pub fn start(
        registry: Arc<dyn Registry>,
        connections: Arc<ConnectionRegistry>,
        handle: &Handle,
    ) -> Result<Self> {
        // Subscribe before listing so nothing published in between is missed.
        let watch = registry.watch_children(REGISTRY_PATH)?;
        let task = handle.spawn(run(registry, connections, watch));
        Ok(Self { task })
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(registry: Arc<dyn Registry>, connections: Arc<ConnectionRegistry>, mut watch: ChildWatch) {
    info!("get initial service info");
    resync(registry.as_ref(), &connections).await;

    while let Some(event) = watch.next().await {
        if connections.is_stopped() {
            break;
        }
        match event {
            WatchEvent::Child(child) => {
                info!(path = %child.path, kind = %child.kind, data = %child.data_str(), "child data updated");
                match Endpoint::from_json(&child.data_str()) {
                    Ok(endpoint) => connections.apply_membership_event(endpoint, child.kind),
                    Err(e) => error!(path = %child.path, error = %e, "bad endpoint node"),
                }
            }
            WatchEvent::Resync => {
                info!("registry resync, reloading service list");
                resync(registry.as_ref(), &connections).await;
            }
        }
    }
    debug!("discovery watch ended");
}

async fn resync(registry: &dyn Registry, connections: &ConnectionRegistry) {
    match list_endpoints(registry).await {
        Ok(endpoints) => {
            debug!(count = endpoints.len(), "service node data");
            connections.reconcile(endpoints);
        }
        Err(e) => error!(error = %e, "get node exception"),
    }
}

/// Reads and parses every endpoint node. Unparseable nodes are logged and skipped.
pub async fn list_endpoints(registry: &dyn Registry) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::new();
    for child in registry.children(REGISTRY_PATH).await? {
        let path = child_path(REGISTRY_PATH, &child);
        let data = match registry.get_data(&path).await {
            Ok(data) => data,
            // Deleted between listing and reading.
            Err(driftreg::Error::NoNode(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        match Endpoint::from_json(&String::from_utf8_lossy(&data)) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => error!(%path, error = %e, "bad endpoint node"),
        }
    }
    Ok(endpoints)
}
