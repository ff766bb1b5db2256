//! In-process registry.
//!
//! Nodes live in one ordered map keyed by full path, so listing is deterministic and
//! sequence numbers sort in creation order. Every mutation is broadcast to watchers.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::event::ChildEvent;
use crate::event::EventKind;
use crate::event::WatchEvent;
use crate::registry::ChildWatch;
use crate::registry::Registry;
use crate::registry::is_child_of;

const EVENT_CAPACITY: usize = 1024;

pub struct MemoryRegistry {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    closed: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(1),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Tells every watcher to re-list, as a coordination service does after a
    /// session reconnect.
    pub fn resync(&self) {
        let _ = self.events.send(WatchEvent::Resync);
    }

    /// Drops every node, notifying watchers, and refuses further operations.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = std::mem::take(&mut *self.nodes());
        for (path, data) in drained {
            self.publish(EventKind::Removed, path, data);
        }
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn publish(&self, kind: EventKind, path: String, data: Vec<u8>) {
        debug!(%kind, %path, "registry event");
        // No receivers is fine.
        let _ = self.events.send(WatchEvent::Child(ChildEvent { kind, path, data }));
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    async fn create_sequential(&self, prefix: &str, data: Vec<u8>) -> Result<String> {
        self.check_open()?;
        validate_path(prefix)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let path = format!("{}{:010}", prefix, seq);
        self.nodes().insert(path.clone(), data.clone());
        self.publish(EventKind::Added, path.clone(), data);
        Ok(path)
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.check_open()?;
        {
            let mut nodes = self.nodes();
            let slot = nodes
                .get_mut(path)
                .ok_or_else(|| Error::NoNode(path.to_string()))?;
            *slot = data.clone();
        }
        self.publish(EventKind::Updated, path.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_open()?;
        let data = self
            .nodes()
            .remove(path)
            .ok_or_else(|| Error::NoNode(path.to_string()))?;
        self.publish(EventKind::Removed, path.to_string(), data);
        Ok(())
    }

    async fn children(&self, parent: &str) -> Result<Vec<String>> {
        self.check_open()?;
        validate_path(parent)?;
        let prefix = format!("{}/", parent.trim_end_matches('/'));
        Ok(self
            .nodes()
            .keys()
            .filter(|path| is_child_of(path, parent))
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        self.check_open()?;
        self.nodes()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    fn watch_children(&self, parent: &str) -> Result<ChildWatch> {
        self.check_open()?;
        validate_path(parent)?;
        Ok(ChildWatch::new(parent, self.events.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DATA_PATH;
    use crate::REGISTRY_PATH;
    use crate::child_path;

    #[tokio::test]
    async fn test_sequential_nodes_list_in_creation_order() {
        let reg = MemoryRegistry::new();
        let a = reg.create_sequential(DATA_PATH, b"a".to_vec()).await.unwrap();
        let b = reg.create_sequential(DATA_PATH, b"b".to_vec()).await.unwrap();

        assert_eq!(a, "/registry/data-0000000001");
        assert!(b > a);

        let children = reg.children(REGISTRY_PATH).await.unwrap();
        assert_eq!(children, vec!["data-0000000001", "data-0000000002"]);
        assert_eq!(reg.get_data(&child_path(REGISTRY_PATH, &children[1])).await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_watch_sees_add_update_remove() {
        let reg = MemoryRegistry::new();
        let mut watch = reg.watch_children(REGISTRY_PATH).unwrap();

        let path = reg.create_sequential(DATA_PATH, b"v1".to_vec()).await.unwrap();
        reg.set_data(&path, b"v2".to_vec()).await.unwrap();
        reg.delete(&path).await.unwrap();

        let kinds: Vec<(EventKind, Vec<u8>)> = collect_child_events(&mut watch, 3).await;
        assert_eq!(kinds, vec![
            (EventKind::Added, b"v1".to_vec()),
            (EventKind::Updated, b"v2".to_vec()),
            (EventKind::Removed, b"v2".to_vec()),
        ]);
    }

    #[tokio::test]
    async fn test_watch_ignores_other_parents() {
        let reg = MemoryRegistry::new();
        let mut watch = reg.watch_children(REGISTRY_PATH).unwrap();

        reg.create_sequential("/elsewhere/node-", b"x".to_vec()).await.unwrap();
        reg.create_sequential(DATA_PATH, b"mine".to_vec()).await.unwrap();

        let Some(WatchEvent::Child(event)) = watch.next().await else {
            panic!("expected a child event");
        };
        assert_eq!(event.data_str(), "mine");
    }

    #[tokio::test]
    async fn test_missing_nodes_and_close() {
        let reg = MemoryRegistry::new();
        assert_eq!(reg.delete("/registry/nope").await, Err(Error::NoNode("/registry/nope".into())));
        assert!(reg.children(REGISTRY_PATH).await.unwrap().is_empty());

        let mut watch = reg.watch_children(REGISTRY_PATH).unwrap();
        reg.create_sequential(DATA_PATH, b"x".to_vec()).await.unwrap();
        reg.close();

        assert!(matches!(watch.next().await, Some(WatchEvent::Child(e)) if e.kind == EventKind::Added));
        assert!(matches!(watch.next().await, Some(WatchEvent::Child(e)) if e.kind == EventKind::Removed));
        assert_eq!(reg.children(REGISTRY_PATH).await, Err(Error::Closed));
    }

    #[tokio::test]
    async fn test_resync_reaches_watchers() {
        let reg = MemoryRegistry::new();
        let mut watch = reg.watch_children(REGISTRY_PATH).unwrap();
        reg.resync();
        assert_eq!(watch.next().await, Some(WatchEvent::Resync));
    }

    async fn collect_child_events(watch: &mut ChildWatch, n: usize) -> Vec<(EventKind, Vec<u8>)> {
        let mut out = Vec::new();
        while out.len() < n {
            match watch.next().await {
                Some(WatchEvent::Child(e)) => out.push((e.kind, e.data)),
                Some(WatchEvent::Resync) => continue,
                None => break,
            }
        }
        out
    }
}
