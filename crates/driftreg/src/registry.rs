//! # Registry Contract
//!
//! The operations drift needs from a coordination service. Both sides stay ignorant of
//! what the node data means; servers write endpoint JSON, clients parse it.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::event::WatchEvent;
use crate::error::Result;

/// A watchable tree of nodes.
///
/// This trait is designed to be object-safe (`Arc<dyn Registry>`).
#[async_trait::async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Creates a node at `prefix` + a fresh sequence number and returns its full path.
    ///
    /// The node is ephemeral: it belongs to whoever created it and disappears when
    /// they delete it or the registry goes away.
    async fn create_sequential(&self, prefix: &str, data: Vec<u8>) -> Result<String>;

    /// Replaces a node's data.
    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Names (not full paths) of the children of `parent`, in creation order.
    async fn children(&self, parent: &str) -> Result<Vec<String>>;

    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// Subscribes to child changes under `parent`.
    fn watch_children(&self, parent: &str) -> Result<ChildWatch>;
}

/// A subscription to the children of one parent.
pub struct ChildWatch {
    parent: String,
    rx: broadcast::Receiver<WatchEvent>,
}

impl ChildWatch {
    pub fn new(parent: impl Into<String>, rx: broadcast::Receiver<WatchEvent>) -> Self {
        Self {
            parent: parent.into(),
            rx,
        }
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Waits for the next event under the watched parent.
    ///
    /// A watcher that fell behind gets a `Resync` instead of the events it missed.
    /// Returns `None` once the registry is gone.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(WatchEvent::Child(event)) => {
                    if is_child_of(&event.path, &self.parent) {
                        return Some(WatchEvent::Child(event));
                    }
                }
                Ok(WatchEvent::Resync) => return Some(WatchEvent::Resync),
                Err(RecvError::Lagged(missed)) => {
                    warn!(parent = %self.parent, missed, "registry watcher lagged");
                    return Some(WatchEvent::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

pub(crate) fn is_child_of(path: &str, parent: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    path.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|name| !name.is_empty() && !name.contains('/'))
}
