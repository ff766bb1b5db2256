//! Outstanding calls of one connection, keyed by call id.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use driftwire::Response;
use tracing::debug;
use tracing::warn;

use crate::error::Error;
use crate::future::InvocationFuture;

#[derive(Default)]
pub struct PendingTable {
    calls: DashMap<String, InvocationFuture>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call. Returns false if the id is already outstanding.
    pub fn insert(&self, future: InvocationFuture) -> bool {
        match self.calls.entry(future.call_id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(future);
                true
            }
        }
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn remove(&self, call_id: &str) -> Option<InvocationFuture> {
        self.calls.remove(call_id).map(|(_, f)| f)
    }

    /// Routes a response to its call. Returns false for unknown or late ids.
    pub fn complete(&self, response: Response) -> bool {
        let Some(future) = self.remove(&response.call_id) else {
            warn!(call_id = %response.call_id, "no pending call for response");
            return false;
        };
        debug!(call_id = %response.call_id, "response matched");
        future.complete(response)
    }

    /// Fails every outstanding call and empties the table.
    pub fn fail_all(&self, error: Error) -> usize {
        let keys: Vec<String> = self.calls.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for key in keys {
            if let Some(future) = self.remove(&key) {
                future.fail(error.clone());
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
