//! # Invocation Future
//!
//! The handle a caller gets back for one outstanding call. It settles exactly once,
//! either with the server's response or with a local failure, and can be consumed by
//! blocking (`get`, `get_timeout`), by awaiting (`wait`), or by callbacks.
//!
//! ## Invariants
//! - **Single Settlement**: The first outcome wins; later ones are ignored.
//! - **No Lost Callbacks**: A callback registered concurrently with settlement runs
//!   exactly once. The queue is drained under the same lock `add_callback` takes.
//! - **FIFO**: Every callback runs in registration order, whether added before or after
//!   settlement. At most one blocking task drains a future's queue at a time, and it
//!   never runs on the thread that settled the future.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use driftwire::Request;
use driftwire::Response;
use driftwire::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::error;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::pending::PendingTable;

type Callback = Box<dyn FnOnce(Result<Value>) + Send + 'static>;

#[derive(Default)]
struct CallbackQueue {
    pending: Vec<Callback>,
    settled: bool,
    /// A drain task is running and will pick up anything pushed to `pending`.
    draining: bool,
}

impl CallbackQueue {
    /// Claims the drain if there is work and nobody else is draining.
    fn claim_drain(&mut self) -> bool {
        if self.settled && !self.draining && !self.pending.is_empty() {
            self.draining = true;
            true
        } else {
            false
        }
    }
}

struct Inner {
    call_id: String,
    interface: String,
    method: String,
    started: Instant,
    slow_threshold: Duration,
    outcome: Mutex<Option<Result<Value>>>,
    settled: Condvar,
    callbacks: Mutex<CallbackQueue>,
    done: watch::Sender<bool>,
    handle: Handle,
    pending: Weak<PendingTable>,
}

/// One outstanding call. Cheap to clone; clones observe the same outcome.
#[derive(Clone)]
pub struct InvocationFuture {
    inner: Arc<Inner>,
}

impl InvocationFuture {
    /// Creates an unsettled future for `request`. Callbacks are dispatched on `handle`.
    pub fn new(request: &Request, handle: Handle, slow_threshold: Duration) -> Self {
        Self::with_pending(request, handle, slow_threshold, Weak::new())
    }

    /// Like `new`, but a timed-out `get_timeout` also drops the call from `pending`.
    pub(crate) fn with_pending(
        request: &Request,
        handle: Handle,
        slow_threshold: Duration,
        pending: Weak<PendingTable>,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                call_id: request.call_id.clone(),
                interface: request.interface.clone(),
                method: request.method.clone(),
                started: Instant::now(),
                slow_threshold,
                outcome: Mutex::new(None),
                settled: Condvar::new(),
                callbacks: Mutex::new(CallbackQueue::default()),
                done,
                handle,
                pending,
            }),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    pub fn interface(&self) -> &str {
        &self.inner.interface
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn is_done(&self) -> bool {
        self.outcome().is_some()
    }

    /// Cancellation is not supported; calls always run to completion remotely.
    pub fn cancel(&self) -> Result<()> {
        Err(Error::Unsupported("cancel"))
    }

    /// Settles the future with a server response. Returns false if already settled.
    pub fn complete(&self, response: Response) -> bool {
        let outcome = response.into_result().map_err(Error::Remote);
        self.settle(outcome)
    }

    /// Settles the future with a local failure. Returns false if already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Blocks the calling thread until the future settles.
    ///
    /// Must not be called from inside an async task; use `wait` there.
    pub fn get(&self) -> Result<Value> {
        let mut slot = self.outcome();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self
                .inner
                .settled
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Blocks up to `timeout`. On expiry the call is forgotten by its connection and a
    /// `Timeout` error naming the call is returned.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.outcome();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            slot = self
                .inner
                .settled
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        drop(slot);

        if let Some(pending) = self.inner.pending.upgrade() {
            pending.remove(&self.inner.call_id);
        }

        Err(Error::Timeout {
            call_id: self.inner.call_id.clone(),
            interface: self.inner.interface.clone(),
            method: self.inner.method.clone(),
            after: timeout,
        })
    }

    /// Waits for the outcome without blocking the executor.
    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.inner.done.subscribe();
        // The sender lives as long as `self`, so this only returns once settled.
        let _ = rx.wait_for(|done| *done).await;
        match self.outcome().as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(Error::ConnectionClosed(self.inner.call_id.clone())),
        }
    }

    /// Runs `callback` with the outcome once the future settles, off the settling thread.
    pub fn add_callback<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        let start = {
            let mut queue = self.callbacks();
            queue.pending.push(Box::new(callback));
            queue.claim_drain()
        };
        if start {
            self.spawn_drain();
        }
        self
    }

    fn settle(&self, outcome: Result<Value>) -> bool {
        {
            let mut slot = self.outcome();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            self.inner.settled.notify_all();
        }
        self.inner.done.send_replace(true);

        let start = {
            let mut queue = self.callbacks();
            queue.settled = true;
            queue.claim_drain()
        };
        if start {
            self.spawn_drain();
        }

        let elapsed = self.inner.started.elapsed();
        if elapsed > self.inner.slow_threshold {
            warn!(
                call_id = %self.inner.call_id,
                interface = %self.inner.interface,
                method = %self.inner.method,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow call"
            );
        }
        true
    }

    /// Runs queued callbacks until the queue is empty, then releases the drain.
    fn spawn_drain(&self) {
        let this = self.clone();
        self.inner.handle.spawn_blocking(move || {
            loop {
                let batch = {
                    let mut queue = this.callbacks();
                    if queue.pending.is_empty() {
                        queue.draining = false;
                        return;
                    }
                    std::mem::take(&mut queue.pending)
                };
                let Some(outcome) = this.outcome().clone() else {
                    return;
                };
                for callback in batch {
                    let result = outcome.clone();
                    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                        error!(call_id = %this.inner.call_id, "invocation callback panicked");
                    }
                }
            }
        });
    }

    fn outcome(&self) -> MutexGuard<'_, Option<Result<Value>>> {
        self.inner.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn callbacks(&self) -> MutexGuard<'_, CallbackQueue> {
        self.inner.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for InvocationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationFuture")
            .field("call_id", &self.inner.call_id)
            .field("interface", &self.inner.interface)
            .field("method", &self.inner.method)
            .field("done", &self.is_done())
            .finish()
    }
}
