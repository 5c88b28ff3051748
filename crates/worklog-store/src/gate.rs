//! Named-resource mutual exclusion.
//!
//! [`ResourceGate`] guarantees at most one in-flight operation per resource
//! key. Waiters queue in arrival order and the key is handed directly to the
//! next waiter on release, so a newcomer can never overtake the queue. There
//! is no timeout: a stuck holder starves later waiters on the same key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Default)]
struct GateState {
    held: HashSet<String>,
    waiters: HashMap<String, VecDeque<oneshot::Sender<()>>>,
}

/// Per-key FIFO mutual exclusion shared by every writer of a resource.
///
/// Cloning is cheap and clones share the same key table.
#[derive(Debug, Clone, Default)]
pub struct ResourceGate {
    state: Arc<Mutex<GateState>>,
}

impl ResourceGate {
    /// Create an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` while holding `key`.
    ///
    /// The key is released when the operation completes, fails, panics, or
    /// its future is dropped.
    pub async fn with_exclusive<F, Fut, T>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(key).await;
        operation().await
    }

    /// Acquire `key`, waiting behind earlier callers if it is held.
    pub async fn acquire(&self, key: &str) -> GatePermit {
        let receiver = {
            let mut state = self.lock();
            if state.held.insert(key.to_owned()) {
                return self.permit(key);
            }
            let (sender, receiver) = oneshot::channel();
            let queue = state.waiters.entry(key.to_owned()).or_default();
            queue.push_back(sender);
            debug!(key, waiting = queue.len(), "Gate contended, queueing");
            receiver
        };

        let mut pending = PendingAcquire {
            gate: self.clone(),
            key: key.to_owned(),
            receiver: Some(receiver),
        };
        pending.wait().await;
        self.permit(key)
    }

    /// Returns true when `key` is currently held.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.lock().held.contains(key)
    }

    /// Number of callers queued behind the holder of `key`.
    #[must_use]
    pub fn waiting(&self, key: &str) -> usize {
        self.lock().waiters.get(key).map_or(0, VecDeque::len)
    }

    fn permit(&self, key: &str) -> GatePermit {
        GatePermit {
            gate: self.clone(),
            key: key.to_owned(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &str) {
        let mut state = self.lock();
        if let Some(queue) = state.waiters.get_mut(key) {
            while let Some(next) = queue.pop_front() {
                // A closed receiver means the waiter gave up; try the next one.
                if next.send(()).is_ok() {
                    if queue.is_empty() {
                        state.waiters.remove(key);
                    }
                    return;
                }
            }
            state.waiters.remove(key);
        }
        state.held.remove(key);
    }
}

/// Proof of holding a key; releases it on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: ResourceGate,
    key: String,
}

impl GatePermit {
    /// Key held by this permit.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release(&self.key);
    }
}

/// A queued acquisition. If dropped after the key was handed over but before
/// the waiter observed it, the key is passed on instead of leaking.
struct PendingAcquire {
    gate: ResourceGate,
    key: String,
    receiver: Option<oneshot::Receiver<()>>,
}

impl PendingAcquire {
    async fn wait(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            // The sender is only dropped without sending when the gate itself
            // is torn down, in which case ownership is moot.
            let _ = receiver.await;
        }
        self.receiver = None;
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.gate.release(&self.key);
            }
        }
    }
}
