//! Task records served through a TTL cache.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;
use worklog_core::{TaskId, TaskRecord};
use worklog_store::{StoreError, TaskStore};

use crate::cache::ReadThroughCache;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Fan-out point for "the backing files changed outside this process".
///
/// Whatever watches the files calls [`ChangeSignal::notify`]; subscribers
/// registered with [`ChangeSignal::on_external_change`] run synchronously on
/// the notifying thread.
#[derive(Clone, Default)]
pub struct ChangeSignal {
    callbacks: Arc<Mutex<Vec<Callback>>>,
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("ChangeSignal").field("subscribers", &count).finish()
    }
}

impl ChangeSignal {
    /// Empty signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run on every notification.
    pub fn on_external_change(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Run every registered callback.
    pub fn notify(&self) {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(subscribers = callbacks.len(), "External change signalled");
        for callback in callbacks {
            callback();
        }
    }
}

#[derive(Debug)]
struct TaskCaches {
    all: ReadThroughCache<(), Vec<TaskRecord>>,
    by_id: ReadThroughCache<TaskId, TaskRecord>,
}

impl TaskCaches {
    fn clear(&self) {
        self.all.clear();
        self.by_id.clear();
    }
}

/// [`TaskStore`] with cached reads.
///
/// Reads may lag an out-of-process change by at most the TTL, or until the
/// next [`ChangeSignal::notify`], whichever comes first.
#[derive(Debug, Clone)]
pub struct CachedTaskRepository {
    store: TaskStore,
    caches: Arc<TaskCaches>,
}

impl CachedTaskRepository {
    /// Wrap `store`, caching reads for `ttl` and clearing on `signal`.
    #[must_use]
    pub fn new(store: TaskStore, ttl: Duration, signal: &ChangeSignal) -> Self {
        let caches = Arc::new(TaskCaches {
            all: ReadThroughCache::new(ttl),
            by_id: ReadThroughCache::new(ttl),
        });
        let weak = Arc::downgrade(&caches);
        signal.on_external_change(move || {
            if let Some(caches) = weak.upgrade() {
                caches.clear();
            }
        });
        Self { store, caches }
    }

    /// All tasks.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        if let Some(tasks) = self.caches.all.get(&()) {
            debug!(count = tasks.len(), "Task list served from cache");
            return Ok(tasks);
        }
        let tasks = self.store.list().await?;
        self.caches.all.set((), tasks.clone());
        Ok(tasks)
    }

    /// One task.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        if let Some(task) = self.caches.by_id.get(&id) {
            debug!(id = %id, "Task served from cache");
            return Ok(task);
        }
        let task = self.store.get(id).await?;
        self.caches.by_id.set(id, task.clone());
        Ok(task)
    }

    /// Insert or replace a task, then drop cached reads.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    pub async fn upsert(&self, task: TaskRecord) -> Result<TaskRecord, StoreError> {
        let saved = self.store.upsert(task).await?;
        self.caches.clear();
        Ok(saved)
    }

    /// Delete a task, then drop cached reads.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        self.store.delete(id).await?;
        self.caches.clear();
        Ok(())
    }
}
