//! The three services a distributed job runs on.
//!
//! Task Channel, Result Channel and Content Cache are separate traits so a
//! worker or a generator only depends on what it uses. The in-process
//! broker and the networked client each implement all three.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{CacheKey, JobId, ResultEnvelope, TaskEnvelope};

/// Queue of pending tasks.
pub trait TaskChannel: Send + Sync {
    /// Enqueue a task.
    fn push_task(&self, task: TaskEnvelope) -> Result<()>;

    /// Dequeue the oldest task, waiting up to `timeout`.
    fn pop_task(&self, timeout: Duration) -> Result<Option<TaskEnvelope>>;

    /// Remove every queued task of `job`, returning how many were removed.
    fn drain_job(&self, job: JobId) -> Result<usize>;
}

/// Per-job queues of finished results.
pub trait ResultChannel: Send + Sync {
    /// Deliver a result.
    fn push_result(&self, result: ResultEnvelope) -> Result<()>;

    /// Take the next result of `job`, waiting up to `timeout`.
    fn pop_result(&self, job: JobId, timeout: Duration) -> Result<Option<ResultEnvelope>>;
}

/// Reference-counted store of shared task inputs, keyed by content.
pub trait ContentCache: Send + Sync {
    /// Store `payload` under `key`, or add a reference if already present.
    fn insert(&self, key: &CacheKey, payload: Arc<Vec<u8>>) -> Result<()>;

    /// Read a payload.
    fn fetch(&self, key: &CacheKey) -> Result<Option<Arc<Vec<u8>>>>;

    /// Drop one reference; the payload is freed with the last one.
    fn release(&self, key: &CacheKey) -> Result<()>;
}

/// Handles to the three services.
#[derive(Clone)]
pub struct Channels {
    /// Task queue.
    pub tasks: Arc<dyn TaskChannel>,
    /// Result queues.
    pub results: Arc<dyn ResultChannel>,
    /// Shared-input cache.
    pub cache: Arc<dyn ContentCache>,
}

impl Channels {
    /// Use one object for all three services.
    pub fn from_shared<C>(services: Arc<C>) -> Self
    where
        C: TaskChannel + ResultChannel + ContentCache + 'static,
    {
        Self {
            tasks: services.clone(),
            results: services.clone(),
            cache: services,
        }
    }
}

impl std::fmt::Debug for Channels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Channels")
    }
}
