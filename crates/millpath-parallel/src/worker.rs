//! Worker threads that pull tasks from a task channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{Channels, ContentCache};
use crate::error::{ParallelError, Result};
use crate::protocol::{CacheKey, ResultEnvelope, TaskEnvelope};
use crate::task::{FunctionRegistry, RegisteredTask, SharedInput, TaskFailure, TaskOutcome};

/// Decoded shared inputs kept per supervisor.
const MEMO_CAPACITY: usize = 8;

type MemoSlot = Arc<OnceLock<TaskOutcome<SharedInput>>>;

/// Decoded shared inputs, fetched at most once per key and function.
#[derive(Default)]
struct PayloadMemo {
    slots: Mutex<HashMap<(CacheKey, String), MemoSlot>>,
    fetches: AtomicU64,
}

impl PayloadMemo {
    fn shared(
        &self,
        task: &TaskEnvelope,
        entry: RegisteredTask,
        cache: &dyn ContentCache,
    ) -> TaskOutcome<SharedInput> {
        let id = (task.cache_key.clone(), task.function.clone());
        let slot = {
            let mut slots = self.slots.lock();
            if slots.len() >= MEMO_CAPACITY && !slots.contains_key(&id) {
                slots.clear();
            }
            slots.entry(id.clone()).or_default().clone()
        };
        let outcome = slot
            .get_or_init(|| {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                match cache.fetch(&task.cache_key) {
                    Ok(Some(bytes)) => (entry.decode)(&bytes),
                    Ok(None) => Err(TaskFailure::new(format!(
                        "shared input {} is not cached",
                        task.cache_key
                    ))),
                    Err(e) => Err(TaskFailure::new(format!(
                        "cannot fetch shared input {}: {e}",
                        task.cache_key
                    ))),
                }
            })
            .clone();
        if outcome.is_err() {
            // Let the next task retry the fetch.
            let mut slots = self.slots.lock();
            if slots.get(&id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                slots.remove(&id);
            }
        }
        outcome
    }
}

/// Counters of a supervisor's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorStats {
    /// Tasks that produced a value.
    pub completed: u64,
    /// Tasks that produced a failure.
    pub failed: u64,
    /// Shared-input fetches from the content cache.
    pub cache_fetches: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

struct WorkerContext {
    registry: Arc<FunctionRegistry>,
    memo: PayloadMemo,
    counters: Counters,
    shutdown: AtomicBool,
    poll_interval: Duration,
}

/// A group of worker threads sharing one payload memo.
///
/// Workers run until the supervisor is dropped or their channel fails.
pub struct Supervisor {
    context: Arc<WorkerContext>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Start `workers` threads, each with channels made by `connect`.
    ///
    /// All channels are opened before any thread starts, so connection
    /// errors are returned here.
    pub fn start<F>(
        workers: usize,
        registry: Arc<FunctionRegistry>,
        poll_interval: Duration,
        connect: F,
    ) -> Result<Self>
    where
        F: Fn() -> Result<Channels>,
    {
        let channels = (0..workers).map(|_| connect()).collect::<Result<Vec<_>>>()?;
        let context = Arc::new(WorkerContext {
            registry,
            memo: PayloadMemo::default(),
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
            poll_interval,
        });

        let mut handles = Vec::with_capacity(workers);
        for (id, channels) in channels.into_iter().enumerate() {
            let context = context.clone();
            let handle = std::thread::Builder::new()
                .name(format!("millpath-worker-{id}"))
                .spawn(move || worker_loop(id, &channels, &context))?;
            handles.push(handle);
        }
        info!(workers, "supervisor started");
        Ok(Self { context, handles })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SupervisorStats {
        let counters = &self.context.counters;
        SupervisorStats {
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cache_fetches: self.context.memo.fetches.load(Ordering::Relaxed),
        }
    }

    /// Block until every worker has stopped.
    pub fn wait(mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.context.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("workers", &self.handles.len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(id: usize, channels: &Channels, context: &WorkerContext) {
    debug!(worker = id, "worker started");
    while !context.shutdown.load(Ordering::Acquire) {
        let task = match channels.tasks.pop_task(context.poll_interval) {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(ParallelError::ManagerGone) => {
                debug!(worker = id, "manager gone; worker stopping");
                break;
            }
            Err(e) => {
                warn!(worker = id, error = %e, "task channel failed; worker stopping");
                break;
            }
        };

        let outcome = execute(&task, channels, context);
        match &outcome {
            Ok(_) => context.counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(failure) => {
                debug!(worker = id, index = task.index, %failure, "task failed");
                context.counters.failed.fetch_add(1, Ordering::Relaxed)
            }
        };

        let result = ResultEnvelope {
            job: task.job,
            index: task.index,
            outcome,
        };
        if let Err(e) = channels.results.push_result(result) {
            warn!(worker = id, error = %e, "cannot deliver result; worker stopping");
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}

fn execute(
    task: &TaskEnvelope,
    channels: &Channels,
    context: &WorkerContext,
) -> TaskOutcome<serde_json::Value> {
    let entry = context
        .registry
        .get(&task.function)
        .ok_or_else(|| TaskFailure::new(format!("unknown function {:?}", task.function)))?;
    let shared = context.memo.shared(task, entry, channels.cache.as_ref())?;
    (entry.run)(shared.as_ref(), task.args.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::channel::{ResultChannel, TaskChannel};
    use crate::protocol::JobId;
    use crate::task::tests::{registry, Square};
    use crate::task::Task;

    fn push(broker: &Broker, job: JobId, index: usize, function: &str, key: &CacheKey) {
        broker
            .push_task(TaskEnvelope {
                job,
                index,
                function: function.into(),
                args: serde_json::json!(index),
                cache_key: key.clone(),
            })
            .unwrap();
    }

    #[test]
    fn test_workers_fetch_payload_once() {
        let broker = Broker::new().unwrap();
        let payload = serde_json::to_vec(&vec![1u8; 64]).unwrap();
        let key = CacheKey::for_payload(&payload);
        broker.insert(&key, Arc::new(payload)).unwrap();

        let job = JobId::new();
        for i in 0..50 {
            push(&broker, job, i, Square::NAME, &key);
        }
        let supervisor = Supervisor::start(
            4,
            Arc::new(registry()),
            Duration::from_millis(10),
            || Ok(Channels::from_shared(broker.clone())),
        )
        .unwrap();

        let mut outputs = Vec::new();
        while outputs.len() < 50 {
            let result = broker
                .pop_result(job, Duration::from_secs(10))
                .unwrap()
                .unwrap();
            outputs.push((result.index, result.outcome));
        }
        outputs.sort_by_key(|(i, _)| *i);
        assert_eq!(outputs[12].1, Ok(serde_json::json!(144)));
        assert_eq!(outputs[13].1, Err(TaskFailure::new("unlucky")));

        let stats = supervisor.stats();
        assert_eq!(stats.completed, 49);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cache_fetches, 1);
    }

    #[test]
    fn test_unknown_function_and_missing_payload_fail() {
        let broker = Broker::new().unwrap();
        let job = JobId::new();
        let missing = CacheKey::for_payload(b"never inserted");
        push(&broker, job, 0, "no.such.task", &missing);
        push(&broker, job, 1, Square::NAME, &missing);
        let _supervisor = Supervisor::start(
            1,
            Arc::new(registry()),
            Duration::from_millis(10),
            || Ok(Channels::from_shared(broker.clone())),
        )
        .unwrap();

        for _ in 0..2 {
            let result = broker
                .pop_result(job, Duration::from_secs(10))
                .unwrap()
                .unwrap();
            let failure = result.outcome.unwrap_err();
            match result.index {
                0 => assert!(failure.message.contains("unknown function")),
                _ => assert!(failure.message.contains("not cached")),
            }
        }
    }

    #[test]
    fn test_connect_errors_surface_at_start() {
        let err = Supervisor::start(
            2,
            Arc::new(registry()),
            Duration::from_millis(10),
            || Err(ParallelError::ManagerGone),
        )
        .unwrap_err();
        assert!(matches!(err, ParallelError::ManagerGone));
    }
}
