//! Thread-pool execution inside the current process.

use std::sync::mpsc;
use std::sync::Arc;

use crate::error::{ParallelError, Result};
use crate::executor::CancelToken;
use crate::task::{run_local, Task, TaskOutcome};

/// A rayon pool running tasks on shared in-memory inputs.
#[derive(Clone)]
pub struct LocalPool {
    pool: Arc<rayon::ThreadPool>,
}

impl LocalPool {
    /// Pool with `workers` threads, or one per available core.
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let workers = match workers {
            Some(0) => {
                return Err(ParallelError::InvalidConfig(
                    "local pool needs at least one worker".into(),
                ))
            }
            Some(n) => n,
            None => std::thread::available_parallelism().map_or(1, usize::from),
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("millpath-local-{i}"))
            .build()
            .map_err(|e| ParallelError::PoolBuild(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue every task and return their outcomes as they finish.
    ///
    /// Tasks still queued when `cancel` fires are skipped.
    pub(crate) fn run<T: Task>(
        &self,
        shared: Arc<T::Shared>,
        args: Vec<T::Args>,
        cancel: CancelToken,
    ) -> mpsc::IntoIter<(usize, TaskOutcome<T::Output>)> {
        let (tx, rx) = mpsc::channel();
        for (index, arg) in args.into_iter().enumerate() {
            let tx = tx.clone();
            let shared = shared.clone();
            let cancel = cancel.clone();
            self.pool.spawn(move || {
                if cancel.is_cancelled() {
                    return;
                }
                let outcome = run_local::<T>(&shared, arg);
                let _ = tx.send((index, outcome));
            });
        }
        rx.into_iter()
    }
}

impl std::fmt::Debug for LocalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPool")
            .field("workers", &self.workers())
            .finish()
    }
}
