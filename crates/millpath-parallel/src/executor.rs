//! The single entry point generators use to fan out work.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distributed::{DistributedConfig, DistributedPool};
use crate::error::{ParallelError, Result};
use crate::local::LocalPool;
use crate::task::{run_local, FunctionRegistry, Task, TaskOutcome};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Order in which a [`TaskStream`] yields outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrder {
    /// Outcome `i` is yielded before outcome `i + 1`.
    #[default]
    Submission,
    /// Outcomes are yielded as they finish.
    Unordered,
}

/// Reorders `(index, value)` pairs into ascending index order.
///
/// Indices that never arrive are skipped once the inner iterator ends.
pub struct Resequencer<I, T> {
    inner: I,
    next: usize,
    buffer: BTreeMap<usize, T>,
    exhausted: bool,
}

impl<I, T> Resequencer<I, T>
where
    I: Iterator<Item = (usize, T)>,
{
    /// Wrap an unordered iterator whose indices start at zero.
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            next: 0,
            buffer: BTreeMap::new(),
            exhausted: false,
        }
    }
}

impl<I, T> Iterator for Resequencer<I, T>
where
    I: Iterator<Item = (usize, T)>,
{
    type Item = (usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.buffer.remove(&self.next) {
                self.next += 1;
                return Some((self.next - 1, value));
            }
            if self.exhausted {
                let (index, value) = self.buffer.pop_first()?;
                self.next = index + 1;
                return Some((index, value));
            }
            match self.inner.next() {
                Some((index, value)) if index == self.next => {
                    self.next += 1;
                    return Some((index, value));
                }
                Some((index, value)) => {
                    self.buffer.insert(index, value);
                }
                None => self.exhausted = true,
            }
        }
    }
}

type Outcomes<O> = Box<dyn Iterator<Item = (usize, TaskOutcome<O>)>>;

/// Outcomes of one `run_in_parallel` call.
///
/// Dropping the stream cancels whatever has not started yet.
pub struct TaskStream<O> {
    inner: Outcomes<O>,
    cancel: CancelToken,
}

impl<O> TaskStream<O> {
    /// Token that cancels the remaining tasks.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop scheduling tasks that have not started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<O> Iterator for TaskStream<O> {
    type Item = (usize, TaskOutcome<O>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<O> Drop for TaskStream<O> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How tasks are executed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ParallelConfig {
    /// On the calling thread, in order.
    #[default]
    Sequential,
    /// On a thread pool in this process.
    Local {
        /// Thread count; defaults to one per core.
        #[serde(default)]
        workers: Option<usize>,
    },
    /// Through a task channel, result channel and content cache.
    Distributed(DistributedConfig),
}

impl ParallelConfig {
    /// Check the configuration without starting anything.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Sequential => Ok(()),
            Self::Local { workers: Some(0) } => Err(ParallelError::InvalidConfig(
                "local mode needs at least one worker".into(),
            )),
            Self::Local { .. } => Ok(()),
            Self::Distributed(config) => config.validate(),
        }
    }
}

/// Runs a list of tasks sequentially, on a local pool, or distributed.
pub enum Executor {
    /// On the calling thread.
    Sequential,
    /// On a local thread pool.
    Local(LocalPool),
    /// Through a broker or a remote manager.
    Distributed(DistributedPool),
}

impl Executor {
    /// Build the executor a configuration describes.
    ///
    /// `registry` lists the tasks distributed workers of this process may
    /// run; other modes ignore it.
    pub fn from_config(config: &ParallelConfig, registry: Arc<FunctionRegistry>) -> Result<Self> {
        config.validate()?;
        Ok(match config {
            ParallelConfig::Sequential => Self::Sequential,
            ParallelConfig::Local { workers } => Self::Local(LocalPool::new(*workers)?),
            ParallelConfig::Distributed(config) => {
                Self::Distributed(DistributedPool::start(config, registry)?)
            }
        })
    }

    /// Short name of the mode, for logs.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Local(_) => "local",
            Self::Distributed(_) => "distributed",
        }
    }

    /// Run `T` once per argument.
    ///
    /// Every argument yields exactly one outcome unless the stream is
    /// cancelled or dropped first. A failing or panicking task yields a
    /// [`TaskFailure`](crate::TaskFailure) for its index only.
    pub fn run_in_parallel<T: Task>(
        &self,
        shared: Arc<T::Shared>,
        args: Vec<T::Args>,
        order: ResultOrder,
    ) -> Result<TaskStream<T::Output>> {
        let cancel = CancelToken::new();
        let outcomes: Outcomes<T::Output> = match self {
            Self::Sequential => {
                let token = cancel.clone();
                Box::new(
                    args.into_iter()
                        .enumerate()
                        .take_while(move |_| !token.is_cancelled())
                        .map(move |(index, arg)| (index, run_local::<T>(&shared, arg))),
                )
            }
            Self::Local(pool) => Box::new(pool.run::<T>(shared, args, cancel.clone())),
            Self::Distributed(pool) => Box::new(pool.run::<T>(&shared, args, cancel.clone())?),
        };
        let inner: Outcomes<T::Output> = match order {
            ResultOrder::Submission => Box::new(Resequencer::new(outcomes)),
            ResultOrder::Unordered => outcomes,
        };
        Ok(TaskStream { inner, cancel })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => f.write_str("Executor::Sequential"),
            Self::Local(pool) => f.debug_tuple("Executor::Local").field(pool).finish(),
            Self::Distributed(pool) => f.debug_tuple("Executor::Distributed").field(pool).finish(),
        }
    }
}
