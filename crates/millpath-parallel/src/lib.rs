#![warn(missing_docs)]

//! Task execution for millpath: sequential, on a local thread pool, or
//! distributed over a task channel, a result channel and a content cache.
//!
//! Generators describe work as a [`Task`] with a large shared input and a
//! list of small arguments, then call [`Executor::run_in_parallel`]. Each
//! argument yields exactly one outcome; a failing task yields a
//! [`TaskFailure`] for its index without affecting the others.
//!
//! In distributed mode the shared input is serialized once per job and
//! stored in the content cache under its SHA-1; workers fetch and decode
//! it at most once per supervisor.
//!
//! ```
//! use std::sync::Arc;
//! use millpath_parallel::{Executor, ResultOrder, Task, TaskFailure};
//!
//! struct Scale;
//!
//! impl Task for Scale {
//!     const NAME: &'static str = "doc.scale";
//!     type Shared = f64;
//!     type Args = f64;
//!     type Output = f64;
//!
//!     fn run(factor: &f64, x: f64) -> Result<f64, TaskFailure> {
//!         Ok(factor * x)
//!     }
//! }
//!
//! let out: Vec<f64> = Executor::Sequential
//!     .run_in_parallel::<Scale>(Arc::new(2.0), vec![1.0, 2.0], ResultOrder::Submission)
//!     .unwrap()
//!     .map(|(_, outcome)| outcome.unwrap())
//!     .collect();
//! assert_eq!(out, vec![2.0, 4.0]);
//! ```

mod broker;
mod channel;
mod distributed;
mod error;
mod executor;
mod local;
mod protocol;
mod remote;
mod task;
mod worker;

pub use broker::{Broker, BrokerStats};
pub use channel::{Channels, ContentCache, ResultChannel, TaskChannel};
pub use distributed::{DistributedConfig, DistributedPool, ManagerConfig};
pub use error::{ParallelError, Result};
pub use executor::{CancelToken, Executor, ParallelConfig, Resequencer, ResultOrder, TaskStream};
pub use local::LocalPool;
pub use protocol::{CacheKey, Frame, JobId, Reply, ResultEnvelope, TaskEnvelope};
pub use remote::{Manager, RemoteChannels};
pub use task::{FunctionRegistry, Task, TaskFailure, TaskOutcome};
pub use worker::{Supervisor, SupervisorStats};
