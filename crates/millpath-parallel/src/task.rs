//! Task definitions and the function registry.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A unit of work that can run on any worker.
///
/// `Shared` is the large input common to every task of a job (the surface
/// model); it travels once per job. `Args` is the small per-task input.
pub trait Task: Send + Sync + 'static {
    /// Function id used to find the task on remote workers.
    const NAME: &'static str;
    /// Input shared by every task of a job.
    type Shared: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Per-task input.
    type Args: Serialize + DeserializeOwned + Send + 'static;
    /// Per-task result.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Evaluate one task.
    fn run(shared: &Self::Shared, args: Self::Args) -> Result<Self::Output, TaskFailure>;
}

/// Failure of a single task, attached to its argument index.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskFailure {
    /// Human readable reason.
    pub message: String,
}

impl TaskFailure {
    /// Failure with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self::new(format!("task panicked: {message}"))
    }
}

/// Outcome of one task.
pub type TaskOutcome<T> = std::result::Result<T, TaskFailure>;

/// Run a task in-process, turning a panic into a failure.
pub(crate) fn run_local<T: Task>(shared: &T::Shared, args: T::Args) -> TaskOutcome<T::Output> {
    catch_unwind(AssertUnwindSafe(|| T::run(shared, args))).unwrap_or_else(|p| Err(TaskFailure::from_panic(p)))
}

pub(crate) type SharedInput = Arc<dyn Any + Send + Sync>;
pub(crate) type DecodeFn = fn(&[u8]) -> TaskOutcome<SharedInput>;
pub(crate) type RunFn = fn(&(dyn Any + Send + Sync), serde_json::Value) -> TaskOutcome<serde_json::Value>;

/// Type-erased entry points of a registered task.
#[derive(Clone, Copy)]
pub(crate) struct RegisteredTask {
    pub decode: DecodeFn,
    pub run: RunFn,
}

/// Maps function ids to task implementations on the worker side.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    entries: HashMap<String, RegisteredTask>,
}

impl FunctionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under [`Task::NAME`].
    pub fn register<T: Task>(&mut self) -> &mut Self {
        self.entries.insert(
            T::NAME.to_string(),
            RegisteredTask {
                decode: decode_shared::<T>,
                run: run_erased::<T>,
            },
        );
        self
    }

    /// True if a task with this id is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered function ids, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn get(&self, name: &str) -> Option<RegisteredTask> {
        self.entries.get(name).copied()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

fn decode_shared<T: Task>(bytes: &[u8]) -> TaskOutcome<SharedInput> {
    let shared: T::Shared = serde_json::from_slice(bytes)
        .map_err(|e| TaskFailure::new(format!("cannot decode shared input for {}: {e}", T::NAME)))?;
    Ok(Arc::new(shared))
}

fn run_erased<T: Task>(
    shared: &(dyn Any + Send + Sync),
    args: serde_json::Value,
) -> TaskOutcome<serde_json::Value> {
    let shared = shared
        .downcast_ref::<T::Shared>()
        .ok_or_else(|| TaskFailure::new(format!("shared input type mismatch for {}", T::NAME)))?;
    let args: T::Args = serde_json::from_value(args)
        .map_err(|e| TaskFailure::new(format!("cannot decode arguments for {}: {e}", T::NAME)))?;
    let output = run_local::<T>(shared, args)?;
    serde_json::to_value(output).map_err(|e| TaskFailure::new(format!("cannot encode result: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Squares its argument; fails on 13 to exercise per-task failures.
    pub struct Square;

    impl Task for Square {
        const NAME: &'static str = "test.square";
        type Shared = Vec<u8>;
        type Args = u64;
        type Output = u64;

        fn run(_payload: &Vec<u8>, x: u64) -> Result<u64, TaskFailure> {
            if x == 13 {
                return Err(TaskFailure::new("unlucky"));
            }
            Ok(x * x)
        }
    }

    /// Panics on every call.
    pub struct Explode;

    impl Task for Explode {
        const NAME: &'static str = "test.explode";
        type Shared = ();
        type Args = u32;
        type Output = u32;

        fn run(_: &(), _: u32) -> Result<u32, TaskFailure> {
            panic!("boom")
        }
    }

    pub fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register::<Square>().register::<Explode>();
        registry
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["test.explode", "test.square"]);
        let entry = registry.get(Square::NAME).unwrap();
        let payload = serde_json::to_vec(&vec![1u8, 2, 3]).unwrap();
        let shared = (entry.decode)(&payload).unwrap();
        let out = (entry.run)(shared.as_ref(), serde_json::json!(7)).unwrap();
        assert_eq!(out, serde_json::json!(49));
    }

    #[test]
    fn test_failures_are_values() {
        let registry = registry();
        let entry = registry.get(Square::NAME).unwrap();
        let shared = (entry.decode)(b"[]").unwrap();
        let err = (entry.run)(shared.as_ref(), serde_json::json!(13)).unwrap_err();
        assert_eq!(err.message, "unlucky");
        let err = (entry.run)(shared.as_ref(), serde_json::json!("x")).unwrap_err();
        assert!(err.message.contains("arguments"));

        let entry = registry.get(Explode::NAME).unwrap();
        let shared = (entry.decode)(b"null").unwrap();
        let err = (entry.run)(shared.as_ref(), serde_json::json!(1)).unwrap_err();
        assert!(err.message.contains("boom"));
    }
}
