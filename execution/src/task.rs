//! Tasks that can be shipped to a peer and run there.
//!
//! A task is a serde type with a stable name. Both peers register the same
//! task types in their [`TaskRegistry`]; the wire carries the name and the
//! serialized fields, and the receiving side rebuilds the value and runs it.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::error::{ExecutionError, ResourceError};
use crate::serializer::{from_value, to_value};

/// A task that returns nothing
pub trait RemoteTask: Serialize + DeserializeOwned + Send + 'static {
    /// Name both peers register the task under
    const NAME: &'static str;

    fn run(self, ctx: &ExecutionContext) -> Result<(), TaskFailure>;
}

/// A task that returns a value
///
/// A value that serializes to `null` is reported as a void outcome, so the
/// caller sees `None`.
pub trait RemoteCallable: Serialize + DeserializeOwned + Send + 'static {
    /// Name both peers register the callable under
    const NAME: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn call(self, ctx: &ExecutionContext) -> Result<Self::Output, TaskFailure>;
}

/// Why a task did not complete, in a form that can cross the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
    pub causes: Vec<String>,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind("TaskFailure", message)
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Captures an error and its source chain
    pub fn from_error<E: StdError>(err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: short_type_name::<E>().to_string(),
            message: err.to_string(),
            causes,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "task panicked".to_string()
        };
        Self::with_kind("Panic", message)
    }
}

impl From<ResourceError> for TaskFailure {
    fn from(err: ResourceError) -> Self {
        Self::from_error(&err)
    }
}

impl From<ExecutionError> for TaskFailure {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::RemoteFailure { source, .. } => source,
            other => Self::from_error(&other),
        }
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskShape {
    Void,
    Value,
}

/// What actually travels inside an execution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task: String,
    pub shape: TaskShape,
    pub body: Value,
}

impl TaskPayload {
    pub fn for_task<T: RemoteTask>(task: &T) -> Result<Self, ExecutionError> {
        Ok(Self {
            task: T::NAME.to_string(),
            shape: TaskShape::Void,
            body: to_value(task)?,
        })
    }

    pub fn for_callable<C: RemoteCallable>(callable: &C) -> Result<Self, ExecutionError> {
        Ok(Self {
            task: C::NAME.to_string(),
            shape: TaskShape::Value,
            body: to_value(callable)?,
        })
    }
}

/// Result of running a task locally
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Void,
    Value(Value),
    Failure(TaskFailure),
}

type Runner = fn(Value, &ExecutionContext) -> TaskOutcome;

#[derive(Clone, Copy)]
struct TaskEntry {
    shape: TaskShape,
    run: Runner,
}

fn run_task<T: RemoteTask>(body: Value, ctx: &ExecutionContext) -> TaskOutcome {
    let task: T = match from_value(body) {
        Ok(task) => task,
        Err(err) => return TaskOutcome::Failure(TaskFailure::from_error(&err)),
    };
    match task.run(ctx) {
        Ok(()) => TaskOutcome::Void,
        Err(failure) => TaskOutcome::Failure(failure),
    }
}

fn run_callable<C: RemoteCallable>(body: Value, ctx: &ExecutionContext) -> TaskOutcome {
    let callable: C = match from_value(body) {
        Ok(callable) => callable,
        Err(err) => return TaskOutcome::Failure(TaskFailure::from_error(&err)),
    };
    let output = match callable.call(ctx) {
        Ok(output) => output,
        Err(failure) => return TaskOutcome::Failure(failure),
    };
    match to_value(&output) {
        Ok(Value::Null) => TaskOutcome::Void,
        Ok(value) => TaskOutcome::Value(value),
        Err(err) => TaskOutcome::Failure(TaskFailure::from_error(&err)),
    }
}

/// Task types this host knows how to run
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task<T: RemoteTask>(&self) {
        self.insert(T::NAME, TaskShape::Void, run_task::<T>);
    }

    pub fn register_callable<C: RemoteCallable>(&self) {
        self.insert(C::NAME, TaskShape::Value, run_callable::<C>);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn insert(&self, name: &str, shape: TaskShape, run: Runner) {
        let previous = self
            .entries
            .write()
            .insert(name.to_string(), TaskEntry { shape, run });
        if previous.is_some() {
            tracing::debug!("task {name} re-registered");
        }
    }

    /// Runs a received task; every failure, including a panic, becomes an outcome
    pub fn run(&self, payload: TaskPayload, ctx: &ExecutionContext) -> TaskOutcome {
        let entry = self.entries.read().get(&payload.task).copied();
        let Some(entry) = entry else {
            return TaskOutcome::Failure(TaskFailure::with_kind(
                "UnknownTask",
                format!("no task registered under name {}", payload.task),
            ));
        };
        if entry.shape != payload.shape {
            return TaskOutcome::Failure(TaskFailure::with_kind(
                "TaskShapeMismatch",
                format!(
                    "task {} is registered as {:?} but was sent as {:?}",
                    payload.task, entry.shape, payload.shape
                ),
            ));
        }

        panic::catch_unwind(AssertUnwindSafe(|| (entry.run)(payload.body, ctx)))
            .unwrap_or_else(|panic| TaskOutcome::Failure(TaskFailure::from_panic(panic)))
    }
}
