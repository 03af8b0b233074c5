//! # Execution
//!
//! Ships tasks to peers, runs the tasks peers send here, and fetches the
//! named resources those tasks need from whoever sent them.
//!
//! ## Philosophy
//!
//! - **Sessions, not calls**: every request belongs to a session shared by
//!   both peers, and a session's resources and pending calls live with it
//! - **Failures are values**: a task's error travels back to the caller
//!   intact; framework problems are logged where they happen
//! - **Nobody waits forever**: every blocking wait has a timeout
//!
//! ## Key Types
//!
//! - [`ExecutionCoordinator`]: one per host; owns connections and sessions
//! - [`Session`]: executes tasks remotely and serves inbound ones
//! - [`RemoteTask`] / [`RemoteCallable`]: user tasks, registered in a [`TaskRegistry`]
//! - [`ExecutionContext`]: what a running task knows about its caller
//! - [`ResourceResolver`]: on-demand resource fetching per session

pub mod config;
pub mod context;
pub mod coordinator;
mod error;
mod handlers;
pub mod object_space;
mod pending;
pub mod pool;
pub mod resolver;
pub mod resources;
pub mod serializer;
pub mod session;
pub mod task;

pub use config::CoordinatorConfig;
pub use context::ExecutionContext;
pub use coordinator::{CoordinatorBuilder, ExecutionCoordinator};
pub use error::{ExecutionError, ResourceError};
pub use ipc::ExecutionMode;
pub use object_space::ObjectSpace;
pub use pool::WorkerPool;
pub use resolver::ResourceResolver;
pub use resources::{DirectoryResources, InMemoryResources, ResourceSource};
pub use serializer::{JsonSerializer, SerializationError, Serializer};
pub use session::{ReleaseState, Session};
pub use task::{RemoteCallable, RemoteTask, TaskFailure, TaskRegistry};
