//! The session and connection a task is running on behalf of.
//!
//! Tasks receive an [`ExecutionContext`] explicitly. The same context is
//! also published for the current thread while the task runs, for code
//! that cannot have it passed in.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use core_types::{ConnectionId, SessionId};

use crate::error::ResourceError;
use crate::session::Session;

#[derive(Clone)]
pub struct ExecutionContext {
    session: Arc<Session>,
    connection_id: ConnectionId,
}

impl ExecutionContext {
    pub fn new(session: Arc<Session>, connection_id: ConnectionId) -> Self {
        Self {
            session,
            connection_id,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// The connection the running request arrived on
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Resolves a named resource, asking the requesting peer if needed
    pub fn resource(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        self.session
            .resolver()
            .resolve(name, Some(&self.connection_id))
    }

    /// Releases the session once every remote request in it has finished
    pub fn release_session(&self) {
        self.session.release();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session", &self.session.id())
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<ExecutionContext>> = const { RefCell::new(None) };
}

/// Restores the previous thread context when dropped
pub(crate) struct ContextGuard {
    previous: Option<ExecutionContext>,
}

/// Publishes `ctx` for the current thread until the guard is dropped
pub(crate) fn enter(ctx: ExecutionContext) -> ContextGuard {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(ctx));
    ContextGuard { previous }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

pub fn current() -> Option<ExecutionContext> {
    CURRENT.with(|current| current.borrow().clone())
}

pub fn current_session() -> Option<Arc<Session>> {
    CURRENT.with(|current| current.borrow().as_ref().map(|ctx| Arc::clone(&ctx.session)))
}

pub fn current_session_id() -> Option<SessionId> {
    CURRENT.with(|current| current.borrow().as_ref().map(ExecutionContext::session_id))
}

pub fn current_connection_id() -> Option<ConnectionId> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|ctx| ctx.connection_id.clone())
    })
}

pub fn has_current_session() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}
