//! Sessions: the unit of conversation between two peers.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use core_types::{ConnectionId, RequestIdentifier, SessionId};
use ipc::{ExecutionMode, ExecutionOutcome, ExecutionRequest, ExecutionResponse};
use parking_lot::Mutex;

use crate::context::{self, ExecutionContext};
use crate::coordinator::ExecutionCoordinator;
use crate::error::{ExecutionError, ResourceError};
use crate::pending::PendingResponses;
use crate::resolver::ResourceResolver;
use crate::serializer::{self, SerializationError, Serializer};
use crate::task::{RemoteCallable, RemoteTask, TaskFailure, TaskOutcome, TaskPayload};

/// Where a session is in its release lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseState {
    Active,
    /// Release was requested while remote requests were still running
    PendingRelease,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseDecision {
    Now,
    Deferred,
    AlreadyReleased,
}

/// Release state and the count of running remote requests, changed together
#[derive(Debug)]
struct ReleaseGate {
    state: ReleaseState,
    active_remote: usize,
}

impl ReleaseGate {
    fn new() -> Self {
        Self {
            state: ReleaseState::Active,
            active_remote: 0,
        }
    }

    fn enter(&mut self) {
        self.active_remote += 1;
    }

    /// Returns true when this exit completes a deferred release
    fn exit(&mut self) -> bool {
        self.active_remote = self.active_remote.saturating_sub(1);
        if self.active_remote == 0 && self.state == ReleaseState::PendingRelease {
            self.state = ReleaseState::Released;
            return true;
        }
        false
    }

    fn request_release(&mut self) -> ReleaseDecision {
        match self.state {
            ReleaseState::Released => ReleaseDecision::AlreadyReleased,
            _ if self.active_remote > 0 => {
                self.state = ReleaseState::PendingRelease;
                ReleaseDecision::Deferred
            }
            _ => {
                self.state = ReleaseState::Released;
                ReleaseDecision::Now
            }
        }
    }
}

/// Marks one remote request as running in a session for its lifetime
struct RemoteActivity<'a> {
    session: &'a Session,
}

impl<'a> RemoteActivity<'a> {
    fn enter(session: &'a Session) -> Self {
        session.gate.lock().enter();
        Self { session }
    }
}

impl Drop for RemoteActivity<'_> {
    fn drop(&mut self) {
        let completes_release = self.session.gate.lock().exit();
        if completes_release {
            self.session.finish_release();
        }
    }
}

/// Executes tasks on peers and runs the tasks peers send here
///
/// Both ends of a conversation hold a session with the same id. A session
/// is created on first use by either side and lives until released.
pub struct Session {
    id: SessionId,
    coordinator: Weak<ExecutionCoordinator>,
    serializer: Arc<dyn Serializer>,
    resolver: ResourceResolver,
    pending: PendingResponses<RequestIdentifier, ExecutionResponse>,
    gate: Mutex<ReleaseGate>,
    execution_timeout: Duration,
}

impl Session {
    /// Creates a session owned by `coordinator`; does not register it
    pub fn new(id: SessionId, coordinator: &Arc<ExecutionCoordinator>) -> Self {
        Self::attached(
            id,
            Arc::downgrade(coordinator),
            Arc::clone(coordinator.serializer()),
            coordinator.config().execution_timeout,
            coordinator.config().resource_timeout,
        )
    }

    pub(crate) fn attached(
        id: SessionId,
        coordinator: Weak<ExecutionCoordinator>,
        serializer: Arc<dyn Serializer>,
        execution_timeout: Duration,
        resource_timeout: Duration,
    ) -> Self {
        Self {
            id,
            resolver: ResourceResolver::new(id, coordinator.clone(), resource_timeout),
            coordinator,
            serializer,
            pending: PendingResponses::new(),
            gate: Mutex::new(ReleaseGate::new()),
            execution_timeout,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn coordinator(&self) -> Option<Arc<ExecutionCoordinator>> {
        self.coordinator.upgrade()
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    pub fn release_state(&self) -> ReleaseState {
        self.gate.lock().state
    }

    /// Number of remote requests currently running in this session
    pub fn active_remote_requests(&self) -> usize {
        self.gate.lock().active_remote
    }

    /// Number of local calls waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Runs a void task on the peer behind `connection`
    ///
    /// In [`ExecutionMode::ReturnResponse`] mode this blocks until the peer
    /// reports the outcome or the execution timeout expires.
    pub fn execute<T: RemoteTask>(
        &self,
        connection: &ConnectionId,
        mode: ExecutionMode,
        task: T,
    ) -> Result<(), ExecutionError> {
        let payload = TaskPayload::for_task(&task)?;
        let Some(response) = self.submit(connection, mode, payload)? else {
            return Ok(());
        };
        match response.outcome {
            ExecutionOutcome::VoidReturned => Ok(()),
            ExecutionOutcome::ValueReturned => {
                let detail = format!("peer returned a value for void task {}", T::NAME);
                tracing::error!("session {} on {connection}: {detail}", self.id);
                Err(ExecutionError::ProtocolViolation(detail))
            }
            ExecutionOutcome::Failure => Err(self.remote_failure(connection, &response)),
        }
    }

    /// Runs a value-returning task on the peer behind `connection`
    ///
    /// Returns `None` in fire-and-forget mode and when the task's value was void.
    pub fn call<C: RemoteCallable>(
        &self,
        connection: &ConnectionId,
        mode: ExecutionMode,
        callable: C,
    ) -> Result<Option<C::Output>, ExecutionError> {
        let payload = TaskPayload::for_callable(&callable)?;
        let Some(response) = self.submit(connection, mode, payload)? else {
            return Ok(None);
        };
        match response.outcome {
            ExecutionOutcome::VoidReturned => Ok(None),
            ExecutionOutcome::ValueReturned => {
                let value =
                    serializer::decode(self.serializer.as_ref(), &response.serialized_return)?;
                Ok(Some(value))
            }
            ExecutionOutcome::Failure => Err(self.remote_failure(connection, &response)),
        }
    }

    pub fn execute_sync<T: RemoteTask>(
        &self,
        connection: &ConnectionId,
        task: T,
    ) -> Result<(), ExecutionError> {
        self.execute(connection, ExecutionMode::ReturnResponse, task)
    }

    pub fn call_sync<C: RemoteCallable>(
        &self,
        connection: &ConnectionId,
        callable: C,
    ) -> Result<Option<C::Output>, ExecutionError> {
        self.call(connection, ExecutionMode::ReturnResponse, callable)
    }

    /// Releases the session and drops it from the coordinator
    ///
    /// While remote requests are running in this session the release is
    /// deferred until the last of them finishes.
    pub fn release(&self) {
        let from_remote_request = context::current_session_id() == Some(self.id);
        let decision = self.gate.lock().request_release();
        match decision {
            ReleaseDecision::Now => self.finish_release(),
            ReleaseDecision::Deferred => tracing::debug!(
                "release of {} deferred until remote requests finish (requested remotely: {from_remote_request})",
                self.id
            ),
            ReleaseDecision::AlreadyReleased => {}
        }
    }

    /// Loads a resource on behalf of the task running on this thread
    ///
    /// Outside a remote request of this session only local resources are found.
    pub fn load_resource(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        let connection = context::current()
            .filter(|ctx| ctx.session_id() == self.id)
            .map(|ctx| ctx.connection_id().clone());
        self.resolver.resolve(name, connection.as_ref())
    }

    fn submit(
        &self,
        connection: &ConnectionId,
        mode: ExecutionMode,
        payload: TaskPayload,
    ) -> Result<Option<ExecutionResponse>, ExecutionError> {
        let coordinator = self
            .coordinator
            .upgrade()
            .ok_or(ExecutionError::CoordinatorShutDown)?;

        let request_identifier = RequestIdentifier::new(self.id)
            .with_label(format!("Execution request for {}", payload.task));
        let request = ExecutionRequest {
            serialized_task: serializer::encode(self.serializer.as_ref(), &payload)?,
            serialization_format: self.serializer.format(),
            execution_mode: mode,
            request_identifier: request_identifier.clone(),
        };

        match mode {
            ExecutionMode::FireAndForget => {
                coordinator.send(connection, &request)?;
                Ok(None)
            }
            ExecutionMode::ReturnResponse => {
                let pending = self.pending.register(request_identifier.clone())?;
                coordinator.send(connection, &request)?;
                let response = pending.wait(self.execution_timeout).ok_or_else(|| {
                    ExecutionError::Timeout {
                        request: request_identifier,
                        timeout: self.execution_timeout,
                    }
                })?;
                if response.serialization_format != self.serializer.format() {
                    return Err(ExecutionError::UnsupportedFormat(
                        response.serialization_format,
                    ));
                }
                Ok(Some(response))
            }
        }
    }

    fn remote_failure(&self, connection: &ConnectionId, response: &ExecutionResponse) -> ExecutionError {
        match serializer::decode::<TaskFailure>(self.serializer.as_ref(), &response.serialized_return) {
            Ok(failure) => ExecutionError::RemoteFailure {
                connection: connection.clone(),
                request: response.request_identifier.clone(),
                source: failure,
            },
            Err(err) => err.into(),
        }
    }

    /// Runs a task sent by the peer behind `connection` and answers if asked to
    pub(crate) fn receive_execution_request(
        self: &Arc<Self>,
        connection: &ConnectionId,
        request: ExecutionRequest,
    ) {
        let _activity = RemoteActivity::enter(self);
        let outcome = self.run_request(connection, &request);

        if request.execution_mode == ExecutionMode::FireAndForget {
            if let TaskOutcome::Failure(failure) = &outcome {
                tracing::debug!(
                    "fire-and-forget request {} failed: {failure}",
                    request.request_identifier
                );
            }
            return;
        }

        let request_identifier = request.request_identifier;
        let result = self
            .response_for(outcome, request_identifier.clone())
            .map_err(ExecutionError::from)
            .and_then(|response| {
                let coordinator = self
                    .coordinator
                    .upgrade()
                    .ok_or(ExecutionError::CoordinatorShutDown)?;
                coordinator.send(connection, &response)
            });
        if let Err(err) = result {
            tracing::error!(
                "failed to send execution response for {request_identifier} to {connection}: {err}"
            );
        }
    }

    pub(crate) fn receive_execution_response(&self, response: ExecutionResponse) {
        let request = response.request_identifier.clone();
        if !self.pending.complete(&request, response) {
            tracing::debug!("discarding execution response for {request}: nothing pending");
        }
    }

    fn run_request(self: &Arc<Self>, connection: &ConnectionId, request: &ExecutionRequest) -> TaskOutcome {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return TaskOutcome::Failure(TaskFailure::from_error(
                &ExecutionError::CoordinatorShutDown,
            ));
        };
        if request.serialization_format != self.serializer.format() {
            return TaskOutcome::Failure(TaskFailure::from_error(
                &ExecutionError::UnsupportedFormat(request.serialization_format),
            ));
        }
        let payload: TaskPayload =
            match serializer::decode(self.serializer.as_ref(), &request.serialized_task) {
                Ok(payload) => payload,
                Err(err) => return TaskOutcome::Failure(TaskFailure::from_error(&err)),
            };

        let ctx = ExecutionContext::new(Arc::clone(self), connection.clone());
        let _published = context::enter(ctx.clone());
        tracing::trace!("running {} for {}", payload.task, request.request_identifier);
        coordinator.tasks().run(payload, &ctx)
    }

    fn response_for(
        &self,
        outcome: TaskOutcome,
        request_identifier: RequestIdentifier,
    ) -> Result<ExecutionResponse, SerializationError> {
        let serializer = self.serializer.as_ref();
        let (outcome, serialized_return) = match outcome {
            TaskOutcome::Void => (
                ExecutionOutcome::VoidReturned,
                serializer.serialize(&serde_json::Value::Null)?,
            ),
            TaskOutcome::Value(value) => {
                (ExecutionOutcome::ValueReturned, serializer.serialize(&value)?)
            }
            TaskOutcome::Failure(failure) => (
                ExecutionOutcome::Failure,
                serializer::encode(serializer, &failure)?,
            ),
        };
        Ok(ExecutionResponse {
            outcome,
            serialized_return,
            serialization_format: serializer.format(),
            request_identifier,
        })
    }

    fn finish_release(&self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.forget_session(self);
        }
        tracing::debug!("released {}", self.id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("release_state", &self.release_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoordinatorConfig;

    #[test]
    fn test_gate_releases_immediately_when_idle() {
        let mut gate = ReleaseGate::new();
        assert_eq!(gate.request_release(), ReleaseDecision::Now);
        assert_eq!(gate.state, ReleaseState::Released);
        assert_eq!(gate.request_release(), ReleaseDecision::AlreadyReleased);
    }

    #[test]
    fn test_gate_defers_until_last_exit() {
        let mut gate = ReleaseGate::new();
        gate.enter();
        gate.enter();
        assert_eq!(gate.request_release(), ReleaseDecision::Deferred);
        assert_eq!(gate.state, ReleaseState::PendingRelease);
        assert!(!gate.exit());
        assert!(gate.exit());
        assert_eq!(gate.state, ReleaseState::Released);
    }

    #[test]
    fn test_gate_exit_without_release_keeps_session() {
        let mut gate = ReleaseGate::new();
        gate.enter();
        assert!(!gate.exit());
        assert_eq!(gate.state, ReleaseState::Active);
    }

    #[test]
    fn test_release_without_remote_activity_removes_session() {
        let coordinator = ExecutionCoordinator::new(CoordinatorConfig::default());
        let session = coordinator.new_session();
        assert!(coordinator.has_session(session.id()));

        session.release();
        assert_eq!(session.release_state(), ReleaseState::Released);
        assert!(!coordinator.has_session(session.id()));
    }

    #[test]
    fn test_release_waits_for_remote_activity() {
        let coordinator = ExecutionCoordinator::new(CoordinatorConfig::default());
        let session = coordinator.new_session();

        let activity = RemoteActivity::enter(&session);
        assert_eq!(session.active_remote_requests(), 1);
        session.release();
        assert_eq!(session.release_state(), ReleaseState::PendingRelease);
        assert!(coordinator.has_session(session.id()));

        drop(activity);
        assert_eq!(session.release_state(), ReleaseState::Released);
        assert!(!coordinator.has_session(session.id()));
    }

    #[test]
    fn test_local_resource_lookup_without_context() {
        let coordinator = ExecutionCoordinator::new(CoordinatorConfig::default());
        let session = coordinator.new_session();
        assert!(matches!(
            session.load_resource("nowhere.txt"),
            Err(ResourceError::NotFound(_))
        ));
    }
}
