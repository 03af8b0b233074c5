//! The per-host hub tying connections, sessions and dispatch together.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use core_types::{ConnectionId, RequestId, SessionId};
use dashmap::DashMap;
use ipc::{MasterCodec, Ping, Pong, WireMessage};
use network::{ConnectionRegistry, IncomingMessageHandler};

use crate::config::CoordinatorConfig;
use crate::handlers;
use crate::pending::PendingResponses;
use crate::pool::WorkerPool;
use crate::resources::{InMemoryResources, ResourceSource};
use crate::serializer::{JsonSerializer, Serializer};
use crate::session::Session;
use crate::task::TaskRegistry;
use crate::ExecutionError;

/// Builds an [`ExecutionCoordinator`] with non-default collaborators
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    resources: Option<Arc<dyn ResourceSource>>,
    serializer: Option<Arc<dyn Serializer>>,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Local resources offered to tasks and to peers
    pub fn resources(mut self, resources: Arc<dyn ResourceSource>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn build(self) -> Arc<ExecutionCoordinator> {
        let resources = self
            .resources
            .unwrap_or_else(|| Arc::new(InMemoryResources::new()));
        let serializer = self
            .serializer
            .unwrap_or_else(|| Arc::new(JsonSerializer));
        let config = self.config;

        Arc::new_cyclic(|this: &Weak<ExecutionCoordinator>| {
            let handler: Weak<dyn IncomingMessageHandler> = this.clone();
            ExecutionCoordinator {
                connections: ConnectionRegistry::new(handler, config.max_frame_bytes),
                sessions: DashMap::new(),
                codec: MasterCodec::default(),
                pool: WorkerPool::new("dispatch", config.worker_keep_alive),
                tasks: TaskRegistry::new(),
                pongs: PendingResponses::new(),
                resources,
                serializer,
                config,
                this: this.clone(),
            }
        })
    }
}

/// Owns the connections, sessions and task registry of one host
///
/// Inbound frames are decoded and dispatched on a worker pool so handlers
/// may block, for example on a resource fetched from the same peer.
pub struct ExecutionCoordinator {
    config: CoordinatorConfig,
    connections: ConnectionRegistry,
    sessions: DashMap<SessionId, Arc<Session>>,
    codec: MasterCodec,
    pool: WorkerPool,
    tasks: TaskRegistry,
    pongs: PendingResponses<RequestId, Pong>,
    resources: Arc<dyn ResourceSource>,
    serializer: Arc<dyn Serializer>,
    this: Weak<ExecutionCoordinator>,
}

impl ExecutionCoordinator {
    pub fn new(config: CoordinatorConfig) -> Arc<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn resources(&self) -> &Arc<dyn ResourceSource> {
        &self.resources
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Returns the session with `id`, creating and registering it if needed
    ///
    /// Concurrent callers for the same id all receive the same session.
    pub fn session(&self, id: SessionId) -> Arc<Session> {
        if let Some(session) = self.sessions.get(&id) {
            return Arc::clone(session.value());
        }
        let session = self.sessions.entry(id).or_insert_with(|| {
            tracing::debug!("creating {id}");
            Arc::new(Session::attached(
                id,
                self.this.clone(),
                Arc::clone(&self.serializer),
                self.config.execution_timeout,
                self.config.resource_timeout,
            ))
        });
        Arc::clone(session.value())
    }

    /// Creates a session with a fresh random id
    pub fn new_session(&self) -> Arc<Session> {
        self.session(SessionId::new())
    }

    pub fn remove_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Removes `session` only if it is still the one registered under its id
    pub(crate) fn forget_session(&self, session: &Session) {
        self.sessions.remove_if(&session.id(), |_, registered| {
            std::ptr::eq(Arc::as_ptr(registered), session)
        });
    }

    pub fn has_session(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Starts accepting connections; returns the address actually bound
    pub fn bind_listener(&self, id: &ConnectionId) -> Result<SocketAddr, ExecutionError> {
        Ok(self.connections.bind_listener(id)?)
    }

    pub fn unbind_listener(&self, id: &ConnectionId) -> Result<(), ExecutionError> {
        Ok(self.connections.unbind_listener(id)?)
    }

    pub fn listener_ids(&self) -> Vec<ConnectionId> {
        self.connections.listener_ids()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.connection_ids()
    }

    /// Encodes `message` and queues it on the connection for `connection`
    pub fn send<T: WireMessage>(
        &self,
        connection: &ConnectionId,
        message: &T,
    ) -> Result<(), ExecutionError> {
        let bytes = self.codec.encode(message)?;
        self.connections.get_connection(connection)?.enqueue(bytes)?;
        Ok(())
    }

    /// Sends a ping and waits for the matching pong
    pub fn ping(
        &self,
        connection: &ConnectionId,
        message: impl Into<String>,
        timeout: Duration,
    ) -> Result<Pong, ExecutionError> {
        let ping = Ping::new(message);
        let pending = self.pongs.register(ping.request_id)?;
        self.send(connection, &ping)?;
        pending.wait(timeout).ok_or_else(|| ExecutionError::PingTimeout {
            connection: connection.clone(),
            timeout,
        })
    }

    pub(crate) fn complete_ping(&self, pong: Pong) {
        let request_id = pong.request_id;
        if !self.pongs.complete(&request_id, pong) {
            tracing::debug!("unsolicited pong for {request_id}");
        }
    }

    /// Stops listeners, closes connections and forgets every session
    pub fn destroy(&self) {
        self.connections.destroy();
        self.pool.shutdown();
        self.sessions.clear();
    }

    fn process(self: &Arc<Self>, connection: &ConnectionId, payload: Vec<u8>) {
        let size = payload.len();
        let result = self
            .codec
            .decode(&payload)
            .map_err(ExecutionError::from)
            .and_then(|message| {
                tracing::trace!("dispatching {} from {connection}", message.kind());
                handlers::dispatch(self, connection, message)
            });
        if let Err(err) = result {
            tracing::warn!("failed to process {size} byte message from {connection}: {err}");
        }
    }
}

impl IncomingMessageHandler for ExecutionCoordinator {
    fn receive(&self, connection_id: &ConnectionId, payload: Vec<u8>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let connection = connection_id.clone();
        if let Err(err) = self.pool.submit(move || this.process(&connection, payload)) {
            tracing::debug!("dropping message from {connection_id}: {err}");
        }
    }
}
