//! Registry of open connections and bound listeners.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Weak};

use core_types::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::connection::{ConnectionStateListener, IncomingMessageHandler, TcpConnection};
use crate::listener::Listener;
use crate::NetworkError;

/// Owns every connection and listener of one host
///
/// Lookups of existing connections never block on connection creation.
/// Creation is serialized so concurrent requests for the same identifier
/// result in exactly one socket.
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connections: DashMap<ConnectionId, Arc<TcpConnection>>,
    listeners: Mutex<HashMap<ConnectionId, Listener>>,
    create_lock: Mutex<()>,
    next_incoming_id: AtomicI32,
    handler: Weak<dyn IncomingMessageHandler>,
    max_frame_bytes: usize,
}

impl ConnectionRegistry {
    pub fn new(handler: Weak<dyn IncomingMessageHandler>, max_frame_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: DashMap::new(),
                listeners: Mutex::new(HashMap::new()),
                create_lock: Mutex::new(()),
                next_incoming_id: AtomicI32::new(0),
                handler,
                max_frame_bytes,
            }),
        }
    }

    /// Returns the connection for `id`, opening an outgoing one if needed
    ///
    /// Outgoing auxiliary ids must be positive and need the primary
    /// connection to the same address and port to be open already.
    pub fn get_connection(&self, id: &ConnectionId) -> Result<Arc<TcpConnection>, NetworkError> {
        if let Some(connection) = self.inner.lookup(id) {
            return Ok(connection);
        }

        let _guard = self.inner.create_lock.lock();
        if let Some(connection) = self.inner.lookup(id) {
            return Ok(connection);
        }
        self.inner.open_outgoing(id)
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.inner.connections.contains_key(id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Binds a listener and returns the address it actually bound
    pub fn bind_listener(&self, id: &ConnectionId) -> Result<SocketAddr, NetworkError> {
        let mut listeners = self.inner.listeners.lock();
        prune_stopped(&mut listeners);
        if listeners.contains_key(id) {
            return Err(NetworkError::ListenerAlreadyBound(id.clone()));
        }

        let registry = Arc::downgrade(&self.inner);
        let listener = Listener::bind(id.clone(), move |stream, peer| {
            if let Some(registry) = registry.upgrade() {
                registry.accept_incoming(stream, peer);
            }
        })?;
        let local_addr = listener.local_addr();
        listeners.insert(id.clone(), listener);
        Ok(local_addr)
    }

    pub fn unbind_listener(&self, id: &ConnectionId) -> Result<(), NetworkError> {
        let listener = self.inner.listeners.lock().remove(id);
        match listener {
            Some(mut listener) => {
                listener.stop();
                Ok(())
            }
            None => Err(NetworkError::ListenerNotBound(id.clone())),
        }
    }

    pub fn listener_ids(&self) -> Vec<ConnectionId> {
        let mut listeners = self.inner.listeners.lock();
        prune_stopped(&mut listeners);
        listeners.keys().cloned().collect()
    }

    pub fn listener_addr(&self, id: &ConnectionId) -> Option<SocketAddr> {
        let mut listeners = self.inner.listeners.lock();
        prune_stopped(&mut listeners);
        listeners.get(id).map(Listener::local_addr)
    }

    /// Stops every listener, then closes every connection
    pub fn destroy(&self) {
        let listeners: Vec<Listener> = self.inner.listeners.lock().drain().map(|(_, l)| l).collect();
        for mut listener in listeners {
            listener.stop();
        }

        let connections: Vec<Arc<TcpConnection>> = self
            .inner
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for connection in connections {
            connection.destroy();
        }
    }
}

/// Drops listeners whose accept loop has already exited
fn prune_stopped(listeners: &mut HashMap<ConnectionId, Listener>) {
    listeners.retain(|id, listener| {
        let running = listener.is_running();
        if !running {
            tracing::debug!("removing stopped listener {id}");
        }
        running
    });
}

impl RegistryInner {
    fn lookup(&self, id: &ConnectionId) -> Option<Arc<TcpConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn state_listener(self: &Arc<Self>) -> Weak<dyn ConnectionStateListener> {
        let weak: Weak<RegistryInner> = Arc::downgrade(self);
        weak
    }

    fn open_outgoing(self: &Arc<Self>, id: &ConnectionId) -> Result<Arc<TcpConnection>, NetworkError> {
        if id.is_listener_assigned() {
            return Err(NetworkError::NegativeAuxiliaryId(id.clone()));
        }
        if !id.is_primary() && !self.connections.contains_key(&id.primary()) {
            return Err(NetworkError::PrimaryConnectionDown(id.clone()));
        }

        let stream = TcpStream::connect((id.address.as_str(), id.port)).map_err(|source| {
            NetworkError::Connect {
                id: id.clone(),
                source,
            }
        })?;
        let connection = TcpConnection::new(
            stream,
            id.clone(),
            self.handler.clone(),
            self.state_listener(),
            self.max_frame_bytes,
        )?;
        self.activate(&connection)?;
        tracing::debug!("opened outgoing connection {id}");
        Ok(connection)
    }

    /// Names an accepted socket, falling back to a fresh negative auxiliary
    /// id when the peer's primary slot is taken
    fn incoming_id(&self, peer: SocketAddr) -> ConnectionId {
        let address = peer.ip().to_string();
        let primary = ConnectionId::new(address.clone(), peer.port());
        if !self.connections.contains_key(&primary) {
            return primary;
        }
        let auxiliary_id = self.next_incoming_id.fetch_sub(1, Ordering::AcqRel) - 1;
        ConnectionId::auxiliary(address, peer.port(), auxiliary_id)
    }

    fn accept_incoming(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let id = self.incoming_id(peer);

        let connection = match TcpConnection::new(
            stream,
            id.clone(),
            self.handler.clone(),
            self.state_listener(),
            self.max_frame_bytes,
        ) {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!("failed to set up incoming connection {id}: {err}");
                return;
            }
        };
        match self.activate(&connection) {
            Ok(()) => tracing::debug!("registered incoming connection {id}"),
            Err(err) => tracing::error!("rejected incoming connection {id}: {err}"),
        }
    }

    /// Registers and then starts a fresh connection, destroying it on failure
    fn activate(&self, connection: &Arc<TcpConnection>) -> Result<(), NetworkError> {
        let result = self
            .connection_opened(Arc::clone(connection))
            .and_then(|()| connection.start());
        if result.is_err() {
            connection.destroy();
        }
        result
    }
}

impl ConnectionStateListener for RegistryInner {
    fn connection_opened(&self, connection: Arc<TcpConnection>) -> Result<(), NetworkError> {
        let id = connection.id().clone();
        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => Err(NetworkError::DuplicateConnection(id)),
            Entry::Vacant(slot) => {
                slot.insert(connection);
                Ok(())
            }
        }
    }

    fn connection_closed(&self, connection: &TcpConnection) {
        let removed = self.connections.remove_if(connection.id(), |_, registered| {
            std::ptr::eq(Arc::as_ptr(registered), connection)
        });
        if removed.is_some() {
            tracing::debug!("unregistered connection {}", connection.id());
        }
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Discard;

    impl IncomingMessageHandler for Discard {
        fn receive(&self, _connection_id: &ConnectionId, _payload: Vec<u8>) {}
    }

    fn registry() -> ConnectionRegistry {
        let handler: Weak<dyn IncomingMessageHandler> = Weak::<Discard>::new();
        ConnectionRegistry::new(handler, 1024)
    }

    fn loopback_connection(registry: &ConnectionRegistry, id: ConnectionId) -> Arc<TcpConnection> {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        TcpConnection::new(
            stream,
            id,
            Weak::<Discard>::new(),
            registry.inner.state_listener(),
            1024,
        )
        .unwrap()
    }

    #[test]
    fn test_incoming_ids_decrement_on_collision() {
        let registry = registry();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(registry.inner.incoming_id(peer), ConnectionId::new("127.0.0.1", 40000));

        let taken = loopback_connection(&registry, ConnectionId::new("127.0.0.1", 40000));
        registry.inner.connection_opened(taken).unwrap();

        assert_eq!(
            registry.inner.incoming_id(peer),
            ConnectionId::auxiliary("127.0.0.1", 40000, -1)
        );
        assert_eq!(
            registry.inner.incoming_id(peer),
            ConnectionId::auxiliary("127.0.0.1", 40000, -2)
        );
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = registry();
        let id = ConnectionId::new("10.1.1.1", 9);
        let first = loopback_connection(&registry, id.clone());
        let second = loopback_connection(&registry, id.clone());

        registry.inner.connection_opened(Arc::clone(&first)).unwrap();
        assert!(matches!(
            registry.inner.connection_opened(Arc::clone(&second)),
            Err(NetworkError::DuplicateConnection(_))
        ));

        // Tearing down the rejected duplicate must not evict the live entry.
        second.destroy();
        assert!(registry.is_registered(&id));

        first.destroy();
        assert!(!registry.is_registered(&id));
    }

    #[test]
    fn test_listener_whose_loop_exited_can_be_rebound() {
        let registry = registry();
        let id = ConnectionId::new("127.0.0.1", 0);
        let dead = Listener::bind(id.clone(), |_, _| panic!("accept loop gives up")).unwrap();
        let _client = TcpStream::connect(dead.local_addr()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while dead.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!dead.is_running());
        registry.inner.listeners.lock().insert(id.clone(), dead);

        assert!(registry.listener_ids().is_empty());
        assert!(registry.listener_addr(&id).is_none());
        assert!(registry.bind_listener(&id).is_ok());
        assert_eq!(registry.listener_ids(), vec![id]);
    }
}
