//! A single TCP connection with its own reader and writer threads.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use core_types::ConnectionId;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::frame::FrameError;
use crate::transport::{spawn_reader, spawn_writer};
use crate::NetworkError;

/// Receives every complete frame read from any connection
pub trait IncomingMessageHandler: Send + Sync {
    fn receive(&self, connection_id: &ConnectionId, payload: Vec<u8>);
}

/// Told when connections come and go
pub trait ConnectionStateListener: Send + Sync {
    fn connection_opened(&self, connection: Arc<TcpConnection>) -> Result<(), NetworkError>;
    fn connection_closed(&self, connection: &TcpConnection);
}

struct StreamHalves {
    reader: TcpStream,
    writer: TcpStream,
    outgoing: Receiver<Vec<u8>>,
    stop: Receiver<()>,
}

/// One open socket plus the queue of payloads waiting to be written
///
/// Lifecycle is created, then started (both loops running), then
/// destroyed. Destroying is idempotent and notifies the state listener once.
pub struct TcpConnection {
    id: ConnectionId,
    stream: TcpStream,
    outgoing: Sender<Vec<u8>>,
    stop: Sender<()>,
    shutdown: Arc<AtomicBool>,
    halves: Mutex<Option<StreamHalves>>,
    handler: Weak<dyn IncomingMessageHandler>,
    state_listener: Weak<dyn ConnectionStateListener>,
    max_frame_bytes: usize,
}

impl TcpConnection {
    /// Wraps a connected stream without starting its loops
    pub fn new(
        stream: TcpStream,
        id: ConnectionId,
        handler: Weak<dyn IncomingMessageHandler>,
        state_listener: Weak<dyn ConnectionStateListener>,
        max_frame_bytes: usize,
    ) -> Result<Arc<Self>, NetworkError> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        let (outgoing_tx, outgoing_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(1);

        Ok(Arc::new(Self {
            id,
            stream,
            outgoing: outgoing_tx,
            stop: stop_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            halves: Mutex::new(Some(StreamHalves {
                reader,
                writer,
                outgoing: outgoing_rx,
                stop: stop_rx,
            })),
            handler,
            state_listener,
            max_frame_bytes,
        }))
    }

    /// Starts the reader and writer loops; later calls do nothing
    pub fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        let Some(halves) = self.halves.lock().take() else {
            return Ok(());
        };

        let reader_id = self.id.clone();
        let handler = self.handler.clone();
        let reader_owner = Arc::downgrade(self);
        spawn_reader(
            format!("conn-reader-{}", self.id),
            halves.reader,
            self.max_frame_bytes,
            Arc::clone(&self.shutdown),
            move |payload| match handler.upgrade() {
                Some(handler) => handler.receive(&reader_id, payload),
                None => tracing::trace!("dropping frame for {reader_id}: no handler"),
            },
            move |err| {
                if let Some(connection) = reader_owner.upgrade() {
                    connection.fail("read", &err);
                }
            },
        )?;

        let writer_owner = Arc::downgrade(self);
        spawn_writer(
            format!("conn-writer-{}", self.id),
            halves.writer,
            halves.outgoing,
            halves.stop,
            Arc::clone(&self.shutdown),
            move |err| {
                if let Some(connection) = writer_owner.upgrade() {
                    connection.fail("write", &err);
                }
            },
        )?;

        tracing::debug!("connection {} started", self.id);
        Ok(())
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queues a payload for the writer loop
    ///
    /// A payload the peer would reject as too large fails here and leaves
    /// the connection open.
    pub fn enqueue(&self, payload: Vec<u8>) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed(self.id.clone()));
        }
        if payload.len() > self.max_frame_bytes {
            return Err(NetworkError::MessageTooLarge {
                id: self.id.clone(),
                size: payload.len(),
                max: self.max_frame_bytes,
            });
        }
        self.outgoing
            .send(payload)
            .map_err(|_| NetworkError::ConnectionClosed(self.id.clone()))
    }

    /// Closes the socket, stops both loops and unregisters the connection
    pub fn destroy(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stop.try_send(());
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            tracing::trace!("connection {} socket shutdown: {err}", self.id);
        }
        if let Some(listener) = self.state_listener.upgrade() {
            listener.connection_closed(self);
        }
        tracing::debug!("connection {} destroyed", self.id);
    }

    fn fail(&self, direction: &str, err: &FrameError) {
        if err.is_closed_by_peer() {
            tracing::debug!("connection {} closed by peer during {direction}: {err}", self.id);
        } else {
            tracing::warn!("connection {} {direction} failed: {err}", self.id);
        }
        self.destroy();
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
