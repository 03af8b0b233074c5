//! Accepts inbound TCP connections on one local endpoint.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_types::ConnectionId;

use crate::NetworkError;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A bound server socket with a dedicated accept thread
///
/// Dropping the listener stops it.
pub struct Listener {
    id: ConnectionId,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Listener {
    /// Binds `id` and starts handing accepted sockets to `on_accept`
    pub fn bind<F>(id: ConnectionId, on_accept: F) -> Result<Self, NetworkError>
    where
        F: FnMut(TcpStream, SocketAddr) + Send + 'static,
    {
        let bind_error = |source: io::Error| NetworkError::Bind {
            id: id.clone(),
            source,
        };
        let listener = TcpListener::bind((id.address.as_str(), id.port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let loop_id = id.clone();
        let join = thread::Builder::new()
            .name(format!("listener-{id}"))
            .spawn(move || run_accept_loop(loop_id, listener, loop_stop, on_accept))
            .map_err(bind_error)?;

        tracing::debug!("listener {id} bound to {local_addr}");
        Ok(Self {
            id,
            local_addr,
            stop,
            join: Some(join),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The address actually bound, which differs from the id when port 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// False once the accept thread has exited, whether stopped or failed
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stops accepting and waits for the accept thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let Some(join) = self.join.take() else {
            return;
        };
        if join.thread().id() == thread::current().id() {
            return;
        }
        if join.join().is_err() {
            tracing::warn!("listener {} accept thread panicked", self.id);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_accept_loop<F>(id: ConnectionId, listener: TcpListener, stop: Arc<AtomicBool>, mut on_accept: F)
where
    F: FnMut(TcpStream, SocketAddr),
{
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    tracing::warn!("listener {id} could not configure socket from {peer}: {err}");
                    continue;
                }
                tracing::debug!("listener {id} accepted {peer}");
                on_accept(stream, peer);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                if !stop.load(Ordering::Acquire) {
                    tracing::warn!("listener {id} accept failed, stopping: {err}");
                }
                break;
            }
        }
    }
    tracing::debug!("listener {id} stopped");
}
