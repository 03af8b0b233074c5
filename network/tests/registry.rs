//! Connection registry behaviour over loopback TCP

use std::sync::{Arc, Barrier, Weak};
use std::thread;
use std::time::{Duration, Instant};

use core_types::ConnectionId;
use crossbeam::channel::{unbounded, Receiver, Sender};
use network::{ConnectionRegistry, IncomingMessageHandler, NetworkError};

const WAIT: Duration = Duration::from_secs(5);
const MAX_FRAME: usize = 1024 * 1024;

struct Collector {
    frames: Sender<(ConnectionId, Vec<u8>)>,
}

impl IncomingMessageHandler for Collector {
    fn receive(&self, connection_id: &ConnectionId, payload: Vec<u8>) {
        let _ = self.frames.send((connection_id.clone(), payload));
    }
}

struct Host {
    registry: ConnectionRegistry,
    frames: Receiver<(ConnectionId, Vec<u8>)>,
    _collector: Arc<Collector>,
}

fn host() -> Host {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (tx, rx) = unbounded();
    let collector = Arc::new(Collector { frames: tx });
    let weak: Weak<Collector> = Arc::downgrade(&collector);
    Host {
        registry: ConnectionRegistry::new(weak, MAX_FRAME),
        frames: rx,
        _collector: collector,
    }
}

fn serve(host: &Host) -> ConnectionId {
    let addr = host
        .registry
        .bind_listener(&ConnectionId::new("127.0.0.1", 0))
        .expect("bind listener");
    ConnectionId::new("127.0.0.1", addr.port())
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Test: frames travel both ways and the server names the client by its source port
#[test]
fn test_frames_flow_in_both_directions() {
    let server = host();
    let client = host();
    let target = serve(&server);

    let outgoing = client.registry.get_connection(&target).expect("connect");
    outgoing.enqueue(b"hello server".to_vec()).unwrap();

    let (incoming_id, payload) = server.frames.recv_timeout(WAIT).expect("server frame");
    assert_eq!(payload, b"hello server");
    assert_eq!(incoming_id.auxiliary_id, 0);
    assert_eq!(incoming_id.address, "127.0.0.1");

    let reply = server.registry.get_connection(&incoming_id).expect("incoming connection");
    reply.enqueue(b"hello client".to_vec()).unwrap();

    let (reply_id, payload) = client.frames.recv_timeout(WAIT).expect("client frame");
    assert_eq!(payload, b"hello client");
    assert_eq!(reply_id, target);
}

/// Test: an oversized payload fails on the sender and the connection keeps working
#[test]
fn test_oversized_payload_is_rejected_before_sending() {
    let server = host();
    let client = host();
    let target = serve(&server);

    let connection = client.registry.get_connection(&target).expect("connect");
    let result = connection.enqueue(vec![b'x'; MAX_FRAME + 1]);
    match result {
        Err(NetworkError::MessageTooLarge { size, max, .. }) => {
            assert_eq!(size, MAX_FRAME + 1);
            assert_eq!(max, MAX_FRAME);
        }
        other => panic!("expected MessageTooLarge, got {:?}", other),
    }

    assert!(client.registry.is_registered(&target));
    connection.enqueue(vec![b'y'; MAX_FRAME]).unwrap();
    let (_, payload) = server.frames.recv_timeout(WAIT).expect("server frame");
    assert_eq!(payload.len(), MAX_FRAME);
    assert_eq!(server.registry.connection_ids().len(), 1);
}

/// Test: concurrent lookups for one identifier open exactly one socket
#[test]
fn test_concurrent_lookups_share_one_connection() {
    let server = Arc::new(host());
    let client = Arc::new(host());
    let target = serve(&server);

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            let target = target.clone();
            thread::spawn(move || {
                barrier.wait();
                client.registry.get_connection(&target).expect("connect")
            })
        })
        .collect();
    let connections: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for connection in &connections[1..] {
        assert!(Arc::ptr_eq(&connections[0], connection));
    }
    assert!(wait_until(|| server.registry.connection_ids().len() == 1));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.registry.connection_ids().len(), 1);
}

/// Test: auxiliary ids are validated before any socket is opened
#[test]
fn test_auxiliary_id_rules() {
    let server = host();
    let client = host();
    let target = serve(&server);

    let negative = ConnectionId::auxiliary(target.address.clone(), target.port, -1);
    assert!(matches!(
        client.registry.get_connection(&negative),
        Err(NetworkError::NegativeAuxiliaryId(_))
    ));

    let auxiliary = ConnectionId::auxiliary(target.address.clone(), target.port, 1);
    assert!(matches!(
        client.registry.get_connection(&auxiliary),
        Err(NetworkError::PrimaryConnectionDown(_))
    ));

    let primary = client.registry.get_connection(&target).expect("primary");
    let extra = client.registry.get_connection(&auxiliary).expect("auxiliary");
    assert!(!Arc::ptr_eq(&primary, &extra));
    assert_eq!(client.registry.connection_ids().len(), 2);
}

/// Test: an auxiliary outgoing connection is a separate socket on the server
#[test]
fn test_auxiliary_connection_is_separate_on_server() {
    let server = host();
    let client = host();
    let target = serve(&server);

    let primary = client.registry.get_connection(&target).expect("primary");
    primary.enqueue(b"one".to_vec()).unwrap();
    let (first_id, _) = server.frames.recv_timeout(WAIT).unwrap();

    let auxiliary = ConnectionId::auxiliary(target.address.clone(), target.port, 7);
    let extra = client.registry.get_connection(&auxiliary).expect("auxiliary");
    extra.enqueue(b"two".to_vec()).unwrap();
    let (second_id, payload) = server.frames.recv_timeout(WAIT).unwrap();

    assert_eq!(payload, b"two");
    assert_ne!(second_id, first_id);
    assert_eq!(server.registry.connection_ids().len(), 2);
}

/// Test: listener bookkeeping rejects duplicates and unknown ids
#[test]
fn test_listener_bookkeeping() {
    let server = host();
    let requested = ConnectionId::new("127.0.0.1", 0);
    server.registry.bind_listener(&requested).unwrap();

    assert!(matches!(
        server.registry.bind_listener(&requested),
        Err(NetworkError::ListenerAlreadyBound(_))
    ));
    assert_eq!(server.registry.listener_ids(), vec![requested.clone()]);
    assert!(server.registry.listener_addr(&requested).is_some());

    server.registry.unbind_listener(&requested).unwrap();
    assert!(matches!(
        server.registry.unbind_listener(&requested),
        Err(NetworkError::ListenerNotBound(_))
    ));
    assert!(server.registry.listener_ids().is_empty());
}

/// Test: a peer going away unregisters the connection on the other side
#[test]
fn test_peer_close_unregisters_connection() {
    let server = host();
    let client = host();
    let target = serve(&server);

    let connection = client.registry.get_connection(&target).unwrap();
    connection.enqueue(b"ping".to_vec()).unwrap();
    server.frames.recv_timeout(WAIT).unwrap();
    assert_eq!(server.registry.connection_ids().len(), 1);

    connection.destroy();
    assert!(!client.registry.is_registered(&target));
    assert!(matches!(
        connection.enqueue(b"late".to_vec()),
        Err(NetworkError::ConnectionClosed(_))
    ));
    assert!(wait_until(|| server.registry.connection_ids().is_empty()));
}

/// Test: connecting to a port nobody listens on fails fast
#[test]
fn test_connect_failure_is_reported() {
    let client = host();
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let result = client.registry.get_connection(&ConnectionId::new("127.0.0.1", port));
    assert!(matches!(result, Err(NetworkError::Connect { .. })));
    assert!(client.registry.connection_ids().is_empty());
}

/// Test: destroy stops listeners and closes connections
#[test]
fn test_destroy_tears_everything_down() {
    let server = host();
    let client = host();
    let target = serve(&server);
    client.registry.get_connection(&target).unwrap();

    server.registry.destroy();
    assert!(server.registry.listener_ids().is_empty());
    assert!(server.registry.connection_ids().is_empty());
    assert!(wait_until(|| client.registry.connection_ids().is_empty()));
}
