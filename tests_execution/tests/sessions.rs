//! Session Lifecycle Tests
//!
//! Release semantics across the wire and liveness checks between peers.

use std::thread;

use crossbeam::channel::bounded;
use execution::{ExecutionError, ObjectSpace, ReleaseState};
use tests_execution::*;
use uuid::Uuid;

/// Test: Releasing a session from inside a remote task waits for the other tasks in it
///
/// Validates:
/// 1. The release is deferred while another remote request is running
/// 2. The releasing task still sees its session registered
/// 3. The session disappears from the server once the last request finishes
#[test]
fn test_release_deferred_until_remote_requests_finish() {
    let (server, client, endpoint) = test_bootstrap(test_config());
    let session = client.coordinator.new_session();
    let session_id = session.id();

    let gate = Uuid::new_v4();
    let (open, closed) = bounded::<()>(1);
    ObjectSpace::put(gate, closed);

    let holder = {
        let session = session.clone();
        let endpoint = endpoint.clone();
        thread::spawn(move || session.execute_sync(&endpoint, HoldSession { gate }))
    };

    assert!(wait_until(|| {
        server.coordinator.has_session(session_id)
            && server.coordinator.session(session_id).active_remote_requests() == 1
    }));

    let still_registered = session
        .call_sync(&endpoint, ReleaseFromRemote)
        .expect("Failed to release remotely");
    assert_eq!(still_registered, Some(true));

    let server_session = server.coordinator.session(session_id);
    assert_eq!(server_session.release_state(), ReleaseState::PendingRelease);
    assert!(server.coordinator.has_session(session_id));

    open.send(()).expect("Failed to open gate");
    holder
        .join()
        .expect("Holder thread panicked")
        .expect("Held task failed");

    assert!(wait_until(|| !server.coordinator.has_session(session_id)));
    assert_eq!(server_session.release_state(), ReleaseState::Released);
    assert!(client.coordinator.has_session(session_id));
    ObjectSpace::remove(gate);
}

/// Test: Releasing a local session removes it from its coordinator only
#[test]
fn test_local_release_removes_session() {
    let (server, client, endpoint) = test_bootstrap(test_config());
    let session = client.coordinator.new_session();
    session
        .call_sync(&endpoint, Multiply { a: 1, b: 1 })
        .expect("Failed to call multiply");

    session.release();

    assert_eq!(session.release_state(), ReleaseState::Released);
    assert!(!client.coordinator.has_session(session.id()));
    assert!(server.coordinator.has_session(session.id()));
}

/// Test: A ping is answered with a pong carrying the prefixed message
#[test]
fn test_ping_pong() {
    let (_server, client, endpoint) = test_bootstrap(test_config());

    let pong = client
        .coordinator
        .ping(&endpoint, "are you there?", WAIT)
        .expect("Failed to ping server");

    assert_eq!(pong.message, "PONG! are you there?");
}

/// Test: Pinging a port nobody listens on fails with a connect error
#[test]
fn test_ping_dead_port() {
    init_tracing();
    let client = Peer::new(test_config());

    let err = client
        .coordinator
        .ping(&unused_endpoint(), "hello?", WAIT)
        .expect_err("Nobody is listening");
    assert!(matches!(err, ExecutionError::Network(_)));
}

/// Test: Concurrent callers share one connection to the server
#[test]
fn test_concurrent_lookups_share_connection() {
    let (server, client, endpoint) = test_bootstrap(test_config());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = client.coordinator.clone();
            let endpoint = endpoint.clone();
            thread::spawn(move || coordinator.ping(&endpoint, "race", WAIT))
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .expect("Ping thread panicked")
            .expect("Ping failed");
    }

    assert_eq!(client.coordinator.connection_ids(), vec![endpoint]);
    assert!(wait_until(|| server.coordinator.connection_ids().len() == 1));
}
