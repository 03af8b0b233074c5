//! Execution Test Utilities
//!
//! Shared fixtures for end-to-end tests: a pair of coordinators talking
//! over loopback TCP and a set of sample tasks registered on both.
//!
//! ## Test Philosophy
//!
//! - **Real sockets**: every scenario crosses an actual TCP connection
//! - **Observable side effects**: tasks leave evidence in the object space
//! - **Bounded waits**: nothing in a test blocks without a deadline

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use core_types::ConnectionId;
use crossbeam::channel::Receiver;
use execution::{
    context, CoordinatorConfig, ExecutionContext, ExecutionCoordinator, InMemoryResources,
    ObjectSpace, ReleaseState, RemoteCallable, RemoteTask, ResourceError, ResourceSource,
    TaskFailure,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(10);

/// Installs a test log writer once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// Log output captured from the current thread
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Runs `f` with this thread's events written into the capture
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        use tracing_subscriber::util::SubscriberInitExt;

        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = subscriber.set_default();
        f()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Config with short timeouts so failing scenarios end quickly
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        execution_timeout: Duration::from_secs(10),
        resource_timeout: Duration::from_secs(5),
        ..CoordinatorConfig::default()
    }
}

/// Resource source that counts how often it is consulted
#[derive(Default)]
pub struct CountingResources {
    inner: InMemoryResources,
    loads: AtomicUsize,
}

impl CountingResources {
    pub fn insert(&self, name: &str, data: &[u8]) {
        self.inner.insert(name, data.to_vec());
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ResourceSource for CountingResources {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(name)
    }
}

/// One host under test
pub struct Peer {
    pub coordinator: Arc<ExecutionCoordinator>,
    pub resources: Arc<CountingResources>,
}

impl Peer {
    pub fn new(config: CoordinatorConfig) -> Self {
        let resources = Arc::new(CountingResources::default());
        let coordinator = ExecutionCoordinator::builder()
            .config(config)
            .resources(resources.clone())
            .build();
        register_sample_tasks(&coordinator);
        Self {
            coordinator,
            resources,
        }
    }

    /// Binds a loopback listener and returns the id clients should dial
    pub fn listen(&self) -> ConnectionId {
        let addr = self
            .coordinator
            .bind_listener(&ConnectionId::new("127.0.0.1", 0))
            .expect("bind listener");
        ConnectionId::new("127.0.0.1", addr.port())
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.coordinator.destroy();
    }
}

/// Bootstrap helper: a listening server and a client that has not connected yet
pub fn test_bootstrap(config: CoordinatorConfig) -> (Peer, Peer, ConnectionId) {
    init_tracing();
    let server = Peer::new(config.clone());
    let client = Peer::new(config);
    let endpoint = server.listen();
    (server, client, endpoint)
}

/// Returns a loopback endpoint nobody is listening on
pub fn unused_endpoint() -> ConnectionId {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let port = probe.local_addr().expect("probe addr").port();
    drop(probe);
    ConnectionId::new("127.0.0.1", port)
}

/// Polls `condition` until it holds or [`WAIT`] elapses
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn register_sample_tasks(coordinator: &ExecutionCoordinator) {
    let tasks = coordinator.tasks();
    tasks.register_task::<RecordVisit>();
    tasks.register_task::<Fail>();
    tasks.register_task::<Panic>();
    tasks.register_task::<HoldSession>();
    tasks.register_callable::<Multiply>();
    tasks.register_callable::<ReadResource>();
    tasks.register_callable::<ReleaseFromRemote>();
    tasks.register_callable::<Boomerang>();
    tasks.register_callable::<WhereAmI>();
}

/// Creates a visit counter a [`RecordVisit`] task can find
pub fn visit_counter() -> (Uuid, Arc<AtomicUsize>) {
    let token = Uuid::new_v4();
    let counter = ObjectSpace::put(token, AtomicUsize::new(0));
    (token, counter)
}

/// Increments the counter stored under `token`
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordVisit {
    pub token: Uuid,
}

impl RemoteTask for RecordVisit {
    const NAME: &'static str = "tests.record_visit";

    fn run(self, _ctx: &ExecutionContext) -> Result<(), TaskFailure> {
        let counter = ObjectSpace::get::<AtomicUsize>(self.token)
            .ok_or_else(|| TaskFailure::new(format!("no counter under {}", self.token)))?;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Multiply {
    pub a: i64,
    pub b: i64,
}

impl RemoteCallable for Multiply {
    const NAME: &'static str = "tests.multiply";
    type Output = i64;

    fn call(self, _ctx: &ExecutionContext) -> Result<i64, TaskFailure> {
        Ok(self.a * self.b)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Fail {
    pub message: String,
}

impl RemoteTask for Fail {
    const NAME: &'static str = "tests.fail";

    fn run(self, _ctx: &ExecutionContext) -> Result<(), TaskFailure> {
        Err(TaskFailure::with_kind("Deliberate", self.message))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Panic;

impl RemoteTask for Panic {
    const NAME: &'static str = "tests.panic";

    fn run(self, _ctx: &ExecutionContext) -> Result<(), TaskFailure> {
        panic!("task blew up")
    }
}

/// What a [`ReadResource`] task saw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub contents: Vec<String>,
    pub not_found: bool,
    pub error: Option<String>,
}

/// Reads one resource `times` times through the task context
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResource {
    pub name: String,
    pub times: usize,
}

impl RemoteCallable for ReadResource {
    const NAME: &'static str = "tests.read_resource";
    type Output = ResourceReport;

    fn call(self, ctx: &ExecutionContext) -> Result<ResourceReport, TaskFailure> {
        let mut report = ResourceReport {
            contents: Vec::new(),
            not_found: false,
            error: None,
        };
        for _ in 0..self.times {
            match ctx.resource(&self.name) {
                Ok(data) => report
                    .contents
                    .push(String::from_utf8_lossy(&data).into_owned()),
                Err(ResourceError::NotFound(_)) => {
                    report.not_found = true;
                    break;
                }
                Err(err) => {
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }
        Ok(report)
    }
}

/// Blocks inside the session until the channel stored under `gate` fires
#[derive(Debug, Serialize, Deserialize)]
pub struct HoldSession {
    pub gate: Uuid,
}

impl RemoteTask for HoldSession {
    const NAME: &'static str = "tests.hold_session";

    fn run(self, _ctx: &ExecutionContext) -> Result<(), TaskFailure> {
        let gate = ObjectSpace::get::<Receiver<()>>(self.gate)
            .ok_or_else(|| TaskFailure::new("gate missing"))?;
        gate.recv_timeout(WAIT)
            .map_err(|err| TaskFailure::from_error(&err))
    }
}

/// Releases the session from inside and reports whether it is still registered
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseFromRemote;

impl RemoteCallable for ReleaseFromRemote {
    const NAME: &'static str = "tests.release_from_remote";
    type Output = bool;

    fn call(self, ctx: &ExecutionContext) -> Result<bool, TaskFailure> {
        ctx.release_session();
        let registered = ctx
            .session()
            .coordinator()
            .map(|coordinator| coordinator.has_session(ctx.session_id()))
            .unwrap_or(false);
        Ok(registered && ctx.session().release_state() == ReleaseState::PendingRelease)
    }
}

/// Calls back to the sender with a [`Multiply`] and returns its result plus one
#[derive(Debug, Serialize, Deserialize)]
pub struct Boomerang {
    pub a: i64,
    pub b: i64,
}

impl RemoteCallable for Boomerang {
    const NAME: &'static str = "tests.boomerang";
    type Output = i64;

    fn call(self, ctx: &ExecutionContext) -> Result<i64, TaskFailure> {
        let product = ctx
            .session()
            .call_sync(ctx.connection_id(), Multiply { a: self.a, b: self.b })?
            .ok_or_else(|| TaskFailure::new("multiply returned nothing"))?;
        Ok(product + 1)
    }
}

/// Reports what the thread-local context says about the running request
#[derive(Debug, Serialize, Deserialize)]
pub struct WhereAmI;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whereabouts {
    pub has_session: bool,
    pub session_matches: bool,
    pub connection_matches: bool,
}

impl RemoteCallable for WhereAmI {
    const NAME: &'static str = "tests.where_am_i";
    type Output = Whereabouts;

    fn call(self, ctx: &ExecutionContext) -> Result<Whereabouts, TaskFailure> {
        Ok(Whereabouts {
            has_session: context::has_current_session(),
            session_matches: context::current_session().map(|s| s.id()) == Some(ctx.session_id()),
            connection_matches: context::current_connection_id().as_ref()
                == Some(ctx.connection_id()),
        })
    }
}
