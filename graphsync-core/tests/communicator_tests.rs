/*
    Communicator Integration Tests

    Host and client sessions over in-process and stream connections:
    - client edits reach the host in order
    - host edits reach the client
    - forwarded calls run the client's method exactly once
    - exceptions on either side end both sessions with the right error
    - abort and handshake failure
*/

use async_trait::async_trait;
use graphsync_core::communicate::{
    ClientOptions, Communicator, Direction, Framing, HostOutcome, LineConnection, MemoryConnection,
    Message, MessageLog, Receiver,
};
use graphsync_core::graph::{method_fn, shared, CallArgs, Class, Graph, SharedGraph, Value};
use graphsync_core::sync::ConflictPolicy;
use graphsync_core::{Connection, SyncConfig, SyncError, SyncResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const SESSION_LIMIT: Duration = Duration::from_secs(20);
const DIVISION_BY_ZERO: &str = "ZeroDivisionError(division by zero)";

fn config(frequency: f64) -> SyncConfig {
    SyncConfig { sync_frequency: frequency, ..SyncConfig::default() }
}

fn options() -> ClientOptions {
    ClientOptions::default()
        .with_conflict_policy(ConflictPolicy::HostPrioritized)
        .with_snippet_share_only(false)
}

fn hoge_dict(value: i64) -> Graph {
    let mut graph = Graph::new();
    let root = graph.dict([(Value::from("hoge"), Value::from(value))]).unwrap();
    graph.set_root(root);
    graph
}

async fn read_int(shared: &SharedGraph, key: &str) -> Option<i64> {
    let graph = shared.lock().await;
    let root = graph.root_handle()?;
    graph.get(root, &Value::from(key)).and_then(Value::as_int)
}

async fn write_int(shared: &SharedGraph, key: &str, value: i64) {
    let mut graph = shared.lock().await;
    let root = graph.root_handle().unwrap();
    graph.insert_entry(root, key, value).unwrap();
}

fn spawn_host<C: Connection, R: Receiver + Sync + 'static>(
    host: Communicator<C>,
    mut receiver: R,
) -> JoinHandle<(SyncResult<HostOutcome>, R, Communicator<C>)> {
    tokio::spawn(async move {
        let outcome = host.host(&mut receiver).await;
        (outcome, receiver, host)
    })
}

fn spawn_client<C: Connection>(
    client: Communicator<C>,
    graph: SharedGraph,
    configure: Graph,
) -> JoinHandle<SyncResult<()>> {
    tokio::spawn(async move { client.client(graph, configure, options()).await })
}

fn is_subsequence(needle: &[i64], haystack: &[i64]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|wanted| rest.any(|item| item == wanted))
}

/// Records `hoge` every cycle and finishes once `end` appears
#[derive(Default)]
struct Observer {
    shared: Option<SharedGraph>,
    seen: Vec<i64>,
    started: bool,
    stopped: bool,
}

#[async_trait]
impl Receiver for Observer {
    async fn init_share_object(&mut self, shared: SharedGraph) -> SyncResult<()> {
        self.shared = Some(shared);
        Ok(())
    }

    async fn start_command(&mut self) -> SyncResult<()> {
        self.started = true;
        Ok(())
    }

    async fn is_alive(&mut self) -> SyncResult<bool> {
        let Some(shared) = self.shared.clone() else {
            return Ok(true);
        };
        if let Some(value) = read_int(&shared, "hoge").await {
            self.seen.push(value);
        }
        Ok(read_int(&shared, "end").await.is_none())
    }

    async fn stop(&mut self) -> SyncResult<()> {
        self.stopped = true;
        Ok(())
    }
}

/// Increments `hoge` each cycle until it reaches `target`
struct Incrementer {
    shared: Option<SharedGraph>,
    target: i64,
}

#[async_trait]
impl Receiver for Incrementer {
    async fn init_share_object(&mut self, shared: SharedGraph) -> SyncResult<()> {
        self.shared = Some(shared);
        Ok(())
    }

    async fn is_alive(&mut self) -> SyncResult<bool> {
        let Some(shared) = self.shared.clone() else {
            return Ok(true);
        };
        if let Some(value) = read_int(&shared, "hoge").await {
            if value < self.target {
                write_int(&shared, "hoge", value + 1).await;
            }
        }
        Ok(read_int(&shared, "end").await.is_none())
    }
}

/// Calls `add(1, 10, 100)` on the shared root once, then finishes
#[derive(Default)]
struct Caller {
    shared: Option<SharedGraph>,
    result: Option<i64>,
}

#[async_trait]
impl Receiver for Caller {
    async fn init_share_object(&mut self, shared: SharedGraph) -> SyncResult<()> {
        self.shared = Some(shared);
        Ok(())
    }

    async fn is_alive(&mut self) -> SyncResult<bool> {
        if self.result.is_some() {
            return Ok(false);
        }
        let Some(shared) = self.shared.clone() else {
            return Ok(true);
        };
        let method = {
            let graph = shared.lock().await;
            graph.root_handle().and_then(|root| graph.method(root, "add"))
        };
        let method = method.ok_or_else(|| SyncError::RemoteCall("add is not shared".into()))?;
        let answer = method.call(CallArgs::new().arg(1).arg(10).arg(100)).await?;
        self.result = answer.root().as_int();
        Ok(true)
    }
}

/// Fails the session as soon as the graph arrives
#[derive(Default)]
struct Faulty {
    shared: Option<SharedGraph>,
}

#[async_trait]
impl Receiver for Faulty {
    async fn init_share_object(&mut self, shared: SharedGraph) -> SyncResult<()> {
        self.shared = Some(shared);
        Ok(())
    }

    async fn is_alive(&mut self) -> SyncResult<bool> {
        match self.shared {
            Some(_) => Err(SyncError::raised("ZeroDivisionError", "division by zero")),
            None => Ok(true),
        }
    }
}

#[derive(Default)]
struct Recording {
    entries: StdMutex<Vec<(Direction, String)>>,
}

impl MessageLog for Recording {
    fn log(&self, direction: Direction, command: &str, _dump: &str) {
        self.entries.lock().unwrap().push((direction, command.to_string()));
    }
}

fn calculator(calls: Arc<AtomicUsize>, fail: bool) -> Graph {
    let mut graph = Graph::new();
    let calc = graph.object(Class::shared("Calc"));
    graph.set_field(calc, "hoge", 0).unwrap();
    let add = method_fn(move |args: CallArgs| {
        calls.fetch_add(1, Ordering::SeqCst);
        if fail {
            return Err(SyncError::raised("ZeroDivisionError", "division by zero"));
        }
        let total: i64 = args.positional().iter().filter_map(Value::as_int).sum();
        Ok(Graph::scalar(total))
    });
    graph.define_method(calc, "add", add).unwrap();
    graph.set_root(calc);
    graph
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_edits_reach_host_in_order() {
    let (host_conn, client_conn) = MemoryConnection::pair();
    let log = Arc::new(Recording::default());
    let host = Communicator::new(host_conn, config(100.0))
        .unwrap()
        .with_message_log(log.clone())
        .await;
    let client = Communicator::new(client_conn, config(100.0)).unwrap();

    let graph = shared(hoge_dict(0));
    let host_task = spawn_host(host, Observer::default());
    let client_task = spawn_client(client, graph.clone(), hoge_dict(0));

    sleep(Duration::from_millis(300)).await;
    let mut history = vec![read_int(&graph, "hoge").await.unwrap()];
    for _ in 0..10 {
        let next = read_int(&graph, "hoge").await.unwrap() + 1;
        write_int(&graph, "hoge", next).await;
        history.push(next);
        sleep(Duration::from_millis(100)).await;
    }
    write_int(&graph, "end", 1).await;

    let (outcome, observer, host) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap().unwrap();

    assert_eq!(outcome.unwrap(), HostOutcome::Completed);
    assert!(observer.started);
    assert_eq!(observer.seen.last(), Some(&10));

    let mut observed = observer.seen.clone();
    observed.sort_unstable();
    observed.dedup();
    assert!(is_subsequence(&observed, &history), "{:?} not in {:?}", observed, history);

    let host_graph = observer.shared.unwrap();
    assert_eq!(read_int(&host_graph, "hoge").await, Some(10));
    assert_eq!(read_int(&host_graph, "end").await, Some(1));

    assert!(host.stats().sync_cycles > 0);
    let entries = log.entries.lock().unwrap();
    assert_eq!(entries.first(), Some(&(Direction::Recv, "echo".to_string())));
    assert!(entries.iter().any(|(d, c)| *d == Direction::Send && c == "update"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_edits_reach_client() {
    let (host_conn, client_conn) = MemoryConnection::pair();
    let host = Communicator::new(host_conn, config(100.0)).unwrap();
    let client = Communicator::new(client_conn, config(100.0)).unwrap();

    let graph = shared(hoge_dict(0));
    let host_task = spawn_host(host, Incrementer { shared: None, target: 5 });
    let client_task = spawn_client(client, graph.clone(), hoge_dict(0));

    let reached = timeout(SESSION_LIMIT, async {
        while read_int(&graph, "hoge").await != Some(5) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "client never saw the host's edits");
    write_int(&graph, "end", 1).await;

    let (outcome, incrementer, _) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap().unwrap();

    assert_eq!(outcome.unwrap(), HostOutcome::Completed);
    assert_eq!(read_int(&incrementer.shared.unwrap(), "hoge").await, Some(5));
    assert_eq!(read_int(&graph, "hoge").await, Some(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forwarded_call_runs_once_on_client() {
    let (host_conn, client_conn) = MemoryConnection::pair();
    let host = Communicator::new(host_conn, config(100.0)).unwrap();
    let client = Communicator::new(client_conn, config(100.0)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let graph = shared(calculator(calls.clone(), false));
    let host_task = spawn_host(host, Caller::default());
    let client_task = spawn_client(client, graph, Graph::scalar(0));

    let (outcome, caller, host) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap().unwrap();

    assert_eq!(outcome.unwrap(), HostOutcome::Completed);
    assert_eq!(caller.result, Some(111));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(host.stats().remote_calls, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_exception_reaches_client() {
    let (host_conn, client_conn) = MemoryConnection::pair();
    let host = Communicator::new(host_conn, config(100.0)).unwrap();
    let client = Communicator::new(client_conn, config(100.0)).unwrap();

    let host_task = spawn_host(host, Faulty::default());
    let client_task = spawn_client(client, shared(hoge_dict(5)), hoge_dict(0));

    let (outcome, _, _) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    let client_result = timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap();

    assert!(matches!(outcome, Err(SyncError::Raised(_))));
    match client_result {
        Err(SyncError::ExceptionInServer(message)) => assert_eq!(message, DIVISION_BY_ZERO),
        other => panic!("expected ExceptionInServer, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_exception_reaches_host() {
    let (host_conn, client_conn) = MemoryConnection::pair();
    let host = Communicator::new(host_conn, config(100.0)).unwrap();
    let client = Communicator::new(client_conn, config(100.0)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let host_task = spawn_host(host, Caller::default());
    let client_task = spawn_client(client, shared(calculator(calls.clone(), true)), Graph::scalar(0));

    let (outcome, caller, _) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    let client_result = timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap();

    match outcome {
        Err(SyncError::ExceptionInClient(message)) => assert_eq!(message, DIVISION_BY_ZERO),
        other => panic!("expected ExceptionInClient on the host, got {:?}", other),
    }
    match client_result {
        Err(SyncError::ExceptionInClient(message)) => assert_eq!(message, DIVISION_BY_ZERO),
        other => panic!("expected ExceptionInClient on the client, got {:?}", other),
    }
    assert_eq!(caller.result, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_ends_both_sides() {
    let (host_conn, client_conn) = MemoryConnection::pair();
    let host = Communicator::new(host_conn, config(50.0)).unwrap();
    let client = Communicator::new(client_conn, config(50.0)).unwrap();

    let abort = host.abort_handle();
    let host_task = spawn_host(host, Observer::default());
    let client_task = spawn_client(client, shared(hoge_dict(0)), hoge_dict(0));

    sleep(Duration::from_millis(200)).await;
    abort.abort();

    let (outcome, observer, _) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap().unwrap();

    assert_eq!(outcome.unwrap(), HostOutcome::Aborted);
    assert!(observer.stopped);
}

#[tokio::test]
async fn test_session_over_line_connection() {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let host = Communicator::new(LineConnection::from_stream(left), config(100.0)).unwrap();
    let client = Communicator::new(LineConnection::from_stream(right), config(100.0)).unwrap();

    let graph = shared(hoge_dict(1));
    let host_task = spawn_host(host, Observer::default());
    let client_task = spawn_client(client, graph.clone(), hoge_dict(0));

    sleep(Duration::from_millis(100)).await;
    write_int(&graph, "hoge", 2).await;
    sleep(Duration::from_millis(100)).await;
    write_int(&graph, "end", 1).await;

    let (outcome, observer, _) = timeout(SESSION_LIMIT, host_task).await.unwrap().unwrap();
    timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap().unwrap();

    assert_eq!(outcome.unwrap(), HostOutcome::Completed);
    assert_eq!(observer.seen.last(), Some(&2));
}

#[tokio::test]
async fn test_mismatched_echo_cannot_start() {
    let (client_conn, mut peer) = MemoryConnection::pair();
    let client = Communicator::new(client_conn, config(10.0)).unwrap();
    let client_task = spawn_client(client, shared(hoge_dict(0)), hoge_dict(0));

    let framing = Framing::new(true);
    let frame = peer.recv().await.unwrap();
    let greeting = Message::parse(&framing.decode(&frame).unwrap()).unwrap();
    assert_eq!(greeting.command(), "echo");

    let wrong = Message::Echo { session: Some("someone-else".into()), start_time: None };
    peer.send(&framing.encode(&wrong.to_json().unwrap()).unwrap()).await.unwrap();

    match timeout(SESSION_LIMIT, client_task).await.unwrap().unwrap() {
        Err(SyncError::CannotStart(message)) => assert_eq!(message, "session initial error"),
        other => panic!("expected CannotStart, got {:?}", other),
    }
}
