//! A host and a client sharing one counter over an in-process connection
//!
//! Run with:
//! ```bash
//! cargo run --example session_demo
//! ```

use async_trait::async_trait;
use graphsync_core::communicate::{ClientOptions, Communicator, MemoryConnection, Receiver};
use graphsync_core::graph::{shared, Graph, SharedGraph, Value};
use graphsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use graphsync_core::{SyncConfig, SyncResult};
use std::time::Duration;
use tracing::info;

/// Bumps `count` every cycle until it reaches `limit`
struct Counter {
    shared: Option<SharedGraph>,
    limit: i64,
}

#[async_trait]
impl Receiver for Counter {
    async fn init_share_object(&mut self, shared: SharedGraph) -> SyncResult<()> {
        self.shared = Some(shared);
        Ok(())
    }

    async fn is_alive(&mut self) -> SyncResult<bool> {
        let Some(shared) = self.shared.clone() else {
            return Ok(true);
        };
        let mut graph = shared.lock().await;
        let Some(root) = graph.root_handle() else {
            return Ok(false);
        };
        let count = graph.get(root, &Value::from("count")).and_then(Value::as_int).unwrap_or(0);
        if count >= self.limit {
            return Ok(false);
        }
        graph.insert_entry(root, "count", count + 1)?;
        info!(count = count + 1, "Host bumped counter");
        Ok(true)
    }
}

fn counter_graph() -> anyhow::Result<Graph> {
    let mut graph = Graph::new();
    let root = graph.dict([(Value::from("count"), Value::from(0))])?;
    graph.set_root(root);
    Ok(graph)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging_with_config(LogConfig::new(LogLevel::Debug).with_target(true))?;

    let config = SyncConfig { sync_frequency: 20.0, ..SyncConfig::default() };
    let (host_conn, client_conn) = MemoryConnection::pair();
    let host = Communicator::new(host_conn, config.clone())?;
    let client = Communicator::new(client_conn, config.clone())?;

    let graph = shared(counter_graph()?);
    let client_graph = graph.clone();
    let options = ClientOptions::from(&config).with_snippet_share_only(false);
    let client_task = tokio::spawn(async move { client.client(client_graph, Graph::new(), options).await });

    let mut receiver = Counter { shared: None, limit: 5 };
    let outcome = tokio::time::timeout(Duration::from_secs(10), host.host(&mut receiver)).await??;
    client_task.await??;

    let graph = graph.lock().await;
    let count = graph
        .root_handle()
        .and_then(|root| graph.get(root, &Value::from("count")))
        .and_then(Value::as_int);
    info!(?outcome, ?count, stats = ?host.stats(), "Session finished");
    Ok(())
}
