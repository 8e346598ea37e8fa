/*
    Communicator - keep one graph in sync between a host and a client

    The client owns the graph and offers it during the handshake. The host
    decodes it, hands it to its `Receiver`, and from then on polls the client
    at `sync_frequency`: both sides' changes since the last agreed snapshot
    are merged under the conflict policy, applied on the host, and the
    client is sent the delta it is missing.

    Calls on methods of the host's copy are forwarded to the client, which
    runs the real method and returns the result.

    ┌────────┐  echo/echo/init/start  ┌────────┐
    │ client │ ─────────────────────► │  host  │
    │        │ ◄──── sync ─────────── │        │
    │        │ ───── sync{graph} ───► │ merge  │
    │        │ ◄──── update{delta} ── │ apply  │
    │        │ ───── updated ───────► │        │
    │        │ ◄──── responce ─────── │ method │
    │        │ ───── return ────────► │ proxy  │
    └────────┘                        └────────┘
*/

mod channel;
mod client;
mod connection;
mod frame;
mod host;
mod message;
mod receiver;

pub use client::ClientOptions;
pub use connection::{Connection, LineConnection, MemoryConnection};
pub use frame::Framing;
pub use message::{EndResult, Message};
pub use receiver::{Direction, MessageLog, Receiver, TracingMessageLog};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::graph::{Graph, SharedGraph};
use crate::metrics::{SessionStats, StatsSnapshot};
use channel::{Channel, SharedChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a host session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    /// The receiver reported it was done
    Completed,
    /// Stopped through the abort flag
    Aborted,
    /// The client sent `end`
    ClientEnded,
}

/// Requests a running session to stop at its next cycle
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Communicator<C: Connection> {
    channel: SharedChannel<C>,
    config: SyncConfig,
    abort: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
}

impl<C: Connection> Communicator<C> {
    pub fn new(connection: C, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let stats = Arc::new(SessionStats::new());
        let framing = Framing::new(config.use_compress);
        let channel = Channel::new(connection, framing, Arc::clone(&stats));
        Ok(Communicator {
            channel: Arc::new(Mutex::new(channel)),
            config,
            abort: Arc::new(AtomicBool::new(false)),
            stats,
        })
    }

    /// Observe every message sent and received
    pub async fn with_message_log(self, log: Arc<dyn MessageLog>) -> Self {
        self.channel.lock().await.set_log(log);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    pub fn stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serve one client until the receiver finishes, the client ends the
    /// session, or the session is aborted
    pub async fn host<R: Receiver>(&self, receiver: &mut R) -> SyncResult<HostOutcome> {
        host::HostSession::new(
            Arc::clone(&self.channel),
            receiver,
            self.config.clone(),
            Arc::clone(&self.abort),
            Arc::clone(&self.stats),
        )
        .run()
        .await
    }

    /// Share `shared` with a host until the host ends the session
    ///
    /// `configure` is sent once, after the handshake.
    pub async fn client(
        &self,
        shared: SharedGraph,
        configure: Graph,
        options: ClientOptions,
    ) -> SyncResult<()> {
        client::ClientSession::new(Arc::clone(&self.channel), Arc::clone(&self.abort), shared, options)
            .run(configure)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn test_rejects_non_positive_frequency() {
        let (conn, _) = MemoryConnection::pair();
        let config = SyncConfig { sync_frequency: 0.0, ..SyncConfig::default() };
        assert!(matches!(Communicator::new(conn, config), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_abort_handle_shares_flag() {
        let (conn, _) = MemoryConnection::pair();
        let communicator = Communicator::new(conn, SyncConfig::default()).unwrap();
        let handle = communicator.abort_handle();
        assert!(!handle.is_aborted());
        communicator.stop();
        assert!(handle.is_aborted());
    }
}
