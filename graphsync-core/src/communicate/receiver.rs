//! Host-side application hooks and message observation

use crate::error::SyncResult;
use crate::graph::{Graph, SharedGraph};
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

/// Application driven by a hosting communicator
///
/// The host calls these in session order: `init_share_object` once the
/// client's graph is decoded, then `init_configure_object` and
/// `start_command` on `start`. `is_alive` is polled once per cycle and
/// `stop` is called when the session is aborted or the client ends it.
#[async_trait]
pub trait Receiver: Send {
    async fn init_share_object(&mut self, _shared: SharedGraph) -> SyncResult<()> {
        Ok(())
    }

    async fn init_configure_object(&mut self, _configure: Graph) -> SyncResult<()> {
        Ok(())
    }

    async fn start_command(&mut self) -> SyncResult<()> {
        Ok(())
    }

    /// `false` ends the session as complete
    async fn is_alive(&mut self) -> SyncResult<bool> {
        Ok(true)
    }

    async fn stop(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Recv => "recv",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer for every message a communicator sends or receives
pub trait MessageLog: Send + Sync {
    fn log(&self, direction: Direction, command: &str, dump: &str);
}

/// Forwards messages to `tracing` at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMessageLog;

impl MessageLog for TracingMessageLog {
    fn log(&self, direction: Direction, command: &str, dump: &str) {
        debug!(direction = %direction, command, dump, "message");
    }
}
