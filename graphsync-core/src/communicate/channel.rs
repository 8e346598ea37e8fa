/*
    channel.rs - Connection, framing and message log behind one lock

    `exchange` holds the lock from send until the matching receive, so a
    forwarded call issued while the host is between cycles can never have
    its reply read by the session loop.
*/

use super::connection::Connection;
use super::frame::Framing;
use super::message::Message;
use super::receiver::{Direction, MessageLog};
use crate::codec::{decode, encode, EncodePolicy, FunctionForwarder, NodeId};
use crate::error::{SyncError, SyncResult};
use crate::graph::{CallArgs, Graph};
use crate::metrics::SessionStats;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub(crate) type SharedChannel<C> = Arc<Mutex<Channel<C>>>;

pub(crate) struct Channel<C> {
    connection: C,
    framing: Framing,
    log: Option<Arc<dyn MessageLog>>,
    stats: Arc<SessionStats>,
    /// Exception the client answered a forwarded call with
    remote_failure: Option<String>,
}

impl<C: Connection> Channel<C> {
    pub(crate) fn new(connection: C, framing: Framing, stats: Arc<SessionStats>) -> Self {
        Channel { connection, framing, log: None, stats, remote_failure: None }
    }

    pub(crate) fn set_log(&mut self, log: Arc<dyn MessageLog>) {
        self.log = Some(log);
    }

    pub(crate) fn take_remote_failure(&mut self) -> Option<String> {
        self.remote_failure.take()
    }

    pub(crate) async fn send(&mut self, message: &Message) -> SyncResult<()> {
        let text = message.to_json()?;
        if let Some(log) = &self.log {
            log.log(Direction::Send, message.command(), &text);
        }
        let frame = self.framing.encode(&text)?;
        let written = self
            .connection
            .send(&frame)
            .await
            .map_err(|e| SyncError::Send(e.to_string()))?;
        self.stats.record_sent(written);
        Ok(())
    }

    pub(crate) async fn recv(&mut self) -> SyncResult<Message> {
        let frame = self.connection.recv().await.map_err(|e| SyncError::Recv(e.to_string()))?;
        let text = self.framing.decode(&frame)?;
        self.stats.record_received(frame.len());

        let message = Message::parse(&text)?;
        if let Some(log) = &self.log {
            log.log(Direction::Recv, message.command(), &text);
        }
        Ok(message)
    }

    /// Send a message and wait for the peer's next one
    ///
    /// Fails with `ExceptionInClient` without touching the wire once a
    /// forwarded call has been answered with an exception.
    pub(crate) async fn exchange(&mut self, message: &Message) -> SyncResult<Message> {
        if let Some(failure) = &self.remote_failure {
            return Err(SyncError::ExceptionInClient(failure.clone()));
        }
        self.send(message).await?;
        self.recv().await
    }

    pub(crate) async fn close(&mut self) {
        if let Err(e) = self.connection.close().await {
            debug!(error = %e, "closing connection failed");
        }
    }
}

/// Forwards calls on decoded objects to the client over the channel
pub(crate) struct ChannelForwarder<C> {
    channel: SharedChannel<C>,
    stats: Arc<SessionStats>,
}

impl<C> ChannelForwarder<C> {
    pub(crate) fn new(channel: SharedChannel<C>, stats: Arc<SessionStats>) -> Self {
        ChannelForwarder { channel, stats }
    }
}

#[async_trait]
impl<C: Connection> FunctionForwarder for ChannelForwarder<C> {
    async fn call(&self, node: NodeId, name: &str, args: CallArgs) -> SyncResult<Graph> {
        let envelope = args.into_envelope(node, name);
        let data = encode(&envelope, &EncodePolicy::unlimited())?;

        let reply = {
            let mut channel = self.channel.lock().await;
            let reply = channel.exchange(&Message::Responce { data }).await?;
            if let Message::Exception { message } = &reply {
                channel.remote_failure = Some(message.clone());
            }
            reply
        };

        match reply {
            Message::Return { data } => {
                self.stats.record_remote_call(true);
                decode(&data, None).map(|(graph, _)| graph)
            }
            Message::Exception { message } => {
                self.stats.record_remote_call(false);
                warn!(node = %node, name, message = %message, "forwarded call raised");
                Err(SyncError::ExceptionInClient(message))
            }
            other => Err(SyncError::Communicate(format!(
                "unknown command in function result {}",
                other.command()
            ))),
        }
    }
}
