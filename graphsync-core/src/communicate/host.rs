/*
    host.rs - Session loop of the side that adopts the client's graph

    Phases: AwaitInit -> AwaitStart -> Running

    Each cycle:
    1. End the session if the receiver finished or abort was requested
    2. Handle the inbound message, possibly producing a reply
    3. Without a reply, wait out the rest of the period and ask for `sync`
    4. Exchange the reply for the next inbound message

    Between exchanges the channel is free, so the receiver may forward
    calls to the client from `is_alive`.
*/

use super::channel::{ChannelForwarder, SharedChannel};
use super::connection::Connection;
use super::message::{EndResult, Message, INIT_SUCCESS};
use super::receiver::Receiver;
use super::HostOutcome;
use crate::codec::{
    decode, encode, encode_with_dispatcher, EncodePolicy, FunctionForwarder, IdentityMap,
    RemoteCallDispatcher, Snapshot,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::graph::{shared, CallArgs, SharedGraph};
use crate::metrics::{SessionStats, Timer, SYNC_DURATION_MS};
use crate::sync::{apply, diff, ApplyContext, ConflictPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitInit,
    AwaitStart,
    Running,
}

enum Step {
    Reply(Message),
    Idle,
    Finish(HostOutcome),
}

pub(crate) struct HostSession<'r, C, R> {
    channel: SharedChannel<C>,
    forwarder: Arc<dyn FunctionForwarder>,
    receiver: &'r mut R,
    config: SyncConfig,
    abort: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
    phase: Phase,
    conflict: ConflictPolicy,
    shared: Option<SharedGraph>,
    identity: IdentityMap,
    base: Option<Snapshot>,
    dispatcher: RemoteCallDispatcher,
}

impl<'r, C: Connection, R: Receiver> HostSession<'r, C, R> {
    pub(crate) fn new(
        channel: SharedChannel<C>,
        receiver: &'r mut R,
        config: SyncConfig,
        abort: Arc<AtomicBool>,
        stats: Arc<SessionStats>,
    ) -> Self {
        let forwarder: Arc<dyn FunctionForwarder> =
            Arc::new(ChannelForwarder::new(Arc::clone(&channel), Arc::clone(&stats)));
        HostSession {
            channel,
            forwarder,
            receiver,
            conflict: config.conflict_policy,
            config,
            abort,
            stats,
            phase: Phase::AwaitInit,
            shared: None,
            identity: IdentityMap::new(),
            base: None,
            dispatcher: RemoteCallDispatcher::default(),
        }
    }

    pub(crate) async fn run(mut self) -> SyncResult<HostOutcome> {
        info!(frequency = self.config.sync_frequency, "host session started");
        let first = self.channel.lock().await.recv().await;
        let result = match first {
            Ok(inbound) => self.serve(inbound).await,
            Err(e) => Err(e),
        };
        self.channel.lock().await.close().await;

        match &result {
            Ok(outcome) => info!(outcome = ?outcome, "host session ended"),
            Err(e) => warn!(error = %e.render(), "host session failed"),
        }
        result
    }

    async fn serve(&mut self, mut inbound: Message) -> SyncResult<HostOutcome> {
        let period = self.config.sync_period();
        loop {
            let cycle_start = Instant::now();

            let reply = match self.step(inbound).await {
                Ok(Step::Reply(message)) => message,
                Ok(Step::Idle) => {
                    sleep_until(cycle_start + period).await;
                    Message::Sync { shared_object: None }
                }
                Ok(Step::Finish(outcome)) => return Ok(outcome),
                Err(SyncError::ExceptionInClient(message)) => {
                    return Err(self.client_failed(message).await);
                }
                Err(e) => {
                    self.send_quietly(&Message::exception(&e)).await;
                    return Err(e);
                }
            };

            let exchanged = self.channel.lock().await.exchange(&reply).await;
            inbound = match exchanged {
                Ok(message) => message,
                Err(SyncError::ExceptionInClient(message)) => {
                    return Err(self.client_failed(message).await);
                }
                Err(e) => {
                    self.send_quietly(&Message::end(EndResult::Error)).await;
                    return Err(e);
                }
            };
        }
    }

    async fn step(&mut self, inbound: Message) -> SyncResult<Step> {
        if !self.receiver.is_alive().await? {
            self.send(&Message::end(EndResult::Complete)).await?;
            return Ok(Step::Finish(HostOutcome::Completed));
        }
        if self.abort.load(Ordering::SeqCst) {
            self.receiver.stop().await?;
            self.send(&Message::end(EndResult::Abort)).await?;
            return Ok(Step::Finish(HostOutcome::Aborted));
        }
        // The receiver may have swallowed the error of a forwarded call
        if let Some(failure) = self.channel.lock().await.take_remote_failure() {
            return Err(SyncError::ExceptionInClient(failure));
        }

        match inbound {
            Message::Init { shared_object: Some(snapshot), .. } if self.phase == Phase::AwaitInit => {
                let (graph, identity) = decode(&snapshot, Some(Arc::clone(&self.forwarder)))?;
                let graph = shared(graph);
                self.identity = identity;
                self.base = Some(snapshot);
                self.shared = Some(Arc::clone(&graph));
                self.receiver.init_share_object(graph).await?;
                self.phase = Phase::AwaitStart;
                debug!(nodes = self.identity.len(), "shared graph adopted");
                Ok(Step::Reply(Message::Init { shared_object: None, data: Some(INIT_SUCCESS.to_string()) }))
            }
            Message::Start { conflict, configure } if self.phase == Phase::AwaitStart => {
                self.conflict = ConflictPolicy::from_code(conflict).ok_or_else(|| {
                    SyncError::Communicate(format!("unknown conflict policy {}", conflict))
                })?;
                let (configure, _) = decode(&configure, None)?;
                self.receiver.init_configure_object(configure).await?;
                self.receiver.start_command().await?;
                self.phase = Phase::Running;
                debug!(conflict = ?self.conflict, "session running");
                Ok(Step::Idle)
            }
            Message::Sync { shared_object: Some(client) } if self.phase == Phase::Running => {
                self.reconcile(client).await.map(Step::Reply)
            }
            Message::Updated => Ok(Step::Idle),
            message @ Message::Echo { .. } => Ok(Step::Reply(message)),
            Message::Responce { data } => {
                let (envelope, _) = decode(&data, None)?;
                let (node, name, args) = CallArgs::from_envelope(envelope)?;
                let result = self.dispatcher.dispatch(node, &name, args).await?;
                let data = encode(&result, &EncodePolicy::unlimited())?;
                Ok(Step::Reply(Message::Return { data }))
            }
            Message::End { result, .. } => {
                debug!(result = ?result, "client ended the session");
                self.receiver.stop().await?;
                Ok(Step::Finish(HostOutcome::ClientEnded))
            }
            Message::Exception { message } => Err(SyncError::ExceptionInClient(message)),
            other @ (Message::Init { .. } | Message::Start { .. } | Message::Sync { .. }) => {
                Err(SyncError::Communicate(format!(
                    "unexpected {} from client in phase {:?}",
                    other.command(),
                    self.phase
                )))
            }
            other => Err(SyncError::Communicate(format!(
                "unknown command received from client - {}",
                other.command()
            ))),
        }
    }

    /// Merge both sides' changes into the host graph and tell the client
    /// what it is missing
    async fn reconcile(&mut self, client: Snapshot) -> SyncResult<Message> {
        let timer = Timer::new(SYNC_DURATION_MS);
        let (graph, base) = match (&self.shared, &self.base) {
            (Some(graph), Some(base)) => (Arc::clone(graph), base),
            _ => return Err(SyncError::Communicate("sync before init".to_string())),
        };
        let mut graph = graph.lock().await;

        let current = encode(&graph, &EncodePolicy::unlimited().with_identity(&self.identity))?;
        let host_delta = diff(base, &current);
        let client_delta = diff(base, &client);
        let merged = self.conflict.merge(&host_delta, &client_delta);

        let ctx = ApplyContext::new(&mut self.identity).with_forwarder(Arc::clone(&self.forwarder));
        apply(&mut graph, &merged, ctx)?;
        self.identity.prune(&graph.sweep());

        let policy = EncodePolicy::unlimited().with_identity(&self.identity);
        let (current, dispatcher) = encode_with_dispatcher(&graph, &policy)?;
        drop(graph);

        let update = diff(&client, &current);
        self.base = Some(current);
        self.dispatcher = dispatcher;

        self.stats.record_sync_cycle(merged.len());
        let elapsed = timer.stop();
        debug!(
            host = host_delta.len(),
            client = client_delta.len(),
            merged = merged.len(),
            update = update.len(),
            elapsed_ms = elapsed,
            "reconciled"
        );
        Ok(Message::Update { data: update })
    }

    async fn send(&self, message: &Message) -> SyncResult<()> {
        self.channel.lock().await.send(message).await
    }

    async fn send_quietly(&self, message: &Message) {
        if let Err(e) = self.send(message).await {
            debug!(error = %e, command = message.command(), "final message not delivered");
        }
    }

    async fn client_failed(&self, message: String) -> SyncError {
        let end = Message::End { result: EndResult::Exception, message: Some(message.clone()) };
        self.send_quietly(&end).await;
        SyncError::ExceptionInClient(message)
    }
}
