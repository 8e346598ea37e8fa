/*
    client.rs - Session loop of the side that owns the graph

    Handshake:
    1. echo{session}     -> same echo back
    2. echo{start_time}  -> same echo back
    3. init{shared_object} -> init{data: "success"}
    4. start{conflict, configure}, no reply

    After that the client only answers: snapshots for `sync`, local apply
    for `update`, and real method calls for `responce`.
*/

use super::channel::SharedChannel;
use super::connection::Connection;
use super::message::{EndResult, Message, INIT_SUCCESS};
use crate::codec::{decode, encode, encode_with_dispatcher, EncodePolicy, IdentityMap, RemoteCallDispatcher, Snapshot};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::graph::{CallArgs, Graph, SharedGraph};
use crate::sync::{apply, ApplyContext, ConflictPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How the client shares its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub conflict_policy: ConflictPolicy,
    /// Only objects whose class opted in to sharing are sent
    pub snippet_share_only: bool,
    /// Nodes this many hops from the root or more are not sent
    pub max_depth: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for ClientOptions {
    fn from(config: &SyncConfig) -> Self {
        ClientOptions {
            conflict_policy: config.conflict_policy,
            snippet_share_only: config.snippet_share_only,
            max_depth: config.max_depth(),
        }
    }
}

impl ClientOptions {
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_snippet_share_only(mut self, enabled: bool) -> Self {
        self.snippet_share_only = enabled;
        self
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }
}

enum Step {
    Reply(Message),
    Finished,
    ServerFailed(String),
}

pub(crate) struct ClientSession<C> {
    channel: SharedChannel<C>,
    abort: Arc<AtomicBool>,
    shared: SharedGraph,
    options: ClientOptions,
    identity: IdentityMap,
    dispatcher: RemoteCallDispatcher,
}

impl<C: Connection> ClientSession<C> {
    pub(crate) fn new(
        channel: SharedChannel<C>,
        abort: Arc<AtomicBool>,
        shared: SharedGraph,
        options: ClientOptions,
    ) -> Self {
        ClientSession {
            channel,
            abort,
            shared,
            options,
            identity: IdentityMap::new(),
            dispatcher: RemoteCallDispatcher::default(),
        }
    }

    pub(crate) async fn run(mut self, configure: Graph) -> SyncResult<()> {
        if let Err(e) = self.handshake(&configure).await {
            warn!(error = %e.render(), "session could not start");
            self.channel.lock().await.close().await;
            return Err(SyncError::CannotStart(e.to_string()));
        }
        info!(conflict = ?self.options.conflict_policy, "client session started");

        let result = self.serve().await;
        self.channel.lock().await.close().await;

        match &result {
            Ok(()) => info!("client session ended"),
            Err(e) => warn!(error = %e.render(), "client session failed"),
        }
        result
    }

    async fn handshake(&mut self, configure: &Graph) -> SyncResult<()> {
        let session = Uuid::new_v4().to_string();
        let reply = self.exchange(Message::Echo { session: Some(session.clone()), start_time: None }).await?;
        expect(reply, "session initial", |m| {
            matches!(m, Message::Echo { session: Some(echoed), .. } if *echoed == session)
        })?;

        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();
        let reply = self.exchange(Message::Echo { session: None, start_time: Some(start_time) }).await?;
        expect(reply, "echo check", |m| {
            matches!(m, Message::Echo { start_time: Some(echoed), .. } if *echoed == start_time)
        })?;

        let snapshot = self.snapshot().await?;
        let reply = self.exchange(Message::Init { shared_object: Some(snapshot), data: None }).await?;
        expect(reply, "shared_object initial", |m| {
            matches!(m, Message::Init { data: Some(data), .. } if data == INIT_SUCCESS)
        })?;

        let configure = encode(configure, &EncodePolicy::unlimited())?;
        let start = Message::Start { conflict: self.options.conflict_policy.code(), configure };
        self.channel.lock().await.send(&start).await
    }

    async fn serve(&mut self) -> SyncResult<()> {
        loop {
            let received = self.channel.lock().await.recv().await;
            let inbound = match received {
                Ok(message) => message,
                Err(e) => {
                    self.send_quietly(&Message::end(EndResult::Error)).await;
                    return Err(e);
                }
            };
            if self.abort.load(Ordering::SeqCst) {
                self.send_quietly(&Message::end(EndResult::Abort)).await;
                return Ok(());
            }

            match self.step(inbound).await {
                Ok(Step::Reply(message)) => self.channel.lock().await.send(&message).await?,
                Ok(Step::Finished) => return Ok(()),
                Ok(Step::ServerFailed(message)) => {
                    self.send_quietly(&Message::end(EndResult::Exception)).await;
                    return Err(SyncError::ExceptionInServer(message));
                }
                Err(e) => {
                    let rendered = e.render();
                    self.send_quietly(&Message::Exception { message: rendered.clone() }).await;
                    return Err(SyncError::ExceptionInClient(rendered));
                }
            }
        }
    }

    async fn step(&mut self, inbound: Message) -> SyncResult<Step> {
        match inbound {
            Message::Responce { data } => {
                let (envelope, _) = decode(&data, None)?;
                let (node, name, args) = CallArgs::from_envelope(envelope)?;
                debug!(node = %node, name = %name, args = args.len(), "serving forwarded call");
                let result = self.dispatcher.dispatch(node, &name, args).await?;
                let data = encode(&result, &EncodePolicy::unlimited())?;
                Ok(Step::Reply(Message::Return { data }))
            }
            Message::Sync { .. } => {
                let snapshot = self.snapshot().await?;
                Ok(Step::Reply(Message::Sync { shared_object: Some(snapshot) }))
            }
            Message::Update { data } => {
                let mut graph = self.shared.lock().await;
                apply(&mut graph, &data, ApplyContext::new(&mut self.identity))?;
                self.identity.prune(&graph.sweep());
                Ok(Step::Reply(Message::Updated))
            }
            Message::End { result, .. } => {
                debug!(result = ?result, "host ended the session");
                Ok(Step::Finished)
            }
            Message::Exception { message } => Ok(Step::ServerFailed(message)),
            other => Err(SyncError::Communicate(format!(
                "unknown command received from host - {}",
                other.command()
            ))),
        }
    }

    /// Encode the shared graph and keep its dispatcher for forwarded calls
    async fn snapshot(&mut self) -> SyncResult<Snapshot> {
        let graph = self.shared.lock().await;
        let policy = EncodePolicy {
            snippet_share_only: self.options.snippet_share_only,
            max_depth: self.options.max_depth,
            identity: Some(&self.identity),
        };
        let (snapshot, dispatcher) = encode_with_dispatcher(&graph, &policy)?;
        drop(graph);
        self.dispatcher = dispatcher;
        Ok(snapshot)
    }

    async fn exchange(&self, message: Message) -> SyncResult<Message> {
        self.channel.lock().await.exchange(&message).await
    }

    async fn send_quietly(&self, message: &Message) {
        if let Err(e) = self.channel.lock().await.send(message).await {
            debug!(error = %e, command = message.command(), "final message not delivered");
        }
    }
}

fn expect(reply: Message, stage: &str, accept: impl FnOnce(&Message) -> bool) -> SyncResult<()> {
    if let Message::Exception { message } = &reply {
        return Err(SyncError::Initial(format!("exception in {} - {}", stage, message)));
    }
    if accept(&reply) {
        Ok(())
    } else {
        Err(SyncError::Initial(format!("{} error", stage)))
    }
}
