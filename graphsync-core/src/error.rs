/*
    error.rs - Error taxonomy for graph synchronization

    Every component (codec, diff/merge/apply, communicator) reports failures
    through `SyncError`. The communicator turns any of them into a terminal
    `exception` message rendered as "<TypeName>(<message>)".
*/

use crate::codec::NodeId;
use crate::config::ConfigError;
use thiserror::Error;

/// Errors that can occur while encoding, reconciling or exchanging graphs
#[derive(Debug, Error)]
pub enum SyncError {
    /// Traversal produced no node table for a composite root
    #[error("{0}")]
    Encode(String),

    /// Snapshot or delta violates a structural invariant
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Mutation target refuses the change (tuple slot, unhashable key)
    #[error("{0}")]
    AttributeCannotUpdate(String),

    /// Forwarded call names a node or member the dispatcher does not know
    #[error("{0}")]
    RemoteCall(String),

    /// Protocol violation: unknown command, malformed message
    #[error("{0}")]
    Communicate(String),

    /// Writing a frame to the connection failed
    #[error("{0}")]
    Send(String),

    /// Reading or decoding a frame failed
    #[error("{0}")]
    Recv(String),

    /// Handshake reply did not match what was sent
    #[error("{0}")]
    Initial(String),

    /// Session could not be brought up
    #[error("{0}")]
    CannotStart(String),

    /// The host reported an exception
    #[error("{0}")]
    ExceptionInServer(String),

    /// The client reported an exception
    #[error("{0}")]
    ExceptionInClient(String),

    /// Application-level exception raised by a method or receiver
    #[error("{}", .0.message)]
    Raised(Raised),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Name used when the error crosses the wire
    pub fn type_name(&self) -> &str {
        match self {
            SyncError::Encode(_) => "EncodeError",
            SyncError::Decode(_) => "DecodeError",
            SyncError::AttributeCannotUpdate(_) => "AttributeCannotUpdateError",
            SyncError::RemoteCall(_) => "RemoteCallError",
            SyncError::Communicate(_) => "CommunicateError",
            SyncError::Send(_) => "CommunicateSendError",
            SyncError::Recv(_) => "CommunicateRecvError",
            SyncError::Initial(_) => "CommunicateInitialError",
            SyncError::CannotStart(_) => "CommunicateCannotStartError",
            SyncError::ExceptionInServer(_) => "ExceptionInServerError",
            SyncError::ExceptionInClient(_) => "ExceptionInClientError",
            SyncError::Raised(raised) => &raised.kind,
            SyncError::Config(_) => "ConfigError",
        }
    }

    /// Render as `<TypeName>(<message>)`
    pub fn render(&self) -> String {
        format!("{}({})", self.type_name(), self)
    }

    /// Shorthand for raising an application exception
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Raised(Raised::new(kind, message))
    }
}

/// An exception raised by user code, carried by kind and message only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raised {
    pub kind: String,
    pub message: String,
}

impl Raised {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Raised { kind: kind.into(), message: message.into() }
    }
}

/// Structural failures found while decoding snapshots or applying deltas
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Root id is not present in the node table
    #[error("root {0} is not in the node table")]
    UnresolvableRoot(NodeId),

    /// A pointer names a node that does not exist
    #[error("node {node} points at missing node {target}")]
    DanglingPointer { node: NodeId, target: NodeId },

    /// A field carries a tag that is illegal in its record kind
    #[error("node {node} has an invalid field tag at {member}")]
    BadFieldTag { node: NodeId, member: String },

    /// Record shape is inconsistent
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(DecodeError::Malformed(err.to_string()))
    }
}
