//! graphsync-core: keep an object graph consistent between two processes
//!
//! - [`graph`]: arena-backed live graphs of objects and containers
//! - [`codec`]: flat, identity-keyed snapshots of a graph and back
//! - [`sync`]: diff, merge and apply of snapshot deltas
//! - [`communicate`]: the host/client session over a line-framed connection

pub mod codec;
pub mod communicate;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod sync;

pub use codec::{decode, encode, EncodePolicy, IdentityMap, NodeId, Snapshot};
pub use communicate::{
    ClientOptions, Communicator, Connection, HostOutcome, LineConnection, MemoryConnection, Receiver,
};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use graph::{shared, CallArgs, Class, Graph, Handle, Method, Scalar, SharedGraph, Value};
pub use logging::{init_logging, LogLevel};
pub use sync::{apply, diff, merge, ConflictPolicy, Delta};
