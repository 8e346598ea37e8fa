//! Conversion between live graphs and snapshots
//!
//! Encoding walks the graph depth-first from its root and records every
//! composite node once, under either its native id or the id an
//! [`IdentityMap`] says the peer knows it by. Decoding rebuilds a graph from
//! a snapshot and produces the identity map for it.

mod decode;
mod encode;
mod snapshot;

pub use decode::{decode, FunctionForwarder, RemoteMethod};
pub use encode::{encode, encode_with_dispatcher, EncodePolicy, RemoteCallDispatcher};
pub use snapshot::{FieldValue, NodeId, NodeRecord, Position, Snapshot, SnapshotRoot};

pub(crate) use decode::fill_nodes;

use crate::graph::Handle;
use std::collections::HashMap;

/// Local handle to origin node id table
///
/// Lives for one session. Decode fills it, encode reads it as the id
/// override, apply extends it with every node it creates.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_handle: HashMap<Handle, NodeId>,
    by_id: HashMap<NodeId, Handle>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: Handle, id: NodeId) {
        if let Some(previous) = self.by_handle.insert(handle, id) {
            self.by_id.remove(&previous);
        }
        if let Some(stale) = self.by_id.insert(id, handle) {
            if stale != handle {
                self.by_handle.remove(&stale);
            }
        }
    }

    pub fn get(&self, handle: Handle) -> Option<NodeId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn handle_of(&self, id: NodeId) -> Option<Handle> {
        self.by_id.get(&id).copied()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<NodeId> {
        let id = self.by_handle.remove(&handle)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Forget handles freed by a sweep
    pub fn prune(&mut self, freed: &[Handle]) {
        for handle in freed {
            self.remove(*handle);
        }
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, NodeId)> + '_ {
        self.by_handle.iter().map(|(h, id)| (*h, *id))
    }
}
