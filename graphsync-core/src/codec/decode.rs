/*
    decode.rs - Snapshot to live graph

    Shells for every record are allocated before any is filled, so pointers
    (cycles included) always resolve to a handle. Sequences are filled with
    extend-on-write semantics: a slot missing from a sparse record stays
    `Null`.
*/

use super::{FieldValue, IdentityMap, NodeId, NodeRecord, Snapshot, SnapshotRoot};
use crate::error::{DecodeError, SyncResult};
use crate::graph::{
    CallArgs, Graph, Handle, Method, Node, NodeKind, NoopMethod, ObjectNode, Value, MAX_LIST_LEN,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Sends a call on a decoded object back to the side that owns it
#[async_trait]
pub trait FunctionForwarder: Send + Sync {
    async fn call(&self, node: NodeId, name: &str, args: CallArgs) -> SyncResult<Graph>;
}

/// Proxy standing in for a method that lives on the peer
pub struct RemoteMethod {
    node: NodeId,
    name: String,
    forwarder: Arc<dyn FunctionForwarder>,
}

impl RemoteMethod {
    pub fn new(node: NodeId, name: impl Into<String>, forwarder: Arc<dyn FunctionForwarder>) -> Self {
        RemoteMethod { node, name: name.into(), forwarder }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Method for RemoteMethod {
    async fn call(&self, args: CallArgs) -> SyncResult<Graph> {
        self.forwarder.call(self.node, &self.name, args).await
    }
}

/// Method for a remote call marker: a proxy, or a no-op without a forwarder
pub(crate) fn callable(
    node: NodeId,
    name: &str,
    forwarder: Option<&Arc<dyn FunctionForwarder>>,
) -> Arc<dyn Method> {
    match forwarder {
        Some(forwarder) => Arc::new(RemoteMethod::new(node, name, Arc::clone(forwarder))),
        None => Arc::new(NoopMethod),
    }
}

pub fn decode(
    snapshot: &Snapshot,
    forwarder: Option<Arc<dyn FunctionForwarder>>,
) -> SyncResult<(Graph, IdentityMap)> {
    let mut graph = Graph::new();
    let mut identity = IdentityMap::new();

    let root = match &snapshot.root {
        SnapshotRoot::Value(scalar) => {
            graph.set_root(scalar.clone());
            return Ok((graph, identity));
        }
        SnapshotRoot::Node(id) => *id,
    };
    if !snapshot.nodes.contains_key(&root) {
        return Err(DecodeError::UnresolvableRoot(root).into());
    }

    let mut shells = HashMap::with_capacity(snapshot.nodes.len());
    for (id, record) in &snapshot.nodes {
        let handle = graph.insert(Node::empty(record.kind()));
        shells.insert(*id, handle);
        identity.insert(handle, *id);
    }

    let pending: Vec<_> = snapshot
        .nodes
        .iter()
        .map(|(id, record)| (shells[id], *id, record))
        .collect();
    fill_nodes(&mut graph, &pending, &shells, forwarder.as_ref())?;

    graph.set_root(shells[&root]);
    identity.prune(&graph.sweep());

    debug!(root = %root, nodes = graph.len(), "decoded snapshot");
    Ok((graph, identity))
}

/// Fill shells from their records
///
/// Sets and dicts go last: their membership checks compare elements, which
/// must already hold their contents.
pub(crate) fn fill_nodes(
    graph: &mut Graph,
    pending: &[(Handle, NodeId, &NodeRecord)],
    lookup: &HashMap<NodeId, Handle>,
    forwarder: Option<&Arc<dyn FunctionForwarder>>,
) -> SyncResult<()> {
    let (hashed, ordered): (Vec<_>, Vec<_>) = pending
        .iter()
        .copied()
        .partition(|(_, _, record)| matches!(record.kind(), NodeKind::Set | NodeKind::Dict));

    for (handle, id, record) in ordered.into_iter().chain(hashed) {
        fill_node(graph, handle, id, record, lookup, forwarder)?;
    }
    Ok(())
}

fn fill_node(
    graph: &mut Graph,
    handle: Handle,
    id: NodeId,
    record: &NodeRecord,
    lookup: &HashMap<NodeId, Handle>,
    forwarder: Option<&Arc<dyn FunctionForwarder>>,
) -> SyncResult<()> {
    let resolve = |member: &dyn std::fmt::Display, field: &FieldValue| -> SyncResult<Value> {
        match field {
            FieldValue::Native(scalar) => Ok(Value::Scalar(scalar.clone())),
            FieldValue::Pointer(target) => lookup
                .get(target)
                .map(|h| Value::Ref(*h))
                .ok_or_else(|| DecodeError::DanglingPointer { node: id, target: *target }.into()),
            FieldValue::Function => {
                Err(DecodeError::BadFieldTag { node: id, member: member.to_string() }.into())
            }
        }
    };

    match record {
        NodeRecord::Object(members) => {
            let class = match graph.node(handle) {
                Some(Node::Object(existing)) => existing.class.clone(),
                _ => crate::graph::Class::anonymous(),
            };
            let mut object = ObjectNode::new(class);
            for (name, field) in members {
                match field {
                    FieldValue::Function => {
                        object.methods.insert(name.clone(), callable(id, name, forwarder));
                    }
                    _ => {
                        object.fields.insert(name.clone(), resolve(name, field)?);
                    }
                }
            }
            replace(graph, handle, Node::Object(object))
        }
        NodeRecord::List(slots) | NodeRecord::Tuple(slots) => {
            let mut items = Vec::new();
            for (position, field) in slots {
                if items.len() <= position.0 {
                    let len = position.0.checked_add(1).filter(|len| *len <= MAX_LIST_LEN).ok_or_else(|| {
                        DecodeError::Malformed(format!(
                            "{} {} has position {} past the limit of {} items",
                            record.kind(),
                            id,
                            position,
                            MAX_LIST_LEN
                        ))
                    })?;
                    items.resize(len, Value::NULL);
                }
                items[position.0] = resolve(position, field)?;
            }
            let node = match record.kind() {
                NodeKind::Tuple => Node::Tuple(items),
                _ => Node::List(items),
            };
            replace(graph, handle, node)
        }
        NodeRecord::Set(slots) => {
            replace(graph, handle, Node::Set(Vec::new()))?;
            for (position, field) in slots {
                graph.add(handle, resolve(position, field)?)?;
            }
            Ok(())
        }
        NodeRecord::Dict { keys, values } => {
            if keys.len() != values.len() {
                return Err(DecodeError::Malformed(format!(
                    "dict {} has {} keys and {} values",
                    id,
                    keys.len(),
                    values.len()
                ))
                .into());
            }
            replace(graph, handle, Node::Dict(Vec::new()))?;
            for (index, (key, value)) in keys.iter().zip(values).enumerate() {
                let key = resolve(&format!("keys[{}]", index), key)?;
                let value = resolve(&format!("values[{}]", index), value)?;
                graph.insert_entry(handle, key, value)?;
            }
            Ok(())
        }
    }
}

fn replace(graph: &mut Graph, handle: Handle, node: Node) -> SyncResult<()> {
    let slot = graph
        .node_mut(handle)
        .ok_or_else(|| DecodeError::Malformed(format!("no shell at {}", handle)))?;
    *slot = node;
    Ok(())
}
