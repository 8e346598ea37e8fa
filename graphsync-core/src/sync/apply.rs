/*
    apply.rs - Replay a delta onto a live graph

    Order of operations:
    1. Index the graph by (remapped) node id, recording object parents
    2. Unlink deleted instances from their object parents
    3. Deleted members
    4. Created instances: allocate unknown shells, then fill them
    5. Created and updated members

    Members aimed at unknown nodes, and values that are unresolvable
    pointers or remote call markers, are skipped.
*/

use super::delta::{Delta, MemberChange, MemberKey};
use crate::codec::{fill_nodes, FieldValue, FunctionForwarder, IdentityMap, NodeId};
use crate::error::{SyncError, SyncResult};
use crate::graph::{Graph, Handle, Node, NodeKind, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Identity table and forwarder used while applying
#[derive(Default)]
pub struct ApplyContext<'a> {
    /// Resolves local handles to the ids the delta uses; extended with
    /// every node the delta creates
    pub identity: Option<&'a mut IdentityMap>,
    /// Turns remote call markers of created objects into proxies
    pub forwarder: Option<Arc<dyn FunctionForwarder>>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(identity: &'a mut IdentityMap) -> Self {
        ApplyContext { identity: Some(identity), forwarder: None }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn FunctionForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }
}

pub fn apply(graph: &mut Graph, delta: &Delta, mut ctx: ApplyContext<'_>) -> SyncResult<()> {
    if delta.is_empty() {
        return Ok(());
    }
    let index = Index::build(graph, ctx.identity.as_deref());

    for deleted in &delta.deleted_instance {
        if let Some(target) = index.handle(deleted.node) {
            index.unlink(graph, target);
        }
    }

    for change in &delta.deleted_member {
        delete_member(graph, &index.handles, change);
    }

    let mut lookup = index.handles.clone();
    let mut pending = Vec::with_capacity(delta.created_instance.len());
    for created in &delta.created_instance {
        let handle = match lookup.get(&created.node) {
            Some(handle) => *handle,
            None => {
                let handle = graph.insert(Node::empty(created.record.kind()));
                if let Some(identity) = ctx.identity.as_deref_mut() {
                    identity.insert(handle, created.node);
                }
                lookup.insert(created.node, handle);
                handle
            }
        };
        pending.push((handle, created.node, &created.record));
    }
    fill_nodes(graph, &pending, &lookup, ctx.forwarder.as_ref())?;

    for change in delta.created_member.iter().chain(&delta.updated_member) {
        write_member(graph, &lookup, change)?;
    }

    debug!(operations = delta.len(), created = pending.len(), "applied delta");
    Ok(())
}

struct Index {
    handles: HashMap<NodeId, Handle>,
    parents: HashMap<Handle, Vec<(Handle, String)>>,
}

impl Index {
    fn build(graph: &Graph, identity: Option<&IdentityMap>) -> Self {
        let mut handles = HashMap::new();
        let mut parents: HashMap<Handle, Vec<(Handle, String)>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<Handle> = graph.root_handle().into_iter().collect();

        while let Some(handle) = stack.pop() {
            if !seen.insert(handle) {
                continue;
            }
            let Some(node) = graph.node(handle) else {
                continue;
            };
            let id = identity
                .and_then(|identity| identity.get(handle))
                .unwrap_or_else(|| graph.native_id(handle));
            handles.insert(id, handle);

            if let Node::Object(object) = node {
                for (name, value) in &object.fields {
                    if let Value::Ref(child) = value {
                        parents.entry(*child).or_default().push((handle, name.clone()));
                    }
                }
            }
            stack.extend(node.references());
        }

        Index { handles, parents }
    }

    fn handle(&self, id: NodeId) -> Option<Handle> {
        self.handles.get(&id).copied()
    }

    fn unlink(&self, graph: &mut Graph, target: Handle) {
        for (parent, name) in self.parents.get(&target).into_iter().flatten() {
            if graph.field(*parent, name) == Some(&Value::Ref(target)) {
                graph.remove_field(*parent, name);
                trace!(parent = %parent, field = %name, "unlinked deleted instance");
            }
        }
    }
}

fn resolve(field: &FieldValue, lookup: &HashMap<NodeId, Handle>) -> Option<Value> {
    match field {
        FieldValue::Native(scalar) => Some(Value::Scalar(scalar.clone())),
        FieldValue::Pointer(id) => lookup.get(id).map(|handle| Value::Ref(*handle)),
        FieldValue::Function => None,
    }
}

fn delete_member(graph: &mut Graph, lookup: &HashMap<NodeId, Handle>, change: &MemberChange) {
    let Some(target) = lookup.get(&change.node).copied() else {
        return;
    };
    match (graph.kind(target), &change.key) {
        (Some(NodeKind::Object), MemberKey::Field(name)) => {
            graph.remove_field(target, name);
            if let Some(Node::Object(object)) = graph.node_mut(target) {
                object.methods.remove(name);
            }
        }
        (Some(NodeKind::List), key) => {
            if let Some(index) = key.index() {
                if index < graph.len_of(target).unwrap_or(0) {
                    // slot stays, so later positions keep their meaning
                    let _ = graph.set_item(target, index, Value::NULL);
                }
            }
        }
        (Some(NodeKind::Set), MemberKey::Entry(element)) => {
            if let Some(element) = resolve(element, lookup) {
                graph.discard(target, &element);
            }
        }
        (Some(NodeKind::Dict), MemberKey::Entry(key)) => {
            if let Some(key) = resolve(key, lookup) {
                graph.remove_entry(target, &key);
            }
        }
        _ => {}
    }
}

fn write_member(graph: &mut Graph, lookup: &HashMap<NodeId, Handle>, change: &MemberChange) -> SyncResult<()> {
    let Some(target) = lookup.get(&change.node).copied() else {
        return Ok(());
    };
    let Some(kind) = graph.kind(target) else {
        return Ok(());
    };

    match (kind, &change.key) {
        (NodeKind::Tuple, _) => Err(SyncError::AttributeCannotUpdate(format!(
            "'tuple' object {} does not support item assignment",
            change.node
        ))),
        (NodeKind::Set, MemberKey::Entry(element)) => {
            if let Some(element) = resolve(element, lookup) {
                graph.add(target, element)?;
            }
            Ok(())
        }
        (NodeKind::Dict, MemberKey::Entry(key)) => {
            if let (Some(key), Some(value)) = (resolve(key, lookup), resolve(&change.value, lookup)) {
                graph.insert_entry(target, key, value)?;
            }
            Ok(())
        }
        (NodeKind::Object, MemberKey::Field(name)) => {
            if let Some(value) = resolve(&change.value, lookup) {
                graph.set_field(target, name.clone(), value)?;
            }
            Ok(())
        }
        (NodeKind::List, key) => {
            if let (Some(index), Some(value)) = (key.index(), resolve(&change.value, lookup)) {
                graph.set_item(target, index, value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, EncodePolicy, NodeRecord, Snapshot};
    use crate::graph::{Class, Scalar};
    use crate::sync::{diff, InstanceChange};
    use std::collections::BTreeMap;

    fn snap(graph: &Graph) -> Snapshot {
        encode(graph, &EncodePolicy::unlimited()).unwrap()
    }

    fn object_with(graph: &mut Graph, fields: &[(&str, &str)]) -> Handle {
        let handle = graph.object(Class::new("C"));
        for (name, value) in fields {
            graph.set_field(handle, *name, *value).unwrap();
        }
        handle
    }

    #[test]
    fn test_apply_member_update() {
        let mut graph = Graph::new();
        let c = object_with(&mut graph, &[("hogehoge", "value1")]);
        graph.set_root(c);

        let delta = Delta {
            updated_member: vec![MemberChange::new(
                graph.native_id(c),
                MemberKey::Field("hogehoge".into()),
                FieldValue::Native(Scalar::from("value2")),
            )],
            ..Delta::default()
        };
        apply(&mut graph, &delta, ApplyContext::default()).unwrap();
        assert_eq!(graph.field(c, "hogehoge").and_then(Value::as_str), Some("value2"));
    }

    #[test]
    fn test_created_instance_is_linked_and_registered() {
        let mut graph = Graph::new();
        let c = object_with(&mut graph, &[]);
        graph.set_root(c);

        let mut record = BTreeMap::new();
        record.insert("boohoo".to_string(), FieldValue::Native(Scalar::from("value2")));
        let delta = Delta {
            created_member: vec![MemberChange::new(
                graph.native_id(c),
                MemberKey::Field("hogehoge3".into()),
                FieldValue::Pointer(NodeId(1234)),
            )],
            created_instance: vec![InstanceChange { node: NodeId(1234), record: NodeRecord::Object(record) }],
            ..Delta::default()
        };

        let mut identity = IdentityMap::new();
        apply(&mut graph, &delta, ApplyContext::new(&mut identity)).unwrap();

        let child = graph.field(c, "hogehoge3").and_then(Value::as_handle).unwrap();
        assert_eq!(graph.field(child, "boohoo").and_then(Value::as_str), Some("value2"));
        assert_eq!(identity.get(child), Some(NodeId(1234)));

        let again = encode(&graph, &EncodePolicy::unlimited().with_identity(&identity)).unwrap();
        assert!(again.nodes.contains_key(&NodeId(1234)));
    }

    #[test]
    fn test_deleted_instance_unlinks_parent_field() {
        let mut graph = Graph::new();
        let c1 = object_with(&mut graph, &[]);
        let c2 = object_with(&mut graph, &[("boohoo", "value2")]);
        graph.set_field(c1, "hogehoge2", c2).unwrap();
        graph.set_root(c1);

        let delta = Delta {
            deleted_instance: vec![InstanceChange {
                node: graph.native_id(c2),
                record: NodeRecord::Object(BTreeMap::new()),
            }],
            ..Delta::default()
        };
        apply(&mut graph, &delta, ApplyContext::default()).unwrap();
        assert!(graph.field(c1, "hogehoge2").is_none());
    }

    #[test]
    fn test_list_delete_nulls_in_place() {
        let mut graph = Graph::new();
        let list = graph.list(vec![Value::from(1), Value::from(2), Value::from(3)]);
        graph.set_root(list);

        let id = graph.native_id(list);
        let delta = Delta {
            deleted_member: vec![
                MemberChange::new(id, MemberKey::Index(1), FieldValue::Native(Scalar::Int(2))),
                MemberChange::new(id, MemberKey::Index(9), FieldValue::Native(Scalar::Int(0))),
            ],
            created_member: vec![MemberChange::new(id, MemberKey::Index(5), FieldValue::Native(Scalar::Int(6)))],
            ..Delta::default()
        };
        apply(&mut graph, &delta, ApplyContext::default()).unwrap();
        assert!(graph.item(list, 1).unwrap().is_null());
        assert_eq!(graph.len_of(list), Some(6));
        assert_eq!(graph.item(list, 5).and_then(Value::as_int), Some(6));
    }

    #[test]
    fn test_tuple_update_is_rejected_but_delete_is_ignored() {
        let mut graph = Graph::new();
        let tuple = graph.tuple(vec![Value::from(1)]);
        graph.set_root(tuple);
        let id = graph.native_id(tuple);

        let delete = Delta {
            deleted_member: vec![MemberChange::new(id, MemberKey::Index(0), FieldValue::Native(Scalar::Int(1)))],
            ..Delta::default()
        };
        apply(&mut graph, &delete, ApplyContext::default()).unwrap();
        assert_eq!(graph.item(tuple, 0).and_then(Value::as_int), Some(1));

        let update = Delta {
            updated_member: vec![MemberChange::new(id, MemberKey::Index(0), FieldValue::Native(Scalar::Int(2)))],
            ..Delta::default()
        };
        let err = apply(&mut graph, &update, ApplyContext::default()).unwrap_err();
        assert_eq!(err.type_name(), "AttributeCannotUpdateError");
    }

    #[test]
    fn test_unknown_targets_are_skipped() {
        let mut graph = Graph::new();
        let c = object_with(&mut graph, &[("a", "b")]);
        graph.set_root(c);
        let delta = Delta {
            updated_member: vec![
                MemberChange::new(NodeId(77), MemberKey::Field("a".into()), FieldValue::Native(Scalar::Null)),
                MemberChange::new(graph.native_id(c), MemberKey::Field("a".into()), FieldValue::Pointer(NodeId(88))),
                MemberChange::new(graph.native_id(c), MemberKey::Field("a".into()), FieldValue::Function),
            ],
            ..Delta::default()
        };
        apply(&mut graph, &delta, ApplyContext::default()).unwrap();
        assert_eq!(graph.field(c, "a").and_then(Value::as_str), Some("b"));
    }

    #[test]
    fn test_diff_then_apply_reaches_target() {
        let mut graph = Graph::new();
        let root = graph.object(Class::new("Root"));
        let d = graph.dict(vec![(Value::from("x"), Value::from(1))]).unwrap();
        let s = graph.set(vec![Value::from(1), Value::from(2)]).unwrap();
        graph.set_field(root, "d", d).unwrap();
        graph.set_field(root, "s", s).unwrap();
        graph.set_root(root);
        let a = snap(&graph);

        graph.insert_entry(d, "y", 2).unwrap();
        graph.discard(s, &Value::from(1));
        graph.add(s, 3).unwrap();
        let extra = graph.list(vec![Value::from("new")]);
        graph.set_field(root, "extra", extra).unwrap();
        let b = snap(&graph);

        let (mut replica, mut identity) = decode(&a, None).unwrap();
        apply(&mut replica, &diff(&a, &b), ApplyContext::new(&mut identity)).unwrap();
        let rebuilt = encode(&replica, &EncodePolicy::unlimited().with_identity(&identity)).unwrap();
        assert_eq!(rebuilt, b);
    }
}
