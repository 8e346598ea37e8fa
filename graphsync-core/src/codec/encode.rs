/*
    encode.rs - Live graph to snapshot

    Traversal is depth-first from the root and memoized on handles, so it
    terminates on cycles and records each node once. A member that refers to
    a composite left out by the policy is left out of its parent record.
*/

use super::{FieldValue, IdentityMap, NodeId, NodeRecord, Position, Snapshot, SnapshotRoot};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::graph::{CallArgs, Graph, Handle, Method, Node, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// What an encode includes and which ids it uses
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodePolicy<'a> {
    /// Only traverse objects whose class opted in to sharing
    pub snippet_share_only: bool,
    /// Nodes at this many hops from the root or more are left out
    pub max_depth: Option<usize>,
    /// Ids the peer already knows, preferred over native ids
    pub identity: Option<&'a IdentityMap>,
}

impl<'a> EncodePolicy<'a> {
    /// Everything reachable, under native ids
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Share filter and depth limit as configured
    pub fn from_config(config: &SyncConfig) -> Self {
        EncodePolicy {
            snippet_share_only: config.snippet_share_only,
            max_depth: config.max_depth(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: &'a IdentityMap) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// Routes forwarded calls to the real methods of an encoded graph
#[derive(Clone, Default)]
pub struct RemoteCallDispatcher {
    nodes: HashSet<NodeId>,
    methods: HashMap<(NodeId, String), Arc<dyn Method>>,
}

impl RemoteCallDispatcher {
    pub fn get(&self, node: NodeId, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.get(&(node, name.to_string())).cloned()
    }

    pub async fn dispatch(&self, node: NodeId, name: &str, args: CallArgs) -> SyncResult<Graph> {
        let method = self.get(node, name).ok_or_else(|| {
            if self.nodes.contains(&node) {
                SyncError::RemoteCall(format!("instance {} has no member {}", node, name))
            } else {
                SyncError::RemoteCall(format!("unknown instance {}", node))
            }
        })?;
        method.call(args).await
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for RemoteCallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCallDispatcher")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn encode(graph: &Graph, policy: &EncodePolicy<'_>) -> SyncResult<Snapshot> {
    encode_with_dispatcher(graph, policy).map(|(snapshot, _)| snapshot)
}

pub fn encode_with_dispatcher(
    graph: &Graph,
    policy: &EncodePolicy<'_>,
) -> SyncResult<(Snapshot, RemoteCallDispatcher)> {
    let handle = match graph.root() {
        Value::Scalar(scalar) => {
            return Ok((Snapshot::scalar(scalar.clone()), RemoteCallDispatcher::default()))
        }
        Value::Ref(handle) => *handle,
    };

    let mut encoder = Encoder {
        graph,
        policy,
        ids: HashMap::new(),
        nodes: BTreeMap::new(),
        dispatcher: RemoteCallDispatcher::default(),
    };
    let root = encoder.visit(handle, 0).ok_or_else(|| {
        SyncError::Encode(format!("root {} was excluded by the encode policy", handle))
    })?;

    trace!(root = %root, nodes = encoder.nodes.len(), "encoded graph");
    let snapshot = Snapshot { root: SnapshotRoot::Node(root), nodes: encoder.nodes };
    Ok((snapshot, encoder.dispatcher))
}

struct Encoder<'g, 'p> {
    graph: &'g Graph,
    policy: &'p EncodePolicy<'p>,
    ids: HashMap<Handle, NodeId>,
    nodes: BTreeMap<NodeId, NodeRecord>,
    dispatcher: RemoteCallDispatcher,
}

impl Encoder<'_, '_> {
    fn visit(&mut self, handle: Handle, depth: usize) -> Option<NodeId> {
        if let Some(id) = self.ids.get(&handle) {
            return Some(*id);
        }
        if self.policy.max_depth.is_some_and(|max| depth >= max) {
            return None;
        }
        let graph = self.graph;
        let node = graph.node(handle)?;
        if let Node::Object(object) = node {
            if self.policy.snippet_share_only && !object.class.is_shareable() {
                return None;
            }
        }

        let id = self
            .policy
            .identity
            .and_then(|identity| identity.get(handle))
            .unwrap_or_else(|| graph.native_id(handle));
        self.ids.insert(handle, id);

        let record = match node {
            Node::Object(object) => {
                let mut members = BTreeMap::new();
                for (name, value) in &object.fields {
                    if let Some(field) = self.field(value, depth) {
                        members.insert(name.clone(), field);
                    }
                }
                for (name, method) in &object.methods {
                    members.insert(name.clone(), FieldValue::Function);
                    self.dispatcher.methods.insert((id, name.clone()), Arc::clone(method));
                }
                self.dispatcher.nodes.insert(id);
                NodeRecord::Object(members)
            }
            Node::List(items) => NodeRecord::List(self.slots(items, depth)),
            Node::Set(items) => NodeRecord::Set(self.slots(items, depth)),
            Node::Tuple(items) => NodeRecord::Tuple(self.slots(items, depth)),
            Node::Dict(entries) => {
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    // keys and values stay parallel: drop the entry as a whole
                    if let (Some(k), Some(v)) = (self.field(key, depth), self.field(value, depth)) {
                        keys.push(k);
                        values.push(v);
                    }
                }
                NodeRecord::Dict { keys, values }
            }
        };
        self.nodes.insert(id, record);
        Some(id)
    }

    fn field(&mut self, value: &Value, depth: usize) -> Option<FieldValue> {
        match value {
            Value::Scalar(scalar) => Some(FieldValue::Native(scalar.clone())),
            Value::Ref(child) => self.visit(*child, depth + 1).map(FieldValue::Pointer),
        }
    }

    fn slots(&mut self, items: &[Value], depth: usize) -> BTreeMap<Position, FieldValue> {
        let mut slots = BTreeMap::new();
        for (index, item) in items.iter().enumerate() {
            if let Some(field) = self.field(item, depth) {
                slots.insert(Position(index), field);
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{method_fn, Class, Scalar};

    fn chain(graph: &mut Graph, class: Class) -> (Handle, Handle, Handle) {
        let c1 = graph.object(class.clone());
        let c2 = graph.object(class.clone());
        let c3 = graph.object(class);
        graph.set_field(c1, "hogehoge1", "value1").unwrap();
        graph.set_field(c1, "hierarchy1", c2).unwrap();
        graph.set_field(c2, "hogehoge2", "value2").unwrap();
        graph.set_field(c2, "hierarchy2", c3).unwrap();
        graph.set_field(c3, "hogehoge3", "value3").unwrap();
        graph.set_root(c1);
        (c1, c2, c3)
    }

    #[test]
    fn test_encode_scalar_root() {
        let graph = Graph::scalar("hello");
        let snapshot = encode(&graph, &EncodePolicy::unlimited()).unwrap();
        assert_eq!(snapshot.root, SnapshotRoot::Value(Scalar::from("hello")));
        assert!(snapshot.nodes.is_empty());
    }

    #[test]
    fn test_encode_hierarchy_uses_native_ids() {
        let mut graph = Graph::new();
        let (c1, c2, c3) = chain(&mut graph, Class::new("C"));
        let snapshot = encode(&graph, &EncodePolicy::unlimited()).unwrap();

        assert_eq!(snapshot.root_id(), Some(graph.native_id(c1)));
        assert_eq!(snapshot.nodes.len(), 3);
        let NodeRecord::Object(members) = &snapshot.nodes[&graph.native_id(c2)] else {
            panic!("expected object record");
        };
        assert_eq!(members["hierarchy2"], FieldValue::Pointer(graph.native_id(c3)));
        assert_eq!(members["hogehoge2"], FieldValue::Native(Scalar::from("value2")));
    }

    #[test]
    fn test_depth_limit_omits_deep_members() {
        let mut graph = Graph::new();
        let (c1, c2, c3) = chain(&mut graph, Class::new("C"));
        let policy = EncodePolicy { max_depth: Some(2), ..EncodePolicy::default() };
        let snapshot = encode(&graph, &policy).unwrap();

        assert_eq!(snapshot.nodes.len(), 2);
        assert!(snapshot.nodes.contains_key(&graph.native_id(c1)));
        assert!(!snapshot.nodes.contains_key(&graph.native_id(c3)));
        let NodeRecord::Object(members) = &snapshot.nodes[&graph.native_id(c2)] else {
            panic!("expected object record");
        };
        assert!(!members.contains_key("hierarchy2"));
        assert!(members.contains_key("hogehoge2"));
    }

    #[test]
    fn test_depth_zero_rejects_composite_root() {
        let mut graph = Graph::new();
        chain(&mut graph, Class::new("C"));
        let policy = EncodePolicy { max_depth: Some(0), ..EncodePolicy::default() };
        let err = encode(&graph, &policy).unwrap_err();
        assert_eq!(err.type_name(), "EncodeError");
    }

    #[test]
    fn test_share_filter_skips_plain_objects() {
        let mut graph = Graph::new();
        let root = graph.object(Class::shared("Shared"));
        let hidden = graph.object(Class::new("Hidden"));
        let list = graph.list(vec![Value::from(1), Value::Ref(hidden), Value::from(3)]);
        graph.set_field(root, "items", list).unwrap();
        graph.set_field(root, "hidden", hidden).unwrap();
        graph.set_root(root);

        let policy = EncodePolicy { snippet_share_only: true, ..EncodePolicy::default() };
        let snapshot = encode(&graph, &policy).unwrap();
        assert_eq!(snapshot.nodes.len(), 2);

        let NodeRecord::List(slots) = &snapshot.nodes[&graph.native_id(list)] else {
            panic!("expected list record");
        };
        assert_eq!(slots.keys().copied().collect::<Vec<_>>(), vec![Position(0), Position(2)]);

        graph.set_root(hidden);
        assert!(encode(&graph, &policy).is_err());
    }

    #[test]
    fn test_identity_override() {
        let mut graph = Graph::new();
        let (c1, _, _) = chain(&mut graph, Class::new("C"));
        let mut identity = IdentityMap::new();
        identity.insert(c1, NodeId(1234));

        let policy = EncodePolicy::unlimited().with_identity(&identity);
        let snapshot = encode(&graph, &policy).unwrap();
        assert_eq!(snapshot.root_id(), Some(NodeId(1234)));
    }

    #[tokio::test]
    async fn test_dispatcher_routes_to_real_method() {
        let mut graph = Graph::new();
        let calc = graph.object(Class::new("Calc"));
        graph
            .define_method(calc, "double", method_fn(|args| {
                let n = args.positional().first().and_then(Value::as_int).unwrap_or(0);
                Ok(Graph::scalar(n * 2))
            }))
            .unwrap();
        graph.set_root(calc);

        let (snapshot, dispatcher) = encode_with_dispatcher(&graph, &EncodePolicy::unlimited()).unwrap();
        let id = snapshot.root_id().unwrap();
        let NodeRecord::Object(members) = &snapshot.nodes[&id] else {
            panic!("expected object record");
        };
        assert_eq!(members["double"], FieldValue::Function);

        let result = dispatcher.dispatch(id, "double", CallArgs::new().arg(21)).await.unwrap();
        assert_eq!(result.root().as_int(), Some(42));

        let err = dispatcher.dispatch(id, "triple", CallArgs::new()).await.unwrap_err();
        assert_eq!(err.type_name(), "RemoteCallError");
        let err = dispatcher.dispatch(NodeId(1), "double", CallArgs::new()).await.unwrap_err();
        assert!(err.to_string().contains("unknown instance"));
    }
}
