//! Live object graph
//!
//! Every composite value lives in an arena slot addressed by a [`Handle`].
//! Slots are never reused, so a handle stays valid for the lifetime of the
//! graph even after the node it named has been swept.
//!
//! Each graph draws a random lineage when it is created. A node's native id
//! combines the lineage with its slot, which keeps ids from two independent
//! graphs apart.

mod method;
mod object;
mod value;

pub use method::{method_fn, CallArgs, FnMethod, Method, NoopMethod};
pub use object::{Class, ObjectNode, Shareable};
pub use value::{Handle, Scalar, Value};

use crate::codec::NodeId;
use crate::error::{SyncError, SyncResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Longest list a write past the end may grow to
pub const MAX_LIST_LEN: usize = 1 << 20;

/// Graph guarded for use by the communicator and the computation
pub type SharedGraph = Arc<Mutex<Graph>>;

pub fn shared(graph: Graph) -> SharedGraph {
    Arc::new(Mutex::new(graph))
}

/// Kind of a composite node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Object,
    List,
    Set,
    Tuple,
    Dict,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::List => "list",
            NodeKind::Set => "set",
            NodeKind::Tuple => "tuple",
            NodeKind::Dict => "dict",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite node stored in an arena slot
#[derive(Debug, Clone)]
pub enum Node {
    Object(ObjectNode),
    List(Vec<Value>),
    /// Insertion ordered, deduplicated by structural equality
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    /// Keys unique by structural equality
    Dict(Vec<(Value, Value)>),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Object(_) => NodeKind::Object,
            Node::List(_) => NodeKind::List,
            Node::Set(_) => NodeKind::Set,
            Node::Tuple(_) => NodeKind::Tuple,
            Node::Dict(_) => NodeKind::Dict,
        }
    }

    /// Empty node of the given kind; objects get the anonymous class
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Object => Node::Object(ObjectNode::new(Class::anonymous())),
            NodeKind::List => Node::List(Vec::new()),
            NodeKind::Set => Node::Set(Vec::new()),
            NodeKind::Tuple => Node::Tuple(Vec::new()),
            NodeKind::Dict => Node::Dict(Vec::new()),
        }
    }

    /// Handles this node refers to directly
    pub fn references(&self) -> Vec<Handle> {
        let values: Box<dyn Iterator<Item = &Value>> = match self {
            Node::Object(object) => Box::new(object.fields.values()),
            Node::List(items) | Node::Set(items) | Node::Tuple(items) => Box::new(items.iter()),
            Node::Dict(entries) => Box::new(entries.iter().flat_map(|(k, v)| [k, v])),
        };
        values.filter_map(Value::as_handle).collect()
    }
}

/// Arena-allocated object graph with a single root
#[derive(Debug, Clone)]
pub struct Graph {
    lineage: u32,
    slots: Vec<Option<Node>>,
    root: Value,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Empty graph rooted at `Null`
    pub fn new() -> Self {
        let lineage = (rand::random::<u32>() & 0x7fff_ffff).max(1);
        Graph { lineage, slots: Vec::new(), root: Value::NULL }
    }

    /// Graph holding nothing but a scalar root
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        let mut graph = Self::new();
        graph.root = Value::Scalar(value.into());
        graph
    }

    pub fn lineage(&self) -> u32 {
        self.lineage
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_handle(&self) -> Option<Handle> {
        self.root.as_handle()
    }

    pub fn set_root(&mut self, root: impl Into<Value>) {
        self.root = root.into();
    }

    /// Process-unique id of a node
    pub fn native_id(&self, handle: Handle) -> NodeId {
        NodeId((u64::from(self.lineage) << 32) | u64::from(handle.0))
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, node: Node) -> Handle {
        let handle = Handle(self.slots.len() as u32);
        self.slots.push(Some(node));
        handle
    }

    pub fn node(&self, handle: Handle) -> Option<&Node> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, handle: Handle) -> Option<&mut Node> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.node(handle).is_some()
    }

    pub fn kind(&self, handle: Handle) -> Option<NodeKind> {
        self.node(handle).map(Node::kind)
    }

    /// Live handles in slot order
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| Handle(index as u32))
    }

    pub fn object(&mut self, class: Class) -> Handle {
        self.insert(Node::Object(ObjectNode::new(class)))
    }

    /// Add a Rust value through its shareable description
    pub fn insert_shareable<T: Shareable + ?Sized>(&mut self, value: &T) -> Handle {
        let handle = self.object(value.class());
        let fields = value.fields(self);
        let methods = value.methods();
        if let Some(Node::Object(object)) = self.node_mut(handle) {
            object.fields.extend(fields);
            object.methods.extend(methods);
        }
        handle
    }

    pub fn list(&mut self, items: impl IntoIterator<Item = Value>) -> Handle {
        self.insert(Node::List(items.into_iter().collect()))
    }

    pub fn tuple(&mut self, items: impl IntoIterator<Item = Value>) -> Handle {
        self.insert(Node::Tuple(items.into_iter().collect()))
    }

    pub fn set(&mut self, items: impl IntoIterator<Item = Value>) -> SyncResult<Handle> {
        let handle = self.insert(Node::Set(Vec::new()));
        for item in items {
            self.add(handle, item)?;
        }
        Ok(handle)
    }

    pub fn dict(&mut self, entries: impl IntoIterator<Item = (Value, Value)>) -> SyncResult<Handle> {
        let handle = self.insert(Node::Dict(Vec::new()));
        for (key, value) in entries {
            self.insert_entry(handle, key, value)?;
        }
        Ok(handle)
    }

    fn missing(handle: Handle) -> SyncError {
        SyncError::AttributeCannotUpdate(format!("no node at {}", handle))
    }

    fn object_ref(&self, handle: Handle) -> Option<&ObjectNode> {
        match self.node(handle) {
            Some(Node::Object(object)) => Some(object),
            _ => None,
        }
    }

    fn object_mut(&mut self, handle: Handle) -> SyncResult<&mut ObjectNode> {
        match self.node_mut(handle) {
            Some(Node::Object(object)) => Ok(object),
            Some(other) => Err(SyncError::AttributeCannotUpdate(format!(
                "{} is a {}, not an object",
                handle,
                other.kind()
            ))),
            None => Err(Self::missing(handle)),
        }
    }

    pub fn field(&self, handle: Handle, name: &str) -> Option<&Value> {
        self.object_ref(handle).and_then(|object| object.fields.get(name))
    }

    pub fn set_field(&mut self, handle: Handle, name: impl Into<String>, value: impl Into<Value>) -> SyncResult<()> {
        self.object_mut(handle)?.fields.insert(name.into(), value.into());
        Ok(())
    }

    pub fn remove_field(&mut self, handle: Handle, name: &str) -> Option<Value> {
        match self.node_mut(handle) {
            Some(Node::Object(object)) => object.fields.remove(name),
            _ => None,
        }
    }

    pub fn define_method(&mut self, handle: Handle, name: impl Into<String>, method: Arc<dyn Method>) -> SyncResult<()> {
        self.object_mut(handle)?.methods.insert(name.into(), method);
        Ok(())
    }

    /// Callable member; clone it out so it can be awaited without the graph
    pub fn method(&self, handle: Handle, name: &str) -> Option<Arc<dyn Method>> {
        self.object_ref(handle).and_then(|object| object.methods.get(name).cloned())
    }

    /// Element count of a sequence, set or dict, field count of an object
    pub fn len_of(&self, handle: Handle) -> Option<usize> {
        self.node(handle).map(|node| match node {
            Node::Object(object) => object.fields.len(),
            Node::List(items) | Node::Set(items) | Node::Tuple(items) => items.len(),
            Node::Dict(entries) => entries.len(),
        })
    }

    pub fn item(&self, handle: Handle, index: usize) -> Option<&Value> {
        match self.node(handle)? {
            Node::List(items) | Node::Set(items) | Node::Tuple(items) => items.get(index),
            _ => None,
        }
    }

    /// Assign a list slot, extending the list with `Null` when needed
    pub fn set_item(&mut self, handle: Handle, index: usize, value: impl Into<Value>) -> SyncResult<()> {
        match self.node_mut(handle) {
            Some(Node::List(items)) => {
                if items.len() <= index {
                    let len = index.checked_add(1).filter(|len| *len <= MAX_LIST_LEN).ok_or_else(|| {
                        SyncError::AttributeCannotUpdate(format!(
                            "list index {} exceeds the limit of {} items",
                            index, MAX_LIST_LEN
                        ))
                    })?;
                    items.resize(len, Value::NULL);
                }
                items[index] = value.into();
                Ok(())
            }
            Some(other) => Err(SyncError::AttributeCannotUpdate(format!(
                "{} object does not support item assignment",
                other.kind()
            ))),
            None => Err(Self::missing(handle)),
        }
    }

    pub fn push(&mut self, handle: Handle, value: impl Into<Value>) -> SyncResult<()> {
        match self.node_mut(handle) {
            Some(Node::List(items)) => {
                items.push(value.into());
                Ok(())
            }
            Some(other) => Err(SyncError::AttributeCannotUpdate(format!(
                "{} object does not support append",
                other.kind()
            ))),
            None => Err(Self::missing(handle)),
        }
    }

    pub fn get(&self, handle: Handle, key: &Value) -> Option<&Value> {
        let Some(Node::Dict(entries)) = self.node(handle) else {
            return None;
        };
        entries.iter().find(|(k, _)| self.values_equal(k, key)).map(|(_, v)| v)
    }

    /// Insert or replace a dict entry, returning the value it replaced
    pub fn insert_entry(&mut self, handle: Handle, key: impl Into<Value>, value: impl Into<Value>) -> SyncResult<Option<Value>> {
        let (key, value) = (key.into(), value.into());
        let position = match self.node(handle) {
            Some(Node::Dict(entries)) => {
                if !self.is_hashable(&key) {
                    return Err(SyncError::AttributeCannotUpdate(format!("unhashable dict key {:?}", key)));
                }
                entries.iter().position(|(k, _)| self.values_equal(k, &key))
            }
            Some(other) => {
                return Err(SyncError::AttributeCannotUpdate(format!("{} is not a dict", other.kind())))
            }
            None => return Err(Self::missing(handle)),
        };
        let Some(Node::Dict(entries)) = self.node_mut(handle) else {
            return Err(Self::missing(handle));
        };
        Ok(match position {
            Some(index) => Some(std::mem::replace(&mut entries[index].1, value)),
            None => {
                entries.push((key, value));
                None
            }
        })
    }

    pub fn remove_entry(&mut self, handle: Handle, key: &Value) -> Option<Value> {
        let position = match self.node(handle) {
            Some(Node::Dict(entries)) => entries.iter().position(|(k, _)| self.values_equal(k, key))?,
            _ => return None,
        };
        match self.node_mut(handle) {
            Some(Node::Dict(entries)) => Some(entries.remove(position).1),
            _ => None,
        }
    }

    pub fn contains_value(&self, handle: Handle, value: &Value) -> bool {
        match self.node(handle) {
            Some(Node::Set(items)) | Some(Node::List(items)) | Some(Node::Tuple(items)) => {
                items.iter().any(|item| self.values_equal(item, value))
            }
            Some(Node::Dict(entries)) => entries.iter().any(|(k, _)| self.values_equal(k, value)),
            _ => false,
        }
    }

    /// Union-add to a set; false when an equal element is already present
    pub fn add(&mut self, handle: Handle, value: impl Into<Value>) -> SyncResult<bool> {
        let value = value.into();
        match self.node(handle) {
            Some(Node::Set(_)) => {}
            Some(other) => {
                return Err(SyncError::AttributeCannotUpdate(format!("{} is not a set", other.kind())))
            }
            None => return Err(Self::missing(handle)),
        }
        if !self.is_hashable(&value) {
            return Err(SyncError::AttributeCannotUpdate(format!("unhashable set element {:?}", value)));
        }
        if self.contains_value(handle, &value) {
            return Ok(false);
        }
        if let Some(Node::Set(items)) = self.node_mut(handle) {
            items.push(value);
        }
        Ok(true)
    }

    pub fn discard(&mut self, handle: Handle, value: &Value) -> bool {
        let position = match self.node(handle) {
            Some(Node::Set(items)) => items.iter().position(|item| self.values_equal(item, value)),
            _ => None,
        };
        match (position, self.node_mut(handle)) {
            (Some(index), Some(Node::Set(items))) => {
                items.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Scalars, objects and tuples of hashable values
    pub fn is_hashable(&self, value: &Value) -> bool {
        self.hashable(value, &mut HashSet::new())
    }

    fn hashable(&self, value: &Value, visiting: &mut HashSet<Handle>) -> bool {
        let Value::Ref(handle) = value else {
            return true;
        };
        match self.node(*handle) {
            Some(Node::Object(_)) => true,
            Some(Node::Tuple(items)) => {
                if !visiting.insert(*handle) {
                    return true;
                }
                items.iter().all(|item| self.hashable(item, visiting))
            }
            _ => false,
        }
    }

    /// Equality as used for dict keys and set membership
    ///
    /// Objects compare by identity, containers by content. Cycles are
    /// assumed equal once they close.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.equal(a, self, b, true, &mut HashSet::new())
    }

    /// Content equality across two graphs; objects compare by their fields
    /// and method names, not by class or identity
    pub fn structurally_equal(&self, a: &Value, other: &Graph, b: &Value) -> bool {
        self.equal(a, other, b, false, &mut HashSet::new())
    }

    fn equal(
        &self,
        a: &Value,
        other: &Graph,
        b: &Value,
        by_identity: bool,
        assumed: &mut HashSet<(Handle, Handle)>,
    ) -> bool {
        let (x, y) = match (a, b) {
            (Value::Scalar(x), Value::Scalar(y)) => return scalars_equal(x, y),
            (Value::Ref(x), Value::Ref(y)) => (*x, *y),
            _ => return false,
        };
        if by_identity && x == y {
            return true;
        }
        if !assumed.insert((x, y)) {
            return true;
        }
        match (self.node(x), other.node(y)) {
            (Some(Node::Object(p)), Some(Node::Object(q))) => {
                !by_identity
                    && p.methods.keys().eq(q.methods.keys())
                    && p.fields.len() == q.fields.len()
                    && p.fields.iter().zip(q.fields.iter()).all(|((kp, vp), (kq, vq))| {
                        kp == kq && self.equal(vp, other, vq, by_identity, assumed)
                    })
            }
            (Some(Node::List(p)), Some(Node::List(q))) | (Some(Node::Tuple(p)), Some(Node::Tuple(q))) => {
                p.len() == q.len()
                    && p.iter().zip(q).all(|(vp, vq)| self.equal(vp, other, vq, by_identity, assumed))
            }
            (Some(Node::Set(p)), Some(Node::Set(q))) => {
                p.len() == q.len()
                    && p.iter().all(|vp| {
                        q.iter().any(|vq| self.trial(vp, other, vq, by_identity, assumed))
                    })
            }
            (Some(Node::Dict(p)), Some(Node::Dict(q))) => {
                p.len() == q.len()
                    && p.iter().all(|(kp, vp)| {
                        q.iter().any(|(kq, vq)| {
                            self.trial(kp, other, kq, by_identity, assumed)
                                && self.equal(vp, other, vq, by_identity, assumed)
                        })
                    })
            }
            _ => false,
        }
    }

    // Candidate match: assumptions made along a failed attempt are dropped
    fn trial(
        &self,
        a: &Value,
        other: &Graph,
        b: &Value,
        by_identity: bool,
        assumed: &mut HashSet<(Handle, Handle)>,
    ) -> bool {
        let mut attempt = assumed.clone();
        let matched = self.equal(a, other, b, by_identity, &mut attempt);
        if matched {
            *assumed = attempt;
        }
        matched
    }

    /// Deep copy of `value` from `source` into this graph
    ///
    /// Shared references and cycles inside the copied part are preserved.
    pub fn graft(&mut self, source: &Graph, value: &Value) -> Value {
        let mut copied = HashMap::new();
        self.graft_value(source, value, &mut copied)
    }

    fn graft_value(&mut self, source: &Graph, value: &Value, copied: &mut HashMap<Handle, Handle>) -> Value {
        let Value::Ref(from) = value else {
            return value.clone();
        };
        if let Some(to) = copied.get(from) {
            return Value::Ref(*to);
        }
        let Some(node) = source.node(*from) else {
            return Value::NULL;
        };
        let to = self.insert(Node::empty(node.kind()));
        copied.insert(*from, to);

        let rebuilt = match node {
            Node::Object(object) => {
                let mut copy = ObjectNode::new(object.class.clone());
                for (name, field) in &object.fields {
                    let field = self.graft_value(source, field, copied);
                    copy.fields.insert(name.clone(), field);
                }
                copy.methods = object.methods.clone();
                Node::Object(copy)
            }
            Node::List(items) => Node::List(self.graft_all(source, items, copied)),
            Node::Set(items) => Node::Set(self.graft_all(source, items, copied)),
            Node::Tuple(items) => Node::Tuple(self.graft_all(source, items, copied)),
            Node::Dict(entries) => {
                let mut copy = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.graft_value(source, key, copied);
                    let value = self.graft_value(source, value, copied);
                    copy.push((key, value));
                }
                Node::Dict(copy)
            }
        };
        self.slots[to.index()] = Some(rebuilt);
        Value::Ref(to)
    }

    fn graft_all(&mut self, source: &Graph, items: &[Value], copied: &mut HashMap<Handle, Handle>) -> Vec<Value> {
        items.iter().map(|item| self.graft_value(source, item, copied)).collect()
    }

    /// Free every slot that cannot be reached from the root
    pub fn sweep(&mut self) -> Vec<Handle> {
        let mut reachable = HashSet::new();
        let mut pending: Vec<Handle> = self.root_handle().into_iter().collect();
        while let Some(handle) = pending.pop() {
            if !reachable.insert(handle) {
                continue;
            }
            if let Some(node) = self.node(handle) {
                pending.extend(node.references());
            }
        }

        let mut freed = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let handle = Handle(index as u32);
            if slot.is_some() && !reachable.contains(&handle) {
                *slot = None;
                freed.push(handle);
            }
        }
        freed
    }
}

fn scalars_equal(a: &Scalar, b: &Scalar) -> bool {
    match (a, b) {
        (Scalar::Int(i), Scalar::Float(f)) | (Scalar::Float(f), Scalar::Int(i)) => *i as f64 == *f,
        _ => a == b,
    }
}
