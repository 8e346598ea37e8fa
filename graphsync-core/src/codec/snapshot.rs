/*
    snapshot.rs - Flat, identity-addressed wire form of a graph

    A snapshot names its root and carries one record per composite node.
    Records refer to each other through node ids, so shared references and
    cycles survive the trip.

    Wire shapes:
        {"object": <id>, "instance": {"<id>": {"__type__": "<kind>", ...}}}
        {"object": 0, "value": <scalar>}
*/

use crate::graph::{NodeKind, Scalar};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a node inside one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot of a list, set or tuple record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position(pub usize);

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Ids and positions show up both as JSON numbers and as object keys,
// which arrive as strings.
struct IntegerKey;

impl<'de> Visitor<'de> for IntegerKey {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or an integer string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative id {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        v.parse().map_err(|_| E::custom(format!("invalid integer key {:?}", v)))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IntegerKey).map(NodeId)
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = deserializer.deserialize_any(IntegerKey)?;
        usize::try_from(raw).map(Position).map_err(de::Error::custom)
    }
}

/// Value of one member slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Native(Scalar),
    Pointer(NodeId),
    /// Remote call marker for a callable member
    Function,
}

impl FieldValue {
    pub fn pointer(&self) -> Option<NodeId> {
        match self {
            FieldValue::Pointer(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        FieldValue::Native(value)
    }
}

/// One composite node as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename_all = "lowercase")]
pub enum NodeRecord {
    Object(BTreeMap<String, FieldValue>),
    List(BTreeMap<Position, FieldValue>),
    Set(BTreeMap<Position, FieldValue>),
    Tuple(BTreeMap<Position, FieldValue>),
    Dict {
        keys: Vec<FieldValue>,
        values: Vec<FieldValue>,
    },
}

impl NodeRecord {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRecord::Object(_) => NodeKind::Object,
            NodeRecord::List(_) => NodeKind::List,
            NodeRecord::Set(_) => NodeKind::Set,
            NodeRecord::Tuple(_) => NodeKind::Tuple,
            NodeRecord::Dict { .. } => NodeKind::Dict,
        }
    }

    /// Every field value the record holds, keys included
    pub fn field_values(&self) -> Box<dyn Iterator<Item = &FieldValue> + '_> {
        match self {
            NodeRecord::Object(members) => Box::new(members.values()),
            NodeRecord::List(slots) | NodeRecord::Set(slots) | NodeRecord::Tuple(slots) => {
                Box::new(slots.values())
            }
            NodeRecord::Dict { keys, values } => Box::new(keys.iter().chain(values.iter())),
        }
    }

    /// Ids this record points at
    pub fn pointers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.field_values().filter_map(FieldValue::pointer)
    }
}

/// What a snapshot is rooted at
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotRoot {
    Node(NodeId),
    Value(Scalar),
}

/// Flat, identity-addressed representation of a live graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireSnapshot", from = "WireSnapshot")]
pub struct Snapshot {
    pub root: SnapshotRoot,
    pub nodes: BTreeMap<NodeId, NodeRecord>,
}

impl Snapshot {
    /// Snapshot of a bare scalar
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Snapshot { root: SnapshotRoot::Value(value.into()), nodes: BTreeMap::new() }
    }

    pub fn root_id(&self) -> Option<NodeId> {
        match self.root {
            SnapshotRoot::Node(id) => Some(id),
            SnapshotRoot::Value(_) => None,
        }
    }

    pub fn record(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Serialize, Deserialize)]
struct WireSnapshot {
    object: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance: Option<BTreeMap<NodeId, NodeRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Scalar>,
}

impl From<Snapshot> for WireSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        match snapshot.root {
            SnapshotRoot::Node(id) => WireSnapshot {
                object: id,
                instance: Some(snapshot.nodes),
                value: None,
            },
            SnapshotRoot::Value(scalar) => WireSnapshot {
                object: NodeId(0),
                instance: None,
                value: Some(scalar),
            },
        }
    }
}

impl From<WireSnapshot> for Snapshot {
    fn from(wire: WireSnapshot) -> Self {
        match wire.instance {
            Some(nodes) => Snapshot { root: SnapshotRoot::Node(wire.object), nodes },
            // "value": null is read back as None
            None => Snapshot::scalar(wire.value.unwrap_or_default()),
        }
    }
}
