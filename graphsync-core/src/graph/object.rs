use super::{Graph, Method, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Class descriptor of an object node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    name: String,
    shareable: bool,
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Class { name: name.into(), shareable: false }
    }

    /// Class that opted in to snippet sharing
    pub fn shared(name: impl Into<String>) -> Self {
        Class { name: name.into(), shareable: true }
    }

    /// Class given to objects rebuilt from a snapshot
    pub fn anonymous() -> Self {
        Class::new("object")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shareable(&self) -> bool {
        self.shareable
    }
}

/// Object with named data fields and callable members
#[derive(Clone)]
pub struct ObjectNode {
    pub class: Class,
    pub fields: BTreeMap<String, Value>,
    pub methods: BTreeMap<String, Arc<dyn Method>>,
}

impl ObjectNode {
    pub fn new(class: Class) -> Self {
        ObjectNode { class, fields: BTreeMap::new(), methods: BTreeMap::new() }
    }
}

impl fmt::Debug for ObjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNode")
            .field("class", &self.class.name)
            .field("fields", &self.fields)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Rust types that can join a shared graph as object nodes
///
/// `fields` may allocate composite children in the target graph and
/// return references to them.
pub trait Shareable {
    fn class(&self) -> Class;

    fn fields(&self, graph: &mut Graph) -> Vec<(String, Value)>;

    fn methods(&self) -> Vec<(String, Arc<dyn Method>)> {
        Vec::new()
    }
}
