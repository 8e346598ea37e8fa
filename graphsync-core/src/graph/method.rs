/*
    method.rs - Callable members of object nodes

    A method receives its arguments as values inside a small owned graph and
    answers with a rooted graph, so both scalars and composites can cross
    the wire in either direction.
*/

use super::{Graph, Node, Scalar, Value};
use crate::codec::NodeId;
use crate::error::{DecodeError, SyncResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const ENVELOPE_INSTANCE: &str = "instanceid";
const ENVELOPE_NAME: &str = "name";
const ENVELOPE_ARGS: &str = "args";
const ENVELOPE_KWARGS: &str = "kwargs";

#[async_trait]
pub trait Method: Send + Sync {
    async fn call(&self, args: CallArgs) -> SyncResult<Graph>;
}

/// Stand-in for a callable member whose peer cannot be reached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMethod;

#[async_trait]
impl Method for NoopMethod {
    async fn call(&self, _args: CallArgs) -> SyncResult<Graph> {
        Ok(Graph::new())
    }
}

/// Adapter turning a synchronous closure into a method
pub struct FnMethod<F> {
    f: F,
}

#[async_trait]
impl<F> Method for FnMethod<F>
where
    F: Fn(CallArgs) -> SyncResult<Graph> + Send + Sync,
{
    async fn call(&self, args: CallArgs) -> SyncResult<Graph> {
        (self.f)(args)
    }
}

pub fn method_fn<F>(f: F) -> Arc<dyn Method>
where
    F: Fn(CallArgs) -> SyncResult<Graph> + Send + Sync + 'static,
{
    Arc::new(FnMethod { f })
}

/// Positional and keyword arguments of a call
#[derive(Clone, Default)]
pub struct CallArgs {
    graph: Graph,
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Scalar>) -> Self {
        self.positional.push(Value::Scalar(value.into()));
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.keyword.insert(name.into(), Value::Scalar(value.into()));
        self
    }

    /// Append a positional argument copied out of another graph
    pub fn arg_from(mut self, source: &Graph, value: &Value) -> Self {
        let value = self.graph.graft(source, value);
        self.positional.push(value);
        self
    }

    pub fn kwarg_from(mut self, name: impl Into<String>, source: &Graph, value: &Value) -> Self {
        let value = self.graph.graft(source, value);
        self.keyword.insert(name.into(), value);
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    pub fn keywords(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.keyword.iter()
    }

    /// Graph the argument references point into
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap the call into `{"instanceid", "name", "args", "kwargs"}`
    pub(crate) fn into_envelope(self, node: NodeId, name: &str) -> Graph {
        let CallArgs { mut graph, positional, keyword } = self;
        let args = graph.insert(Node::Tuple(positional));
        let kwargs = graph.insert(Node::Dict(
            keyword.into_iter().map(|(k, v)| (Value::from(k), v)).collect(),
        ));
        let root = graph.insert(Node::Dict(vec![
            (Value::from(ENVELOPE_INSTANCE), Value::Scalar(Scalar::Int(node.0 as i64))),
            (Value::from(ENVELOPE_NAME), Value::from(name)),
            (Value::from(ENVELOPE_ARGS), Value::Ref(args)),
            (Value::from(ENVELOPE_KWARGS), Value::Ref(kwargs)),
        ]));
        graph.set_root(root);
        graph
    }

    /// Unwrap a decoded envelope into target, member name and arguments
    pub(crate) fn from_envelope(graph: Graph) -> SyncResult<(NodeId, String, CallArgs)> {
        let malformed = |what: &str| DecodeError::Malformed(format!("call envelope {}", what));
        let root = graph.root_handle().ok_or_else(|| malformed("is not rooted at a dict"))?;

        let node = graph
            .get(root, &Value::from(ENVELOPE_INSTANCE))
            .and_then(Value::as_int)
            .and_then(|id| u64::try_from(id).ok())
            .map(NodeId)
            .ok_or_else(|| malformed("has no instance id"))?;
        let name = graph
            .get(root, &Value::from(ENVELOPE_NAME))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed("has no member name"))?;

        let positional = match graph.get(root, &Value::from(ENVELOPE_ARGS)).and_then(Value::as_handle) {
            Some(handle) => match graph.node(handle) {
                Some(Node::Tuple(items)) | Some(Node::List(items)) => items.clone(),
                _ => return Err(malformed("args are not a sequence").into()),
            },
            None => Vec::new(),
        };

        let mut keyword = BTreeMap::new();
        if let Some(handle) = graph.get(root, &Value::from(ENVELOPE_KWARGS)).and_then(Value::as_handle) {
            let Some(Node::Dict(entries)) = graph.node(handle) else {
                return Err(malformed("kwargs are not a dict").into());
            };
            for (key, value) in entries {
                let key = key.as_str().ok_or_else(|| malformed("has a non-string keyword"))?;
                keyword.insert(key.to_string(), value.clone());
            }
        }

        Ok((node, name, CallArgs { graph, positional, keyword }))
    }
}

impl fmt::Debug for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("positional", &self.positional)
            .field("keyword", &self.keyword)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_returns_null() {
        let result = NoopMethod.call(CallArgs::new()).await.unwrap();
        assert!(result.root().is_null());
    }

    #[tokio::test]
    async fn test_fn_method_sees_arguments() {
        let sum = method_fn(|args| {
            let total: i64 = args.positional().iter().filter_map(Value::as_int).sum();
            Ok(Graph::scalar(total))
        });
        let result = sum.call(CallArgs::new().arg(1).arg(10).arg(100)).await.unwrap();
        assert_eq!(result.root().as_int(), Some(111));
    }

    #[test]
    fn test_envelope_round_trip() {
        let mut source = Graph::new();
        let list = source.insert(Node::List(vec![Value::from(1), Value::from(2)]));

        let args = CallArgs::new()
            .arg("a")
            .arg_from(&source, &Value::Ref(list))
            .kwarg("scale", 3);
        let envelope = args.into_envelope(NodeId(99), "run");

        let (node, name, args) = CallArgs::from_envelope(envelope).unwrap();
        assert_eq!(node, NodeId(99));
        assert_eq!(name, "run");
        assert_eq!(args.positional()[0].as_str(), Some("a"));
        let copied = args.positional()[1].as_handle().unwrap();
        assert_eq!(args.graph().item(copied, 1).and_then(Value::as_int), Some(2));
        assert_eq!(args.keyword("scale").and_then(Value::as_int), Some(3));
    }

    #[test]
    fn test_envelope_without_name_is_rejected() {
        let mut graph = Graph::new();
        let root = graph.insert(Node::Dict(vec![(Value::from("instanceid"), Value::from(1))]));
        graph.set_root(root);
        assert!(CallArgs::from_envelope(graph).is_err());
    }
}
