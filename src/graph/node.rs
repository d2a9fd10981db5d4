//! Nodes: graph participants that produce jobs.
//!
//! The original dynamic node hierarchy is a fixed enumeration here:
//! [`NodeKind`] is a tagged union of the five node kinds, each carrying only
//! the fields it needs, and the network keeps a derived index keyed by
//! [`KindTag`] next to the primary node registry.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::NetworkError;
use crate::execution::job::{Job, JobId, JobTask};
use crate::graph::{NetworkGraph, ResultPool};
use crate::network::Network;

/// A tool function applied by tool-kind nodes: named inputs in, one value out.
type ToolFn = Arc<dyn Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// Callable wrapped by tool nodes.
#[derive(Clone)]
pub struct Tool {
    name: String,
    func: ToolFn,
}

impl Tool {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        Tool {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, inputs: &Map<String, Value>) -> Result<Value, String> {
        (self.func)(inputs)
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("name", &self.name).finish()
    }
}

/// Kind tag used by the network's derived node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindTag {
    Source,
    Sink,
    Constant,
    Macro,
    Tool,
}

/// The fixed enumeration of node kinds, each with its own payload.
#[derive(Clone)]
pub enum NodeKind {
    /// Fed from the source data passed to `execute`.
    Source,
    /// A source that fills itself from its stored value.
    Constant { value: Value },
    /// Persists its collected input to the destination named in the sink data.
    Sink,
    /// Applies a tool function to its inputs.
    Tool { tool: Tool },
    /// Runs a nested network as a single job.
    Macro { network: Arc<Network> },
}

impl NodeKind {
    pub fn tag(&self) -> KindTag {
        match self {
            NodeKind::Source => KindTag::Source,
            NodeKind::Constant { .. } => KindTag::Constant,
            NodeKind::Sink => KindTag::Sink,
            NodeKind::Tool { .. } => KindTag::Tool,
            NodeKind::Macro { .. } => KindTag::Macro,
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Source => write!(f, "Source"),
            NodeKind::Constant { value } => write!(f, "Constant({value})"),
            NodeKind::Sink => write!(f, "Sink"),
            NodeKind::Tool { tool } => write!(f, "Tool({})", tool.name()),
            NodeKind::Macro { network } => write!(f, "Macro({})", network.id()),
        }
    }
}

/// Validity report of a single node, aggregated by
/// [`Network::status`](crate::network::Network::status).
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    pub valid: bool,
    pub messages: Vec<String>,
}

/// Everything a node needs to produce its jobs for one run.
pub struct JobContext<'a> {
    pub network_id: &'a str,
    pub graph: &'a NetworkGraph,
    pub outputs: &'a ResultPool,
    pub source_data: &'a HashMap<String, Value>,
    pub sink_data: &'a HashMap<String, String>,
    pub run_dir: &'a Path,
}

/// A graph participant. Constructed through the `Network` factory methods,
/// which register the node in the same step.
#[derive(Debug, Clone)]
pub struct Node {
    id: String,
    blocking: bool,
    network: Option<String>,
    kind: NodeKind,
}

impl Node {
    /// Create a node with the default blocking flag for its kind: every kind
    /// except sinks is blocking, since their results feed dependents.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let blocking = !matches!(kind.tag(), KindTag::Sink);
        Node {
            id: id.into(),
            blocking,
            network: None,
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tag(&self) -> KindTag {
        self.kind.tag()
    }

    /// Whether this node's results must be written back into the graph
    /// before dependents proceed.
    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// Id of the owning network, set on registration.
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub(crate) fn set_network(&mut self, network: &str) {
        self.network = Some(network.to_string());
    }

    /// Produce this node's jobs for the current run.
    ///
    /// One job per node; cardinality expansion across linked outputs is
    /// outside the execution core, so the item index is always zero.
    pub fn execute(&self, ctx: &JobContext<'_>) -> Result<Vec<Job>, NetworkError> {
        let id = JobId::new(ctx.network_id, &self.id, 0);
        let job = match &self.kind {
            NodeKind::Source => {
                let value = ctx
                    .source_data
                    .get(&self.id)
                    .ok_or_else(|| NetworkError::MissingSourceData(self.id.clone()))?;
                Job::new(id, JobTask::Literal(value.clone()))
            }
            NodeKind::Constant { value } => {
                // Constants carry their value as a pre-computed result, so
                // they take the cache short-circuit instead of the backend.
                Job::new(id, JobTask::Literal(value.clone())).with_result(value.clone())
            }
            NodeKind::Sink => {
                let destination = ctx
                    .sink_data
                    .get(&self.id)
                    .ok_or_else(|| NetworkError::MissingSinkData(self.id.clone()))?;
                let input = collapse_inputs(self.collect_inputs(ctx)?);
                Job::new(
                    id,
                    JobTask::Sink {
                        input,
                        destination: PathBuf::from(destination),
                    },
                )
            }
            NodeKind::Tool { tool } => Job::new(
                id,
                JobTask::Invoke {
                    tool: tool.clone(),
                    inputs: self.collect_inputs(ctx)?,
                },
            ),
            NodeKind::Macro { network } => Job::new(
                id,
                JobTask::SubNetwork {
                    network: network.clone(),
                    inputs: self.collect_inputs(ctx)?,
                    work_dir: ctx.run_dir.join(format!("macro_{}", self.id)),
                },
            ),
        };
        Ok(vec![job])
    }

    /// Resolve this node's inputs from upstream results, keyed by the link's
    /// target input name.
    fn collect_inputs(&self, ctx: &JobContext<'_>) -> Result<Map<String, Value>, NetworkError> {
        let mut inputs = Map::new();
        for link in ctx.graph.incoming_links(&self.id) {
            let value = ctx.outputs.get(link.from_node()).cloned().ok_or_else(|| {
                NetworkError::MissingInput {
                    node: self.id.clone(),
                    input: link.to_input().to_string(),
                }
            })?;
            inputs.insert(link.to_input().to_string(), value);
        }
        Ok(inputs)
    }

    /// Structural sanity of this node within its graph.
    pub fn status(&self, graph: &NetworkGraph) -> NodeStatus {
        let mut messages = Vec::new();
        let inbound = graph.incoming_links(&self.id).count();
        match self.kind.tag() {
            KindTag::Source | KindTag::Constant => {
                if inbound > 0 {
                    messages.push(format!("source node {} has inbound links", self.id));
                }
            }
            KindTag::Sink => {
                if inbound == 0 {
                    messages.push(format!("sink node {} has no inbound link", self.id));
                }
            }
            KindTag::Tool | KindTag::Macro => {
                if inbound == 0 {
                    messages.push(format!("node {} has no inbound link", self.id));
                }
            }
        }
        NodeStatus {
            valid: messages.is_empty(),
            messages,
        }
    }
}

/// Fold a node's resolved inputs into the single value a sink persists.
fn collapse_inputs(mut inputs: Map<String, Value>) -> Value {
    if inputs.len() == 1 {
        let key = inputs.keys().next().cloned();
        if let Some(key) = key {
            if let Some(value) = inputs.remove(&key) {
                return value;
            }
        }
    }
    if inputs.is_empty() {
        return Value::Null;
    }
    Value::Object(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Link;
    use serde_json::json;

    fn context<'a>(
        graph: &'a NetworkGraph,
        outputs: &'a ResultPool,
        source_data: &'a HashMap<String, Value>,
        sink_data: &'a HashMap<String, String>,
        run_dir: &'a Path,
    ) -> JobContext<'a> {
        JobContext {
            network_id: "net",
            graph,
            outputs,
            source_data,
            sink_data,
            run_dir,
        }
    }

    #[test]
    fn test_blocking_defaults() {
        assert!(Node::new("s", NodeKind::Source).blocking());
        assert!(Node::new("c", NodeKind::Constant { value: json!(1) }).blocking());
        assert!(!Node::new("k", NodeKind::Sink).blocking());
    }

    #[test]
    fn test_tool_invoke() {
        let tool = Tool::new("double", |inputs: &Map<String, Value>| {
            let x = inputs
                .get("in")
                .and_then(Value::as_i64)
                .ok_or_else(|| "missing input 'in'".to_string())?;
            Ok(json!(x * 2))
        });
        let mut inputs = Map::new();
        inputs.insert("in".to_string(), json!(21));
        assert_eq!(tool.invoke(&inputs).unwrap(), json!(42));
        assert!(tool.invoke(&Map::new()).is_err());
    }

    #[test]
    fn test_source_job_production() {
        let graph = NetworkGraph::new();
        let outputs = ResultPool::new();
        let mut source_data = HashMap::new();
        source_data.insert("s".to_string(), json!(1));
        let sink_data = HashMap::new();
        let ctx = context(&graph, &outputs, &source_data, &sink_data, Path::new("/tmp"));

        let node = Node::new("s", NodeKind::Source);
        let jobs = node.execute(&ctx).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id.node, "s");
        assert_eq!(jobs[0].id.index, 0);
        assert!(jobs[0].result.is_none());
    }

    #[test]
    fn test_constant_job_carries_cached_result() {
        let graph = NetworkGraph::new();
        let outputs = ResultPool::new();
        let source_data = HashMap::new();
        let sink_data = HashMap::new();
        let ctx = context(&graph, &outputs, &source_data, &sink_data, Path::new("/tmp"));

        let node = Node::new("c", NodeKind::Constant { value: json!("pi") });
        let jobs = node.execute(&ctx).unwrap();
        assert_eq!(jobs[0].result, Some(json!("pi")));
    }

    #[test]
    fn test_tool_job_resolves_inputs_from_pool() {
        let mut graph = NetworkGraph::new();
        graph.insert_node(Node::new("s", NodeKind::Source)).unwrap();
        let tool = Tool::new("id", |inputs: &Map<String, Value>| {
            Ok(inputs.get("x").cloned().unwrap_or(Value::Null))
        });
        graph
            .insert_node(Node::new("t", NodeKind::Tool { tool }))
            .unwrap();
        graph
            .insert_link(Link::new("l", "s", "out", "t", "x"))
            .unwrap();

        let mut outputs = ResultPool::new();
        outputs.set("s", json!(7));
        let source_data = HashMap::new();
        let sink_data = HashMap::new();
        let ctx = context(&graph, &outputs, &source_data, &sink_data, Path::new("/tmp"));

        let node = graph.node("t").unwrap();
        let jobs = node.execute(&ctx).unwrap();
        match &jobs[0].task {
            JobTask::Invoke { inputs, .. } => assert_eq!(inputs.get("x"), Some(&json!(7))),
            other => panic!("expected Invoke task, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_upstream_value_is_an_error() {
        let mut graph = NetworkGraph::new();
        graph.insert_node(Node::new("s", NodeKind::Source)).unwrap();
        let tool = Tool::new("id", |_: &Map<String, Value>| Ok(Value::Null));
        graph
            .insert_node(Node::new("t", NodeKind::Tool { tool }))
            .unwrap();
        graph
            .insert_link(Link::new("l", "s", "out", "t", "x"))
            .unwrap();

        let outputs = ResultPool::new();
        let source_data = HashMap::new();
        let sink_data = HashMap::new();
        let ctx = context(&graph, &outputs, &source_data, &sink_data, Path::new("/tmp"));

        let err = graph.node("t").unwrap().execute(&ctx).unwrap_err();
        assert!(matches!(err, NetworkError::MissingInput { .. }));
    }

    #[test]
    fn test_node_status() {
        let mut graph = NetworkGraph::new();
        graph.insert_node(Node::new("s", NodeKind::Source)).unwrap();
        graph.insert_node(Node::new("k", NodeKind::Sink)).unwrap();

        // Sink without an inbound link is flagged.
        assert!(!graph.node("k").unwrap().status(&graph).valid);
        graph
            .insert_link(Link::new("l", "s", "out", "k", "in"))
            .unwrap();
        assert!(graph.node("k").unwrap().status(&graph).valid);
        assert!(graph.node("s").unwrap().status(&graph).valid);
    }

    #[test]
    fn test_collapse_inputs() {
        let mut single = Map::new();
        single.insert("in".to_string(), json!(3));
        assert_eq!(collapse_inputs(single), json!(3));

        let mut multi = Map::new();
        multi.insert("a".to_string(), json!(1));
        multi.insert("b".to_string(), json!(2));
        assert_eq!(collapse_inputs(multi), json!({"a": 1, "b": 2}));

        assert_eq!(collapse_inputs(Map::new()), Value::Null);
    }
}
