//! The network: graph container, mutation API, and run orchestration.

mod execute;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use regex::Regex;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tracing::warn;

use crate::analysis::{DefaultAnalyzer, DefaultChunker, NetworkAnalyzer, NetworkChunker};
use crate::error::NetworkError;
use crate::execution::Job;
use crate::graph::{KindTag, Link, NetworkGraph, Node, NodeKind, NodeStatus, ResultPool, Tool};

/// User hook invoked on every job completion during a run.
pub type JobListener = Box<dyn Fn(&Job) + Send + Sync>;

/// Aggregated validity report of a network.
#[derive(Debug, Clone, Default)]
pub struct NetworkStatus {
    pub valid: bool,
    pub nodes: HashMap<String, NodeStatus>,
    pub messages: Vec<String>,
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("id pattern"))
}

fn validate_id(id: &str) -> Result<(), NetworkError> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(NetworkError::InvalidId(id.to_string()))
    }
}

/// A workflow graph and the machinery to run it.
///
/// Concurrency model, in lock order:
/// - `run_lock` serializes runs: a second `execute` waits for the first.
/// - `executing` is the non-blocking mutation guard; while it is set, every
///   structural edit is refused with
///   [`NetworkError::ExecutionInProgress`]. It doubles as the flag `abort`
///   consults.
/// - `graph` is the structural lock proper. Mutations take the write side;
///   job production and analysis take the read side.
/// - `pool` guards result application against concurrent job completions.
pub struct Network {
    id: String,
    self_ref: Weak<Network>,
    graph: RwLock<NetworkGraph>,
    pool: Mutex<ResultPool>,
    chunker: Box<dyn NetworkChunker>,
    analyzer: Box<dyn NetworkAnalyzer>,
    run_lock: Semaphore,
    executing: AtomicBool,
    abort_requested: AtomicBool,
    failed: AtomicBool,
    /// Completion deliveries still outstanding for the chunk being waited
    /// on. Decremented by the completion callback only, after result
    /// application, so reaching zero means every result has landed.
    chunk_pending: AtomicUsize,
    signal: Notify,
    job_listener: RwLock<Option<JobListener>>,
}

impl Network {
    /// Create a network with the default chunker and analyzer.
    pub fn new(id: impl Into<String>) -> Result<Arc<Self>, NetworkError> {
        Self::with_parts(id, Box::new(DefaultChunker), Box::new(DefaultAnalyzer))
    }

    /// Create a network with injected analysis parts.
    pub fn with_parts(
        id: impl Into<String>,
        chunker: Box<dyn NetworkChunker>,
        analyzer: Box<dyn NetworkAnalyzer>,
    ) -> Result<Arc<Self>, NetworkError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Arc::new_cyclic(|self_ref| Network {
            id,
            self_ref: self_ref.clone(),
            graph: RwLock::new(NetworkGraph::new()),
            pool: Mutex::new(ResultPool::new()),
            chunker,
            analyzer,
            run_lock: Semaphore::new(1),
            executing: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            chunk_pending: AtomicUsize::new(0),
            signal: Notify::new(),
            job_listener: RwLock::new(None),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read access to the graph registries. Holding the guard blocks
    /// structural edits, so keep the scope short.
    pub fn graph(&self) -> RwLockReadGuard<'_, NetworkGraph> {
        self.graph.read()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Refuse structural edits while a run is live. The caller has not taken
    /// any lock yet, so a refused edit stays cheap.
    fn ensure_editable(&self) -> Result<(), NetworkError> {
        if self.executing.load(Ordering::Acquire) {
            warn!(network = %self.id, "structural edit refused, network is executing");
            return Err(NetworkError::ExecutionInProgress {
                network: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Register a pre-built node. The factory methods below are the usual
    /// entry points; this is the seam for custom construction.
    pub fn add_node(&self, mut node: Node) -> Result<(), NetworkError> {
        validate_id(node.id())?;
        self.ensure_editable()?;
        node.set_network(&self.id);
        self.graph.write().insert_node(node)
    }

    /// Register a pre-built link. Both endpoints must already be registered,
    /// and a link owned by another network is rejected.
    pub fn add_link(&self, mut link: Link) -> Result<(), NetworkError> {
        validate_id(link.id())?;
        self.ensure_editable()?;
        if let Some(owner) = link.network() {
            if owner != self.id {
                return Err(NetworkError::LinkOwnershipMismatch {
                    link: link.id().to_string(),
                    owner: owner.to_string(),
                });
            }
        }
        let mut graph = self.graph.write();
        if graph.node(link.from_node()).is_none() {
            return Err(NetworkError::NodeNotFound(link.from_node().to_string()));
        }
        if graph.node(link.to_node()).is_none() {
            return Err(NetworkError::NodeNotFound(link.to_node().to_string()));
        }
        link.set_network(&self.id);
        graph.insert_link(link)
    }

    /// Construct and register a source node.
    pub fn create_source(&self, id: impl Into<String>) -> Result<(), NetworkError> {
        self.add_node(Node::new(id, NodeKind::Source))
    }

    /// Construct and register a constant node carrying `value`.
    pub fn create_constant(
        &self,
        id: impl Into<String>,
        value: Value,
    ) -> Result<(), NetworkError> {
        self.add_node(Node::new(id, NodeKind::Constant { value }))
    }

    /// Construct and register a sink node.
    pub fn create_sink(&self, id: impl Into<String>) -> Result<(), NetworkError> {
        self.add_node(Node::new(id, NodeKind::Sink))
    }

    /// Construct and register a tool-backed node.
    pub fn create_node(&self, id: impl Into<String>, tool: Tool) -> Result<(), NetworkError> {
        self.add_node(Node::new(id, NodeKind::Tool { tool }))
    }

    /// Construct and register a macro node wrapping a nested network.
    pub fn create_macro(
        &self,
        id: impl Into<String>,
        network: Arc<Network>,
    ) -> Result<(), NetworkError> {
        self.add_node(Node::new(id, NodeKind::Macro { network }))
    }

    /// Construct and register a link between two registered nodes.
    pub fn create_link(
        &self,
        id: impl Into<String>,
        from_node: impl Into<String>,
        from_output: impl Into<String>,
        to_node: impl Into<String>,
        to_input: impl Into<String>,
    ) -> Result<(), NetworkError> {
        self.add_link(Link::new(id, from_node, from_output, to_node, to_input))
    }

    /// Detach a node or link by id. No cascade: links referring to a removed
    /// node stay registered and are reported by [`Network::status`].
    pub fn remove(&self, id: &str) -> Result<(), NetworkError> {
        self.ensure_editable()?;
        self.graph.write().remove_item(id)
    }

    /// Flip a node's blocking flag, moving the chunk boundary around it.
    pub fn set_node_blocking(&self, id: &str, blocking: bool) -> Result<(), NetworkError> {
        self.ensure_editable()?;
        let mut graph = self.graph.write();
        let node = graph
            .node_mut(id)
            .ok_or_else(|| NetworkError::NodeNotFound(id.to_string()))?;
        node.set_blocking(blocking);
        Ok(())
    }

    /// Append a registered node to a step group.
    pub fn add_to_group(&self, label: &str, node_id: &str) -> Result<(), NetworkError> {
        self.ensure_editable()?;
        let mut graph = self.graph.write();
        if graph.node(node_id).is_none() {
            return Err(NetworkError::NodeNotFound(node_id.to_string()));
        }
        graph.push_step_group(label, node_id);
        Ok(())
    }

    /// Append a registered source node to a source group. Non-source nodes
    /// are rejected.
    pub fn add_to_source_group(&self, label: &str, node_id: &str) -> Result<(), NetworkError> {
        self.ensure_editable()?;
        let mut graph = self.graph.write();
        match graph.node(node_id) {
            None => return Err(NetworkError::NodeNotFound(node_id.to_string())),
            Some(node) if !matches!(node.tag(), KindTag::Source | KindTag::Constant) => {
                return Err(NetworkError::NotASource(node_id.to_string()));
            }
            Some(_) => {}
        }
        graph.push_source_group(label, node_id);
        Ok(())
    }

    /// Recorded result of a node from the most recent run, if any.
    pub fn output(&self, node_id: &str) -> Option<Value> {
        self.pool.lock().get(node_id).cloned()
    }

    /// Register the job-finished listener, replacing any previous one. The
    /// listener runs inside the completion callback; panics are caught and
    /// logged without disturbing the run.
    pub fn set_job_listener<F>(&self, listener: F)
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        *self.job_listener.write() = Some(Box::new(listener));
    }

    pub fn clear_job_listener(&self) {
        *self.job_listener.write() = None;
    }

    /// Structural validity of the whole network: per-node reports plus
    /// dangling-link detection.
    pub fn status(&self) -> NetworkStatus {
        let graph = self.graph.read();
        let mut status = NetworkStatus {
            valid: true,
            ..NetworkStatus::default()
        };
        for node in graph.nodes() {
            let node_status = node.status(&graph);
            status.valid &= node_status.valid;
            status.nodes.insert(node.id().to_string(), node_status);
        }
        for link in graph.links() {
            for endpoint in [link.from_node(), link.to_node()] {
                if graph.node(endpoint).is_none() {
                    status.valid = false;
                    status
                        .messages
                        .push(format!("link {} refers to unknown node {endpoint}", link.id()));
                }
            }
        }
        status
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph.read();
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("nodes", &graph.node_count())
            .field("links", &graph.link_count())
            .field("executing", &self.is_executing())
            .finish()
    }
}
