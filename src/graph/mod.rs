//! Graph data layer: node and link registries, result pool.
//!
//! [`NetworkGraph`] holds the registries owned by a
//! [`Network`](crate::network::Network). It is pure data — all concurrency
//! guards (the structural-edit lock, the mutation guard against a live run)
//! live in the `Network` that wraps it.

pub mod link;
pub mod node;
pub mod pool;

pub use link::Link;
pub use node::{JobContext, KindTag, Node, NodeKind, NodeStatus, Tool};
pub use pool::ResultPool;

use std::collections::{BTreeSet, HashMap};

use crate::error::NetworkError;

/// Node, link, and grouping registries of a single network.
///
/// Invariant: a node id is present in `nodes` if and only if it is present in
/// the kind index for its tag. The two are always updated together.
#[derive(Debug, Default)]
pub struct NetworkGraph {
    nodes: HashMap<String, Node>,
    kinds: HashMap<KindTag, BTreeSet<String>>,
    links: HashMap<String, Link>,
    step_groups: HashMap<String, Vec<String>>,
    source_groups: HashMap<String, Vec<String>>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link(&self, id: &str) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Node ids of one kind, in sorted order (the index is a `BTreeSet`, so
    /// iteration is deterministic for a given graph snapshot).
    pub fn kind_ids(&self, tag: KindTag) -> impl Iterator<Item = &str> {
        self.kinds
            .get(&tag)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    pub fn incoming_links<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.links.values().filter(move |l| l.to_node() == node_id)
    }

    pub fn outgoing_links<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.links
            .values()
            .filter(move |l| l.from_node() == node_id)
    }

    pub fn step_group(&self, label: &str) -> Option<&[String]> {
        self.step_groups.get(label).map(Vec::as_slice)
    }

    pub fn source_group(&self, label: &str) -> Option<&[String]> {
        self.source_groups.get(label).map(Vec::as_slice)
    }

    pub(crate) fn insert_node(&mut self, node: Node) -> Result<(), NetworkError> {
        if self.nodes.contains_key(node.id()) {
            return Err(NetworkError::DuplicateNode(node.id().to_string()));
        }
        self.kinds
            .entry(node.tag())
            .or_default()
            .insert(node.id().to_string());
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    pub(crate) fn insert_link(&mut self, link: Link) -> Result<(), NetworkError> {
        if self.links.contains_key(link.id()) {
            return Err(NetworkError::DuplicateLink(link.id().to_string()));
        }
        self.links.insert(link.id().to_string(), link);
        Ok(())
    }

    /// Detach a node or link from the registries. Nodes are removed from the
    /// node registry, the kind index, and any groups together; links only
    /// from the link registry. No cascade to dependents.
    pub(crate) fn remove_item(&mut self, id: &str) -> Result<(), NetworkError> {
        if let Some(node) = self.nodes.remove(id) {
            if let Some(ids) = self.kinds.get_mut(&node.tag()) {
                ids.remove(id);
            }
            for members in self.step_groups.values_mut() {
                members.retain(|m| m != id);
            }
            for members in self.source_groups.values_mut() {
                members.retain(|m| m != id);
            }
            return Ok(());
        }
        if self.links.remove(id).is_some() {
            return Ok(());
        }
        Err(NetworkError::ItemNotFound(id.to_string()))
    }

    pub(crate) fn push_step_group(&mut self, label: &str, node_id: &str) {
        self.step_groups
            .entry(label.to_string())
            .or_default()
            .push(node_id.to_string());
    }

    pub(crate) fn push_source_group(&mut self, label: &str, node_id: &str) {
        self.source_groups
            .entry(label.to_string())
            .or_default()
            .push(node_id.to_string());
    }
}
