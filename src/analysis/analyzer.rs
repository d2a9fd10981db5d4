//! Default analyzer: topological ordering of a single chunk.

use std::collections::HashMap;

use petgraph::stable_graph::StableDiGraph;

use crate::analysis::{Chunk, NetworkAnalyzer};
use crate::error::NetworkError;
use crate::graph::NetworkGraph;

/// Orders the nodes of one chunk so every link whose endpoints both live in
/// the chunk points forward. Links that leave or enter the chunk are already
/// honored by the chunk boundaries and are ignored here.
#[derive(Debug, Default)]
pub struct DefaultAnalyzer;

impl NetworkAnalyzer for DefaultAnalyzer {
    fn analyze_network(
        &self,
        graph: &NetworkGraph,
        chunk: &Chunk,
    ) -> Result<Vec<String>, NetworkError> {
        let mut dag = StableDiGraph::new();
        let mut index_map = HashMap::new();

        let mut ids: Vec<&String> = chunk.nodes().iter().collect();
        ids.sort_unstable();
        for id in ids {
            let idx = dag.add_node(id.clone());
            index_map.insert(id.as_str(), idx);
        }

        for link in graph.links() {
            if let (Some(&from), Some(&to)) = (
                index_map.get(link.from_node()),
                index_map.get(link.to_node()),
            ) {
                dag.add_edge(from, to, ());
            }
        }

        let order = petgraph::algo::toposort(&dag, None).map_err(|_| NetworkError::CycleDetected)?;
        Ok(order
            .into_iter()
            .filter_map(|idx| dag.node_weight(idx).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Link, Node, NodeKind, Tool};
    use serde_json::{Map, Value};

    fn noop_tool() -> Tool {
        Tool::new("noop", |_: &Map<String, Value>| Ok(Value::Null))
    }

    #[test]
    fn test_order_respects_chunk_internal_links() {
        let mut graph = NetworkGraph::new();
        for id in ["x", "y", "z"] {
            let mut node = Node::new(id, NodeKind::Tool { tool: noop_tool() });
            node.set_blocking(false);
            graph.insert_node(node).unwrap();
        }
        graph
            .insert_link(Link::new("l_zy", "z", "out", "y", "in"))
            .unwrap();
        graph
            .insert_link(Link::new("l_yx", "y", "out", "x", "in"))
            .unwrap();

        let chunk = Chunk::new(vec!["x".into(), "y".into(), "z".into()]);
        let order = DefaultAnalyzer.analyze_network(&graph, &chunk).unwrap();
        assert_eq!(order, ["z", "y", "x"]);
    }

    #[test]
    fn test_links_outside_chunk_are_ignored() {
        let mut graph = NetworkGraph::new();
        graph.insert_node(Node::new("s", NodeKind::Source)).unwrap();
        graph
            .insert_node(Node::new("t", NodeKind::Tool { tool: noop_tool() }))
            .unwrap();
        graph
            .insert_link(Link::new("l_st", "s", "out", "t", "in"))
            .unwrap();

        let chunk = Chunk::new(vec!["t".into()]);
        let order = DefaultAnalyzer.analyze_network(&graph, &chunk).unwrap();
        assert_eq!(order, ["t"]);
    }

    #[test]
    fn test_cycle_inside_chunk_is_an_error() {
        let mut graph = NetworkGraph::new();
        for id in ["a", "b"] {
            let mut node = Node::new(id, NodeKind::Tool { tool: noop_tool() });
            node.set_blocking(false);
            graph.insert_node(node).unwrap();
        }
        graph
            .insert_link(Link::new("l_ab", "a", "out", "b", "in"))
            .unwrap();
        graph
            .insert_link(Link::new("l_ba", "b", "out", "a", "in"))
            .unwrap();

        let chunk = Chunk::new(vec!["a".into(), "b".into()]);
        let err = DefaultAnalyzer.analyze_network(&graph, &chunk).unwrap_err();
        assert!(matches!(err, NetworkError::CycleDetected));
    }
}
