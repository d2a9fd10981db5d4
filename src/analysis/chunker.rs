//! Default chunker: layers the graph at blocking-node boundaries.

use std::collections::HashMap;

use petgraph::stable_graph::StableDiGraph;
use tracing::debug;

use crate::analysis::{Chunk, NetworkChunker};
use crate::error::NetworkError;
use crate::graph::NetworkGraph;

/// Assigns every node to the earliest chunk consistent with one rule: a node
/// lands in a strictly later chunk than any blocking predecessor, so the
/// predecessor's result is applied to the graph before the dependent's jobs
/// are produced. Non-blocking predecessors keep their dependents in the same
/// chunk.
#[derive(Debug, Default)]
pub struct DefaultChunker;

impl NetworkChunker for DefaultChunker {
    fn chunk_network(&self, graph: &NetworkGraph) -> Result<Vec<Chunk>, NetworkError> {
        let dag = build_dag(graph);
        let order = petgraph::algo::toposort(&dag, None).map_err(|_| NetworkError::CycleDetected)?;

        let mut chunk_of: HashMap<String, usize> = HashMap::new();
        let mut chunk_count = 0;
        for idx in &order {
            let Some(node_id) = dag.node_weight(*idx) else {
                continue;
            };
            let mut chunk = 0;
            for pred in dag.neighbors_directed(*idx, petgraph::Direction::Incoming) {
                let Some(pred_id) = dag.node_weight(pred) else {
                    continue;
                };
                let pred_chunk = chunk_of.get(pred_id).copied().unwrap_or(0);
                let boundary = graph
                    .node(pred_id)
                    .map(|n| usize::from(n.blocking()))
                    .unwrap_or(0);
                chunk = chunk.max(pred_chunk + boundary);
            }
            chunk_of.insert(node_id.clone(), chunk);
            chunk_count = chunk_count.max(chunk + 1);
        }

        let mut chunks = vec![Vec::new(); chunk_count];
        for (node_id, &chunk) in &chunk_of {
            chunks[chunk].push(node_id.clone());
        }
        // Topological sort order varies between equivalent snapshots, so each
        // chunk is sorted by id instead.
        for chunk in &mut chunks {
            chunk.sort_unstable();
        }

        debug!(chunks = chunks.len(), "network chunked");
        Ok(chunks.into_iter().map(Chunk::new).collect())
    }
}

/// Build a petgraph DAG over the whole graph. Links with an unregistered
/// endpoint are skipped (they are reported by the validity check, not here).
fn build_dag(graph: &NetworkGraph) -> StableDiGraph<String, ()> {
    let mut dag = StableDiGraph::new();
    let mut index_map = HashMap::new();

    for node in graph.nodes() {
        let idx = dag.add_node(node.id().to_string());
        index_map.insert(node.id().to_string(), idx);
    }

    for link in graph.links() {
        if let (Some(&from), Some(&to)) = (
            index_map.get(link.from_node()),
            index_map.get(link.to_node()),
        ) {
            dag.add_edge(from, to, ());
        }
    }
    dag
}
