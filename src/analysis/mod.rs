//! Network analysis: chunking and topological ordering.
//!
//! A run is staged: the [`NetworkChunker`] splits the graph into an ordered
//! sequence of [`Chunk`]s executed strictly in order, and the
//! [`NetworkAnalyzer`] orders the nodes inside one chunk so every link
//! dependency is honored. Both are trait seams; the defaults cover the
//! common case and callers may inject their own via
//! [`Network::with_parts`](crate::network::Network::with_parts).

pub mod analyzer;
pub mod chunker;

pub use analyzer::DefaultAnalyzer;
pub use chunker::DefaultChunker;

use crate::error::NetworkError;
use crate::graph::NetworkGraph;

/// An ordered subset of the graph executed as one atomic stage of a run.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    nodes: Vec<String>,
}

impl Chunk {
    pub fn new(nodes: Vec<String>) -> Self {
        Chunk { nodes }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|n| n == node_id)
    }
}

/// Splits a graph snapshot into an ordered sequence of chunks.
/// Must be deterministic for a given snapshot.
pub trait NetworkChunker: Send + Sync {
    fn chunk_network(&self, graph: &NetworkGraph) -> Result<Vec<Chunk>, NetworkError>;
}

/// Produces a topologically valid execution order for the nodes of one
/// chunk, honoring link dependencies restricted to that chunk. Errors on a
/// dependency cycle.
pub trait NetworkAnalyzer: Send + Sync {
    fn analyze_network(
        &self,
        graph: &NetworkGraph,
        chunk: &Chunk,
    ) -> Result<Vec<String>, NetworkError>;
}
