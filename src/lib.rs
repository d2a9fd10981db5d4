//! flownet: a staged workflow execution engine.
//!
//! A [`Network`] is a directed graph of nodes joined by links. Sources and
//! constants feed data in, tool nodes transform it, macro nodes run nested
//! networks, and sinks persist results. [`Network::execute`] snapshots the
//! graph, splits it into ordered chunks at blocking-node boundaries, and
//! dispatches each chunk's jobs to a pluggable [`ExecutionBackend`] —
//! waiting for one chunk to finish before producing the next, so results
//! written back by the completion callback are available to downstream
//! job production.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use flownet::{Network, Tool};
//! use serde_json::{json, Map, Value};
//!
//! # async fn demo() -> Result<(), flownet::NetworkError> {
//! let net = Network::new("doubler")?;
//! net.create_source("x")?;
//! net.create_node(
//!     "double",
//!     Tool::new("double", |inputs: &Map<String, Value>| {
//!         let x = inputs.get("x").and_then(Value::as_i64).unwrap_or(0);
//!         Ok(json!(x * 2))
//!     }),
//! )?;
//! net.create_sink("out")?;
//! net.create_link("l_xd", "x", "value", "double", "x")?;
//! net.create_link("l_do", "double", "value", "out", "result")?;
//!
//! let sources = HashMap::from([("x".to_string(), json!(21))]);
//! let sinks = HashMap::from([("out".to_string(), "/tmp/out.json".to_string())]);
//! assert!(net.execute(&sources, &sinks, None, None).await?);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod execution;
pub mod graph;
pub mod network;

pub use analysis::{Chunk, DefaultAnalyzer, DefaultChunker, NetworkAnalyzer, NetworkChunker};
pub use config::EngineConfig;
pub use error::NetworkError;
pub use execution::{
    ExecutionBackend, ExecutionBackendRegistry, ExecutionInterface, Job, JobId, JobStatus,
    LocalBackend,
};
pub use graph::{Link, Node, NodeKind, NodeStatus, Tool};
pub use network::{JobListener, Network, NetworkStatus};
