//! Result pool: recorded output state of blocking nodes.
//!
//! Results are written by the job-completion callback under the network's
//! result-application lock, and read during job production to resolve the
//! inputs of downstream nodes. One value per node; named outputs and
//! cardinality expansion live outside the execution core.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Default, Clone)]
pub struct ResultPool {
    values: HashMap<String, Value>,
}

impl ResultPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.values.get(node_id)
    }

    pub fn set(&mut self, node_id: &str, value: Value) {
        self.values.insert(node_id.to_string(), value);
    }

    pub fn remove(&mut self, node_id: &str) -> Option<Value> {
        self.values.remove(node_id)
    }

    /// Drop all recorded results. Called at the start of a run so stale
    /// values from a previous run cannot leak into job production.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
