//! Jobs: dispatchable units of work derived from nodes.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graph::{KindTag, Tool};
use crate::network::Network;

/// Identity of a job: network, node, and an item index disambiguating
/// multiple jobs produced by the same node within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub network: String,
    pub node: String,
    pub index: usize,
}

impl JobId {
    pub fn new(network: impl Into<String>, node: impl Into<String>, index: usize) -> Self {
        JobId {
            network: network.into(),
            node: node.into(),
            index,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.network, self.node, self.index)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The work a job performs, self-contained so the backend can run it without
/// reaching back into the network.
#[derive(Clone)]
pub enum JobTask {
    /// Pass a value through unchanged (sources, constants).
    Literal(Value),
    /// Apply a tool function to resolved inputs.
    Invoke {
        tool: Tool,
        inputs: Map<String, Value>,
    },
    /// Persist the collected input as JSON at the destination path.
    Sink { input: Value, destination: PathBuf },
    /// Run a nested network: inputs become its source data, its sink values
    /// are collected back as one JSON object.
    SubNetwork {
        network: Arc<Network>,
        inputs: Map<String, Value>,
        work_dir: PathBuf,
    },
}

impl fmt::Debug for JobTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobTask::Literal(value) => write!(f, "Literal({value})"),
            JobTask::Invoke { tool, .. } => write!(f, "Invoke({})", tool.name()),
            JobTask::Sink { destination, .. } => write!(f, "Sink({})", destination.display()),
            JobTask::SubNetwork { network, .. } => write!(f, "SubNetwork({})", network.id()),
        }
    }
}

impl JobTask {
    /// Run the task to completion. Boxed so a macro job's nested `execute`
    /// does not make the future type recursive.
    pub fn run(&self) -> BoxFuture<'_, Result<Value, String>> {
        match self {
            JobTask::Literal(value) => {
                let value = value.clone();
                Box::pin(async move { Ok(value) })
            }
            JobTask::Invoke { tool, inputs } => {
                let tool = tool.clone();
                let inputs = inputs.clone();
                Box::pin(async move {
                    tokio::task::spawn_blocking(move || tool.invoke(&inputs))
                        .await
                        .map_err(|e| format!("tool task panicked: {e}"))?
                })
            }
            JobTask::Sink { input, destination } => Box::pin(async move {
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| format!("cannot create sink directory: {e}"))?;
                }
                let bytes = serde_json::to_vec_pretty(input)
                    .map_err(|e| format!("cannot serialize sink value: {e}"))?;
                tokio::fs::write(destination, bytes)
                    .await
                    .map_err(|e| format!("cannot write sink {}: {e}", destination.display()))?;
                Ok(input.clone())
            }),
            JobTask::SubNetwork {
                network,
                inputs,
                work_dir,
            } => Box::pin(run_sub_network(network, inputs, work_dir)),
        }
    }
}

async fn run_sub_network(
    network: &Arc<Network>,
    inputs: &Map<String, Value>,
    work_dir: &PathBuf,
) -> Result<Value, String> {
    let source_data: HashMap<String, Value> =
        inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let sink_ids: Vec<String> = {
        let graph = network.graph();
        graph.kind_ids(KindTag::Sink).map(str::to_string).collect()
    };
    let mut sink_data = HashMap::new();
    for id in &sink_ids {
        let path = work_dir.join(format!("{id}.json"));
        sink_data.insert(id.clone(), path.to_string_lossy().into_owned());
    }

    let ok = network
        .execute(&source_data, &sink_data, None, Some(work_dir.clone()))
        .await
        .map_err(|e| format!("sub-network {}: {e}", network.id()))?;
    if !ok {
        return Err(format!("sub-network {} did not complete", network.id()));
    }

    let mut collected = Map::new();
    for id in sink_ids {
        let path = work_dir.join(format!("{id}.json"));
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("cannot read sub-network sink {id}: {e}"))?;
        let value = serde_json::from_slice(&raw)
            .map_err(|e| format!("invalid sub-network sink {id}: {e}"))?;
        collected.insert(id, value);
    }
    Ok(Value::Object(collected))
}

/// One unit of dispatchable work. Created fresh each run; not persisted by
/// the network beyond the run.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task: JobTask,
    pub status: JobStatus,
    /// A previously-computed result. Jobs carrying one are never submitted
    /// to the backend; the completion callback is driven directly instead.
    pub result: Option<Value>,
    pub errors: Vec<String>,
}

impl Job {
    pub fn new(id: JobId, task: JobTask) -> Self {
        Job {
            id,
            task,
            status: JobStatus::Queued,
            result: None,
            errors: Vec::new(),
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn cached(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_id_display() {
        let id = JobId::new("net", "node", 3);
        assert_eq!(id.to_string(), "net/node#3");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Finished,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let as_json = serde_json::to_value(status).unwrap();
            assert_eq!(as_json, json!(status.to_string()));
        }
    }

    #[tokio::test]
    async fn test_literal_task() {
        let task = JobTask::Literal(json!(5));
        assert_eq!(task.run().await.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_invoke_task() {
        let tool = Tool::new("sum", |inputs: &Map<String, Value>| {
            let total: i64 = inputs.values().filter_map(Value::as_i64).sum();
            Ok(json!(total))
        });
        let mut inputs = Map::new();
        inputs.insert("a".to_string(), json!(1));
        inputs.insert("b".to_string(), json!(2));
        let task = JobTask::Invoke { tool, inputs };
        assert_eq!(task.run().await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_sink_task_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out").join("k.json");
        let task = JobTask::Sink {
            input: json!({"v": 2}),
            destination: destination.clone(),
        };
        assert_eq!(task.run().await.unwrap(), json!({"v": 2}));
        let raw = std::fs::read(&destination).unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value, json!({"v": 2}));
    }

    #[test]
    fn test_cached_job() {
        let job = Job::new(JobId::new("n", "c", 0), JobTask::Literal(json!(1)));
        assert!(!job.cached());
        let job = job.with_result(json!(1));
        assert!(job.cached());
    }
}
