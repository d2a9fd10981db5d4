//! Pluggable execution backends.
//!
//! A [`Network`](crate::network::Network) run resolves an
//! [`ExecutionBackend`] factory by name from the process-wide
//! [`ExecutionBackendRegistry`], opens a live [`ExecutionInterface`] scoped
//! to that run, queues jobs on it, and receives completions through the
//! callbacks registered at open time. The `"local"` backend is built in.

pub mod job;
pub mod local;

pub use job::{Job, JobId, JobStatus, JobTask};
pub use local::{LocalBackend, LocalExecution};

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::NetworkError;

/// Completion delivery: invoked exactly once per job, from any task or
/// thread, after the job reaches a terminal state.
pub type CompletionCallback = Arc<dyn Fn(Job) + Send + Sync>;

/// A live backend instance scoped to a single run.
#[async_trait]
pub trait ExecutionInterface: Send + Sync {
    /// Accept a job for asynchronous execution. Exactly one of the callbacks
    /// registered at open time will eventually be invoked for it.
    async fn queue_job(&self, job: Job) -> Result<(), NetworkError>;

    /// Snapshot of the live job-status mapping. Owned and mutated by the
    /// backend only; the network just reads it.
    fn job_states(&self) -> HashMap<JobId, JobStatus>;

    /// Stop accepting jobs and release resources. Jobs that never reached a
    /// terminal state are delivered through the cancelled callback.
    async fn close(&self);
}

/// Factory for [`ExecutionInterface`] instances, registered by name.
pub trait ExecutionBackend: Send + Sync {
    /// Open a live interface with the run's completion handlers:
    /// `on_finished` for normal terminal delivery, `on_cancelled` for jobs
    /// cancelled by `close`.
    fn open(
        &self,
        on_finished: CompletionCallback,
        on_cancelled: CompletionCallback,
    ) -> Result<Arc<dyn ExecutionInterface>, NetworkError>;
}

/// Process-wide registry of execution backends by name.
pub struct ExecutionBackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn ExecutionBackend>>>,
}

impl ExecutionBackendRegistry {
    fn new() -> Self {
        let registry = ExecutionBackendRegistry {
            backends: RwLock::new(HashMap::new()),
        };
        registry.register("local", Arc::new(LocalBackend));
        registry
    }

    /// The process-wide registry, with the built-in backends pre-registered.
    pub fn global() -> &'static ExecutionBackendRegistry {
        static REGISTRY: OnceLock<ExecutionBackendRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ExecutionBackendRegistry::new)
    }

    pub fn register(&self, name: &str, backend: Arc<dyn ExecutionBackend>) {
        self.backends.write().insert(name.to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutionBackend>> {
        self.backends.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_registry_has_local() {
        assert!(ExecutionBackendRegistry::global().get("local").is_some());
        assert!(ExecutionBackendRegistry::global().get("grid").is_none());
    }

    #[test]
    fn test_register_custom_backend() {
        let registry = ExecutionBackendRegistry::new();
        registry.register("second_local", Arc::new(LocalBackend));
        assert!(registry.get("second_local").is_some());
    }
}
