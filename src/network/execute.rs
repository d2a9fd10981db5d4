//! The run protocol: staged dispatch, completion handling, abort.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::analysis::Chunk;
use crate::config;
use crate::error::NetworkError;
use crate::execution::{
    CompletionCallback, ExecutionBackendRegistry, ExecutionInterface, Job, JobStatus,
};
use crate::graph::{JobContext, KindTag};
use crate::network::Network;

/// Clears the `executing` flag when the run ends, including when the
/// `execute` future is dropped mid-run (a macro job's task awaits a nested
/// `execute`, and backend close aborts those tasks).
struct RunGuard<'a> {
    network: &'a Network,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.network.executing.store(false, Ordering::Release);
        self.network.signal.notify_one();
    }
}

/// Closes the backend interface even if the run future is dropped before
/// the explicit close. Dropping spawns the close, since `Drop` cannot await.
struct InterfaceGuard {
    interface: Option<Arc<dyn ExecutionInterface>>,
}

impl InterfaceGuard {
    fn disarm(&mut self) -> Option<Arc<dyn ExecutionInterface>> {
        self.interface.take()
    }
}

impl Drop for InterfaceGuard {
    fn drop(&mut self) {
        if let Some(interface) = self.interface.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { interface.close().await });
            }
        }
    }
}

fn unfinished_jobs(
    states: &HashMap<crate::execution::JobId, JobStatus>,
    network: &str,
    chunk: &Chunk,
) -> Vec<String> {
    let mut ids: Vec<String> = states
        .iter()
        .filter(|(id, status)| {
            id.network == network && chunk.contains(&id.node) && **status != JobStatus::Finished
        })
        .map(|(id, _)| id.to_string())
        .collect();
    ids.sort_unstable();
    ids
}

impl Network {
    /// Run the network to completion.
    ///
    /// `source_data` feeds the source nodes, `sink_data` names the
    /// destination of each sink. `backend` overrides the configured default;
    /// `tmp_dir` overrides the scratch directory for this run.
    ///
    /// Runs are serialized: a concurrent call waits until the live run
    /// finishes, then runs in full. Returns `Ok(true)` when every chunk
    /// completed, `Ok(false)` when a job failed or the run was aborted, and
    /// `Err` only for bootstrap problems such as an unknown backend or
    /// missing source data.
    pub async fn execute(
        &self,
        source_data: &HashMap<String, Value>,
        sink_data: &HashMap<String, String>,
        backend: Option<&str>,
        tmp_dir: Option<PathBuf>,
    ) -> Result<bool, NetworkError> {
        let _permit = self
            .run_lock
            .acquire()
            .await
            .map_err(|_| NetworkError::Internal("run lock closed".to_string()))?;

        self.abort_requested.store(false, Ordering::Release);
        self.failed.store(false, Ordering::Release);
        self.executing.store(true, Ordering::Release);
        let _guard = RunGuard { network: self };
        info!(network = %self.id(), "execution started");

        let result = self.run(source_data, sink_data, backend, tmp_dir).await;

        match &result {
            Ok(true) => info!(network = %self.id(), "execution finished"),
            Ok(false) => warn!(network = %self.id(), "execution did not complete"),
            Err(e) => warn!(network = %self.id(), error = %e, "execution failed to start"),
        }
        result
    }

    /// Request cancellation of the live run. Safe to call at any time, from
    /// any thread; without a live run the request is cleared by the next
    /// `execute` before it dispatches anything. The run notices the request
    /// within one poll interval.
    pub fn abort(&self) {
        info!(network = %self.id(), "abort requested");
        self.abort_requested.store(true, Ordering::Release);
        self.signal.notify_one();
    }

    async fn run(
        &self,
        source_data: &HashMap<String, Value>,
        sink_data: &HashMap<String, String>,
        backend: Option<&str>,
        tmp_dir: Option<PathBuf>,
    ) -> Result<bool, NetworkError> {
        let cfg = config::get();
        let backend_name = backend.unwrap_or(&cfg.default_backend);
        let factory = ExecutionBackendRegistry::global()
            .get(backend_name)
            .ok_or_else(|| NetworkError::UnknownBackend(backend_name.to_string()))?;

        let run_dir = match tmp_dir {
            Some(dir) => dir,
            None => cfg.temp_mount.join(format!("net_{}", self.id())),
        };
        std::fs::create_dir_all(&run_dir)?;
        debug!(network = %self.id(), run_dir = %run_dir.display(), "run directory ready");

        self.pool.lock().clear();

        // Missing run data is fatal before anything is submitted; constants
        // fill themselves and need no entry.
        let chunks = {
            let graph = self.graph.read();
            for id in graph.kind_ids(KindTag::Source) {
                if !source_data.contains_key(id) {
                    return Err(NetworkError::MissingSourceData(id.to_string()));
                }
            }
            for id in graph.kind_ids(KindTag::Sink) {
                if !sink_data.contains_key(id) {
                    return Err(NetworkError::MissingSinkData(id.to_string()));
                }
            }
            self.chunker.chunk_network(&graph)?
        };
        debug!(network = %self.id(), chunks = chunks.len(), "chunked for dispatch");

        let on_finished: CompletionCallback = {
            let weak = self.self_ref.clone();
            Arc::new(move |job| {
                if let Some(network) = weak.upgrade() {
                    network.handle_job_completion(job);
                }
            })
        };
        let on_cancelled = on_finished.clone();
        let interface = factory.open(on_finished, on_cancelled)?;
        let mut close_guard = InterfaceGuard {
            interface: Some(interface.clone()),
        };

        let outcome = self
            .run_chunks(&interface, &chunks, source_data, sink_data, &run_dir, &cfg)
            .await;
        if let Some(interface) = close_guard.disarm() {
            interface.close().await;
        }
        outcome
    }

    async fn run_chunks(
        &self,
        interface: &Arc<dyn ExecutionInterface>,
        chunks: &[Chunk],
        source_data: &HashMap<String, Value>,
        sink_data: &HashMap<String, String>,
        run_dir: &std::path::Path,
        cfg: &config::EngineConfig,
    ) -> Result<bool, NetworkError> {
        let poll = Duration::from_millis(cfg.poll_interval_ms.max(1));

        for (index, chunk) in chunks.iter().enumerate() {
            if self.abort_requested.load(Ordering::Acquire) {
                return Ok(false);
            }
            if chunk.is_empty() {
                continue;
            }

            let jobs = self.produce_chunk_jobs(chunk, source_data, sink_data, run_dir)?;
            debug!(
                network = %self.id(),
                chunk = index,
                jobs = jobs.len(),
                "dispatching chunk"
            );
            // Set before dispatch: a cached job completes synchronously
            // inside the loop below.
            self.chunk_pending.store(jobs.len(), Ordering::Release);

            for job in jobs {
                if self.abort_requested.load(Ordering::Acquire) {
                    return Ok(false);
                }
                if job.cached() {
                    // Cached jobs never reach the backend; their completion
                    // travels the same callback path immediately.
                    let mut done = job;
                    done.status = JobStatus::Finished;
                    debug!(job = %done.id, "result already available, skipping dispatch");
                    self.handle_job_completion(done);
                } else {
                    interface.queue_job(job).await?;
                }
            }

            if !self.wait_for_chunk(poll).await {
                return Ok(false);
            }
            if self.failed.load(Ordering::Acquire) {
                let unfinished = unfinished_jobs(&interface.job_states(), self.id(), chunk);
                warn!(
                    network = %self.id(),
                    chunk = index,
                    jobs = ?unfinished,
                    "chunk did not finish cleanly, stopping run"
                );
                return Ok(false);
            }
            debug!(network = %self.id(), chunk = index, "chunk finished");
        }
        Ok(!self.failed.load(Ordering::Acquire))
    }

    /// Produce the jobs of one chunk in analysis order, resolving inputs
    /// from the pool. Holds the graph read lock and the pool lock for the
    /// duration; both are released before dispatch.
    fn produce_chunk_jobs(
        &self,
        chunk: &Chunk,
        source_data: &HashMap<String, Value>,
        sink_data: &HashMap<String, String>,
        run_dir: &std::path::Path,
    ) -> Result<Vec<Job>, NetworkError> {
        let graph = self.graph.read();
        let order = self.analyzer.analyze_network(&graph, chunk)?;
        let pool = self.pool.lock();
        let ctx = JobContext {
            network_id: self.id(),
            graph: &graph,
            outputs: &pool,
            source_data,
            sink_data,
            run_dir,
        };

        let mut jobs = Vec::new();
        for node_id in order {
            let node = graph
                .node(&node_id)
                .ok_or_else(|| NetworkError::NodeNotFound(node_id.clone()))?;
            jobs.extend(node.execute(&ctx)?);
        }
        Ok(jobs)
    }

    /// Block until every completion of the current chunk has been delivered
    /// and applied, or an abort is requested. The backend marking a job
    /// terminal is not enough; only the completion callback's decrement
    /// counts, so the next chunk never produces against a pool the results
    /// have not reached yet. Completions wake the wait through the signal;
    /// the poll interval bounds how long a missed wakeup can stall the
    /// re-check.
    async fn wait_for_chunk(&self, poll: Duration) -> bool {
        loop {
            if self.abort_requested.load(Ordering::Acquire) {
                return false;
            }
            if self.chunk_pending.load(Ordering::Acquire) == 0 {
                return true;
            }
            let _ = tokio::time::timeout(poll, self.signal.notified()).await;
        }
    }

    /// Terminal delivery for one job. Invoked by the backend callbacks from
    /// any task, and synchronously for cached jobs.
    fn handle_job_completion(&self, job: Job) {
        if job.id.network != self.id() {
            warn!(job = %job.id, network = %self.id(), "completion for another network ignored");
            return;
        }
        match job.status {
            JobStatus::Finished => {
                debug!(job = %job.id, "job finished");
                // Only blocking nodes feed later job production; their
                // results are the ones recorded.
                let blocking = self.graph.read().node(&job.id.node).map(|n| n.blocking());
                match (blocking, &job.result) {
                    (Some(true), Some(result)) => {
                        self.pool.lock().set(&job.id.node, result.clone());
                    }
                    (None, _) => {
                        warn!(job = %job.id, "completion for unknown node, result dropped");
                    }
                    _ => {}
                }
            }
            JobStatus::Failed => {
                error!(job = %job.id, errors = ?job.errors, "job failed");
                self.failed.store(true, Ordering::Release);
            }
            JobStatus::Cancelled => {
                debug!(job = %job.id, "job cancelled");
                self.failed.store(true, Ordering::Release);
            }
            JobStatus::Queued | JobStatus::Running => {
                warn!(job = %job.id, status = %job.status, "non-terminal completion ignored");
                return;
            }
        }

        {
            let listener = self.job_listener.read();
            if let Some(listener) = listener.as_ref() {
                if catch_unwind(AssertUnwindSafe(|| listener(&job))).is_err() {
                    warn!(job = %job.id, "job listener panicked");
                }
            }
        }

        // The result (or failure) is applied above, so the decrement is the
        // chunk's release point. Saturates at zero: a cancellation delivered
        // during close lands after the chunk already drained.
        let _ = self
            .chunk_pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.signal.notify_one();
    }
}
