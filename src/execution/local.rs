//! In-process execution backend running jobs on tokio tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::NetworkError;
use crate::execution::{
    CompletionCallback, ExecutionBackend, ExecutionInterface, Job, JobId, JobStatus,
};

/// Factory for [`LocalExecution`].
pub struct LocalBackend;

impl ExecutionBackend for LocalBackend {
    fn open(
        &self,
        on_finished: CompletionCallback,
        on_cancelled: CompletionCallback,
    ) -> Result<Arc<dyn ExecutionInterface>, NetworkError> {
        Ok(Arc::new(LocalExecution::new(on_finished, on_cancelled)))
    }
}

/// Runs each queued job on its own tokio task.
///
/// The pending map doubles as the exactly-once guard: whichever side removes
/// a job id first (the finished task, or `close`) delivers its completion;
/// the other side sees the removal and stays silent.
pub struct LocalExecution {
    states: Arc<DashMap<JobId, JobStatus>>,
    pending: Arc<DashMap<JobId, Job>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    on_finished: CompletionCallback,
    on_cancelled: CompletionCallback,
    closed: AtomicBool,
}

impl LocalExecution {
    pub fn new(on_finished: CompletionCallback, on_cancelled: CompletionCallback) -> Self {
        LocalExecution {
            states: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            handles: Mutex::new(Vec::new()),
            on_finished,
            on_cancelled,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExecutionInterface for LocalExecution {
    async fn queue_job(&self, job: Job) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::BackendClosed);
        }

        let id = job.id.clone();
        self.states.insert(id.clone(), JobStatus::Queued);
        self.pending.insert(id.clone(), job.clone());
        debug!(job = %id, "job queued");

        let states = self.states.clone();
        let pending = self.pending.clone();
        let on_finished = self.on_finished.clone();
        let handle = tokio::spawn(async move {
            states.insert(id.clone(), JobStatus::Running);
            let outcome = job.task.run().await;

            // Claim delivery; `close` may have claimed it already.
            if pending.remove(&id).is_none() {
                return;
            }
            let mut job = job;
            match outcome {
                Ok(value) => {
                    job.status = JobStatus::Finished;
                    job.result = Some(value);
                    states.insert(id.clone(), JobStatus::Finished);
                    debug!(job = %id, "job finished");
                }
                Err(message) => {
                    job.status = JobStatus::Failed;
                    job.errors.push(message.clone());
                    states.insert(id.clone(), JobStatus::Failed);
                    warn!(job = %id, error = %message, "job failed");
                }
            }
            on_finished(job);
        });
        self.handles.lock().push(handle);
        Ok(())
    }

    fn job_states(&self) -> HashMap<JobId, JobStatus> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        // Whatever never reached a terminal state is cancelled and reported.
        let leftover: Vec<JobId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in leftover {
            if let Some((_, mut job)) = self.pending.remove(&id) {
                job.status = JobStatus::Cancelled;
                self.states.insert(id.clone(), JobStatus::Cancelled);
                warn!(job = %id, "job cancelled on close");
                (self.on_cancelled)(job);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::JobTask;
    use crate::graph::Tool;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_callback(
        hits: Arc<AtomicUsize>,
        delivered: Arc<Mutex<Vec<Job>>>,
    ) -> CompletionCallback {
        Arc::new(move |job: Job| {
            hits.fetch_add(1, Ordering::SeqCst);
            delivered.lock().push(job);
        })
    }

    async fn wait_until<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_queue_job_delivers_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let cb = counting_callback(hits.clone(), delivered.clone());
        let exec = LocalExecution::new(cb.clone(), cb);

        let job = Job::new(JobId::new("net", "n", 0), JobTask::Literal(json!(7)));
        exec.queue_job(job).await.unwrap();
        wait_until(|| hits.load(Ordering::SeqCst) == 1).await;

        let jobs = delivered.lock();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Finished);
        assert_eq!(jobs[0].result, Some(json!(7)));
        assert_eq!(
            exec.job_states().get(&JobId::new("net", "n", 0)),
            Some(&JobStatus::Finished)
        );
    }

    #[tokio::test]
    async fn test_failing_job_reports_failed() {
        let hits = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let cb = counting_callback(hits.clone(), delivered.clone());
        let exec = LocalExecution::new(cb.clone(), cb);

        let tool = Tool::new("broken", |_: &Map<String, Value>| {
            Err("tool exploded".to_string())
        });
        let job = Job::new(
            JobId::new("net", "t", 0),
            JobTask::Invoke {
                tool,
                inputs: Map::new(),
            },
        );
        exec.queue_job(job).await.unwrap();
        wait_until(|| hits.load(Ordering::SeqCst) == 1).await;

        let jobs = delivered.lock();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].errors, vec!["tool exploded".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_cancels_pending_jobs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let cb = counting_callback(hits.clone(), delivered.clone());
        let exec = LocalExecution::new(cb.clone(), cb);

        let tool = Tool::new("slow", |_: &Map<String, Value>| {
            std::thread::sleep(Duration::from_secs(5));
            Ok(json!(null))
        });
        let job = Job::new(
            JobId::new("net", "slow", 0),
            JobTask::Invoke {
                tool,
                inputs: Map::new(),
            },
        );
        exec.queue_job(job).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        exec.close().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let jobs = delivered.lock();
        assert_eq!(jobs[0].status, JobStatus::Cancelled);
        assert_eq!(
            exec.job_states().get(&JobId::new("net", "slow", 0)),
            Some(&JobStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_queue_after_close_rejected() {
        let cb: CompletionCallback = Arc::new(|_| {});
        let exec = LocalExecution::new(cb.clone(), cb);
        exec.close().await;
        let job = Job::new(JobId::new("net", "n", 0), JobTask::Literal(json!(1)));
        let err = exec.queue_job(job).await.unwrap_err();
        assert!(matches!(err, NetworkError::BackendClosed));
    }
}
