use crate::feed::{FetchError, RawItem, SourceDescriptor, SourceFetcher};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on workers per pool, whatever the configuration asks for.
pub const MAX_WORKERS: usize = 8;

/// The pool's workers have exited (cancelled) and no longer take jobs.
#[derive(Debug, Error)]
#[error("Worker pool is closed")]
pub struct PoolClosed;

/// Outcome of one job: either the source's items or the reason it failed.
#[derive(Debug)]
pub struct JobResult {
    pub source: SourceDescriptor,
    /// When the fetch returned; the recency window's upper bound is relative to it
    pub fetched_at: DateTime<Utc>,
    pub result: Result<Vec<RawItem>, FetchError>,
}

struct Job {
    source: SourceDescriptor,
    reply: mpsc::Sender<JobResult>,
}

/// Fixed set of workers pulling fetch jobs off one shared queue.
///
/// Every job taken off the queue produces exactly one [`JobResult`] on the
/// job's reply channel unless the pool is cancelled first.
#[derive(Clone)]
pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers (clamped to `1..=MAX_WORKERS`).
    ///
    /// Returns the pool handle and the worker task handles. Workers stop when
    /// `cancel` fires or every pool handle has been dropped.
    pub fn spawn(
        size: usize,
        queue_capacity: usize,
        fetcher: Arc<dyn SourceFetcher>,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let size = size.clamp(1, MAX_WORKERS);
        let (jobs, queue) = mpsc::channel(queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(queue));

        let handles = (0..size)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&queue),
                    Arc::clone(&fetcher),
                    cancel.clone(),
                ))
            })
            .collect();

        (Self { jobs, size }, handles)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue one source; its result arrives on `reply`.
    pub async fn submit(
        &self,
        source: SourceDescriptor,
        reply: mpsc::Sender<JobResult>,
    ) -> Result<(), PoolClosed> {
        self.jobs
            .send(Job { source, reply })
            .await
            .map_err(|_| PoolClosed)
    }
}

async fn worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    fetcher: Arc<dyn SourceFetcher>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = next_job(&queue) => job,
        };
        let Some(job) = job else { break };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = fetcher.fetch(&job.source) => result,
        };

        let reply = JobResult {
            source: job.source,
            fetched_at: Utc::now(),
            result,
        };

        // Reply channels are sized to the cycle's job count, so this only
        // fails when the cycle itself was abandoned.
        if job.reply.send(reply).await.is_err() {
            tracing::trace!(worker = id, "Cycle abandoned before result was collected");
        }
    }

    tracing::trace!(worker = id, "Worker stopped");
}

async fn next_job(queue: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    queue.lock().await.recv().await
}
