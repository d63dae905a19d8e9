//! The update pipeline: a periodic scheduler that fans feed fetches out over
//! a bounded worker pool, joins on the results, filters them by recency and
//! hands them to a consumer, with a generation guard so nothing from a
//! stopped run ever reaches the consumer.
//!
//! # Architecture
//!
//! Each `start()` creates a new [`Generation`] owning its own tasks:
//!
//! - a control loop that triggers one cycle immediately and then one per
//!   refresh interval, never two at once ([`CycleCoordinator`])
//! - a fixed-size [`WorkerPool`] performing the fetches
//! - an [`UpdateDispatcher`] loop delivering articles to the consumer
//!
//! All of them share one [`CancellationToken`]; `stop()` deactivates the
//! generation and fires the token.
//!
//! # Example
//!
//! ```ignore
//! let consumer: Consumer = Arc::new(|article, generation| println!("{generation}: {}", article.title));
//! let mut monitor = Monitor::new(config, Arc::new(HttpFetcher::new()?), consumer);
//! monitor.start().await?;
//! // ...
//! monitor.stop().await?;
//! ```

mod cycle;
mod dispatch;
mod pool;

pub use cycle::{
    CycleCoordinator, CycleError, CycleReport, ErrorSink, RecencyWindow, SourceError,
};
pub use dispatch::{ActiveGeneration, Consumer, Dispatch, Generation, Update, UpdateDispatcher};
pub use pool::{JobResult, PoolClosed, WorkerPool, MAX_WORKERS};

use crate::feed::{SourceDescriptor, SourceFetcher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Capacity of the error sink handed out by [`Monitor::take_errors`].
pub const ERROR_SINK_CAPACITY: usize = 32;
/// Articles buffered between the control loop and the dispatcher.
const DISPATCH_BUFFER: usize = 16;
/// `tokio::time::interval` panics on a zero period.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle misuse. The monitor's state is unchanged when one is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Monitor is already running (generation {0})")]
    AlreadyRunning(Generation),
    #[error("Monitor is not running")]
    NotRunning,
}

/// Everything a monitor needs, fixed for the lifetime of a generation.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub sources: Arc<[SourceDescriptor]>,
    pub refresh_interval: Duration,
    pub window: RecencyWindow,
    pub workers: usize,
}

struct Running {
    generation: Generation,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Scheduler and owner of the pipeline's lifecycle.
pub struct Monitor {
    config: MonitorConfig,
    fetcher: Arc<dyn SourceFetcher>,
    active: Arc<ActiveGeneration>,
    dispatcher: UpdateDispatcher,
    errors: ErrorSink,
    errors_rx: Option<mpsc::Receiver<SourceError>>,
    last_generation: Generation,
    running: Option<Running>,
    /// Tasks of stopped generations, still winding down
    retired: Vec<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        fetcher: Arc<dyn SourceFetcher>,
        consumer: Consumer,
    ) -> Self {
        let active = Arc::new(ActiveGeneration::new());
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_SINK_CAPACITY);

        Self {
            config,
            fetcher,
            dispatcher: UpdateDispatcher::new(Arc::clone(&active), consumer),
            active,
            errors: ErrorSink::new(errors_tx),
            errors_rx: Some(errors_rx),
            last_generation: Generation::default(),
            running: None,
            retired: Vec::new(),
        }
    }

    /// Claim the error sink. Only the first call returns it.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<SourceError>> {
        self.errors_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The active generation, if running.
    pub fn generation(&self) -> Option<Generation> {
        self.running.as_ref().map(|r| r.generation)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Begin a new generation: dispatcher, worker pool, then the control
    /// loop, which runs its first cycle right away.
    pub async fn start(&mut self) -> Result<Generation, MonitorError> {
        if let Some(running) = &self.running {
            return Err(MonitorError::AlreadyRunning(running.generation));
        }

        self.retired.retain(|handle| !handle.is_finished());

        let generation = self.last_generation.next();
        self.last_generation = generation;
        self.active.activate(generation).await;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (updates_tx, updates_rx) = mpsc::channel(DISPATCH_BUFFER);
        tasks.push(tokio::spawn(
            self.dispatcher.clone().run(updates_rx, cancel.clone()),
        ));

        let (pool, workers) = WorkerPool::spawn(
            self.config.workers,
            self.config.sources.len(),
            Arc::clone(&self.fetcher),
            cancel.clone(),
        );
        let worker_count = pool.size();
        tasks.extend(workers);

        let coordinator = CycleCoordinator::new(pool, self.errors.clone(), generation);
        tasks.push(tokio::spawn(control_loop(
            coordinator,
            self.config.clone(),
            updates_tx,
            cancel.clone(),
        )));

        tracing::info!(
            generation = %generation,
            sources = self.config.sources.len(),
            workers = worker_count,
            interval_secs = self.config.refresh_interval.as_secs(),
            "Monitor started"
        );

        self.running = Some(Running {
            generation,
            cancel,
            tasks,
        });
        Ok(generation)
    }

    /// Stop the current generation.
    ///
    /// Returns once cancellation has been issued; in-flight fetches may still
    /// be unwinding, but no consumer call begins after this returns.
    pub async fn stop(&mut self) -> Result<(), MonitorError> {
        let running = self.running.take().ok_or(MonitorError::NotRunning)?;

        self.active.deactivate().await;
        running.cancel.cancel();
        self.retired.extend(running.tasks);

        tracing::info!(generation = %running.generation, "Monitor stopped");
        Ok(())
    }

    /// Stop if running and wait for every task of every generation to exit.
    pub async fn shutdown(mut self) {
        if self.running.is_some() {
            let _ = self.stop().await;
        }
        for handle in std::mem::take(&mut self.retired) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Monitor task panicked");
                }
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

/// Drives cycles for one generation until cancelled.
async fn control_loop(
    coordinator: CycleCoordinator,
    config: MonitorConfig,
    updates: mpsc::Sender<Dispatch>,
    cancel: CancellationToken,
) {
    let generation = coordinator.generation();
    // First tick completes immediately; a cycle overrunning the interval
    // gets one queued tick, not a burst.
    let mut ticker = tokio::time::interval(config.refresh_interval.max(MIN_REFRESH_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        cycle += 1;
        let started = Instant::now();
        tracing::debug!(generation = %generation, cycle, "Cycle triggered");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = coordinator.run(&config.sources, &config.window) => result,
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                tracing::debug!(generation = %generation, cycle, error = %e, "Cycle abandoned");
                break;
            }
        };

        tracing::info!(
            generation = %generation,
            cycle,
            sources = report.sources,
            failed = report.failed,
            articles = report.articles.len(),
            undated = report.undated,
            out_of_window = report.out_of_window,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );

        for article in report.articles {
            let update = Update {
                generation,
                article,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = updates.send(update.into()) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        // The next tick waits until this cycle's items have all been
        // delivered or discarded.
        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = updates.send(Dispatch::Flush(ack_tx)) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            acked = ack_rx => {
                if acked.is_err() {
                    return;
                }
            }
        }
    }

    tracing::debug!(generation = %generation, cycles = cycle, "Control loop stopped");
}
