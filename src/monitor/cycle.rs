use crate::feed::{Article, FetchError, SourceDescriptor};
use crate::monitor::dispatch::Generation;
use crate::monitor::pool::{PoolClosed, WorkerPool};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Acceptable publication range for one cycle.
///
/// An article is kept when `lower_bound <= published <= fetched_at + skew`,
/// where `fetched_at` is the moment its source's fetch returned. The skew
/// tolerance defaults to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindow {
    lower_bound: DateTime<Utc>,
    skew_tolerance: TimeDelta,
}

impl RecencyWindow {
    pub fn new(lower_bound: DateTime<Utc>) -> Self {
        Self {
            lower_bound,
            skew_tolerance: TimeDelta::zero(),
        }
    }

    /// Allow articles dated up to `tolerance` past the fetch time.
    pub fn with_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.skew_tolerance = TimeDelta::from_std(tolerance).unwrap_or(TimeDelta::MAX);
        self
    }

    pub fn lower_bound(&self) -> DateTime<Utc> {
        self.lower_bound
    }

    pub fn skew_tolerance(&self) -> TimeDelta {
        self.skew_tolerance
    }

    pub fn contains(&self, published: DateTime<Utc>, fetched_at: DateTime<Utc>) -> bool {
        if published < self.lower_bound {
            return false;
        }
        match fetched_at.checked_add_signed(self.skew_tolerance) {
            Some(upper) => published <= upper,
            None => true,
        }
    }
}

/// A source that failed during a cycle, as published on the error sink.
#[derive(Debug, Error)]
#[error("{source_title} ({source_url}): {error}")]
pub struct SourceError {
    pub generation: Generation,
    pub source_url: Arc<str>,
    pub source_title: Arc<str>,
    #[source]
    pub error: FetchError,
}

/// Non-blocking handle onto the error sink.
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<SourceError>,
}

impl ErrorSink {
    pub fn new(tx: mpsc::Sender<SourceError>) -> Self {
        Self { tx }
    }

    /// Log and publish. A full or unclaimed sink drops the entry rather
    /// than stall the cycle.
    pub fn report(&self, error: SourceError) {
        tracing::warn!(
            generation = %error.generation,
            feed = %error.source_url,
            title = %error.source_title,
            error = %error.error,
            "Feed fetch failed"
        );

        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::debug!(feed = %dropped.source_url, "Error sink full, dropping entry");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// What one cycle produced.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// In-window articles from every source that succeeded, unordered
    pub articles: Vec<Article>,
    pub sources: usize,
    pub failed: usize,
    /// Items dropped for lacking a publication date
    pub undated: usize,
    /// Dated items dropped by the recency window
    pub out_of_window: usize,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),
    /// The pool went away with results still outstanding.
    #[error("Cycle interrupted with {missing} of {total} sources outstanding")]
    Interrupted { missing: usize, total: usize },
}

/// Runs one fan-out/fan-in round over the worker pool.
pub struct CycleCoordinator {
    pool: WorkerPool,
    errors: ErrorSink,
    generation: Generation,
}

impl CycleCoordinator {
    pub fn new(pool: WorkerPool, errors: ErrorSink, generation: Generation) -> Self {
        Self {
            pool,
            errors,
            generation,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Fetch every source, wait for all of them, and keep what is in `window`.
    ///
    /// Failed sources are reported to the error sink and contribute nothing.
    /// An empty source list returns immediately without touching the pool.
    pub async fn run(
        &self,
        sources: &[SourceDescriptor],
        window: &RecencyWindow,
    ) -> Result<CycleReport, CycleError> {
        let total = sources.len();
        let mut report = CycleReport {
            sources: total,
            ..CycleReport::default()
        };
        if total == 0 {
            return Ok(report);
        }

        let (reply_tx, mut replies) = mpsc::channel(total);
        for source in sources {
            self.pool.submit(source.clone(), reply_tx.clone()).await?;
        }
        // Only in-flight jobs hold senders now; recv() returning None means
        // the pool was cancelled underneath us.
        drop(reply_tx);

        for received in 0..total {
            let Some(job) = replies.recv().await else {
                return Err(CycleError::Interrupted {
                    missing: total - received,
                    total,
                });
            };

            match job.result {
                Ok(items) => {
                    for item in items {
                        let Some(article) = item.into_article() else {
                            report.undated += 1;
                            continue;
                        };
                        if window.contains(article.published, job.fetched_at) {
                            report.articles.push(article);
                        } else {
                            report.out_of_window += 1;
                        }
                    }
                }
                Err(error) => {
                    report.failed += 1;
                    self.errors.report(SourceError {
                        generation: self.generation,
                        source_url: Arc::clone(&job.source.url),
                        source_title: Arc::clone(&job.source.title),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{RawItem, SourceFetcher};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_lower_bound_is_inclusive() {
        let window = RecencyWindow::new(ts(1, 0));
        let fetched = ts(5, 0);

        assert!(window.contains(ts(1, 0), fetched));
        assert!(!window.contains(ts(1, 0) - TimeDelta::seconds(1), fetched));
    }

    #[test]
    fn test_window_rejects_future_items() {
        let window = RecencyWindow::new(ts(1, 0));
        let fetched = ts(5, 0);

        assert!(window.contains(fetched, fetched));
        assert!(!window.contains(fetched + TimeDelta::seconds(1), fetched));
    }

    #[test]
    fn test_window_skew_tolerance_extends_upper_bound() {
        let window = RecencyWindow::new(ts(1, 0)).with_skew_tolerance(Duration::from_secs(60));
        let fetched = ts(5, 0);

        assert_eq!(window.skew_tolerance(), TimeDelta::seconds(60));
        assert!(window.contains(fetched + TimeDelta::seconds(60), fetched));
        assert!(!window.contains(fetched + TimeDelta::seconds(61), fetched));
    }

    /// Serves canned items per URL; URLs containing "fail" error out.
    struct StaticFetcher {
        published: Vec<Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<RawItem>, FetchError> {
            if source.url.contains("fail") {
                return Err(FetchError::Timeout);
            }
            Ok(self
                .published
                .iter()
                .enumerate()
                .map(|(i, published)| RawItem {
                    title: format!("{} #{}", source.title, i),
                    description: String::new(),
                    link: None,
                    published: *published,
                    source: source.title.to_string(),
                    source_title: Arc::clone(&source.title),
                    source_color: Arc::clone(&source.color),
                    source_url: Arc::clone(&source.url),
                })
                .collect())
        }
    }

    fn coordinator(
        fetcher: StaticFetcher,
        cancel: &CancellationToken,
    ) -> (CycleCoordinator, mpsc::Receiver<SourceError>) {
        let (pool, _handles) = WorkerPool::spawn(2, 4, Arc::new(fetcher), cancel.clone());
        let (tx, rx) = mpsc::channel(8);
        (
            CycleCoordinator::new(pool, ErrorSink::new(tx), Generation::new(1)),
            rx,
        )
    }

    #[tokio::test]
    async fn test_empty_source_list_is_noop() {
        let cancel = CancellationToken::new();
        let (coordinator, _errors) = coordinator(StaticFetcher { published: vec![] }, &cancel);

        let report = coordinator
            .run(&[], &RecencyWindow::new(Utc::now()))
            .await
            .unwrap();
        assert!(report.articles.is_empty());
        assert_eq!(report.sources, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes() {
        let now = Utc::now();
        let fetcher = StaticFetcher {
            published: vec![
                Some(now - TimeDelta::hours(1)),
                Some(now - TimeDelta::days(30)),
                None,
                Some(now + TimeDelta::days(1)),
            ],
        };
        let cancel = CancellationToken::new();
        let (coordinator, mut errors) = coordinator(fetcher, &cancel);

        let sources = vec![
            SourceDescriptor::new("https://one.example/rss", "one", ""),
            SourceDescriptor::new("https://fail.example/rss", "broken", ""),
            SourceDescriptor::new("https://two.example/rss", "two", ""),
        ];
        let window = RecencyWindow::new(now - TimeDelta::days(7));

        let report = coordinator.run(&sources, &window).await.unwrap();

        let mut titles: Vec<_> = report.articles.iter().map(|a| a.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["one #0", "two #0"]);
        assert_eq!(report.sources, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.undated, 2);
        assert_eq!(report.out_of_window, 4);

        let error = errors.try_recv().unwrap();
        assert_eq!(&*error.source_title, "broken");
        assert!(matches!(error.error, FetchError::Timeout));
        assert!(errors.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_empty_cycle() {
        let cancel = CancellationToken::new();
        let (coordinator, mut errors) = coordinator(
            StaticFetcher {
                published: vec![Some(Utc::now())],
            },
            &cancel,
        );

        let sources = vec![
            SourceDescriptor::new("https://fail-a.example/rss", "a", ""),
            SourceDescriptor::new("https://fail-b.example/rss", "b", ""),
        ];
        let report = coordinator
            .run(&sources, &RecencyWindow::new(Utc::now() - TimeDelta::days(1)))
            .await
            .unwrap();

        assert!(report.articles.is_empty());
        assert_eq!(report.failed, 2);
        assert!(errors.try_recv().is_ok());
        assert!(errors.try_recv().is_ok());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_pool_fails_cycle() {
        let cancel = CancellationToken::new();
        let (coordinator, _errors) = coordinator(StaticFetcher { published: vec![] }, &cancel);
        cancel.cancel();
        // Let the workers observe cancellation and drop the queue
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sources = vec![SourceDescriptor::new("https://one.example/rss", "one", "")];
        let result = coordinator
            .run(&sources, &RecencyWindow::new(Utc::now()))
            .await;
        assert!(result.is_err());
    }
}
