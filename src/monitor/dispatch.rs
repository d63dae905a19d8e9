use crate::feed::Article;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

/// Tag identifying one `start()`..`stop()` lifetime of a monitor.
///
/// The first start yields generation 1; 0 is never active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1).max(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives every article that survives the generation check.
///
/// Runs on the delivery loop; a slow consumer holds up the rest of the cycle.
pub type Consumer = Arc<dyn Fn(Article, Generation) + Send + Sync>;

/// The generation currently allowed to deliver, or `None` while stopped.
///
/// The dispatcher holds the read side for the whole consumer call and
/// `stop()` takes the write side, so once deactivation returns no further
/// consumer call can begin.
#[derive(Debug, Default)]
pub struct ActiveGeneration {
    current: RwLock<Option<Generation>>,
}

impl ActiveGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn activate(&self, generation: Generation) {
        *self.current.write().await = Some(generation);
    }

    pub async fn deactivate(&self) {
        *self.current.write().await = None;
    }

    pub async fn get(&self) -> Option<Generation> {
        *self.current.read().await
    }
}

/// One article on its way to the consumer, tagged with the generation
/// that launched the cycle it came from.
#[derive(Debug)]
pub struct Update {
    pub generation: Generation,
    pub article: Article,
}

/// Traffic on a generation's dispatch channel.
#[derive(Debug)]
pub enum Dispatch {
    Update(Update),
    /// Answered once everything queued ahead of it has been delivered or
    /// discarded.
    Flush(oneshot::Sender<()>),
}

impl From<Update> for Dispatch {
    fn from(update: Update) -> Self {
        Dispatch::Update(update)
    }
}

/// Hands cycle output to the consumer, dropping anything from a superseded
/// generation.
#[derive(Clone)]
pub struct UpdateDispatcher {
    active: Arc<ActiveGeneration>,
    consumer: Consumer,
}

impl UpdateDispatcher {
    pub fn new(active: Arc<ActiveGeneration>, consumer: Consumer) -> Self {
        Self { active, consumer }
    }

    /// Deliver a single update. Returns `false` if it was stale and discarded.
    pub async fn deliver(&self, update: Update) -> bool {
        let active = self.active.current.read().await;
        if *active != Some(update.generation) {
            tracing::trace!(
                generation = %update.generation,
                active = ?active.map(Generation::get),
                title = %update.article.title,
                "Discarding stale update"
            );
            return false;
        }

        (self.consumer)(update.article, update.generation);
        true
    }

    /// Delivery loop for one generation. Exits on cancellation or when the
    /// control loop drops its sender.
    pub async fn run(self, mut updates: mpsc::Receiver<Dispatch>, cancel: CancellationToken) {
        let mut delivered = 0usize;
        let mut discarded = 0usize;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                msg = updates.recv() => match msg {
                    Some(Dispatch::Update(update)) => {
                        if self.deliver(update).await {
                            delivered += 1;
                        } else {
                            discarded += 1;
                        }
                    }
                    Some(Dispatch::Flush(ack)) => {
                        let _ = ack.send(());
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(delivered, discarded, "Update dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(title: &str) -> Article {
        Article {
            title: title.to_string(),
            description: String::new(),
            link: None,
            published: Utc::now(),
            source: "Feed".to_string(),
            source_title: Arc::from("Feed"),
            source_color: Arc::from(""),
            source_url: Arc::from("https://example.com/rss"),
        }
    }

    fn collecting_dispatcher(
        active: Arc<ActiveGeneration>,
    ) -> (UpdateDispatcher, mpsc::UnboundedReceiver<(String, Generation)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer: Consumer = Arc::new(move |article: Article, generation| {
            let _ = tx.send((article.title, generation));
        });
        (UpdateDispatcher::new(active, consumer), rx)
    }

    #[test]
    fn test_generation_next_skips_zero() {
        assert_eq!(Generation::default().next(), Generation::new(1));
        assert_eq!(Generation::new(u64::MAX).next(), Generation::new(1));
    }

    #[tokio::test]
    async fn test_current_generation_is_delivered() {
        let active = Arc::new(ActiveGeneration::new());
        active.activate(Generation::new(1)).await;
        let (dispatcher, mut rx) = collecting_dispatcher(active);

        let delivered = dispatcher
            .deliver(Update {
                generation: Generation::new(1),
                article: article("fresh"),
            })
            .await;

        assert!(delivered);
        assert_eq!(rx.try_recv().unwrap(), ("fresh".to_string(), Generation::new(1)));
    }

    #[tokio::test]
    async fn test_superseded_generation_is_discarded() {
        let active = Arc::new(ActiveGeneration::new());
        active.activate(Generation::new(2)).await;
        let (dispatcher, mut rx) = collecting_dispatcher(active);

        let delivered = dispatcher
            .deliver(Update {
                generation: Generation::new(1),
                article: article("stale"),
            })
            .await;

        assert!(!delivered);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_nothing_delivered_while_inactive() {
        let active = Arc::new(ActiveGeneration::new());
        active.activate(Generation::new(1)).await;
        active.deactivate().await;
        let (dispatcher, mut rx) = collecting_dispatcher(Arc::clone(&active));

        assert!(
            !dispatcher
                .deliver(Update {
                    generation: Generation::new(1),
                    article: article("late"),
                })
                .await
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(active.get().await, None);
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_sender_dropped() {
        let active = Arc::new(ActiveGeneration::new());
        active.activate(Generation::new(3)).await;
        let (dispatcher, mut rx) = collecting_dispatcher(active);

        let (tx, updates) = mpsc::channel(4);
        let handle = tokio::spawn(dispatcher.run(updates, CancellationToken::new()));

        for (generation, title) in [(3, "a"), (2, "old"), (3, "b")] {
            tx.send(
                Update {
                    generation: Generation::new(generation),
                    article: article(title),
                }
                .into(),
            )
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let mut titles = Vec::new();
        while let Ok((title, _)) = rx.try_recv() {
            titles.push(title);
        }
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_flush_answers_after_queued_updates() {
        let active = Arc::new(ActiveGeneration::new());
        active.activate(Generation::new(1)).await;
        let (dispatcher, mut rx) = collecting_dispatcher(active);

        let (tx, updates) = mpsc::channel(8);
        let handle = tokio::spawn(dispatcher.run(updates, CancellationToken::new()));

        for title in ["a", "b", "c"] {
            tx.send(
                Update {
                    generation: Generation::new(1),
                    article: article(title),
                }
                .into(),
            )
            .await
            .unwrap();
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Dispatch::Flush(ack_tx)).await.unwrap();
        ack_rx.await.unwrap();

        // Everything ahead of the flush already reached the consumer
        let mut titles = Vec::new();
        while let Ok((title, _)) = rx.try_recv() {
            titles.push(title);
        }
        assert_eq!(titles, vec!["a", "b", "c"]);

        drop(tx);
        handle.await.unwrap();
    }
}
