use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::select;
use tokio::task;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::{ApiError, Post, PostSource};
use super::batcher::{self, MAX_MESSAGE_CHARS, SHARED_CHUNK_ITEMS};
use super::messenger::{Messenger, Target};
use super::registry::SubscriptionRegistry;
use super::store::StoreError;
use super::subscription::{DeliveryTarget, Subscription, SubscriptionKey};
use crate::config::PollConfig;
use crate::types::Error;

/// Posts requested per poll, same as danbooru's default page size
pub(crate) const PAGE_SIZE: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub(crate) enum PollError {
    #[error("{0}")]
    Transient(#[source] ApiError),
    #[error("{0}")]
    Unexpected(#[source] Error),
}

impl From<ApiError> for PollError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Connection(_) => PollError::Transient(err),
            ApiError::Other(_) => PollError::Unexpected(err.into()),
        }
    }
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        PollError::Unexpected(err.into())
    }
}

/// Which of the fetched posts still have to be delivered
#[derive(Debug, PartialEq)]
pub(crate) enum Delta<'a> {
    Nothing,
    /// first poll ever, only the newest post gets delivered
    Bootstrap(&'a Post),
    Fresh {
        posts: Vec<&'a Post>,
        newest: DateTime<Utc>,
    },
}

pub(crate) fn find_new_posts(watermark: Option<DateTime<Utc>>, posts: &[Post]) -> Delta<'_> {
    let Some(watermark) = watermark else {
        // on equal timestamps keep the one listed first
        return posts
            .iter()
            .reduce(|newest, p| if p.created_at > newest.created_at { p } else { newest })
            .map_or(Delta::Nothing, Delta::Bootstrap);
    };

    let fresh: Vec<&Post> = posts.iter().filter(|p| p.created_at > watermark).collect();
    match fresh.iter().map(|p| p.created_at).max() {
        Some(newest) => Delta::Fresh {
            posts: fresh,
            newest,
        },
        None => Delta::Nothing,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollReport {
    /// removed since the cycle started
    Skipped,
    Unavailable,
    Idle,
    Delivered { count: usize },
}

pub(crate) struct Scheduler {
    registry: Arc<SubscriptionRegistry>,
    source: Arc<dyn PostSource>,
    messenger: Arc<dyn Messenger>,
    operator: Target,
    config: PollConfig,
}

impl Scheduler {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        source: Arc<dyn PostSource>,
        messenger: Arc<dyn Messenger>,
        operator: Target,
        config: PollConfig,
    ) -> Self {
        Self {
            registry,
            source,
            messenger,
            operator,
            config,
        }
    }

    /// Polls until `shutdown` is cancelled, then writes out all state
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        info!(
            subscriptions = self.registry.len(),
            "starting danbooru subscription polling"
        );

        loop {
            select! {
                biased;
                () = shutdown.cancelled() => {
                    self.checkpoint().await;
                    info!("danbooru subscription polling stopped");
                    return;
                }
                () = self.run_cycle() => {}
            }
        }
    }

    /// One pass over every subscription registered when the cycle starts
    pub(crate) async fn run_cycle(&self) {
        for key in self.registry.keys() {
            match self.poll_subscription(&key).await {
                Ok(PollReport::Skipped) => continue,
                Ok(report) => debug!(key = %key, ?report, "polled subscription"),
                Err(PollError::Transient(err)) => {
                    warn!(key = %key, "connection problem while polling: {}", err);
                    self.checkpoint().await;
                    sleep(self.config.backoff()).await;
                    continue;
                }
                Err(PollError::Unexpected(err)) => {
                    error!(key = %key, "error while polling: {}", err);
                    self.checkpoint().await;
                    self.report_to_operator(&key, &err).await;
                    sleep(self.config.backoff()).await;
                    continue;
                }
            }

            sleep(self.config.subscription_delay()).await;
        }

        sleep(self.config.cycle_delay()).await;
        let registry = self.registry.clone();
        match task::spawn_blocking(move || registry.persist_index()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("couldn't write subscription index: {}", err),
            Err(err) => error!("subscription index task failed: {}", err),
        }
    }

    pub(crate) async fn poll_subscription(
        &self,
        key: &SubscriptionKey,
    ) -> Result<PollReport, PollError> {
        let Some(sub) = self.registry.get(key) else {
            return Ok(PollReport::Skipped);
        };
        if sub.recipients().is_empty() {
            return Ok(PollReport::Skipped);
        }

        let Some(posts) = self
            .source
            .fetch_latest(&sub.tags().query(), PAGE_SIZE, false)
            .await?
        else {
            return Ok(PollReport::Unavailable);
        };

        let (delivered, newest) = match find_new_posts(sub.watermark(), &posts) {
            Delta::Nothing => return Ok(PollReport::Idle),
            Delta::Bootstrap(post) => (vec![post], post.created_at),
            Delta::Fresh { posts, newest } => (posts, newest),
        };

        let urls: Vec<&str> = delivered.iter().map(|p| p.url.as_str()).collect();
        self.deliver(&sub, &urls).await?;

        if self.registry.advance_watermark(key, newest)? {
            info!(
                tags = %sub.tags(),
                count = urls.len(),
                watermark = %newest,
                "delivered new posts"
            );
        }

        Ok(PollReport::Delivered { count: urls.len() })
    }

    async fn deliver(&self, sub: &Subscription, urls: &[&str]) -> Result<(), PollError> {
        let header = batcher::header(&sub.mentions(), &sub.label());

        match sub.target() {
            DeliveryTarget::Shared(shared) => {
                let messages = batcher::batch(
                    urls,
                    &header,
                    MAX_MESSAGE_CHARS,
                    Some(SHARED_CHUNK_ITEMS),
                );
                for message in messages {
                    self.send(Target::Channel(shared.channel_id), &message)
                        .await?;
                }
            }
            DeliveryTarget::Private => {
                let messages = batcher::batch(urls, &header, MAX_MESSAGE_CHARS, None);
                for recipient in sub.recipients() {
                    for message in &messages {
                        self.send(Target::User(recipient.id), message).await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn send(&self, target: Target, text: &str) -> Result<(), PollError> {
        self.messenger
            .send_message(target, text)
            .await
            .map_err(PollError::Unexpected)
    }

    async fn report_to_operator(&self, key: &SubscriptionKey, err: &Error) {
        let message = format!(
            "Error during update Task: `{}`\nduring Sub: `{}`\n```\n{:?}\n```",
            err, key.tags, err
        );

        if let Err(err) = self.messenger.send_message(self.operator, &message).await {
            error!("couldn't notify operator: {}", err);
        }
    }

    /// Writes out every record and the index without blocking the runtime
    async fn checkpoint(&self) {
        let registry = self.registry.clone();
        match task::spawn_blocking(move || registry.checkpoint()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("couldn't write subscription checkpoint: {}", err),
            Err(err) => error!("subscription checkpoint task failed: {}", err),
        }
    }
}
