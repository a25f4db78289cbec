use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PollConfig;
use crate::modules::danbooru::api::DanbooruClient;
use crate::modules::danbooru::registry::SubscriptionRegistry;
use crate::modules::stats::Stats;

#[derive(Debug)]
pub(crate) struct Data {
    pub(crate) owner_id: u64,
    pub(crate) poll: PollConfig,
    pub(crate) danbooru: Arc<DanbooruClient>,
    pub(crate) subscriptions: Arc<SubscriptionRegistry>,
    pub(crate) stats: Stats,
    /// cancelled on ctrl-c, long running tasks checkpoint and stop
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: TaskTracker,
}

impl Data {
    pub(crate) fn new(
        owner_id: u64,
        poll: PollConfig,
        danbooru: Arc<DanbooruClient>,
        subscriptions: Arc<SubscriptionRegistry>,
        shutdown: CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            owner_id,
            poll,
            danbooru,
            subscriptions,
            stats: Stats::new(),
            shutdown,
            tasks,
        }
    }
}

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;
pub(crate) type Context<'a> = poise::Context<'a, Arc<Data>, Error>;
