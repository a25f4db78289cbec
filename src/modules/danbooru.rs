use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};

use crate::types::{Data, Error};

use self::messenger::{DiscordMessenger, Target};
use self::scheduler::Scheduler;

pub(crate) mod api;
pub(crate) mod batcher;
pub(crate) mod commands;
pub(crate) mod messenger;
pub(crate) mod registry;
pub(crate) mod scheduler;
pub(crate) mod store;
pub(crate) mod subscription;

pub(crate) fn commands() -> Vec<poise::Command<Arc<Data>, Error>> {
    vec![commands::dan(), commands::danr(), commands::dans()]
}

pub(crate) fn start_tasks(ctx: serenity::Context, data: Arc<Data>) {
    let scheduler = Scheduler::new(
        data.subscriptions.clone(),
        data.danbooru.clone(),
        Arc::new(DiscordMessenger::new(ctx.http.clone())),
        Target::User(data.owner_id),
        data.poll.clone(),
    );

    data.tasks.spawn(scheduler.run(data.shutdown.clone()));
}
