use std::collections::HashSet;
use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::modules::danbooru::api::DanbooruClient;
use crate::modules::danbooru::registry::SubscriptionRegistry;
use crate::modules::danbooru::store::SubscriptionStore;
use crate::types::Data;

mod config;
mod events;
mod modules;
mod task;
mod types;
mod util;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = config::load_config().expect("error loading envfile");

    let store = SubscriptionStore::open(&config.store.data_dir).unwrap_or_else(|err| {
        panic!(
            "couldn't open subscription store at {}: {}",
            config.store.data_dir.display(),
            err
        )
    });
    let subscriptions =
        Arc::new(SubscriptionRegistry::load(store).expect("error loading subscriptions"));
    let danbooru = Arc::new(DanbooruClient::new(config.danbooru.clone()));

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();

    let intents = serenity::GatewayIntents::non_privileged();
    let options = poise::FrameworkOptions {
        pre_command: |ctx| {
            Box::pin(async move {
                debug!("executing command /{}...", ctx.invoked_command_name());
            })
        },
        post_command: |ctx| {
            Box::pin(async move {
                debug!("finished executing command /{}", ctx.invoked_command_name());
            })
        },
        event_handler: |ctx, event, framework, data| {
            Box::pin(events::handler(ctx, event, framework, data))
        },
        commands: modules::danbooru::commands()
            .into_iter()
            .chain(modules::stats::commands())
            .collect(),
        owners: HashSet::from([serenity::UserId::new(config.bot.owner_id)]),
        ..Default::default()
    };

    let owner_id = config.bot.owner_id;
    let poll = config.poll.clone();
    let task_shutdown = shutdown.clone();
    let task_tracker = tasks.clone();

    let framework = poise::Framework::builder()
        .options(options)
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let data = Arc::new(Data::new(
                    owner_id,
                    poll,
                    danbooru,
                    subscriptions,
                    task_shutdown,
                    task_tracker,
                ));

                modules::danbooru::start_tasks(ctx.to_owned(), data.clone());
                modules::stats::start_tasks(ctx.to_owned(), data.clone());

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(config.bot.token, intents)
        .framework(framework)
        .await
        .expect("error creating discord client");

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("couldn't listen for ctrl-c: {}", err);
            return;
        }

        info!("shutting down, saving subscriptions");
        shutdown.cancel();
        tasks.close();
        tasks.wait().await;
        shard_manager.shutdown_all().await;
    });

    if let Err(err) = client.start().await {
        error!("discord client error: {}", err);
    }
}
