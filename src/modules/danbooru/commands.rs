use tracing::{debug, error, warn};

use super::api::{Post, PostSource};
use super::batcher::{self, MAX_MESSAGE_CHARS};
use super::registry::{SubscribeOutcome, SubscribeRequest, UnsubscribeOutcome};
use super::subscription::{DeliveryTarget, Pool, Recipient, SharedChannel, TagSet};
use crate::types::{Context, Error};
use crate::util::channel_mention;

async fn lookup_newest(
    ctx: Context<'_>,
    tags: &TagSet,
    random: bool,
) -> Result<Option<Post>, Error> {
    let posts = ctx
        .data()
        .danbooru
        .fetch_latest(&tags.query(), 1, random)
        .await?;

    Ok(posts.and_then(|p| p.into_iter().next()))
}

async fn reply_with_post(ctx: Context<'_>, tags: String, random: bool) -> Result<(), Error> {
    let Some(tags) = TagSet::parse(&tags) else {
        ctx.reply("error: no tags given").await?;
        return Ok(());
    };

    ctx.defer().await?;
    match lookup_newest(ctx, &tags, random).await? {
        Some(post) => ctx.reply(post.url).await?,
        None => ctx.reply(format!("nothing found for `{}`", tags)).await?,
    };

    Ok(())
}

/// Resolves the display name of every `pool:<id>` tag, falling back to the id
pub(crate) async fn resolve_pools(source: &dyn PostSource, tags: &TagSet) -> Vec<Pool> {
    let mut pools = Vec::new();
    for (tag, id) in tags.pool_tags() {
        let name = match source.resolve_pool_name(id).await {
            Ok(Some(name)) => name,
            Ok(None) => id.to_owned(),
            Err(err) => {
                warn!(pool_id = id, "couldn't resolve pool name: {}", err);
                id.to_owned()
            }
        };

        pools.push(Pool {
            tag: tag.to_owned(),
            id: id.to_owned(),
            name,
        });
    }
    pools
}

/// Show the newest post on danbooru with the given tags
#[poise::command(slash_command)]
pub(crate) async fn dan(
    ctx: Context<'_>,
    #[description = "Tags to look up"] tags: String,
) -> Result<(), Error> {
    reply_with_post(ctx, tags, false).await
}

/// Show a random post on danbooru with the given tags
#[poise::command(slash_command)]
pub(crate) async fn danr(
    ctx: Context<'_>,
    #[description = "Tags to look up"] tags: String,
) -> Result<(), Error> {
    reply_with_post(ctx, tags, true).await
}

/// Danbooru subscriptions
#[poise::command(
    slash_command,
    subcommands("sub", "unsub", "list", "setup"),
    subcommand_required
)]
pub(crate) async fn dans(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Subscribe to new posts with the given tags
#[poise::command(slash_command)]
pub(crate) async fn sub(
    ctx: Context<'_>,
    #[description = "Tags to subscribe to"] tags: String,
) -> Result<(), Error> {
    let Some(tags) = TagSet::parse(&tags) else {
        ctx.reply("error: no tags given").await?;
        return Ok(());
    };

    ctx.defer().await?;
    let Some(newest) = lookup_newest(ctx, &tags, false).await? else {
        ctx.reply("Error while looking up tag. Try again or correct your tags.")
            .await?;
        return Ok(());
    };

    let data = ctx.data();
    let pools = resolve_pools(data.danbooru.as_ref(), &tags).await;

    let target = match ctx.guild_id() {
        None => DeliveryTarget::Private,
        Some(guild_id) => DeliveryTarget::Shared(match data.subscriptions.shared_channel()? {
            Some(channel) => channel,
            None => SharedChannel {
                guild_id: Some(guild_id.get()),
                channel_id: ctx.channel_id().get(),
            },
        }),
    };

    let author = ctx.author();
    debug!(user_id = author.id.get(), tags = %tags, command = "dans sub");

    let request = SubscribeRequest {
        tags,
        requester: Recipient::new(author.id.get(), author.name.clone()),
        pools,
        target,
        watermark: Some(newest.created_at),
    };

    let response = match data.subscriptions.subscribe(request) {
        Ok(SubscribeOutcome::AlreadySubscribed { label }) => {
            format!("You are already subscribed to `{}`", label)
        }
        Ok(SubscribeOutcome::Joined { label }) => {
            format!("Successfully added to existing sub `{}`", label)
        }
        Ok(SubscribeOutcome::Created { label }) => format!(
            "successfully subscribed to the tags: `{}`\nhere is the newest image: {}",
            label, newest.url
        ),
        Err(err) => {
            error!(user_id = author.id.get(), "error adding subscription: {}", err);
            format!("Error while adding sub `{}`", err)
        }
    };

    ctx.reply(response).await?;
    Ok(())
}

/// Unsubscribe from the given tags
#[poise::command(slash_command)]
pub(crate) async fn unsub(
    ctx: Context<'_>,
    #[description = "Tags to unsubscribe from"] tags: String,
) -> Result<(), Error> {
    let Some(tags) = TagSet::parse(&tags) else {
        ctx.reply("error: no tags given").await?;
        return Ok(());
    };

    let user_id = ctx.author().id.get();
    let response = match ctx.data().subscriptions.unsubscribe(&tags, user_id) {
        Ok(UnsubscribeOutcome { left: 0, .. }) => "You aren't subscribed to that tag".to_owned(),
        Ok(UnsubscribeOutcome { deleted: 0, .. }) => "successfully unsubscribed".to_owned(),
        Ok(_) => "successfully unsubscribed, subscription fully removed".to_owned(),
        Err(err) => {
            error!(user_id, "error removing subscription: {}", err);
            format!("Error while unsubscribing: `{}`", err)
        }
    };

    ctx.reply(response).await?;
    Ok(())
}

/// List the tags you're subscribed to
#[poise::command(slash_command)]
pub(crate) async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let in_dm = ctx.guild_id().is_none();
    let labels = ctx
        .data()
        .subscriptions
        .list(ctx.author().id.get(), in_dm);

    if labels.is_empty() {
        ctx.reply("You aren't subscribed to any tags").await?;
        return Ok(());
    }

    for message in batcher::batch(&labels, "", MAX_MESSAGE_CHARS, None) {
        ctx.reply(message).await?;
    }
    Ok(())
}

/// Post all new shared subscriptions into this channel
#[poise::command(slash_command, guild_only = true, owners_only, hide_in_help)]
pub(crate) async fn setup(ctx: Context<'_>) -> Result<(), Error> {
    let channel = SharedChannel {
        guild_id: ctx.guild_id().map(|g| g.get()),
        channel_id: ctx.channel_id().get(),
    };

    ctx.data().subscriptions.set_shared_channel(channel)?;
    ctx.reply(format!(
        "{} set up for subscriptions",
        channel_mention(channel.channel_id)
    ))
    .await?;
    Ok(())
}
