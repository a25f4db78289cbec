use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};
use tracing::info;

use crate::types::{Data, Error};

pub(crate) async fn handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Arc<Data>, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Ready { data_about_bot } = event {
        info!(
            user_id = data_about_bot.user.id.get(),
            subscriptions = data.subscriptions.len(),
            "connected to discord as '{}{}'",
            data_about_bot.user.name,
            data_about_bot
                .user
                .discriminator
                .map_or("".into(), |d| format!("#{}", d)),
        );
    }
    Ok(())
}
