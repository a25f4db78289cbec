use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};

use crate::types::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Channel(u64),
    /// sent as a direct message
    User(u64),
}

#[serenity::async_trait]
pub(crate) trait Messenger: Send + Sync {
    async fn send_message(&self, target: Target, text: &str) -> Result<(), Error>;
}

pub(crate) struct DiscordMessenger {
    http: Arc<serenity::Http>,
}

impl DiscordMessenger {
    pub(crate) fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[serenity::async_trait]
impl Messenger for DiscordMessenger {
    async fn send_message(&self, target: Target, text: &str) -> Result<(), Error> {
        let http = self.http.as_ref();
        let channel = match target {
            Target::Channel(id) => serenity::ChannelId::new(id),
            Target::User(id) => serenity::UserId::new(id).create_dm_channel(http).await?.id,
        };

        channel.say(http, text).await?;
        Ok(())
    }
}
