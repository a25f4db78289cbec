use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::Error;

#[derive(Deserialize, Debug)]
pub(crate) struct BotConfig {
    pub(crate) token: String,
    /// receives unexpected polling errors
    pub(crate) owner_id: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct DanbooruConfig {
    #[serde(default = "default_danbooru_url")]
    pub(crate) url: String,
    pub(crate) user: Option<String>,
    pub(crate) api_key: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub(crate) data_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct PollConfig {
    #[serde(default = "default_cycle_delay")]
    pub(crate) cycle_delay_secs: u64,
    #[serde(default = "default_subscription_delay")]
    pub(crate) subscription_delay_secs: u64,
    #[serde(default = "default_backoff")]
    pub(crate) backoff_secs: u64,
}

impl PollConfig {
    pub(crate) fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub(crate) fn subscription_delay(&self) -> Duration {
        Duration::from_secs(self.subscription_delay_secs)
    }

    pub(crate) fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            cycle_delay_secs: default_cycle_delay(),
            subscription_delay_secs: default_subscription_delay(),
            backoff_secs: default_backoff(),
        }
    }
}

fn default_danbooru_url() -> String {
    "https://danbooru.donmai.us".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/danbooru")
}

fn default_cycle_delay() -> u64 {
    5
}

fn default_subscription_delay() -> u64 {
    5
}

fn default_backoff() -> u64 {
    10
}

pub(crate) struct Config {
    pub(crate) bot: BotConfig,
    pub(crate) danbooru: DanbooruConfig,
    pub(crate) store: StoreConfig,
    pub(crate) poll: PollConfig,
}

pub(crate) fn load_config() -> Result<Config, Error> {
    let env_file = PathBuf::from(".env");

    let bot: BotConfig = serde_envfile::prefixed("DANSUB_").from_file(&env_file)?;
    let danbooru: DanbooruConfig = serde_envfile::prefixed("DANBOORU_").from_file(&env_file)?;
    let store: StoreConfig = serde_envfile::prefixed("STORE_").from_file(&env_file)?;
    let poll: PollConfig = serde_envfile::prefixed("POLL_").from_file(&env_file)?;

    Ok(Config {
        bot,
        danbooru,
        store,
        poll,
    })
}
