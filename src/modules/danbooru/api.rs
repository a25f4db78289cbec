use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity};
use serde::Deserialize;
use tracing::debug;

use crate::config::DanbooruConfig;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    /// the request never got a response, worth retrying later
    #[error("connection to danbooru failed: {0}")]
    Connection(#[source] reqwest::Error),
    #[error("danbooru request failed: {0}")]
    Other(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ApiError::Connection(err)
        } else {
            ApiError::Other(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Post {
    pub(crate) url: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) tag_string: String,
}

/// Source of posts, `Ok(None)` means the upstream didn't answer with a
/// success status and there's nothing to report right now.
#[serenity::async_trait]
pub(crate) trait PostSource: Send + Sync {
    async fn fetch_latest(
        &self,
        tags: &str,
        limit: u32,
        random: bool,
    ) -> Result<Option<Vec<Post>>, ApiError>;

    async fn resolve_pool_name(&self, pool_id: &str) -> Result<Option<String>, ApiError>;
}

#[derive(Deserialize, Debug)]
struct RawPost {
    created_at: DateTime<Utc>,
    file_url: Option<String>,
    large_file_url: Option<String>,
    #[serde(default)]
    has_large: bool,
    file_ext: Option<String>,
    #[serde(default)]
    tag_string: String,
}

#[derive(Deserialize, Debug)]
struct RawPool {
    name: String,
}

impl RawPost {
    fn into_post(self, base_url: &str) -> Option<Post> {
        // ugoira zips aren't viewable in discord, the large file is a webm
        let path = if self.has_large && self.file_ext.as_deref() == Some("zip") {
            self.large_file_url.or(self.file_url)
        } else {
            self.file_url
        }?;

        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else {
            format!("{}{}", base_url, path)
        };

        Some(Post {
            url,
            created_at: self.created_at,
            tag_string: self.tag_string,
        })
    }
}

#[derive(Debug)]
pub(crate) struct DanbooruClient {
    http: reqwest::Client,
    config: DanbooruConfig,
}

impl DanbooruClient {
    pub(crate) fn new(config: DanbooruConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: DanbooruConfig {
                url: config.url.trim_end_matches('/').to_owned(),
                ..config
            },
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(format!("{}{}", self.config.url, path));
        match &self.config.user {
            Some(user) => req.basic_auth(user, self.config.api_key.as_ref()),
            None => req,
        }
    }
}

#[serenity::async_trait]
impl PostSource for DanbooruClient {
    async fn fetch_latest(
        &self,
        tags: &str,
        limit: u32,
        random: bool,
    ) -> Result<Option<Vec<Post>>, ApiError> {
        let mut query = vec![("tags", tags.to_owned()), ("limit", limit.to_string())];
        if random {
            query.push(("random", "true".into()));
        }

        let response = self.get("/posts.json").query(&query).send().await?;
        if !response.status().is_success() {
            debug!(tags, status = response.status().as_u16(), "danbooru returned error status");
            return Ok(None);
        }

        let posts = response
            .json::<Vec<RawPost>>()
            .await
            .map_err(ApiError::Other)?
            .into_iter()
            .filter_map(|p| p.into_post(&self.config.url))
            .collect();

        Ok(Some(posts))
    }

    async fn resolve_pool_name(&self, pool_id: &str) -> Result<Option<String>, ApiError> {
        let response = self.get(&format!("/pools/{}.json", pool_id)).send().await?;
        if !response.status().is_success() {
            debug!(pool_id, status = response.status().as_u16(), "couldn't look up pool");
            return Ok(None);
        }

        let pool = response.json::<RawPool>().await.map_err(ApiError::Other)?;
        Ok(Some(pool.name))
    }
}
