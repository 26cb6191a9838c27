use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::{StageError, StageResult};

const API_BASE: &str = "https://api.twitter.com/2";
const TIMELINE_PAGE_SIZE: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A post fetched from the monitored account
#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    /// Platform id, increasing in publication order
    pub id: u64,

    /// Raw tweet text as posted
    pub text: String,

    /// Best downloadable URL when the tweet carries video
    pub media_url: Option<String>,

    /// Publication timestamp
    pub created_at: DateTime<Utc>,
}

impl Tweet {
    pub fn has_video(&self) -> bool {
        self.media_url.is_some()
    }

    /// Canonical status URL for a tweet of the given account
    pub fn permalink(username: &str, id: u64) -> String {
        format!("https://twitter.com/{username}/status/{id}")
    }
}

/// Source of recent posts for the monitored account
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TweetSource: Send + Sync {
    /// Fetch tweets newer than `since_id`, ascending by id
    async fn fetch_recent(&self, since_id: Option<u64>) -> StageResult<Vec<Tweet>>;
}

/// Twitter API v2 client scoped to a single account timeline
pub struct TwitterApiClient {
    client: Client,
    bearer_token: String,
    username: String,
    user_id: OnceCell<String>,
}

impl TwitterApiClient {
    pub fn new(username: &str, bearer_token: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("sucesos-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            bearer_token: bearer_token.to_string(),
            username: username.to_string(),
            user_id: OnceCell::new(),
        })
    }

    /// Numeric user id for the monitored handle, resolved once per process
    async fn user_id(&self) -> StageResult<&str> {
        self.user_id
            .get_or_try_init(|| self.resolve_user_id())
            .await
            .map(String::as_str)
    }

    async fn resolve_user_id(&self) -> StageResult<String> {
        let url = format!("{API_BASE}/users/by/username/{}", self.username);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(request_error)?;

        let response = ensure_success(response, "user lookup")?;
        let body: UserLookup = response
            .json()
            .await
            .map_err(|e| StageError::transient(format!("user lookup returned malformed JSON: {e}")))?;

        tracing::debug!("resolved @{} to user id {}", self.username, body.data.id);
        Ok(body.data.id)
    }
}

#[async_trait]
impl TweetSource for TwitterApiClient {
    async fn fetch_recent(&self, since_id: Option<u64>) -> StageResult<Vec<Tweet>> {
        let user_id = self.user_id().await?;
        let url = format!("{API_BASE}/users/{user_id}/tweets");

        let mut request = self.client.get(&url).bearer_auth(&self.bearer_token).query(&[
            ("max_results", TIMELINE_PAGE_SIZE.to_string()),
            ("tweet.fields", "created_at,attachments".to_string()),
            ("expansions", "attachments.media_keys".to_string()),
            (
                "media.fields",
                "type,url,preview_image_url,duration_ms,variants".to_string(),
            ),
        ]);

        if let Some(id) = since_id {
            request = request.query(&[("since_id", id.to_string())]);
        }

        let response = request.send().await.map_err(request_error)?;
        let response = ensure_success(response, "timeline fetch")?;
        let body: Timeline = response
            .json()
            .await
            .map_err(|e| StageError::transient(format!("timeline returned malformed JSON: {e}")))?;

        let media = body.includes.media;
        let mut tweets: Vec<Tweet> = body
            .data
            .into_iter()
            .filter_map(|item| item.into_tweet(&self.username, &media))
            .collect();

        // The API pages newest-first; callers want publication order
        tweets.sort_by_key(|t| t.id);

        tracing::debug!("timeline fetch returned {} tweets", tweets.len());
        Ok(tweets)
    }
}

fn request_error(e: reqwest::Error) -> StageError {
    StageError::transient(format!("twitter request failed: {e}"))
}

fn ensure_success(response: reqwest::Response, what: &str) -> StageResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(StageError::transient(match rate_limit_reset(&response) {
            Some(secs) => format!("{what} rate limited; window resets in {secs}s"),
            None => format!("{what} rate limited"),
        }));
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StageError::fatal(format!(
            "{what} rejected with HTTP {status}: check TWITTER_BEARER_TOKEN"
        )));
    }

    if status.is_server_error() {
        return Err(StageError::transient(format!("{what} failed with HTTP {status}")));
    }

    Err(StageError::fatal(format!("{what} failed with HTTP {status}")))
}

/// Seconds until the rate-limit window reopens, per the reset header
fn rate_limit_reset(response: &reqwest::Response) -> Option<u64> {
    let reset: u64 = response
        .headers()
        .get("x-rate-limit-reset")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;

    let now = Utc::now().timestamp().max(0) as u64;
    Some(reset.saturating_sub(now))
}

#[derive(Deserialize)]
struct UserLookup {
    data: UserRecord,
}

#[derive(Deserialize)]
struct UserRecord {
    id: String,
}

#[derive(Deserialize)]
struct Timeline {
    #[serde(default)]
    data: Vec<TweetItem>,

    #[serde(default)]
    includes: Includes,
}

#[derive(Deserialize, Default)]
struct Includes {
    #[serde(default)]
    media: Vec<MediaItem>,
}

#[derive(Deserialize)]
struct TweetItem {
    id: String,
    text: String,
    created_at: Option<String>,
    attachments: Option<Attachments>,
}

#[derive(Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Deserialize)]
struct MediaItem {
    media_key: String,

    #[serde(rename = "type")]
    media_type: String,

    #[serde(default)]
    variants: Vec<MediaVariant>,
}

#[derive(Deserialize)]
struct MediaVariant {
    content_type: Option<String>,
    bit_rate: Option<u64>,
    url: Option<String>,
}

impl TweetItem {
    fn into_tweet(self, username: &str, media: &[MediaItem]) -> Option<Tweet> {
        let id: u64 = match self.id.parse() {
            Ok(id) => id,
            Err(_) => {
                tracing::debug!("skipping tweet with non-numeric id {:?}", self.id);
                return None;
            }
        };

        let created_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let media_url = self.attachments.as_ref().and_then(|attachments| {
            attachments.media_keys.iter().find_map(|key| {
                let item = media.iter().find(|m| &m.media_key == key)?;
                if item.media_type != "video" {
                    return None;
                }
                Some(best_variant_url(item).unwrap_or_else(|| Tweet::permalink(username, id)))
            })
        });

        Some(Tweet {
            id,
            text: self.text,
            media_url,
            created_at,
        })
    }
}

/// Highest-bitrate mp4 variant, when the platform exposes one
fn best_variant_url(media: &MediaItem) -> Option<String> {
    media
        .variants
        .iter()
        .filter(|v| v.content_type.as_deref() == Some("video/mp4"))
        .max_by_key(|v| v.bit_rate.unwrap_or(0))
        .and_then(|v| v.url.clone())
}
