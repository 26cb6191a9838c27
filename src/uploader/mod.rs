use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{StageError, StageResult};

const SESSION_ORIGIN: &str = "https://www.tiktok.com";
const UPLOAD_PAGE: &str = "https://www.tiktok.com/upload";
const UPLOAD_ENDPOINT: &str = "https://www.tiktok.com/api/v1/video/upload/";
const CREATE_ENDPOINT: &str = "https://www.tiktok.com/api/v1/item/create/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Publishes rendered clips
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Publish the clip with its caption; returns the platform post id
    async fn publish(&self, video: &Path, caption: &str) -> StageResult<String>;
}

/// Browser cookie as exported from a logged-in session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,

    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_path")]
    pub path: String,
}

fn default_domain() -> String {
    ".tiktok.com".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

/// TikTok web-session uploader driven by exported browser cookies
pub struct TikTokUploader {
    client: Client,
    cookies_file: PathBuf,
    has_session: bool,
}

impl TikTokUploader {
    pub fn new(cookies_file: impl Into<PathBuf>) -> crate::Result<Self> {
        let cookies_file = cookies_file.into();
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let origin: Url = SESSION_ORIGIN.parse()?;

        // A missing or empty cookie file is tolerated here so dry runs work;
        // publishing without a session fails fatally instead
        let has_session = match load_cookies(&cookies_file) {
            Ok(cookies) if !cookies.is_empty() => {
                for cookie in &cookies {
                    jar.add_cookie_str(
                        &format!(
                            "{}={}; Domain={}; Path={}",
                            cookie.name, cookie.value, cookie.domain, cookie.path
                        ),
                        &origin,
                    );
                }
                tracing::debug!("loaded {} TikTok cookies", cookies.len());
                true
            }
            Ok(_) => {
                tracing::warn!("TikTok cookie file {} is empty", cookies_file.display());
                false
            }
            Err(e) => {
                tracing::warn!("no TikTok session loaded: {e:#}");
                false
            }
        };

        let client = Client::builder()
            .cookie_provider(jar)
            .user_agent(BROWSER_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            cookies_file,
            has_session,
        })
    }

    pub fn has_session(&self) -> bool {
        self.has_session
    }

    /// Whether the stored cookies still open the upload page
    pub async fn is_logged_in(&self) -> StageResult<bool> {
        let response = self
            .client
            .get(UPLOAD_PAGE)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("tiktok request failed: {e}")))?;

        // An expired session bounces to the login page
        let landed_on_login = response.url().path().contains("login");
        Ok(response.status().is_success() && !landed_on_login)
    }

    /// Validate the cookie file and live session, for the setup command
    pub async fn verify_session(&self) -> crate::Result<()> {
        if !self.has_session {
            anyhow::bail!(
                "No cookies loaded from {}. Export them from a logged-in browser first.",
                self.cookies_file.display()
            );
        }

        match self.is_logged_in().await {
            Ok(true) => Ok(()),
            Ok(false) => anyhow::bail!("TikTok rejected the stored session; export fresh cookies"),
            Err(e) => Err(anyhow::anyhow!("Could not verify TikTok session: {e}")),
        }
    }
}

#[async_trait]
impl Uploader for TikTokUploader {
    async fn publish(&self, video: &Path, caption: &str) -> StageResult<String> {
        if !self.has_session {
            return Err(StageError::fatal(format!(
                "no TikTok session cookies at {}; run the setup command",
                self.cookies_file.display()
            )));
        }

        if !self.is_logged_in().await? {
            return Err(StageError::fatal("TikTok session expired; export fresh cookies"));
        }

        let bytes = fs_err::read(video)
            .map_err(|e| StageError::content(format!("cannot read rendered clip: {e}")))?;

        let filename = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("clip.mp4")
            .to_string();

        tracing::info!("uploading {} ({} KiB)", filename, bytes.len() / 1024);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("video/mp4")
            .map_err(|e| StageError::fatal(format!("invalid upload part: {e}")))?;
        let form = reqwest::multipart::Form::new().part("video", part);

        let response = self
            .client
            .post(UPLOAD_ENDPOINT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("video upload failed: {e}")))?;
        let upload: UploadResponse = read_json(response, "video upload").await?;

        let response = self
            .client
            .post(CREATE_ENDPOINT)
            .form(&[("video_id", upload.video_id.as_str()), ("text", caption)])
            .send()
            .await
            .map_err(|e| StageError::transient(format!("post creation failed: {e}")))?;
        let created: CreateResponse = read_json(response, "post creation").await?;

        if created.status_code != 0 {
            // 200 with a non-zero status is the platform refusing the content
            return Err(StageError::fatal(format!(
                "TikTok refused the post (status {}): {}",
                created.status_code, created.status_msg
            )));
        }

        created
            .item_id
            .ok_or_else(|| StageError::transient("post creation response carried no item id"))
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    status_code: i64,

    #[serde(default)]
    status_msg: String,

    item_id: Option<String>,
}

fn load_cookies(path: &Path) -> crate::Result<Vec<SessionCookie>> {
    let raw = fs_err::read_to_string(path)?;
    let cookies = serde_json::from_str(&raw).context("Cookie file is not a JSON cookie list")?;
    Ok(cookies)
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> StageResult<T> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StageError::fatal(format!(
            "{what} rejected with HTTP {status}: session invalid"
        )));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(StageError::transient(format!("{what} rate limited")));
    }
    if status.is_server_error() {
        return Err(StageError::transient(format!("{what} failed with HTTP {status}")));
    }
    if !status.is_success() {
        return Err(StageError::fatal(format!("{what} failed with HTTP {status}")));
    }

    response
        .json()
        .await
        .map_err(|e| StageError::transient(format!("{what} returned malformed JSON: {e}")))
}
