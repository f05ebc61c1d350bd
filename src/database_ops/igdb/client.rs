use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::database_ops::models::ResourceKind;
use crate::util::env::{env_opt, env_parse, env_parse_opt, env_req};

const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const IGDB_API_BASE: &str = "https://api.igdb.com/v4";
const IGDB_IMAGE_BASE: &str = "https://images.igdb.com/igdb/image/upload";
const IGDB_MAX_LIMIT: usize = 500;

/// Remote catalog the ingestor pages through.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    /// Raw body of one page of `resource`; pages start at 1.
    async fn fetch_page(&self, resource: ResourceKind, page: usize, page_size: usize)
        -> Result<String>;
    /// Image bytes for `image_id` in the given size variant (e.g. `cover_big`).
    async fn fetch_image(&self, image_id: &str, size: &str) -> Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct IgdbConfig {
    pub reqs_per_min: Option<u32>,
    /// Page size for games and covers.
    pub page_size: usize,
    /// Page size for every other endpoint; most of them reject large pages.
    pub small_page_size: usize,
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// Consecutive unreadable pages after which pagination gives up.
    pub max_bad_pages: usize,
}

impl Default for IgdbConfig {
    fn default() -> Self {
        Self {
            reqs_per_min: None,
            page_size: IGDB_MAX_LIMIT,
            small_page_size: 10,
            max_retries: 3,
            backoff_ms: 1000,
            max_bad_pages: 5,
        }
    }
}

impl IgdbConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reqs_per_min: env_parse_opt::<u32>("IGDB_REQS_PER_MIN").filter(|n| *n > 0),
            page_size: env_parse("IGDB_PAGE_SIZE", defaults.page_size).clamp(1, IGDB_MAX_LIMIT),
            small_page_size: env_parse("IGDB_SMALL_PAGE_SIZE", defaults.small_page_size)
                .clamp(1, IGDB_MAX_LIMIT),
            max_retries: env_parse("IGDB_MAX_RETRIES", defaults.max_retries),
            backoff_ms: env_parse("IGDB_BACKOFF_MS", defaults.backoff_ms),
            max_bad_pages: env_parse("IGDB_MAX_BAD_PAGES", defaults.max_bad_pages).max(1),
        }
    }

    pub fn page_size_for(&self, resource: ResourceKind) -> usize {
        match resource {
            ResourceKind::Game | ResourceKind::Cover => self.page_size,
            _ => self.small_page_size,
        }
    }

    pub fn sleep_ms_between_requests(&self) -> Option<u64> {
        self.reqs_per_min.map(|rpm| 60_000u64 / rpm.max(1) as u64)
    }
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct IgdbToken {
    access_token: String,
    expires_at: Instant,
}

pub struct IgdbClient {
    cfg: IgdbConfig,
    http: Client,
    client_id: String,
    client_secret: String,
    token: Arc<Mutex<Option<IgdbToken>>>,
}

impl IgdbClient {
    pub fn new_from_env() -> Result<Self> {
        let client_id = env_req("TWITCH_CLIENT_ID").context("TWITCH_CLIENT_ID is required for IGDB")?;
        let client_secret =
            env_req("TWITCH_CLIENT_SECRET").context("TWITCH_CLIENT_SECRET is required for IGDB")?;
        Self::new(IgdbConfig::from_env(), client_id, client_secret)
    }

    pub fn new(cfg: IgdbConfig, client_id: String, client_secret: String) -> Result<Self> {
        let user_agent =
            env_opt("IGDB_USER_AGENT").unwrap_or_else(|| "library-jobs-igdb/1.0".to_string());
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to construct IGDB HTTP client")?;
        Ok(Self {
            cfg,
            http,
            client_id,
            client_secret,
            token: Arc::new(Mutex::new(None)),
        })
    }

    async fn throttle(&self) {
        if let Some(ms) = self.cfg.sleep_ms_between_requests() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn ensure_token(&self) -> Result<String> {
        {
            let guard = self.token.lock().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + Duration::from_secs(30) {
                    return Ok(token.access_token.clone());
                }
            }
        }
        let token = self.request_new_token().await?;
        let mut guard = self.token.lock().await;
        *guard = Some(token.clone());
        Ok(token.access_token)
    }

    async fn request_new_token(&self) -> Result<IgdbToken> {
        let response = self
            .http
            .post(TWITCH_TOKEN_URL)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("requesting Twitch OAuth token")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "twitch token request failed (status={}): {}",
                status,
                text
            ));
        }
        let token: TwitchTokenResponse = response.json().await?;
        let ttl = token.expires_in.saturating_sub(30).max(30);
        Ok(IgdbToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        })
    }

    /// POSTs an Apicalypse query and hands back the raw body; decoding is the caller's call.
    async fn execute_request(&self, endpoint: &str, body: String) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            let token = self.ensure_token().await?;
            let response = self
                .http
                .post(endpoint)
                .header("Client-ID", &self.client_id)
                .header("Content-Type", "text/plain")
                .header("Authorization", format!("Bearer {}", token))
                .body(body.clone())
                .send()
                .await
                .with_context(|| format!("requesting {endpoint}"))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.text().await?);
            }
            if status == StatusCode::UNAUTHORIZED {
                let mut guard = self.token.lock().await;
                *guard = None;
            }
            let retryable = status == StatusCode::UNAUTHORIZED
                || status == StatusCode::TOO_MANY_REQUESTS
                || status.is_server_error();
            let text = response.text().await.unwrap_or_default();
            if !retryable || attempt >= self.cfg.max_retries {
                return Err(anyhow!("igdb request failed (status={}): {}", status, text));
            }
            let wait = self.cfg.backoff_ms * ((attempt + 1) as u64);
            warn!(target = "igdb", %status, attempt, wait_ms = wait, "retrying IGDB request");
            tokio::time::sleep(Duration::from_millis(wait)).await;
            attempt += 1;
        }
    }
}

/// Apicalypse body for page `page` (1-based) of `page_size` records.
pub fn page_query(page: usize, page_size: usize) -> String {
    let offset = page.saturating_sub(1) * page_size;
    format!("fields *; limit {page_size}; offset {offset}; sort id asc;")
}

pub fn image_url(image_id: &str, size: &str) -> String {
    format!("{IGDB_IMAGE_BASE}/t_{size}/{image_id}.jpg")
}

#[async_trait::async_trait]
impl CatalogSource for IgdbClient {
    async fn fetch_page(
        &self,
        resource: ResourceKind,
        page: usize,
        page_size: usize,
    ) -> Result<String> {
        let endpoint = format!("{IGDB_API_BASE}/{}", resource.as_str());
        let size = page_size.clamp(1, IGDB_MAX_LIMIT);
        debug!(target = "igdb", resource = resource.as_str(), page, size, "fetching page");
        let body = self.execute_request(&endpoint, page_query(page, size)).await?;
        self.throttle().await;
        Ok(body)
    }

    async fn fetch_image(&self, image_id: &str, size: &str) -> Result<Bytes> {
        let url = image_url(image_id, size);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("downloading {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("image download failed (status={status}): {url}"));
        }
        Ok(response.bytes().await?)
    }
}
