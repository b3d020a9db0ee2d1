//! Upstream score source.
//!
//! `ScoreSource` is what the poll loop consumes. `OsuApiClient` implements it
//! against the osu! API v2 using the client-credentials grant, caching the
//! access token until shortly before it expires.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::models::{GameMode, Player, PlayerRef, RawResult};

/// Response format version requested from the API.
const API_VERSION: &str = "20220705";

/// Refresh the token this long before upstream says it expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Errors that can occur during fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited by {host}, retry after {retry_after_secs}s")]
    RateLimited { host: String, retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of recent play results.
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &'static str;

    /// Resolve a roster entry into a player.
    async fn fetch_player(&self, player: &PlayerRef) -> Result<Player, FetchError>;

    /// Recent results for a player in one mode, most recent first.
    async fn fetch_recent(
        &self,
        player: &Player,
        mode: GameMode,
    ) -> Result<Vec<RawResult>, FetchError>;
}

/// Configuration for the osu! API client.
#[derive(Debug, Clone)]
pub struct OsuClientConfig {
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,

    /// Results requested per (player, mode)
    pub recent_limit: u32,

    /// Include failed plays
    pub include_fails: bool,

    pub user_agent: String,
}

impl OsuClientConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Default::default()
        }
    }
}

impl Default for OsuClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://osu.ppy.sh").expect("static URL is valid"),
            client_id: String::new(),
            client_secret: String::new(),
            timeout: Duration::from_secs(30),
            recent_limit: 5,
            include_fails: false,
            user_agent: format!("score-watch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// osu! API v2 client.
pub struct OsuApiClient {
    client: Client,
    config: OsuClientConfig,
    token: RwLock<Option<AccessToken>>,
}

impl OsuApiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: OsuClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("score-watch")),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("x-api-version", HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// URL of the recent scores endpoint for a player and mode.
    fn recent_scores_url(&self, player_id: u64, mode: GameMode) -> Result<Url, FetchError> {
        let mut url = self.endpoint(&format!("api/v2/users/{}/scores/recent", player_id))?;
        url.query_pairs_mut()
            .append_pair("mode", mode.as_str())
            .append_pair("limit", &self.config.recent_limit.to_string())
            .append_pair(
                "include_fails",
                if self.config.include_fails { "1" } else { "0" },
            );
        Ok(url)
    }

    /// Return a valid access token, requesting a new one when needed.
    async fn access_token(&self) -> Result<String, FetchError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        info!("Requesting osu! API access token");
        let url = self.endpoint("oauth/token")?;
        let response = self
            .client
            .post(url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
                ("scope", "public"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(FetchError::Auth(format!(
                "token request rejected with HTTP {}",
                status.as_u16()
            )));
        }
        let response = Self::check_status(response)?;
        let body: TokenResponse = response.json().await?;

        let token = AccessToken {
            value: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        };
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    async fn send_authorized(&self, request: RequestBuilder) -> Result<Response, FetchError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Force a new token on the next call
            *self.token.write().await = None;
            return Err(FetchError::Auth("access token rejected".to_string()));
        }

        Self::check_status(response)
    }

    fn check_status(response: Response) -> Result<Response, FetchError> {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(FetchError::RateLimited {
                host: response.url().host_str().unwrap_or("unknown").to_string(),
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ScoreSource for OsuApiClient {
    fn name(&self) -> &'static str {
        "osu-api-v2"
    }

    async fn fetch_player(&self, player: &PlayerRef) -> Result<Player, FetchError> {
        let url = self.endpoint(&format!("api/v2/users/{}", player.lookup_key()))?;
        debug!("Resolving player {}", player);

        let response = match self.send_authorized(self.client.get(url)).await {
            Err(FetchError::HttpStatus { status: 404, .. }) => {
                return Err(FetchError::PlayerNotFound(player.to_string()))
            }
            other => other?,
        };

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_recent(
        &self,
        player: &Player,
        mode: GameMode,
    ) -> Result<Vec<RawResult>, FetchError> {
        let url = self.recent_scores_url(player.id, mode)?;
        debug!("Fetching recent {} scores for {}", mode, player.name);

        let response = self.send_authorized(self.client.get(url)).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
