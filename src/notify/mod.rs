//! Notification delivery.
//!
//! Delivery is best effort: one attempt per notification, failures are
//! reported to the caller and never retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::render::NotificationPayload;

/// Errors that can occur while resolving a destination or delivering to it.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Destination {channel_id} unavailable: {reason}")]
    DestinationUnavailable { channel_id: String, reason: String },

    #[error("Destination {channel_id} is not a postable channel (type {kind})")]
    NotPostable { channel_id: String, kind: u8 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Bot token contains characters not allowed in a header")]
    InvalidToken,

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifyError {
    /// Whether this error means the whole tick should be skipped.
    pub fn is_destination_error(&self) -> bool {
        matches!(
            self,
            NotifyError::DestinationUnavailable { .. } | NotifyError::NotPostable { .. }
        )
    }
}

/// A validated destination. Read-only for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHandle {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,
}

/// Where rendered notifications go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sink name for logging.
    fn name(&self) -> &'static str;

    /// Check that the channel exists and accepts messages.
    async fn resolve_destination(&self, channel_id: &str) -> Result<ChannelHandle, NotifyError>;

    /// Deliver one payload.
    async fn send(
        &self,
        channel: &ChannelHandle,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}

/// Discord channel types that accept bot messages.
/// Text, DM, announcement and the three thread kinds.
const POSTABLE_CHANNEL_TYPES: [u8; 6] = [0, 1, 5, 10, 11, 12];

/// Configuration for the Discord REST sink.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub api_base: Url,
    pub token: String,
    pub timeout: Duration,
}

impl DiscordConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse("https://discord.com/api/v10/").expect("static URL is valid"),
            token: String::new(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    embeds: [&'a NotificationPayload; 1],
}

/// Sink that posts embeds through the Discord REST API as a bot.
pub struct DiscordSink {
    client: Client,
    config: DiscordConfig,
}

impl DiscordSink {
    pub fn new(config: DiscordConfig) -> Result<Self, NotifyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!(
                "DiscordBot (score-watch, {})",
                env!("CARGO_PKG_VERSION")
            ))
            .unwrap_or_else(|_| HeaderValue::from_static("DiscordBot (score-watch)")),
        );
        let mut auth = HeaderValue::from_str(&format!("Bot {}", config.token))
            .map_err(|_| NotifyError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    fn channel_url(&self, channel_id: &str, suffix: &str) -> Result<Url, NotifyError> {
        let path = format!("channels/{}{}", channel_id, suffix);
        self.config
            .api_base
            .join(&path)
            .map_err(|e| NotifyError::InvalidUrl(format!("{}: {}", path, e)))
    }
}

fn check_channel(channel: DiscordChannel) -> Result<ChannelHandle, NotifyError> {
    if !POSTABLE_CHANNEL_TYPES.contains(&channel.kind) {
        return Err(NotifyError::NotPostable {
            channel_id: channel.id,
            kind: channel.kind,
        });
    }

    Ok(ChannelHandle {
        id: channel.id,
        name: channel.name,
    })
}

#[async_trait]
impl NotificationSink for DiscordSink {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn resolve_destination(&self, channel_id: &str) -> Result<ChannelHandle, NotifyError> {
        let url = self.channel_url(channel_id, "")?;

        let response = self.client.get(url).send().await.map_err(|e| {
            NotifyError::DestinationUnavailable {
                channel_id: channel_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::DestinationUnavailable {
                channel_id: channel_id.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let channel: DiscordChannel = response.json().await?;
        check_channel(channel)
    }

    async fn send(
        &self,
        channel: &ChannelHandle,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let url = self.channel_url(&channel.id, "/messages")?;
        let body = CreateMessage { embeds: [payload] };

        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        debug!("Posted \"{}\" to channel {}", payload.title, channel.id);
        Ok(())
    }
}

/// Sink that prints payloads instead of delivering them. Used for dry runs.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl NotificationSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn resolve_destination(&self, channel_id: &str) -> Result<ChannelHandle, NotifyError> {
        Ok(ChannelHandle {
            id: channel_id.to_string(),
            name: Some("stdout".to_string()),
        })
    }

    async fn send(
        &self,
        channel: &ChannelHandle,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        info!("(dry run) would post to {}: {}", channel.id, payload.title);
        println!("{}", serde_json::to_string_pretty(payload)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(kind: u8) -> DiscordChannel {
        DiscordChannel {
            id: "123".to_string(),
            kind,
            name: Some("scores".to_string()),
        }
    }

    #[test]
    fn test_text_channel_is_postable() {
        let handle = check_channel(channel(0)).unwrap();
        assert_eq!(handle.id, "123");
        assert_eq!(handle.name.as_deref(), Some("scores"));
    }

    #[test]
    fn test_voice_and_category_rejected() {
        for kind in [2u8, 4, 13, 15] {
            let err = check_channel(channel(kind)).unwrap_err();
            assert!(err.is_destination_error());
            assert!(matches!(err, NotifyError::NotPostable { kind: k, .. } if k == kind));
        }
    }

    #[test]
    fn test_channel_json_parse() {
        let json = r#"{"id": "99", "type": 11, "name": "thread", "guild_id": "1"}"#;
        let parsed: DiscordChannel = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, 11);
        assert!(check_channel(parsed).is_ok());
    }

    #[test]
    fn test_channel_urls() {
        let sink = DiscordSink::new(DiscordConfig::new("token")).unwrap();
        assert_eq!(
            sink.channel_url("42", "/messages").unwrap().as_str(),
            "https://discord.com/api/v10/channels/42/messages"
        );
    }

    #[test]
    fn test_http_errors_do_not_skip_tick() {
        let err = NotifyError::HttpStatus {
            status: 500,
            message: "Internal Server Error".to_string(),
        };
        assert!(!err.is_destination_error());
    }

    #[tokio::test]
    async fn test_stdout_sink_accepts_any_channel() {
        let sink = StdoutSink;
        let handle = sink.resolve_destination("anything").await.unwrap();
        assert_eq!(handle.id, "anything");
    }
}
