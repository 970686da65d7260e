//! Upstream streamer liveness polling.
//!
//! The orchestrator pauses rotation while the upstream channel is live
//! and resumes when it goes offline. Each checker owns its own app token
//! so liveness polling works even when the matching updater is disabled.

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::twitch::{fetch_app_token, AppToken};
use crate::{PlatformError, Result};

/// Polls Twitch for a channel's live status.
pub struct TwitchLiveChecker {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AppToken>>,
}

impl TwitchLiveChecker {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client: crate::http_client(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let current = match token.take() {
            Some(t) if !t.is_expired(Utc::now()) => t,
            _ => fetch_app_token(&self.client, &self.client_id, &self.client_secret).await?,
        };
        let access = current.access_token.clone();
        *token = Some(current);
        Ok(access)
    }

    /// Whether `username` is currently live.
    pub async fn is_stream_live(&self, username: &str) -> Result<bool> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .get("https://api.twitch.tv/helix/streams")
            .query(&[("user_login", username)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlatformError::Api {
                platform: "Twitch",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let live = body
            .get("data")
            .and_then(|d| d.as_array())
            .map(|d| !d.is_empty())
            .unwrap_or(false);
        debug!("Checked {} live status: {}", username, live);
        Ok(live)
    }
}

/// Polls Kick for a channel's live status using an app access token.
pub struct KickLiveChecker {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AppToken>>,
}

impl KickLiveChecker {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client: crate::http_client(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let current = match token.take() {
            Some(t) if !t.is_expired(Utc::now()) => t,
            _ => self.fetch_app_token().await?,
        };
        let access = current.access_token.clone();
        *token = Some(current);
        Ok(access)
    }

    async fn fetch_app_token(&self) -> Result<AppToken> {
        let response = self
            .client
            .post("https://id.kick.com/oauth/token")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlatformError::Auth {
                platform: "Kick",
                reason: format!("app token endpoint returned {}", response.status()),
            });
        }
        let body: serde_json::Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::Auth {
                platform: "Kick",
                reason: "token response missing access_token".to_string(),
            })?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .unwrap_or(3600);
        Ok(AppToken {
            access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        })
    }

    /// Whether the channel `slug` is currently live.
    pub async fn is_stream_live(&self, slug: &str) -> Result<bool> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .get("https://api.kick.com/public/v1/channels")
            .query(&[("slug", slug)])
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlatformError::Api {
                platform: "Kick",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let live = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|c| c.get("stream"))
            .and_then(|s| s.get("is_live"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        debug!("Checked kick/{} live status: {}", slug, live);
        Ok(live)
    }
}

/// Result of one liveness poll across the configured checkers.
///
/// Poll errors deliberately report "not live": a flaky liveness API must
/// not pause a healthy 24/7 stream.
pub async fn poll_any_live(
    twitch: Option<(&TwitchLiveChecker, &str)>,
    kick: Option<(&KickLiveChecker, &str)>,
) -> bool {
    if let Some((checker, username)) = twitch {
        match checker.is_stream_live(username).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => warn!("Twitch live check failed: {}", e),
        }
    }
    if let Some((checker, slug)) = kick {
        match checker.is_stream_live(slug).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => warn!("Kick live check failed: {}", e),
        }
    }
    false
}
