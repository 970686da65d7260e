//! Twitch adapter: helix channel updates with an app-access token.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{PlatformError, Result, StreamPlatform};

const HELIX_BASE: &str = "https://api.twitch.tv/helix";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Refresh the app token this long before its actual expiry.
const TOKEN_EXPIRY_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
pub(crate) struct AppToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AppToken {
    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_EXPIRY_LEEWAY_SECS) >= self.expires_at
    }
}

/// Fetch a client-credentials app access token.
pub(crate) async fn fetch_app_token(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
) -> Result<AppToken> {
    let response = client
        .post(TOKEN_URL)
        .query(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "client_credentials"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(PlatformError::Auth {
            platform: "Twitch",
            reason: format!("token endpoint returned {}", response.status()),
        });
    }

    let token: TokenResponse = response.json().await?;
    debug!("Twitch app token acquired");
    Ok(AppToken {
        access_token: token.access_token,
        expires_at: Utc::now() + Duration::seconds(token.expires_in),
    })
}

/// Twitch platform integration.
pub struct TwitchUpdater {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    broadcaster_id: String,
    token: Mutex<Option<AppToken>>,
    game_id_cache: Mutex<HashMap<String, String>>,
}

impl TwitchUpdater {
    pub fn new(client_id: &str, client_secret: &str, broadcaster_id: &str) -> Self {
        Self {
            client: crate::http_client(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            broadcaster_id: broadcaster_id.to_string(),
            token: Mutex::new(None),
            game_id_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a broadcaster id from a login name.
    pub async fn resolve_broadcaster_id(
        client: &reqwest::Client,
        client_id: &str,
        client_secret: &str,
        login: &str,
    ) -> Result<Option<String>> {
        let token = fetch_app_token(client, client_id, client_secret).await?;
        let response = client
            .get(format!("{}/users", HELIX_BASE))
            .query(&[("login", login)])
            .header("Client-ID", client_id)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let body: serde_json::Value = response.json().await?;
        let id = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|u| u.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        if let Some(id) = &id {
            info!("Got Twitch broadcaster id for {}: {}", login, id);
        }
        Ok(id)
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

    /// Resolve a human game name to its helix id, with an in-memory cache.
    async fn game_id(&self, game_name: &str) -> Result<Option<String>> {
        {
            let cache = self.game_id_cache.lock().await;
            if let Some(id) = cache.get(game_name) {
                return Ok(Some(id.clone()));
            }
        }

        let token = self.bearer_token().await?;
        let response = self
            .client
            .get(format!("{}/games", HELIX_BASE))
            .query(&[("name", game_name)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(&token)
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        let id = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|g| g.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        if let Some(id) = &id {
            self.game_id_cache
                .lock()
                .await
                .insert(game_name.to_string(), id.clone());
        } else {
            warn!("[Twitch] Could not find game id for: {}", game_name);
        }
        Ok(id)
    }

    async fn patch_channel(&self, body: serde_json::Value) -> Result<()> {
        let token = self.bearer_token().await?;
        let response = self
            .client
            .patch(format!("{}/channels", HELIX_BASE))
            .query(&[("broadcaster_id", &self.broadcaster_id)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        // Helix returns 204 with an empty body on success.
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PlatformError::Api {
                platform: "Twitch",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl StreamPlatform for TwitchUpdater {
    fn name(&self) -> &'static str {
        "Twitch"
    }

    async fn update_title(&self, title: &str) -> Result<()> {
        self.patch_channel(json!({"title": title})).await?;
        info!("[Twitch] Updated title: {}", title);
        Ok(())
    }

    async fn update_category(&self, category: &str) -> Result<()> {
        let game_id = self.game_id(category).await?.ok_or_else(|| {
            PlatformError::UnknownCategory {
                platform: "Twitch",
                category: category.to_string(),
            }
        })?;
        self.patch_channel(json!({"game_id": game_id})).await?;
        info!("[Twitch] Updated category: {}", category);
        Ok(())
    }

    /// One PATCH carrying both title and game id.
    ///
    /// An unknown category is dropped rather than failing the title update.
    async fn update_stream_info(&self, title: &str, category: Option<&str>) -> Result<()> {
        let mut body = json!({"title": title});
        if let Some(category) = category {
            if let Some(game_id) = self.game_id(category).await? {
                body["game_id"] = json!(game_id);
            }
        }
        self.patch_channel(body).await?;
        info!("[Twitch] Updated stream info: title='{}', category={:?}", title, category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_leeway() {
        let now = Utc::now();
        let fresh = AppToken {
            access_token: "abc".into(),
            expires_at: now + Duration::seconds(3600),
        };
        assert!(!fresh.is_expired(now));

        let nearly = AppToken {
            access_token: "abc".into(),
            expires_at: now + Duration::seconds(30),
        };
        // Within the 60 s leeway window counts as expired.
        assert!(nearly.is_expired(now));

        let gone = AppToken {
            access_token: "abc".into(),
            expires_at: now - Duration::seconds(1),
        };
        assert!(gone.is_expired(now));
    }

    #[test]
    fn test_token_response_parses_without_expiry() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token": "tok", "token_type": "bearer"}"#).unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.expires_in, 3600);
    }
}
