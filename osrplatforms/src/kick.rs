//! Kick adapter: channel updates through the public v1 API.
//!
//! Kick uses a user OAuth token obtained once by the separate
//! authorisation tool; this adapter reads the cached token file and keeps
//! it fresh via the refresh-token grant. The channel PATCH requires a
//! category id on every call, so a fallback id is used when no category
//! can be resolved.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{PlatformError, Result, StreamPlatform};

const API_BASE: &str = "https://api.kick.com/public/v1";
const TOKEN_URL: &str = "https://id.kick.com/oauth/token";

/// "Just Chatting" — used when a category cannot be resolved, because the
/// channel PATCH rejects requests without a category id.
pub const KICK_FALLBACK_CATEGORY_ID: i64 = 15;

const TOKEN_EXPIRY_LEEWAY_SECS: i64 = 60;

/// On-disk token cache written by the one-time authorisation tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickTokenCache {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl KickTokenCache {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_EXPIRY_LEEWAY_SECS) >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    7200
}

/// Kick platform integration.
pub struct KickUpdater {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    channel_id: String,
    token_cache_path: PathBuf,
    token: Mutex<Option<KickTokenCache>>,
    category_id_cache: Mutex<HashMap<String, i64>>,
}

impl KickUpdater {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        channel_id: &str,
        token_cache_path: PathBuf,
    ) -> Self {
        Self {
            client: crate::http_client(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            channel_id: channel_id.to_string(),
            token_cache_path,
            token: Mutex::new(None),
            category_id_cache: Mutex::new(HashMap::new()),
        }
    }

    fn load_cache(&self) -> Result<KickTokenCache> {
        let data = std::fs::read(&self.token_cache_path).map_err(|e| {
            PlatformError::TokenCache(format!(
                "cannot read {} — run the authorisation tool once first: {}",
                self.token_cache_path.display(),
                e
            ))
        })?;
        serde_json::from_slice(&data)
            .map_err(|e| PlatformError::TokenCache(format!("corrupt token cache: {}", e)))
    }

    fn store_cache(&self, cache: &KickTokenCache) {
        match serde_json::to_vec_pretty(cache) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&self.token_cache_path, data) {
                    warn!("[Kick] Failed to persist refreshed token: {}", e);
                }
            }
            Err(e) => warn!("[Kick] Failed to serialize token cache: {}", e),
        }
    }

    async fn refresh(&self, cache: KickTokenCache) -> Result<KickTokenCache> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", cache.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlatformError::Auth {
                platform: "Kick",
                reason: format!(
                    "token refresh returned {} — re-run the authorisation tool",
                    response.status()
                ),
            });
        }

        let refreshed: RefreshResponse = response.json().await?;
        let updated = KickTokenCache {
            access_token: refreshed.access_token,
            // Kick may rotate the refresh token; keep the old one otherwise.
            refresh_token: refreshed.refresh_token.unwrap_or(cache.refresh_token),
            expires_at: Utc::now() + Duration::seconds(refreshed.expires_in),
        };
        self.store_cache(&updated);
        debug!("[Kick] Access token refreshed");
        Ok(updated)
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let mut current = match token.take() {
            Some(t) => t,
            None => {
                let loaded = self.load_cache()?;
                info!("[Kick] Found cached tokens, using stored credentials");
                loaded
            }
        };
        if current.is_expired(Utc::now()) {
            current = self.refresh(current).await?;
        }
        let access = current.access_token.clone();
        *token = Some(current);
        Ok(access)
    }

    /// Resolve a category name to its numeric id, with an in-memory cache.
    async fn category_id(&self, category: &str) -> Result<Option<i64>> {
        let key = category.to_lowercase();
        {
            let cache = self.category_id_cache.lock().await;
            if let Some(id) = cache.get(&key) {
                return Ok(Some(*id));
            }
        }

        let token = self.bearer_token().await?;
        let response = self
            .client
            .get(format!("{}/categories", API_BASE))
            .query(&[("q", category)])
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("[Kick] Category lookup for '{}' returned {}", category, response.status());
            return Ok(None);
        }

        let body: serde_json::Value = response.json().await?;
        let id = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_i64());

        if let Some(id) = id {
            self.category_id_cache.lock().await.insert(key, id);
        } else {
            warn!("[Kick] No category match for '{}'", category);
        }
        Ok(id)
    }

    /// PATCH the channel. `category_id` is mandatory on this endpoint.
    async fn patch_channel(&self, title: Option<&str>, category_id: i64) -> Result<()> {
        let token = self.bearer_token().await?;
        let mut body = json!({"category_id": category_id});
        if let Some(title) = title {
            body["stream_title"] = json!(title);
        }

        let response = self
            .client
            .patch(format!("{}/channels", API_BASE))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        // The API answers 204 with no body on success.
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PlatformError::Api {
                platform: "Kick",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl StreamPlatform for KickUpdater {
    fn name(&self) -> &'static str {
        "Kick"
    }

    async fn update_title(&self, title: &str) -> Result<()> {
        self.patch_channel(Some(title), KICK_FALLBACK_CATEGORY_ID).await?;
        info!("[Kick] Updated title: {}", title);
        Ok(())
    }

    async fn update_category(&self, category: &str) -> Result<()> {
        let id = self
            .category_id(category)
            .await?
            .ok_or_else(|| PlatformError::UnknownCategory {
                platform: "Kick",
                category: category.to_string(),
            })?;
        self.patch_channel(None, id).await?;
        info!("[Kick] Updated category: {}", category);
        Ok(())
    }

    /// One PATCH carrying title and the resolved category id.
    ///
    /// An unresolvable category falls back to the default id — the title
    /// must never be dropped because a category lookup failed.
    async fn update_stream_info(&self, title: &str, category: Option<&str>) -> Result<()> {
        let category_id = match category {
            Some(name) => self
                .category_id(name)
                .await
                .ok()
                .flatten()
                .unwrap_or(KICK_FALLBACK_CATEGORY_ID),
            None => KICK_FALLBACK_CATEGORY_ID,
        };
        self.patch_channel(Some(title), category_id).await?;
        info!("[Kick] Updated stream info: title='{}', category={:?}", title, category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick_tokens.json");
        let cache = KickTokenCache {
            access_token: "acc".into(),
            refresh_token: "ref".into(),
            expires_at: Utc::now() + Duration::hours(2),
        };
        std::fs::write(&path, serde_json::to_vec(&cache).unwrap()).unwrap();

        let updater = KickUpdater::new("id", "secret", "chan", path);
        let loaded = updater.load_cache().unwrap();
        assert_eq!(loaded.access_token, "acc");
        assert!(!loaded.is_expired(Utc::now()));
    }

    #[test]
    fn test_missing_token_cache_names_the_fix() {
        let updater = KickUpdater::new("id", "secret", "chan", PathBuf::from("/nonexistent/x.json"));
        let err = updater.load_cache().unwrap_err();
        assert!(err.to_string().contains("authorisation tool"));
    }

    #[test]
    fn test_refresh_response_keeps_old_refresh_token() {
        let parsed: RefreshResponse =
            serde_json::from_str(r#"{"access_token": "new", "expires_in": 100}"#).unwrap();
        assert_eq!(parsed.access_token, "new");
        assert!(parsed.refresh_token.is_none());
    }
}
