//! Third-party broadcast platform adapters.
//!
//! Each platform implements [`StreamPlatform`]; the [`PlatformManager`]
//! fans updates out to every enabled adapter and reports per-platform
//! success so one failing platform never blocks the others. Liveness
//! polling of the upstream streamer lives in [`live`].

pub mod kick;
pub mod live;
pub mod twitch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("[{platform}] API returned {status}: {body}")]
    Api {
        platform: &'static str,
        status: u16,
        body: String,
    },
    #[error("[{platform}] authentication failed: {reason}")]
    Auth {
        platform: &'static str,
        reason: String,
    },
    #[error("token cache error: {0}")]
    TokenCache(String),
    #[error("[{platform}] unknown category: {category}")]
    UnknownCategory {
        platform: &'static str,
        category: String,
    },
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Uniform interface over one broadcast platform.
#[async_trait]
pub trait StreamPlatform: Send + Sync {
    fn name(&self) -> &'static str;

    async fn update_title(&self, title: &str) -> Result<()>;

    async fn update_category(&self, category: &str) -> Result<()>;

    /// Update title and category together.
    ///
    /// Platforms override this with a single-request implementation where
    /// their API permits; the default issues two calls.
    async fn update_stream_info(&self, title: &str, category: Option<&str>) -> Result<()> {
        self.update_title(title).await?;
        if let Some(category) = category {
            self.update_category(category).await?;
        }
        Ok(())
    }
}

/// Registry of enabled platform adapters.
#[derive(Default)]
pub struct PlatformManager {
    platforms: Vec<Arc<dyn StreamPlatform>>,
}

impl PlatformManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Arc<dyn StreamPlatform>) {
        info!("Platform enabled: {}", platform.name());
        self.platforms.push(platform);
    }

    pub fn enabled_platforms(&self) -> Vec<&'static str> {
        self.platforms.iter().map(|p| p.name()).collect()
    }

    pub fn platforms(&self) -> &[Arc<dyn StreamPlatform>] {
        &self.platforms
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Push title + category to every enabled platform.
    ///
    /// Returns per-platform success; failures are logged, never fatal.
    pub async fn update_stream_info_all(
        &self,
        title: &str,
        category: Option<&str>,
    ) -> HashMap<&'static str, bool> {
        let mut results = HashMap::new();
        for platform in &self.platforms {
            let ok = match platform.update_stream_info(title, category).await {
                Ok(()) => true,
                Err(e) => {
                    error!("[{}] stream info update failed: {}", platform.name(), e);
                    false
                }
            };
            results.insert(platform.name(), ok);
        }
        results
    }

    pub async fn update_title_all(&self, title: &str) -> HashMap<&'static str, bool> {
        let mut results = HashMap::new();
        for platform in &self.platforms {
            let ok = match platform.update_title(title).await {
                Ok(()) => true,
                Err(e) => {
                    error!("[{}] title update failed: {}", platform.name(), e);
                    false
                }
            };
            results.insert(platform.name(), ok);
        }
        if results.is_empty() {
            warn!("No streaming platforms enabled; titles will not be updated");
        }
        results
    }

    pub async fn update_category_all(&self, category: &str) -> HashMap<&'static str, bool> {
        let mut results = HashMap::new();
        for platform in &self.platforms {
            let ok = match platform.update_category(category).await {
                Ok(()) => true,
                Err(e) => {
                    error!("[{}] category update failed: {}", platform.name(), e);
                    false
                }
            };
            results.insert(platform.name(), ok);
        }
        results
    }
}

/// Shared reqwest client with the standard 10 s request timeout.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("reqwest client builds")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyPlatform {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl StreamPlatform for FlakyPlatform {
        fn name(&self) -> &'static str {
            if self.fail { "failing" } else { "working" }
        }

        async fn update_title(&self, _title: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PlatformError::Api {
                    platform: "failing",
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn update_category(&self, _category: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fan_out_reports_per_platform_success() {
        let mut manager = PlatformManager::new();
        let good = Arc::new(FlakyPlatform { calls: AtomicUsize::new(0), fail: false });
        let bad = Arc::new(FlakyPlatform { calls: AtomicUsize::new(0), fail: true });
        manager.register(good.clone());
        manager.register(bad.clone());

        let results = manager.update_title_all("new title").await;
        assert_eq!(results.get("working"), Some(&true));
        assert_eq!(results.get("failing"), Some(&false));
        // The failing platform never blocked the working one.
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_update_stream_info_composes() {
        let platform = FlakyPlatform { calls: AtomicUsize::new(0), fail: false };
        platform.update_stream_info("t", Some("c")).await.unwrap();
        assert_eq!(platform.calls.load(Ordering::SeqCst), 1);
    }
}
