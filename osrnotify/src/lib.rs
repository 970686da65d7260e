//! Discord webhook notifications.
//!
//! Operator-visible events go out as colour-coded embeds. Delivery is
//! best-effort: a missing webhook URL disables the notifier and a failed
//! POST is logged, never propagated — notifications must not disturb the
//! tick loop.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error};

pub mod colors {
    pub const SUCCESS: u32 = 0x00FF00;
    pub const ERROR: u32 = 0xFF0000;
    pub const WARNING: u32 = 0xFF9900;
    pub const INFO: u32 = 0x0099FF;
    pub const STREAM_LIVE: u32 = 0x9146FF;
    pub const ROTATION_START: u32 = 0xFFA500;
    pub const FALLBACK: u32 = 0xFF6600;
}

/// Fire-and-forget Discord notifier.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        if webhook_url.is_none() {
            debug!("No Discord webhook configured; notifications disabled");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            webhook_url,
        }
    }

    /// Disabled notifier for tests and headless runs.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub async fn send(&self, title: &str, description: &str, color: u32) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let payload = json!({
            "embeds": [{
                "title": title,
                "description": description,
                "color": color,
                "timestamp": Utc::now().to_rfc3339(),
            }]
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                error!("Discord webhook returned {}", response.status());
            }
            Ok(_) => {}
            Err(e) => error!("Failed to send Discord notification: {}", e),
        }
    }

    // ── Event helpers ────────────────────────────────────────────────

    pub async fn automation_started(&self) {
        self.send("Automation Started", "24/7 rotation controller is running", colors::SUCCESS)
            .await;
    }

    pub async fn automation_shutdown(&self) {
        self.send("Automation Stopped", "Rotation controller shut down cleanly", colors::INFO)
            .await;
    }

    pub async fn automation_error(&self, message: &str) {
        self.send("Automation Error", message, colors::ERROR).await;
    }

    pub async fn rotation_started(&self, playlist_names: &[String]) {
        self.send(
            "Content Rotation Started",
            &format!("Downloading: {}", playlist_names.join(", ")),
            colors::ROTATION_START,
        )
        .await;
    }

    pub async fn rotation_switched(&self, playlist_names: &[String]) {
        self.send(
            "Content Rotated",
            &format!("Now playing: {}", playlist_names.join(", ")),
            colors::SUCCESS,
        )
        .await;
    }

    pub async fn rotation_error(&self, message: &str) {
        self.send("Rotation Error", message, colors::ERROR).await;
    }

    pub async fn download_warning(&self, message: &str) {
        self.send("Download Warning", message, colors::WARNING).await;
    }

    pub async fn next_rotation_ready(&self, playlist_names: &[String]) {
        self.send(
            "Next Rotation Ready",
            &format!("Downloaded: {}", playlist_names.join(", ")),
            colors::SUCCESS,
        )
        .await;
    }

    pub async fn background_download_warning(&self) {
        self.send(
            "Background Download Warning",
            "Some playlists failed to download in the background",
            colors::WARNING,
        )
        .await;
    }

    pub async fn background_download_error(&self, message: &str) {
        self.send(
            "Background Download Error",
            &format!("Failed to download next rotation: {}", message),
            colors::ERROR,
        )
        .await;
    }

    pub async fn temp_playback_activated(&self, file_count: usize) {
        self.send(
            "Temp Playback Active",
            &format!("Streaming {} ready file(s) from the pending folder while downloads finish", file_count),
            colors::INFO,
        )
        .await;
    }

    pub async fn temp_playback_exited(&self, playlist_names: &[String]) {
        self.send(
            "Temp Playback Finished",
            &format!("Consolidated into live rotation: {}", playlist_names.join(", ")),
            colors::SUCCESS,
        )
        .await;
    }

    pub async fn fallback_activated(&self, tier: &str) {
        self.send(
            "Fallback Mode Active",
            &format!("Downloads keep failing — running in {} mode", tier),
            colors::FALLBACK,
        )
        .await;
    }

    pub async fn fallback_deactivated(&self) {
        self.send(
            "Fallback Mode Cleared",
            "Downloads recovered, normal rotation resumed",
            colors::SUCCESS,
        )
        .await;
    }

    pub async fn streamer_live(&self, streamer: &str) {
        self.send(
            &format!("{} is LIVE!", streamer),
            "24/7 stream paused",
            colors::STREAM_LIVE,
        )
        .await;
    }

    pub async fn streamer_offline(&self, streamer: &str) {
        self.send(
            &format!("{} is OFFLINE", streamer),
            "24/7 stream resumed",
            colors::SUCCESS,
        )
        .await;
    }

    pub async fn session_resumed(&self, session_id: i64, video: Option<&str>, cursor_s: Option<f64>) {
        let mut description = format!("Resumed session {}", session_id);
        if let Some(video) = video {
            description.push_str(&format!("\nVideo: {}", video));
        }
        if let Some(cursor) = cursor_s {
            description.push_str(&format!("\nPosition: {:.1}s", cursor));
        }
        self.send("Session Resumed", &description, colors::INFO).await;
    }

    pub async fn video_transition(&self, video_name: &str, category: Option<&str>) {
        let description = match category {
            Some(category) => format!("Now playing: {}\nCategory: {}", video_name, category),
            None => format!("Now playing: {}", video_name),
        };
        self.send("Video Transition", &description, colors::INFO).await;
    }

    pub async fn stream_update_failed(&self, platform: &str) {
        self.send(
            &format!("{} Stream Update Failed", platform),
            &format!("Failed to update stream info on {}", platform),
            colors::ERROR,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_notifier_is_a_noop() {
        let notifier = Notifier::disabled();
        // Must not panic or attempt network I/O.
        notifier.automation_started().await;
        notifier.rotation_error("nothing to see").await;
    }
}
