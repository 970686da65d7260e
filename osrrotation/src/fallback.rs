//! Three-tier emergency playback when downloads keep failing.
//!
//! Tier 1 loops pre-loaded videos from `fallback/`; tier 2 stops deleting
//! finished videos so the remaining live content loops; tier 3 shows the
//! pause scene. While any tier is active a text overlay tells the
//! operator what happened, and a fresh download is attempted every five
//! minutes until one succeeds.

use std::sync::Arc;
use std::time::Duration;

use osrplayback::PlaybackMonitor;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{Components, Result};

/// Consecutive failed batches before fallback activates.
pub const FAILURE_THRESHOLD: u32 = 3;

/// How often a fresh download is attempted while fallback is active.
const RETRY_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    None,
    /// Tier 1: loop the emergency folder.
    FallbackFolder,
    /// Tier 2: loop whatever remains in the live folder.
    LoopRemaining,
    /// Tier 3: nothing to play, show the pause scene.
    PauseScreen,
}

impl FallbackTier {
    fn label(&self) -> &'static str {
        match self {
            FallbackTier::None => "none",
            FallbackTier::FallbackFolder => "fallback_folder",
            FallbackTier::LoopRemaining => "loop_remaining",
            FallbackTier::PauseScreen => "pause_screen",
        }
    }
}

pub struct FallbackController {
    components: Arc<Components>,
    tier: FallbackTier,
    consecutive_failures: u32,
    last_retry: Option<Instant>,
    active: bool,
}

impl FallbackController {
    pub fn new(components: Arc<Components>) -> Self {
        Self {
            components,
            tier: FallbackTier::None,
            consecutive_failures: 0,
            last_retry: None,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn tier(&self) -> FallbackTier {
        self.tier
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failed download batch. True when the threshold is reached
    /// and fallback should activate.
    pub fn record_download_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        warn!(
            "Download failure #{} (threshold: {})",
            self.consecutive_failures, FAILURE_THRESHOLD
        );
        self.consecutive_failures >= FAILURE_THRESHOLD
    }

    /// Reset the failure counter after a successful download.
    pub fn record_download_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                "Download succeeded — resetting failure counter (was {})",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Enter fallback mode, choosing the best available tier.
    pub async fn activate(&mut self, monitor: &mut PlaybackMonitor) -> Result<FallbackTier> {
        if self.active {
            debug!("Fallback already active, skipping re-activation");
            return Ok(self.tier);
        }

        let c = self.components.clone();
        let fallback_folder = c.fallback_folder();
        let live_folder = c.live_folder();

        let tier = if osrutils::has_video_files(&fallback_folder) {
            FallbackTier::FallbackFolder
        } else if osrutils::has_video_files(&live_folder) {
            FallbackTier::LoopRemaining
        } else {
            FallbackTier::PauseScreen
        };

        self.tier = tier;
        self.active = true;
        self.last_retry = Some(Instant::now());

        match tier {
            FallbackTier::FallbackFolder => {
                // Reload the media source behind the rotation screen.
                c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                c.compositor.stop_media_source(&c.scenes.media_source).await?;
                tokio::time::sleep(Duration::from_millis(500)).await;

                match c
                    .compositor
                    .update_media_source(&c.scenes.media_source, &fallback_folder, None)
                    .await
                {
                    Ok(_) => {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        c.compositor.switch_scene(&c.scenes.stream).await?;
                        monitor.initialize(&fallback_folder);
                        monitor.set_delete_on_transition(false);
                        self.show_alert("FALLBACK MODE — Downloads failing, playing backup content")
                            .await;
                        c.notifier.fallback_activated(tier.label()).await;
                    }
                    Err(e) => {
                        error!("Failed to load fallback folder into media source: {}", e);
                        self.activate_pause_screen(monitor).await?;
                        return Ok(self.tier);
                    }
                }
            }
            FallbackTier::LoopRemaining => {
                monitor.set_delete_on_transition(false);
                self.show_alert("FALLBACK MODE — Downloads failing, looping remaining content")
                    .await;
                c.notifier.fallback_activated(tier.label()).await;
            }
            FallbackTier::PauseScreen | FallbackTier::None => {
                self.activate_pause_screen(monitor).await?;
            }
        }

        info!("Fallback activated — tier: {:?}", self.tier);
        Ok(self.tier)
    }

    async fn activate_pause_screen(&mut self, _monitor: &mut PlaybackMonitor) -> Result<()> {
        let c = &self.components;
        self.tier = FallbackTier::PauseScreen;
        c.compositor.switch_scene(&c.scenes.pause).await?;
        self.show_alert("FALLBACK MODE — No content available, stream paused").await;
        c.notifier.fallback_activated(self.tier.label()).await;
        Ok(())
    }

    /// Exit fallback mode and restore normal playback from the live folder.
    pub async fn deactivate(&mut self, monitor: &mut PlaybackMonitor) -> Result<()> {
        if !self.active {
            return Ok(());
        }

        let previous_tier = self.tier;
        info!("Exiting fallback mode (was tier: {:?})", previous_tier);

        let c = self.components.clone();
        self.hide_alert().await;

        let live_folder = c.live_folder();
        if previous_tier == FallbackTier::FallbackFolder {
            c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            c.compositor.stop_media_source(&c.scenes.media_source).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Err(e) = c
                .compositor
                .update_media_source(&c.scenes.media_source, &live_folder, None)
                .await
            {
                warn!("Failed to reload live folder after fallback: {}", e);
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
            c.compositor.switch_scene(&c.scenes.stream).await?;
            monitor.initialize(&live_folder);
        }

        if previous_tier == FallbackTier::PauseScreen {
            c.compositor.switch_scene(&c.scenes.stream).await?;
        }

        monitor.set_delete_on_transition(true);

        self.active = false;
        self.tier = FallbackTier::None;
        self.consecutive_failures = 0;

        c.notifier.fallback_deactivated().await;
        info!("Fallback mode deactivated — normal operation resumed");
        Ok(())
    }

    /// Whether enough time has passed to retry a download.
    pub fn should_retry_download(&self) -> bool {
        if !self.active {
            return false;
        }
        match self.last_retry {
            Some(last) => last.elapsed() >= RETRY_INTERVAL,
            None => true,
        }
    }

    pub fn mark_retry_attempted(&mut self) {
        self.last_retry = Some(Instant::now());
    }

    /// Warn at startup when there is no emergency content to fall back on.
    pub fn startup_warning(&self) {
        let folder = self.components.fallback_folder();
        if !osrutils::has_video_files(&folder) {
            warn!(
                "Fallback folder is empty ({}). If downloads break, there will be no \
                 backup content to play. Consider adding some videos to this folder.",
                folder.display()
            );
        }
    }

    async fn show_alert(&self, text: &str) {
        let c = &self.components;
        if let Err(e) = c
            .compositor
            .show_alert(&c.scenes.stream, &c.scenes.alert_source, text)
            .await
        {
            warn!("Failed to show alert overlay: {}", e);
        }
    }

    async fn hide_alert(&self) {
        let c = &self.components;
        if let Err(e) = c
            .compositor
            .hide_alert(&c.scenes.stream, &c.scenes.alert_source)
            .await
        {
            warn!("Failed to hide alert overlay: {}", e);
        }
    }
}
