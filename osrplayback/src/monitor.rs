//! Current-video tracking and finished-file deletion.

use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;
use osrobs::{Compositor, MediaEvent};
use osrutils::strip_ordering_prefix;
use tracing::{debug, error, info, warn};

/// Result of one monitor tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionReport {
    pub transition: bool,
    /// Previous video, prefix-stripped (database name).
    pub previous_video: Option<String>,
    /// Current video, prefix-stripped.
    pub current_video: Option<String>,
    pub all_consumed: bool,
}

/// Tracks media-source playback through compositor media events.
pub struct PlaybackMonitor {
    events: Receiver<MediaEvent>,
    media_source_name: String,
    scene_stream: String,

    video_folder: Option<PathBuf>,
    /// Filename with ordering prefix (on-disk name).
    current_video: Option<String>,
    all_content_consumed: bool,
    needs_vlc_refresh: bool,
    temp_playback_mode: bool,
    delete_on_transition: bool,
    suspended: bool,
    /// Absorbs the spurious `started` fired on source (re)configuration.
    suppress_started: u32,
}

impl PlaybackMonitor {
    pub fn new(events: Receiver<MediaEvent>, media_source_name: &str, scene_stream: &str) -> Self {
        Self {
            events,
            media_source_name: media_source_name.to_string(),
            scene_stream: scene_stream.to_string(),
            video_folder: None,
            current_video: None,
            all_content_consumed: false,
            needs_vlc_refresh: false,
            temp_playback_mode: false,
            delete_on_transition: true,
            suspended: false,
            suppress_started: 0,
        }
    }

    /// Prepare the monitor for a new rotation.
    ///
    /// Scans the folder, points the tracker at the alphabetically first
    /// file and drains stale events from the previous rotation. The media
    /// source is about to be reconfigured by the caller, which fires one
    /// spurious `started` — pre-arm the suppression counter for it.
    pub fn initialize(&mut self, video_folder: &Path) {
        self.video_folder = Some(video_folder.to_path_buf());
        self.current_video = None;
        self.all_content_consumed = false;
        self.needs_vlc_refresh = false;
        self.temp_playback_mode = false;
        self.delete_on_transition = true;
        self.suspended = false;

        self.drain_events();
        self.suppress_started = 1;

        let files = self.video_files();
        if files.is_empty() {
            warn!("Playback monitor initialized with empty folder");
            info!("Playback monitor tracking 0 videos in {}", video_folder.display());
            return;
        }

        self.current_video = Some(files[0].clone());
        info!("Playback monitor initialized: current video = {}", files[0]);
        info!(
            "Playback monitor tracking {} videos in {}",
            files.len(),
            video_folder.display()
        );
    }

    /// Point the tracker at a specific file after a resume reorder.
    ///
    /// When the playlist was reordered so a resumed video plays first, the
    /// alphabetically-first file is not what the source is playing.
    pub fn set_current_video(&mut self, filename: &str) {
        self.current_video = Some(filename.to_string());
        info!("Playback monitor current video set to {}", filename);
    }

    // ── Suspend / resume (freeze recovery) ───────────────────────────

    pub fn suspend(&mut self) {
        self.suspended = true;
        self.drain_events();
        info!("Playback monitor suspended");
    }

    pub fn resume(&mut self) {
        self.suspended = false;
        self.drain_events();
        // Reconnect and freeze recovery can fire a spurious started event.
        self.suppress_started = 1;
        info!("Playback monitor resumed");
    }

    // ── Mode toggles ─────────────────────────────────────────────────

    pub fn set_temp_playback_mode(&mut self, enabled: bool) {
        self.temp_playback_mode = enabled;
        self.drain_events();
        info!(
            "Playback monitor temp playback mode: {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn set_delete_on_transition(&mut self, enabled: bool) {
        self.delete_on_transition = enabled;
        info!(
            "Playback monitor delete-on-transition: {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Absorb one more spurious `started`, for reconfigurations done by
    /// the orchestrator outside the monitor's own refresh path.
    pub fn absorb_spurious_started(&mut self) {
        self.suppress_started += 1;
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn all_content_consumed(&self) -> bool {
        self.all_content_consumed
    }

    pub fn needs_vlc_refresh(&self) -> bool {
        self.needs_vlc_refresh
    }

    pub fn clear_vlc_refresh_flag(&mut self) {
        self.needs_vlc_refresh = false;
    }

    pub fn is_temp_playback_mode(&self) -> bool {
        self.temp_playback_mode
    }

    pub fn delete_on_transition(&self) -> bool {
        self.delete_on_transition
    }

    /// On-disk filename, with ordering prefix.
    pub fn current_video(&self) -> Option<&str> {
        self.current_video.as_deref()
    }

    /// Prefix-stripped filename — the database key.
    pub fn current_video_original_name(&self) -> Option<String> {
        self.current_video
            .as_deref()
            .map(|name| strip_ordering_prefix(name).to_string())
    }

    pub fn video_folder(&self) -> Option<&Path> {
        self.video_folder.as_deref()
    }

    // ── Core transition check ────────────────────────────────────────

    /// Drain the event queue and process any video transitions.
    ///
    /// Called every ~1 s from the tick loop.
    pub async fn check(&mut self, compositor: &dyn Compositor) -> TransitionReport {
        let mut report = TransitionReport {
            transition: false,
            previous_video: None,
            current_video: self.current_video_original_name(),
            all_consumed: false,
        };

        if self.video_folder.is_none() || self.all_content_consumed {
            report.all_consumed = self.all_content_consumed;
            return report;
        }

        if self.suspended {
            return report;
        }

        // When disconnected, drain stale events so they don't pile up and
        // fire a burst of false transitions after reconnect.
        if !compositor.is_connected() {
            self.drain_events();
            return report;
        }

        // Same when not on the stream scene: the source may keep firing
        // while the pause or rotation screen is up.
        if let Ok(scene) = compositor.current_scene().await {
            if scene != self.scene_stream {
                self.drain_events();
                return report;
            }
        }

        if self.current_video.is_none() {
            let files = self.video_files();
            if files.is_empty() {
                self.all_content_consumed = true;
                report.all_consumed = true;
                return report;
            }
            self.current_video = Some(files[0].clone());
            report.current_video = self.current_video_original_name();
            return report;
        }

        let events: Vec<MediaEvent> = self.events.try_iter().collect();
        let transition_count = crate::count_transitions(&events, &mut self.suppress_started);
        if transition_count > 0 {
            debug!(
                "Processed {} media events -> {} transition(s)",
                events.len(),
                transition_count
            );
        } else {
            return report;
        }

        // Process transitions sequentially so rapid skips are handled.
        for _ in 0..transition_count {
            if self.all_content_consumed {
                break;
            }

            let Some(previous_video) = self.current_video.clone() else {
                break;
            };
            let previous_original = strip_ordering_prefix(&previous_video).to_string();
            let files = self.video_files();
            let is_last = files.len() <= 1;

            if is_last {
                if self.temp_playback_mode {
                    // Last tracked file finished while downloads are still
                    // appending — let the orchestrator reload the source
                    // from the grown folder instead of deleting.
                    info!("Last video done in temp playback — signaling media source refresh");
                    self.needs_vlc_refresh = true;
                    report.transition = true;
                    report.previous_video = Some(previous_original);
                    report.current_video = None;
                    return report;
                }

                if !self.delete_on_transition {
                    // A lone file replaying under the player's loop is not
                    // a transition; keep tracking it until the mode ends.
                    debug!("Single video looping: {}", previous_original);
                    continue;
                }

                self.delete_video(&previous_video);
                self.all_content_consumed = true;
                self.current_video = None;
                report.transition = true;
                report.previous_video = Some(previous_original.clone());
                report.current_video = None;
                report.all_consumed = true;
                info!("Final video finished: {} — all content consumed", previous_original);
                return report;
            }

            if self.delete_on_transition {
                if !self.delete_video(&previous_video) {
                    // Still locked by the player — leave the pointer where
                    // it is and retry on the next tick.
                    warn!(
                        "Skipping transition for {} — file could not be deleted, will retry next cycle",
                        previous_video
                    );
                    break;
                }
                self.refresh_media_source(compositor).await;
            }

            let files = self.video_files();
            self.current_video = if self.delete_on_transition {
                // After deletion the next file is always first.
                files.first().cloned()
            } else {
                // No-delete modes advance by index and wrap past the end:
                // fallback tiers and prepared-rotation replays loop with
                // the player instead of running out of content.
                match files.iter().position(|f| *f == previous_video) {
                    Some(idx) if idx + 1 < files.len() => Some(files[idx + 1].clone()),
                    _ => files.first().cloned(),
                }
            };

            match &self.current_video {
                Some(current) => {
                    let current_original = strip_ordering_prefix(current).to_string();
                    info!("Video transition: {} -> {}", previous_original, current_original);
                    // Only the last processed transition lands in the report.
                    report.transition = true;
                    report.previous_video = Some(previous_original);
                    report.current_video = Some(current_original);
                }
                None => {
                    self.all_content_consumed = true;
                    report.transition = true;
                    report.previous_video = Some(previous_original.clone());
                    report.current_video = None;
                    report.all_consumed = true;
                    info!("Final video finished: {} — all content consumed", previous_original);
                    return report;
                }
            }
        }

        report
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn drain_events(&self) {
        let drained = self.events.try_iter().count();
        if drained > 0 {
            debug!("Discarded {} stale media events", drained);
        }
    }

    fn video_files(&self) -> Vec<String> {
        match &self.video_folder {
            Some(folder) => osrutils::video_files_sorted(folder),
            None => Vec::new(),
        }
    }

    fn delete_video(&self, filename: &str) -> bool {
        let Some(folder) = &self.video_folder else {
            return false;
        };
        let path = folder.join(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted completed video: {}", filename);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                warn!("Cannot delete {} — file still locked, will retry next cycle", filename);
                false
            }
            Err(e) => {
                error!("Failed to delete video {}: {}", filename, e);
                false
            }
        }
    }

    /// Push the remaining folder contents to the media source.
    ///
    /// The reconfiguration fires one spurious `started` for the new first
    /// track; arm the suppression counter so it is not counted.
    async fn refresh_media_source(&mut self, compositor: &dyn Compositor) {
        let Some(folder) = self.video_folder.clone() else {
            return;
        };
        match compositor
            .update_media_source(&self.media_source_name, &folder, None)
            .await
        {
            Ok(files) => {
                self.suppress_started += 1;
                debug!("Updated media source: {} videos remaining", files.len());
            }
            Err(e) => error!("Failed to update media source after deletion: {}", e),
        }
    }
}
