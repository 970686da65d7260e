//! The atomic content-switch protocol.
//!
//! Viewers see the rotation screen while the media source is released,
//! the live folder is wiped, the pending rotation moves in, files gain
//! their playlist ordering prefix and the source is reloaded. Stream
//! title and category are pushed last — they never gate the scene coming
//! back.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use osrstore::RotationSession;
use tracing::{error, info, warn};

use crate::categories::{self, PlatformCategories};
use crate::title::{generate_stream_title, truncate_stream_title};
use crate::{Components, Result, RotationError};

/// Which flavour of switch is being executed.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchMode {
    /// Wipe live, move pending in.
    Normal,
    /// Add pending content on top of live without wiping (override
    /// resumption keeps the original rotation's files).
    OverrideResumption,
    /// Back live up to the given folder first, then wipe and move.
    OverrideSwitch { backup_folder: std::path::PathBuf },
}

pub struct ContentSwitchHandler {
    components: Arc<Components>,
}

impl ContentSwitchHandler {
    pub fn new(components: Arc<Components>) -> Self {
        Self { components }
    }

    /// Show the rotation screen and release the media source's file locks.
    pub async fn prepare_for_switch(&self) -> Result<()> {
        let c = &self.components;
        c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
        c.compositor.stop_media_source(&c.scenes.media_source).await?;
        // Give the OS a moment to release the player's file handles.
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    }

    /// Perform the folder operations for the requested switch mode.
    pub fn execute_switch(&self, live: &Path, pending: &Path, mode: &SwitchMode) -> Result<()> {
        match mode {
            SwitchMode::Normal => {
                osrutils::folders::switch_content_folders(live, pending)?;
            }
            SwitchMode::OverrideResumption => {
                let copied = osrutils::folders::copy_folder_contents(pending, live)?;
                info!("Override resumption: layered {} file(s) onto live folder", copied);
            }
            SwitchMode::OverrideSwitch { backup_folder } => {
                let backed_up = osrutils::folders::copy_folder_contents(live, backup_folder)?;
                info!(
                    "Backed up {} live file(s) to {}",
                    backed_up,
                    backup_folder.display()
                );
                self.record_backup_success()?;
                osrutils::folders::switch_content_folders(live, pending)?;
            }
        }
        Ok(())
    }

    /// Note in the suspended session that its content was backed up, so
    /// the restore path knows there is something to bring back.
    fn record_backup_success(&self) -> Result<()> {
        let store = &self.components.store;
        if let Some(session) = store.current_session()? {
            let mut data = match session.suspension_data {
                Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
                _ => serde_json::json!({}),
            };
            data["backup_success"] = serde_json::json!(true);
            store.update_session_suspension_data(session.id, &data)?;
        }
        Ok(())
    }

    /// Rename live-folder videos with their playlist ordering prefix.
    ///
    /// Alphabetical playback then groups videos by the session's selection
    /// order. Skipped quietly for files of unknown playlists.
    pub fn apply_ordering_prefixes(&self, live: &Path, playlist_order: &[String]) {
        match osrutils::folders::rename_with_playlist_prefix(live, playlist_order) {
            Ok(renamed) if renamed > 0 => {
                info!("Applied ordering prefixes to {} file(s)", renamed)
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to rename videos with prefix: {}", e),
        }
    }

    /// Reload the media source from the live folder and restore the
    /// viewer-facing scene.
    pub async fn finalize_switch(
        &self,
        live: &Path,
        streamer_is_live: bool,
    ) -> Result<Vec<String>> {
        let c = &self.components;
        let files = c
            .compositor
            .update_media_source(&c.scenes.media_source, live, None)
            .await?;

        let target_scene = if streamer_is_live {
            &c.scenes.pause
        } else {
            &c.scenes.stream
        };
        c.compositor.switch_scene(target_scene).await?;
        Ok(files)
    }

    /// Push the session title and the rotation's opening category.
    ///
    /// The category comes from the first video on disk; when that video is
    /// not registered yet, the first selected playlist's category is used.
    pub async fn update_stream_metadata(
        &self,
        session: &RotationSession,
        live: &Path,
    ) -> Result<()> {
        let c = &self.components;
        let title = truncate_stream_title(session.stream_title.as_deref().unwrap_or("Unknown"));

        let categories = self
            .initial_rotation_categories(session, live)
            .or_else(|| self.first_playlist_categories(session));

        categories::push_stream_info(&c.platforms, &title, categories.as_ref()).await;
        info!("Updated stream: title='{}', category={:?}", title, categories);
        Ok(())
    }

    fn initial_rotation_categories(
        &self,
        _session: &RotationSession,
        live: &Path,
    ) -> Option<PlatformCategories> {
        let first = osrutils::video_files_sorted(live).into_iter().next()?;
        categories::resolve_category_for_video(&first, &self.components.store, &self.components.config)
    }

    fn first_playlist_categories(&self, session: &RotationSession) -> Option<PlatformCategories> {
        let first_id = session.playlists_selected.first()?;
        let playlist = self.components.store.playlist(*first_id).ok().flatten()?;
        let entry = self.components.config.playlist_by_name(&playlist.name)?;
        Some(categories::resolve_playlist_categories(&entry))
    }

    /// Mark the session's playlists played so the selector rotates on.
    pub fn mark_playlists_played(&self, session: &RotationSession) -> Result<()> {
        for playlist_id in &session.playlists_selected {
            self.components.store.mark_playlist_played(*playlist_id)?;
        }
        info!(
            "Marking {} playlists as played: {:?}",
            session.playlists_selected.len(),
            session.playlists_selected
        );
        Ok(())
    }

    /// Regenerate the session's stream title from a playlist name list.
    pub fn build_stream_title(&self, playlist_names: &[String]) -> String {
        generate_stream_title(&self.components.settings().stream_title_template, playlist_names)
    }

    /// Validate a downloaded folder: at least one video, none zero-sized.
    pub fn validate_downloads(&self, folder: &Path) -> Result<()> {
        let files = osrutils::video_files_sorted(folder);
        if files.is_empty() {
            error!("No video files found in download folder {}", folder.display());
            return Err(RotationError::ValidationFailed(folder.to_path_buf()));
        }
        for file in &files {
            let size = std::fs::metadata(folder.join(file)).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                error!("Zero-size file detected: {}", file);
                return Err(RotationError::ValidationFailed(folder.to_path_buf()));
            }
        }
        info!("Validated {} video files", files.len());
        Ok(())
    }
}
