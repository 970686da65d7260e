//! Temp playback: streaming straight from the pending folder while large
//! downloads are still completing.
//!
//! When a rotation plays out faster than the next one downloads, the
//! media source is pointed directly at `pending/` so viewers keep getting
//! fresh content. The downloader keeps appending files to the same
//! folder; the download archive guarantees that videos deleted after
//! playing are not fetched again. Once every prepared playlist is marked
//! COMPLETED the handler consolidates pending into live with a normal
//! folder switch, preserving the playback cursor across the swap.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use osrdownload::BatchKind;
use osrplayback::PlaybackMonitor;
use osrstore::RotationSession;
use tracing::{debug, error, info, warn};

use crate::categories;
use crate::selector::Selector;
use crate::{playlist_refs, Components, Result};

/// How long activation waits for the first complete file to appear.
const ACTIVATION_WAIT_MAX: Duration = Duration::from_secs(120);
const ACTIVATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A deferred-seek intent produced when playback moves folders.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSeek {
    pub cursor_ms: i64,
    /// Unprefixed filename the cursor belongs to.
    pub video: String,
}

pub struct TempPlaybackHandler {
    components: Arc<Components>,
    selector: Selector,
    active: bool,
    session_id: Option<i64>,
}

impl TempPlaybackHandler {
    pub fn new(components: Arc<Components>) -> Self {
        let selector = Selector::new(components.store.clone(), components.config.clone());
        Self {
            components,
            selector,
            active: false,
            session_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_session_id(&mut self, session_id: Option<i64>) {
        self.session_id = session_id;
    }

    /// Activate temp playback for a finished rotation whose next content
    /// is still downloading.
    ///
    /// Shows the rotation screen, waits up to two minutes for at least one
    /// complete file, then points the media source at the pending folder
    /// and persists the state for crash recovery.
    pub async fn activate(&mut self, monitor: &mut PlaybackMonitor) -> Result<bool> {
        info!("===== TEMP PLAYBACK ACTIVATION =====");
        let c = self.components.clone();
        let pending_folder = c.pending_folder();

        c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut complete_files = osrutils::video_files_sorted(&pending_folder);
        if complete_files.is_empty() {
            info!("No complete files in pending folder yet — waiting for downloads to produce content...");
            let mut waited = Duration::ZERO;
            while waited < ACTIVATION_WAIT_MAX {
                tokio::time::sleep(ACTIVATION_POLL_INTERVAL).await;
                waited += ACTIVATION_POLL_INTERVAL;
                complete_files = osrutils::video_files_sorted(&pending_folder);
                if !complete_files.is_empty() {
                    info!(
                        "Content appeared after waiting {}s: {} file(s) ready",
                        waited.as_secs(),
                        complete_files.len()
                    );
                    break;
                }
                if waited.as_secs() % 30 == 0 {
                    info!(
                        "Still waiting for content in pending folder... ({}s elapsed)",
                        waited.as_secs()
                    );
                }
            }
            if complete_files.is_empty() {
                // Leave the rotation screen up; the tick loop retries.
                warn!(
                    "Timed out after {}s waiting for content — will retry on next tick",
                    ACTIVATION_WAIT_MAX.as_secs()
                );
                return Ok(false);
            }
        }

        let playlist = c
            .compositor
            .update_media_source(&c.scenes.media_source, &pending_folder, None)
            .await?;

        tokio::time::sleep(Duration::from_millis(500)).await;
        c.compositor.switch_scene(&c.scenes.stream).await?;

        monitor.initialize(&pending_folder);
        monitor.set_temp_playback_mode(true);
        self.active = true;

        if let Some(session_id) = self.session_id {
            c.store.save_temp_playback_state(
                session_id,
                &playlist,
                0,
                &pending_folder.to_string_lossy(),
                0,
            )?;
        }

        self.push_title_for_next_playlists(&pending_folder).await;

        info!("Temp playback activated with {} files", complete_files.len());
        info!("Streaming directly from pending folder: {}", pending_folder.display());
        c.notifier.temp_playback_activated(complete_files.len()).await;
        Ok(true)
    }

    /// Restore temp playback after a crash.
    ///
    /// Rebuilds the player playlist from the files that still exist,
    /// reordered so the video that was playing comes first (the player
    /// always starts at index 0). The caller schedules the deferred seek
    /// from the session's cursor — the temp row's cursor is only written
    /// at activation and is stale by now.
    pub async fn restore(
        &mut self,
        monitor: &mut PlaybackMonitor,
        session: &RotationSession,
        state: &osrstore::TempPlaybackState,
    ) -> Result<bool> {
        info!("===== RESTORING TEMP PLAYBACK FROM CRASH =====");
        let c = self.components.clone();

        let pending_folder = std::path::PathBuf::from(&state.folder);
        if state.playlist.is_empty() {
            error!("Invalid temp playback state - missing folder or playlist");
            return Ok(false);
        }

        let position = (state.position.max(0) as usize).min(state.playlist.len());
        let mut valid_playlist: Vec<String> = state.playlist[position..]
            .iter()
            .filter(|name| {
                let exists = pending_folder.join(name.as_str()).exists();
                if !exists {
                    warn!("Skipping missing file during temp playback restore: {}", name);
                }
                exists
            })
            .cloned()
            .collect();

        if valid_playlist.is_empty() {
            error!("No valid files remaining for temp playback restore");
            return Ok(false);
        }

        if let Some(saved_video) = &session.playback_current_video {
            if let Some(idx) = valid_playlist.iter().position(|f| f == saved_video) {
                if idx != 0 {
                    let resumed = valid_playlist.remove(idx);
                    valid_playlist.insert(0, resumed);
                    info!("Reordered player playlist for resume: {}", saved_video);
                }
            }
        }

        info!(
            "Restoring temp playback: {} valid files from position {}",
            valid_playlist.len(),
            state.position
        );

        c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        c.compositor
            .update_media_source(&c.scenes.media_source, &pending_folder, Some(&valid_playlist))
            .await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        c.compositor.switch_scene(&c.scenes.stream).await?;

        monitor.initialize(&pending_folder);
        monitor.set_current_video(&valid_playlist[0]);
        monitor.set_temp_playback_mode(true);
        self.active = true;

        if let Some(session_id) = self.session_id {
            // Position resets to 0: the playlist was rebuilt from the
            // remaining files.
            c.store.save_temp_playback_state(
                session_id,
                &valid_playlist,
                0,
                &pending_folder.to_string_lossy(),
                0,
            )?;
        }

        if !session.next_playlists.is_empty() {
            let title = crate::title::generate_stream_title(
                &c.settings().stream_title_template,
                &session.next_playlists,
            );
            categories::push_stream_info(&c.platforms, &title, None).await;
            info!("Restored stream title for temp playback: {}", title);
        }

        // Kick the interrupted downloads back off; yt-dlp picks partial
        // .part files up via --continue.
        let pending_names = session.pending_next_playlists();
        if !pending_names.is_empty() {
            info!(
                "Resuming {} pending downloads after temp playback restore",
                pending_names.len()
            );
            let playlists = c.store.playlists_by_names(&pending_names)?;
            if !playlists.is_empty() {
                c.downloads.spawn_batch(
                    playlist_refs(&playlists),
                    &pending_folder,
                    c.ytdlp_options(),
                    BatchKind::Resume,
                    false,
                    true,
                );
            }
        } else {
            info!("All playlists already downloaded (no PENDING status found)");
        }

        Ok(true)
    }

    /// Exit temp playback when the prepared set is fully downloaded.
    ///
    /// Consolidates pending into live with the standard folder switch and
    /// returns a deferred seek restoring the viewer's position.
    pub async fn exit(&mut self, monitor: &mut PlaybackMonitor) -> Result<Option<PendingSeek>> {
        info!("===== TEMP PLAYBACK EXIT =====");
        let c = self.components.clone();

        // Capture the cursor before any scene change resets the player.
        let saved_cursor_ms = match c.compositor.media_status(&c.scenes.media_source).await {
            Ok(status) => status.cursor_ms,
            Err(e) => {
                debug!("Could not capture playback position before temp exit: {}", e);
                None
            }
        };
        let saved_video = c
            .store
            .current_session()?
            .and_then(|s| s.playback_current_video);
        if let (Some(cursor), Some(video)) = (saved_cursor_ms, saved_video.as_deref()) {
            info!(
                "Captured playback position for resume: {} at {}ms ({:.1}s)",
                video,
                cursor,
                cursor as f64 / 1000.0
            );
        }

        c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let pending_folder = c.pending_folder();
        let live_folder = c.live_folder();
        osrutils::folders::switch_content_folders(&live_folder, &pending_folder)?;

        // Prefix ordering follows the prepared set, not the original
        // session selection.
        let session = c.store.current_session()?;
        let mut next_playlist_names = session
            .as_ref()
            .map(|s| s.next_playlists.clone())
            .unwrap_or_default();
        if !next_playlist_names.is_empty() {
            osrutils::folders::rename_with_playlist_prefix(&live_folder, &next_playlist_names)?;
            next_playlist_names = filter_consumed_playlists(&live_folder, &next_playlist_names);
        }

        if !next_playlist_names.is_empty() {
            let title = crate::title::generate_stream_title(
                &c.settings().stream_title_template,
                &next_playlist_names,
            );
            categories::push_stream_info(&c.platforms, &title, None).await;
            if let Some(session) = &session {
                c.store.update_session_stream_title(session.id, &title)?;
                // Resync playlists_selected so later title regeneration
                // reflects what is actually playing.
                let playlists = c.store.playlists_by_names(&next_playlist_names)?;
                if !playlists.is_empty() {
                    let ids: Vec<i64> = playlists.iter().map(|p| p.id).collect();
                    c.store.update_session_playlists_selected(session.id, &ids)?;
                }
            }
            info!("Updated stream title after temp playback exit: {}", title);
        }

        // Reorder so the resumed video is first; the deferred seek only
        // fires when the player reports that exact file.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let all_files = osrutils::video_files_sorted(&live_folder);
        let resume_playlist = saved_video.as_deref().and_then(|video| {
            let resume_file = all_files
                .iter()
                .find(|f| osrutils::strip_ordering_prefix(f) == video)?;
            if resume_file == &all_files[0] {
                return None;
            }
            let mut reordered = vec![resume_file.clone()];
            reordered.extend(all_files.iter().filter(|f| *f != resume_file).cloned());
            info!("Reordered player playlist to resume from: {}", resume_file);
            Some(reordered)
        });

        c.compositor
            .update_media_source(
                &c.scenes.media_source,
                &live_folder,
                resume_playlist.as_deref(),
            )
            .await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        c.compositor.switch_scene(&c.scenes.stream).await?;

        self.active = false;
        if let Some(session_id) = self.session_id {
            c.store.clear_temp_playback_state(session_id)?;
        }

        monitor.initialize(&live_folder);
        if let Some(resume_playlist) = &resume_playlist {
            monitor.set_current_video(&resume_playlist[0]);
        }

        let pending_seek = match (saved_cursor_ms, saved_video) {
            (Some(cursor_ms), Some(video)) if cursor_ms > 0 => {
                info!(
                    "Pending seek after temp playback exit: {} at {}ms ({:.1}s)",
                    video,
                    cursor_ms,
                    cursor_ms as f64 / 1000.0
                );
                Some(PendingSeek { cursor_ms, video })
            }
            _ => None,
        };

        // Start preparing the rotation after this one right away.
        info!("Triggering next rotation preparation after temp playback exit");
        self.trigger_next_rotation();

        info!("Temp playback successfully exited, resuming normal rotation cycle");
        if !next_playlist_names.is_empty() {
            c.notifier.temp_playback_exited(&next_playlist_names).await;
        }
        Ok(pending_seek)
    }

    /// Clean up after a normal rotation completed while temp playback was
    /// active (the rotation already consolidated the folders).
    pub fn cleanup_after_rotation(&mut self) -> Result<()> {
        info!("Cleaning up temp playback after normal rotation");
        self.trigger_next_rotation();
        self.active = false;
        if let Some(session_id) = self.session_id {
            self.components.store.clear_temp_playback_state(session_id)?;
        }
        Ok(())
    }

    /// Select and start downloading the next rotation in the background.
    fn trigger_next_rotation(&self) {
        let c = &self.components;
        match self.selector.select_for_rotation(None) {
            Ok(playlists) if !playlists.is_empty() => {
                info!(
                    "Auto-triggered next rotation selection after temp playback: {:?}",
                    playlists.iter().map(|p| &p.name).collect::<Vec<_>>()
                );
                c.downloads.spawn_batch(
                    playlist_refs(&playlists),
                    &c.pending_folder(),
                    c.ytdlp_options(),
                    BatchKind::NextRotation,
                    true,
                    true,
                );
            }
            Ok(_) => warn!("Failed to auto-select next rotation after temp playback"),
            Err(e) => error!("Error triggering next rotation after temp playback exit: {}", e),
        }
    }

    /// Push a title (and best-effort category) reflecting the prepared set.
    async fn push_title_for_next_playlists(&self, pending_folder: &Path) {
        let c = &self.components;
        let Ok(Some(session)) = c.store.current_session() else {
            return;
        };
        if session.next_playlists.is_empty() {
            return;
        }

        let title = crate::title::generate_stream_title(
            &c.settings().stream_title_template,
            &session.next_playlists,
        );

        // Category from the first ready file when it is registered, else
        // from the first prepared playlist's config entry.
        let first_file = osrutils::video_files_sorted(pending_folder).into_iter().next();
        let cats = first_file
            .and_then(|f| categories::resolve_category_for_video(&f, &c.store, &c.config))
            .or_else(|| {
                session
                    .next_playlists
                    .first()
                    .and_then(|name| c.config.playlist_by_name(name))
                    .map(|entry| categories::resolve_playlist_categories(&entry))
            });

        categories::push_stream_info(&c.platforms, &title, cats.as_ref()).await;
        info!(
            "Updated stream title for temp playback: {} (category {:?})",
            title, cats
        );
    }
}

/// Keep only playlists that still have prefixed files in the live folder.
///
/// Temp playback deletes videos after playing, so a playlist fully
/// consumed before the exit has no files left and must drop out of the
/// title.
fn filter_consumed_playlists(live_folder: &Path, playlist_order: &[String]) -> Vec<String> {
    let mut found_prefixes: Vec<String> = Vec::new();
    for file in osrutils::video_files_sorted(live_folder) {
        if let Some(prefix) = osrutils::ordering_prefix_of(&file) {
            if !found_prefixes.iter().any(|p| p == prefix) {
                found_prefixes.push(prefix.to_string());
            }
        }
    }

    let active: Vec<String> = playlist_order
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            let prefix = format!("{:02}", idx + 1);
            found_prefixes.iter().any(|p| *p == prefix)
        })
        .map(|(_, name)| name.clone())
        .collect();

    if active.len() != playlist_order.len() {
        let removed: Vec<&String> =
            playlist_order.iter().filter(|name| !active.contains(name)).collect();
        info!(
            "Filtered consumed playlists from title: removed {:?}, keeping {:?}",
            removed, active
        );
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_consumed_playlists() {
        let dir = tempfile::tempdir().unwrap();
        // Playlist 1 (X) still has a file; playlist 2 (Y) was consumed.
        std::fs::write(dir.path().join("01_X_3_clip.webm"), b"x").unwrap();

        let order = vec!["X".to_string(), "Y".to_string()];
        let active = filter_consumed_playlists(dir.path(), &order);
        assert_eq!(active, vec!["X".to_string()]);
    }

    #[test]
    fn test_filter_keeps_everything_when_all_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01_X_1_a.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("02_Y_1_b.webm"), b"x").unwrap();

        let order = vec!["X".to_string(), "Y".to_string()];
        assert_eq!(filter_consumed_playlists(dir.path(), &order), order);
    }
}
