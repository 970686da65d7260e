//! Rotation session lifecycle: create, switch, resume.

use std::sync::Arc;

use osrdownload::BatchKind;
use osrplayback::PlaybackMonitor;
use osrstore::RotationSession;
use tracing::{debug, error, info, warn};

use crate::selector::Selector;
use crate::switcher::{ContentSwitchHandler, SwitchMode};
use crate::temp_playback::PendingSeek;
use crate::title::truncate_stream_title;
use crate::{categories, playlist_refs, Components, Result, RotationError};

pub struct RotationManager {
    components: Arc<Components>,
    selector: Selector,
    switcher: ContentSwitchHandler,
}

impl RotationManager {
    pub fn new(components: Arc<Components>) -> Self {
        let selector = Selector::new(components.store.clone(), components.config.clone());
        let switcher = ContentSwitchHandler::new(components.clone());
        Self {
            components,
            selector,
            switcher,
        }
    }

    pub fn switcher(&self) -> &ContentSwitchHandler {
        &self.switcher
    }

    /// Create a new rotation session.
    ///
    /// Pre-staged playlists from a finished background download are
    /// consumed first; otherwise a fresh selection is downloaded into the
    /// pending folder before the session row is inserted.
    pub async fn start_session(&self, manual_playlists: Option<&[String]>) -> Result<i64> {
        let c = &self.components;
        info!("Starting new rotation session...");

        let pending_folder = c.pending_folder();

        let (refs, using_prepared) = match c.downloads.take_prepared() {
            Some(prepared) => {
                info!(
                    "Using prepared playlists: {:?}",
                    prepared.iter().map(|p| &p.name).collect::<Vec<_>>()
                );
                (prepared, true)
            }
            None => {
                let selected = self.selector.select_for_rotation(manual_playlists)?;
                if selected.is_empty() {
                    error!("No playlists selected for rotation");
                    c.notifier.rotation_error("No playlists available").await;
                    return Err(RotationError::NoPlaylists);
                }
                (playlist_refs(&selected), false)
            }
        };

        let names: Vec<String> = refs.iter().map(|p| p.name.clone()).collect();
        let ids: Vec<i64> = refs.iter().map(|p| p.id).collect();

        let mut total_duration_seconds;
        if using_prepared {
            info!("Using pre-downloaded playlists, skipping download step");
            total_duration_seconds = c.store.total_duration_for_playlists(&ids)?;
        } else {
            info!("Downloading {} playlists...", refs.len());
            c.notifier.rotation_started(&names).await;

            let outcome = c
                .downloads
                .run_batch(refs.clone(), &pending_folder, c.ytdlp_options(), BatchKind::Rotation)
                .await?;
            total_duration_seconds = outcome.total_duration_seconds;
            if !outcome.success {
                error!("Failed to download all playlists");
                c.notifier
                    .download_warning("Some playlists failed to download, continuing with available content")
                    .await;
            }
            // Flush the worker's registrations so validation and the
            // later rename/category passes see the new rows.
            c.drain_download_queues(None);
        }

        self.switcher.validate_downloads(&pending_folder)?;

        if total_duration_seconds == 0 {
            let rotation_hours = c.settings().rotation_hours;
            total_duration_seconds = (rotation_hours * 3600) as i64;
            info!(
                "No duration info available, using config rotation_hours: {}h",
                rotation_hours
            );
        }

        let stream_title = self.switcher.build_stream_title(&names);
        info!(
            "Total rotation duration: {}s (~{} minutes)",
            total_duration_seconds,
            total_duration_seconds / 60
        );

        let session_id =
            c.store
                .create_rotation_session(&ids, &stream_title, total_duration_seconds)?;
        info!("Rotation session prepared, ready to switch");
        Ok(session_id)
    }

    /// Execute the content switch for the current session.
    pub async fn execute_content_switch(
        &self,
        monitor: &mut PlaybackMonitor,
        streamer_is_live: bool,
    ) -> Result<()> {
        let c = &self.components;

        // Never switch while temp playback streams from the pending
        // folder: the wipe would pull the files out from under the player.
        if let Some(session) = c.store.current_session()? {
            if session.temp_playback_active {
                error!("Content switch refused while temp playback is active");
                return Err(RotationError::TempPlaybackActive);
            }
        }

        info!("Executing content switch");
        let live_folder = c.live_folder();
        let pending_folder = c.pending_folder();

        self.switcher.prepare_for_switch().await?;
        self.switcher
            .execute_switch(&live_folder, &pending_folder, &SwitchMode::Normal)?;

        let session = c.store.current_session()?.ok_or(RotationError::NoSession)?;
        // Queued registrations must land before the rename pass looks
        // rows up.
        c.drain_download_queues(Some(session.id));

        let order_names: Vec<String> = c
            .store
            .playlists_by_ids(&session.playlists_selected)?
            .iter()
            .map(|p| p.name.clone())
            .collect();
        self.switcher.apply_ordering_prefixes(&live_folder, &order_names);

        self.switcher.finalize_switch(&live_folder, streamer_is_live).await?;
        monitor.initialize(&live_folder);

        if let Err(e) = self.switcher.update_stream_metadata(&session, &live_folder).await {
            warn!("Failed to update stream metadata: {}", e);
        }

        self.switcher.mark_playlists_played(&session)?;
        c.store.clear_playback_position(session.id)?;
        c.notifier.rotation_switched(&order_names).await;

        info!("Content switch completed successfully");
        Ok(())
    }

    /// All content consumed: close the session and roll the next one.
    pub async fn handle_normal_rotation(
        &self,
        monitor: &mut PlaybackMonitor,
        streamer_is_live: bool,
    ) -> Result<i64> {
        let c = &self.components;

        if let Some(session) = c.store.current_session()? {
            // Audit trail of what actually played.
            let names: Vec<String> = c
                .store
                .playlists_by_ids(&session.playlists_selected)?
                .iter()
                .map(|p| p.name.clone())
                .collect();
            if !names.is_empty() {
                c.store.set_current_playlists(session.id, &names)?;
                info!("Recorded current playlists: {:?}", names);
            }
            c.store.end_session(session.id)?;
        }

        let session_id = self.start_session(None).await?;
        self.execute_content_switch(monitor, streamer_is_live).await?;
        Ok(session_id)
    }

    /// Resume a session found at startup (crash recovery, non-temp path).
    ///
    /// Re-syncs the media source with the live folder, revalidates any
    /// prepared set and returns the deferred seek to restore mid-video
    /// position once the player confirms it is playing the right file.
    pub async fn resume_normal_session(
        &self,
        monitor: &mut PlaybackMonitor,
        session: &RotationSession,
    ) -> Result<Option<PendingSeek>> {
        let c = &self.components;
        info!("Resuming session {}", session.id);

        let saved_video = session.playback_current_video.clone();
        let saved_cursor = session.playback_cursor_ms;
        c.notifier
            .session_resumed(
                session.id,
                saved_video.as_deref(),
                (saved_cursor > 0).then(|| saved_cursor as f64 / 1000.0),
            )
            .await;

        self.restore_prepared_playlists(session).await?;

        if let Some(title) = &session.stream_title {
            categories::push_stream_info(&c.platforms, &truncate_stream_title(title), None).await;
        }

        // The media source may hold a stale playlist from before the
        // crash; re-sync it with what the live folder actually contains.
        let live_folder = c.live_folder();
        match c
            .compositor
            .update_media_source(&c.scenes.media_source, &live_folder, None)
            .await
        {
            Ok(_) => info!("Re-synced media source to live folder on resume: {}", live_folder.display()),
            Err(e) => warn!("Failed to re-sync media source on resume: {}", e),
        }
        monitor.initialize(&live_folder);

        let pending_seek = match (saved_video, saved_cursor) {
            (Some(video), cursor) if cursor > 0 => {
                if monitor.current_video_original_name().as_deref() == Some(video.as_str()) {
                    info!(
                        "Pending resume: {} at {}ms ({:.1}s) — waiting for player to start",
                        video,
                        cursor,
                        cursor as f64 / 1000.0
                    );
                    Some(PendingSeek { cursor_ms: cursor, video })
                } else {
                    debug!("Saved video '{}' no longer current, starting from beginning", video);
                    None
                }
            }
            _ => None,
        };
        Ok(pending_seek)
    }

    /// Revalidate the prepared set recorded in a resumed session.
    async fn restore_prepared_playlists(&self, session: &RotationSession) -> Result<()> {
        let c = &self.components;
        if session.next_playlists.is_empty() {
            return Ok(());
        }

        if session.next_rotation_ready() {
            let pending_folder = c.pending_folder();
            if c.store
                .validate_prepared_playlists_exist(session.id, &pending_folder)?
            {
                let playlists = c.store.playlists_by_names(&session.next_playlists)?;
                if !playlists.is_empty() {
                    c.downloads.set_prepared(playlist_refs(&playlists));
                    info!(
                        "Restored prepared playlists from database: {:?}",
                        session.next_playlists
                    );
                }
            } else {
                warn!(
                    "Prepared playlist files missing from pending folder, clearing: {:?}",
                    session.next_playlists
                );
                c.store.set_next_playlists(session.id, &[])?;
            }
            return Ok(());
        }

        // Not fully downloaded: pick the interrupted downloads back up
        // (yt-dlp's --continue resumes partial files).
        info!(
            "Prepared playlists not fully downloaded, auto-resuming downloads now: {:?}",
            session.next_playlists_status
        );
        let pending = session.pending_next_playlists();
        let playlists = c.store.playlists_by_names(&pending)?;
        if playlists.is_empty() {
            warn!("Could not fetch playlist objects for auto-resume: {:?}", pending);
            return Ok(());
        }
        c.downloads.spawn_batch(
            playlist_refs(&playlists),
            &c.pending_folder(),
            c.ytdlp_options(),
            BatchKind::Resume,
            false,
            true,
        );
        info!("Auto-resume background task started");
        Ok(())
    }
}
