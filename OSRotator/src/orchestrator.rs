//! The top-level control loop.
//!
//! One cooperative tick per second: drain compositor events, apply the
//! downloader's cross-thread hand-offs, keep the connection alive, poll
//! streamer liveness, drive fallback/temp-playback/rotation transitions,
//! fulfil deferred seeks and persist the playback cursor for crash
//! recovery. The tick body is the single catch-and-continue point — every
//! error below it is logged and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use osrconfig::env::EnvSettings;
use osrdownload::{BatchKind, BatchOutcome};
use osrobs::{Compositor, FreezeAction, FreezeMonitor, MediaState, ObsManager};
use osrplatforms::live::{poll_any_live, KickLiveChecker, TwitchLiveChecker};
use osrplayback::{PlaybackMonitor, TransitionReport};
use osrrotation::fallback::FallbackController;
use osrrotation::manager::RotationManager;
use osrrotation::override_handler::OverrideHandler;
use osrrotation::prepared::PreparedRotationManager;
use osrrotation::selector::Selector;
use osrrotation::temp_playback::{PendingSeek, TempPlaybackHandler};
use osrrotation::{categories, playlist_refs, Components};
use osrstore::PlaylistSync;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::DashboardCommand;
use crate::dashboard::SharedState;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Throttle for category-follows-video updates.
const CATEGORY_UPDATE_MIN_INTERVAL: Duration = Duration::from_secs(3);

/// Upstream stream status as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamStatus {
    Unknown,
    Live,
    Offline,
}

pub struct Orchestrator {
    pub components: Arc<Components>,
    env: EnvSettings,
    obs: Arc<ObsManager>,
    monitor: PlaybackMonitor,
    rotation: RotationManager,
    temp_playback: TempPlaybackHandler,
    fallback: FallbackController,
    prepared: PreparedRotationManager,
    override_handler: OverrideHandler,
    selector: Selector,
    freeze: FreezeMonitor,
    twitch_live: Option<TwitchLiveChecker>,
    kick_live: Option<KickLiveChecker>,
    shutdown: CancellationToken,
    command_rx: mpsc::UnboundedReceiver<DashboardCommand>,
    dashboard_state: SharedState,

    // Tick state
    current_session_id: Option<i64>,
    last_stream_status: StreamStatus,
    manual_pause: bool,
    pending_seek: Option<PendingSeek>,
    saved_pause_cursor: Option<PendingSeek>,
    last_live_check: Option<Instant>,
    last_category_update: Option<Instant>,
    downloads_triggered_this_rotation: bool,
    rotation_postpone_logged: bool,
    executing_prepared: Option<String>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        components: Arc<Components>,
        env: EnvSettings,
        obs: Arc<ObsManager>,
        monitor: PlaybackMonitor,
        twitch_live: Option<TwitchLiveChecker>,
        kick_live: Option<KickLiveChecker>,
        shutdown: CancellationToken,
        command_rx: mpsc::UnboundedReceiver<DashboardCommand>,
        dashboard_state: SharedState,
    ) -> Self {
        let rotation = RotationManager::new(components.clone());
        let temp_playback = TempPlaybackHandler::new(components.clone());
        let fallback = FallbackController::new(components.clone());
        let prepared = PreparedRotationManager::new(components.clone());
        let override_handler = OverrideHandler::new(components.clone());
        let selector = Selector::new(components.store.clone(), components.config.clone());
        let freeze = FreezeMonitor::new(env.obs_exe_path.clone());

        Self {
            components,
            env,
            obs,
            monitor,
            rotation,
            temp_playback,
            fallback,
            prepared,
            override_handler,
            selector,
            freeze,
            twitch_live,
            kick_live,
            shutdown,
            command_rx,
            dashboard_state,
            current_session_id: None,
            last_stream_status: StreamStatus::Unknown,
            manual_pause: false,
            pending_seek: None,
            saved_pause_cursor: None,
            last_live_check: None,
            last_category_update: None,
            downloads_triggered_this_rotation: false,
            rotation_postpone_logged: false,
            executing_prepared: None,
        }
    }

    fn streamer_is_live(&self) -> bool {
        self.last_stream_status == StreamStatus::Live
    }

    /// Bootstrap playback: resume an interrupted session or start fresh.
    pub async fn startup(&mut self) -> anyhow::Result<()> {
        let c = self.components.clone();

        self.sync_config_playlists();
        self.fallback.startup_warning();
        self.prepared.reset_stale_executing();

        let session = c.store.current_session()?;
        match session {
            None => {
                info!("No active session, starting initial rotation");
                self.start_fresh_rotation(None).await;
            }
            Some(session) => {
                self.current_session_id = Some(session.id);
                self.temp_playback.set_session_id(Some(session.id));

                let live_folder = c.live_folder();
                let temp_state = c.store.temp_playback_state(session.id)?;

                if let Some(state) = temp_state {
                    info!("Detected interrupted temp playback session, attempting recovery...");
                    match self
                        .temp_playback
                        .restore(&mut self.monitor, &session, &state)
                        .await
                    {
                        Ok(true) => {
                            info!("Successfully restored temp playback state");
                            // The session cursor is written every second and
                            // is the authoritative resume point; the temp
                            // row's cursor is only set at activation.
                            if session.playback_cursor_ms > 0 {
                                if let Some(video) = session.playback_current_video.clone() {
                                    self.pending_seek = Some(PendingSeek {
                                        cursor_ms: session.playback_cursor_ms,
                                        video,
                                    });
                                }
                            }
                            // Temp playback owns the pending folder; don't
                            // start new downloads into it.
                            self.downloads_triggered_this_rotation = true;
                        }
                        Ok(false) | Err(_) => {
                            warn!("Failed to restore temp playback, continuing with normal session resume");
                            c.store.clear_temp_playback_state(session.id)?;
                            self.pending_seek = self
                                .rotation
                                .resume_normal_session(&mut self.monitor, &session)
                                .await?;
                        }
                    }
                } else if !osrutils::has_video_files(&live_folder) {
                    warn!("Video folder is empty or missing: {}", live_folder.display());
                    info!("Starting new rotation since videos are missing");
                    c.store.end_session(session.id)?;
                    self.start_fresh_rotation(None).await;
                } else {
                    self.pending_seek = self
                        .rotation
                        .resume_normal_session(&mut self.monitor, &session)
                        .await?;
                }
            }
        }

        self.components.notifier.automation_started().await;
        Ok(())
    }

    /// The main loop. Runs until the shutdown token fires.
    pub async fn run(mut self) {
        info!("Starting 24/7 rotation controller");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick().await {
                error!("Error in main loop: {}", e);
                self.components
                    .notifier
                    .automation_error(&format!("Unexpected error: {}", e))
                    .await;
            }
        }

        self.shutdown_cleanup().await;
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        let c = self.components.clone();

        // 1. Transitions from the compositor event queue.
        let report = self.monitor.check(c.compositor.as_ref()).await;
        self.handle_transition_report(&report).await;

        // 2. Cross-thread DB queues and batch outcomes.
        c.drain_download_queues(self.current_session_id);
        self.process_download_outcomes().await;

        // 3. Reconnect with backoff when the socket dropped.
        if !c.compositor.is_connected() {
            warn!("Compositor disconnected — entering reconnect backoff");
            if self.obs.reconnect_with_backoff(&self.shutdown).await {
                self.monitor.resume();
            } else {
                return Ok(()); // shutdown requested mid-reconnect
            }
        }

        // 4. Freeze detection (polls internally every 20 s).
        if let Some(action) = self.freeze.check(c.compositor.as_ref()).await {
            self.handle_freeze(action).await;
        }

        // 5. Streamer liveness pause/resume.
        self.handle_live_check().await?;

        // 6. Fallback periodic retry.
        self.handle_fallback_retry();

        // 7. Temp playback grew new files; reload the media source.
        if self.monitor.needs_vlc_refresh() {
            self.handle_vlc_refresh().await;
        }

        // 8. Deferred seek once the player confirms the right file.
        self.handle_deferred_seek().await;

        // 9. Persist the cursor for crash recovery.
        self.save_playback_position().await;

        // 10. Manual override (atomic read-and-clear).
        if c.config.has_config_changed() {
            info!("Config file changed, syncing...");
            self.sync_config_playlists();
        }
        if let Some(selected) = self.override_handler.check_and_consume() {
            self.handle_override(selected).await;
        }

        // 11. End-of-rotation handling. While fallback is active the
        // 5-minute retry owns recovery; rotating every tick would hammer
        // the downloader.
        if self.temp_playback.is_active() {
            self.check_temp_playback_exit().await?;
        } else if self.monitor.all_content_consumed() && !self.fallback.is_active() {
            self.handle_all_consumed().await;
        }

        // 12. Scheduled prepared rotations.
        if let Some(slug) = self.prepared.check_scheduled(chrono::Utc::now()) {
            info!("Scheduled prepared rotation due: {}", slug);
            self.execute_prepared_rotation(&slug).await;
        }

        // 13. Pre-stage the next rotation in the background.
        self.maybe_start_background_download();

        // 14. Dashboard: commands in, state snapshot out.
        while let Ok(command) = self.command_rx.try_recv() {
            self.handle_command(command).await;
        }
        self.publish_dashboard_state();

        Ok(())
    }

    // ── Transition handling ──────────────────────────────────────────

    async fn handle_transition_report(&mut self, report: &TransitionReport) {
        let c = &self.components;
        if !report.transition {
            return;
        }

        if let Some(previous) = &report.previous_video {
            if let Err(e) = c.store.log_playback(previous, self.current_session_id) {
                warn!("Failed to log playback for {}: {}", previous, e);
            }
        }

        let Some(current) = &report.current_video else {
            return;
        };

        if c.settings().notify_video_transitions {
            c.notifier.video_transition(current, None).await;
        }

        // Category follows the video now playing, throttled so rapid
        // skips don't spam the platform APIs.
        let throttled = self
            .last_category_update
            .map(|at| at.elapsed() < CATEGORY_UPDATE_MIN_INTERVAL)
            .unwrap_or(false);
        if throttled {
            debug!("Skipping category update for '{}' - throttled", current);
            return;
        }

        let Some(cats) = categories::resolve_category_for_video(current, &c.store, &c.config)
        else {
            return;
        };
        // Some platforms require the title on category-only updates; send
        // the session title along so it never regresses.
        let title = match c.store.current_session() {
            Ok(Some(session)) => session.stream_title.unwrap_or_default(),
            _ => String::new(),
        };
        categories::push_stream_info(&c.platforms, &title, Some(&cats)).await;
        self.last_category_update = Some(Instant::now());
        info!("Updated category to {:?} (from video: {})", cats, current);
    }

    // ── Download outcome routing ─────────────────────────────────────

    async fn process_download_outcomes(&mut self) {
        let outcomes: Vec<BatchOutcome> = self.components.downloads.outcomes().try_iter().collect();
        for outcome in outcomes {
            if let BatchKind::Prepared(slug) = &outcome.kind {
                self.prepared.finish_download(slug, outcome.success);
                continue;
            }

            if outcome.success {
                self.fallback.record_download_success();
                if self.fallback.is_active() {
                    if let Err(e) = self.fallback.deactivate(&mut self.monitor).await {
                        error!("Failed to exit fallback mode: {}", e);
                    }
                }
                if outcome.kind == BatchKind::NextRotation || outcome.kind == BatchKind::Resume {
                    self.components
                        .notifier
                        .next_rotation_ready(&outcome.playlist_names())
                        .await;
                }
            } else {
                // Blocking rotation batches already notified at the call
                // site; background ones report here.
                if outcome.kind != BatchKind::Rotation {
                    self.components.notifier.background_download_warning().await;
                }
                // Every exhausted playlist counts against the threshold.
                let mut threshold_hit = false;
                for (_, ok) in &outcome.playlist_results {
                    if !ok {
                        threshold_hit |= self.fallback.record_download_failure();
                    }
                }
                if threshold_hit && !self.fallback.is_active() {
                    match self.fallback.activate(&mut self.monitor).await {
                        Ok(tier) => info!("Fallback engaged at tier {:?}", tier),
                        Err(e) => error!("Failed to activate fallback: {}", e),
                    }
                }
            }
        }
    }

    // ── Freeze recovery ──────────────────────────────────────────────

    async fn handle_freeze(&mut self, action: FreezeAction) {
        let c = self.components.clone();
        match action {
            FreezeAction::FrozenFinal => {
                c.notifier
                    .automation_error(
                        "Compositor frozen again after recovery — manual intervention required",
                    )
                    .await;
            }
            FreezeAction::Frozen => {
                warn!("Compositor freeze detected — starting recovery");
                self.monitor.suspend();
                self.freeze.capture_stream_state(c.compositor.as_ref()).await;

                let mut success = false;
                if self.freeze.kill_compositor() {
                    match self.freeze.launch_compositor().await {
                        Ok(()) => {
                            // Give the fresh process a few tries to accept us.
                            for attempt in 1..=5u32 {
                                match self.obs.connect().await {
                                    Ok(()) => {
                                        success = true;
                                        break;
                                    }
                                    Err(e) => {
                                        debug!("Post-recovery connect attempt {} failed: {}", attempt, e);
                                        tokio::time::sleep(Duration::from_secs(3)).await;
                                    }
                                }
                            }
                            if success {
                                if let Err(e) =
                                    self.freeze.resume_streaming(c.compositor.as_ref()).await
                                {
                                    error!("Failed to resume streaming after recovery: {}", e);
                                }
                            }
                        }
                        Err(e) => error!("{}", e),
                    }
                }

                self.freeze.mark_recovery_attempted(success);
                self.monitor.resume();
                if success {
                    info!("Compositor freeze recovery completed");
                    c.notifier
                        .automation_error("Compositor froze and was automatically restarted")
                        .await;
                } else {
                    error!("Compositor freeze recovery failed");
                    c.notifier
                        .automation_error("Compositor freeze recovery FAILED — stream is down")
                        .await;
                }
            }
        }
    }

    // ── Streamer liveness ────────────────────────────────────────────

    async fn handle_live_check(&mut self) -> anyhow::Result<()> {
        let c = self.components.clone();
        let settings = c.settings();
        if settings.ignore_streamer {
            return Ok(());
        }
        if self.twitch_live.is_none() && self.kick_live.is_none() {
            return Ok(());
        }

        let interval = Duration::from_secs(settings.live_check_interval_seconds.max(1));
        if let Some(last) = self.last_live_check {
            if last.elapsed() < interval {
                return Ok(());
            }
        }
        self.last_live_check = Some(Instant::now());

        let twitch = self
            .twitch_live
            .as_ref()
            .filter(|_| !self.env.target_twitch_streamer.is_empty())
            .map(|checker| (checker, self.env.target_twitch_streamer.as_str()));
        let kick = match (&self.kick_live, &self.env.target_kick_streamer) {
            (Some(checker), Some(slug)) => Some((checker, slug.as_str())),
            _ => None,
        };
        let is_live = poll_any_live(twitch, kick).await;

        if is_live && self.last_stream_status != StreamStatus::Live {
            info!("Upstream streamer is LIVE — pausing 24/7 stream");

            // Save the cursor so the resume lands mid-video.
            if let Ok(status) = c.compositor.media_status(&c.scenes.media_source).await {
                if let (Some(cursor), Some(video)) =
                    (status.cursor_ms, self.monitor.current_video_original_name())
                {
                    if cursor > 0 {
                        self.saved_pause_cursor = Some(PendingSeek { cursor_ms: cursor, video });
                    }
                }
            }
            if let Some(session_id) = self.current_session_id {
                let _ = c.store.save_playback_position(
                    session_id,
                    self.saved_pause_cursor.as_ref().map(|s| s.cursor_ms).unwrap_or(0),
                    self.monitor.current_video_original_name().as_deref(),
                );
            }

            if let Err(e) = c.compositor.switch_scene(&c.scenes.pause).await {
                error!("Failed to switch to pause scene: {}", e);
            }
            self.manual_pause = false;
            self.last_stream_status = StreamStatus::Live;
            c.notifier.streamer_live(&self.env.target_twitch_streamer).await;
        } else if !is_live && self.last_stream_status != StreamStatus::Offline {
            if self.last_stream_status == StreamStatus::Live {
                info!("Upstream streamer is OFFLINE — resuming 24/7 stream");
                c.notifier.streamer_offline(&self.env.target_twitch_streamer).await;
            }
            if !self.manual_pause {
                if let Err(e) = c.compositor.switch_scene(&c.scenes.stream).await {
                    error!("Failed to switch to stream scene: {}", e);
                }
            }
            // Restore the cursor saved when the pause began.
            if let Some(seek) = self.saved_pause_cursor.take() {
                self.pending_seek = Some(seek);
            }
            self.last_stream_status = StreamStatus::Offline;
            self.rotation_postpone_logged = false;
        }

        Ok(())
    }

    // ── Fallback retry ───────────────────────────────────────────────

    fn handle_fallback_retry(&mut self) {
        if !self.fallback.should_retry_download() {
            return;
        }
        self.fallback.mark_retry_attempted();

        let c = &self.components;
        if c.downloads.is_in_progress() {
            return;
        }
        match self.selector.select_for_rotation(None) {
            Ok(playlists) if !playlists.is_empty() => {
                info!("Fallback retry: attempting a fresh download");
                c.downloads.spawn_batch(
                    playlist_refs(&playlists),
                    &c.pending_folder(),
                    c.ytdlp_options(),
                    BatchKind::FallbackRetry,
                    true,
                    true,
                );
            }
            Ok(_) => debug!("Fallback retry skipped: no eligible playlists"),
            Err(e) => error!("Fallback retry selection failed: {}", e),
        }
    }

    // ── Temp playback refresh / exit ─────────────────────────────────

    async fn handle_vlc_refresh(&mut self) {
        let c = &self.components;
        let Some(folder) = self.monitor.video_folder().map(|f| f.to_path_buf()) else {
            return;
        };
        match c
            .compositor
            .update_media_source(&c.scenes.media_source, &folder, None)
            .await
        {
            Ok(files) => {
                info!("Reloaded media source with {} file(s) from {}", files.len(), folder.display());
                self.monitor.absorb_spurious_started();
                self.monitor.clear_vlc_refresh_flag();
                if let Some(first) = files.first() {
                    self.monitor.set_current_video(first);
                }
            }
            Err(e) => error!("Failed to reload media source: {}", e),
        }
    }

    async fn check_temp_playback_exit(&mut self) -> anyhow::Result<()> {
        let c = &self.components;
        let Some(session) = c.store.current_session()? else {
            return Ok(());
        };
        if session.next_playlists.is_empty() || !session.next_rotation_ready() {
            return Ok(());
        }

        info!(
            "All prepared playlists completed: {:?} - exiting temp playback",
            session.next_playlists
        );
        match self.temp_playback.exit(&mut self.monitor).await {
            Ok(seek) => {
                self.pending_seek = seek;
                self.downloads_triggered_this_rotation = true;
            }
            Err(e) => error!("Temp playback exit failed: {}", e),
        }
        Ok(())
    }

    // ── Deferred seek & cursor persistence ───────────────────────────

    async fn handle_deferred_seek(&mut self) {
        let Some(seek) = &self.pending_seek else {
            return;
        };
        let c = &self.components;

        let Ok(status) = c.compositor.media_status(&c.scenes.media_source).await else {
            return;
        };
        if status.state != MediaState::Playing {
            return;
        }
        if self.monitor.current_video_original_name().as_deref() != Some(seek.video.as_str()) {
            return;
        }

        match c.compositor.seek_media(&c.scenes.media_source, seek.cursor_ms).await {
            Ok(()) => {
                info!(
                    "Deferred seek fulfilled: {} at {}ms",
                    seek.video, seek.cursor_ms
                );
                self.pending_seek = None;
            }
            Err(e) => warn!("Deferred seek failed (will retry): {}", e),
        }
    }

    async fn save_playback_position(&mut self) {
        let Some(session_id) = self.current_session_id else {
            return;
        };
        let c = &self.components;
        if !c.compositor.is_connected() {
            return;
        }
        let Ok(status) = c.compositor.media_status(&c.scenes.media_source).await else {
            return;
        };
        let cursor = status.cursor_ms.unwrap_or(0);
        if let Err(e) = c.store.save_playback_position(
            session_id,
            cursor,
            self.monitor.current_video_original_name().as_deref(),
        ) {
            debug!("Failed to save playback position: {}", e);
        }
    }

    // ── Override & rotation ──────────────────────────────────────────

    fn sync_config_playlists(&self) {
        let c = &self.components;
        let entries: Vec<PlaylistSync> = c
            .config
            .playlists()
            .into_iter()
            .map(|p| PlaylistSync {
                name: p.name,
                url: p.url,
                enabled: p.enabled,
                priority: p.priority,
            })
            .collect();
        if let Err(e) = c.store.sync_playlists_from_config(&entries) {
            error!("Failed to sync playlists from config: {}", e);
        }
    }

    async fn handle_override(&mut self, selected: Vec<String>) {
        let c = self.components.clone();
        self.sync_config_playlists();

        // Park any prepared rotation so the override's download doesn't
        // mingle with it.
        match self.override_handler.backup_prepared_rotation() {
            Ok(true) => info!("Prepared rotation parked for override"),
            Ok(false) => {}
            Err(e) => error!("Failed to back up prepared rotation: {}", e),
        }

        let cursor = match c.compositor.media_status(&c.scenes.media_source).await {
            Ok(status) => status.cursor_ms.unwrap_or(0),
            Err(_) => 0,
        };
        if let Err(e) = self
            .override_handler
            .suspend_current_session(cursor, self.monitor.current_video_original_name().as_deref())
        {
            warn!("Failed to record session suspension: {}", e);
        }

        if let Some(session_id) = self.current_session_id.take() {
            if let Err(e) = c.store.end_session(session_id) {
                error!("Failed to end session for override: {}", e);
            }
        }

        self.start_fresh_rotation(Some(selected)).await;
    }

    async fn handle_all_consumed(&mut self) {
        let c = self.components.clone();

        // A prepared rotation whose folder emptied out returns to the
        // normal cycle.
        self.finish_executing_prepared();

        // Still-pending prepared content: stream straight from pending.
        let has_pending_prep = match c.store.current_session() {
            Ok(Some(session)) => {
                !session.next_playlists.is_empty() && !session.next_rotation_ready()
            }
            _ => false,
        };
        if has_pending_prep {
            match self.temp_playback.activate(&mut self.monitor).await {
                Ok(true) => return,
                Ok(false) => {
                    debug!("Temp playback not ready yet; retrying next tick");
                    return;
                }
                Err(e) => {
                    error!("Temp playback activation failed: {}", e);
                    // Fall through to a normal rotation attempt.
                }
            }
        }

        if self.streamer_is_live() {
            if !self.rotation_postpone_logged {
                info!("Stream is live, postponing rotation until stream goes offline");
                self.rotation_postpone_logged = true;
            }
            return;
        }

        let streamer_is_live = self.streamer_is_live();
        match self
            .rotation
            .handle_normal_rotation(&mut self.monitor, streamer_is_live)
            .await
        {
            Ok(session_id) => {
                self.current_session_id = Some(session_id);
                self.temp_playback.set_session_id(Some(session_id));
                self.downloads_triggered_this_rotation = false;
                // An override may have parked a pending rotation earlier.
                let _ = self.override_handler.restore_prepared_rotation();
            }
            Err(e) => {
                error!("Rotation failed: {}", e);
                c.notifier.rotation_error(&e.to_string()).await;
                let threshold = self.fallback.record_download_failure();
                if threshold && !self.fallback.is_active() {
                    if let Err(e) = self.fallback.activate(&mut self.monitor).await {
                        error!("Failed to activate fallback: {}", e);
                    }
                }
            }
        }
    }

    /// Close out a replaying prepared rotation, restoring the monitor's
    /// delete behaviour.
    ///
    /// Prepared playback loops with the player (no-delete mode), so it
    /// ends when something else takes over the stream, not on its own.
    fn finish_executing_prepared(&mut self) {
        if let Some(slug) = self.executing_prepared.take() {
            info!("Prepared rotation {} finished", slug);
            if let Err(e) = self.prepared.complete_execution(&slug) {
                warn!("Failed to mark prepared rotation completed: {}", e);
            }
            self.monitor.set_delete_on_transition(true);
        }
    }

    async fn start_fresh_rotation(&mut self, manual: Option<Vec<String>>) {
        self.finish_executing_prepared();
        match self.rotation.start_session(manual.as_deref()).await {
            Ok(session_id) => {
                self.current_session_id = Some(session_id);
                self.temp_playback.set_session_id(Some(session_id));
                self.downloads_triggered_this_rotation = false;
                let streamer_is_live = self.streamer_is_live();
                if let Err(e) = self
                    .rotation
                    .execute_content_switch(&mut self.monitor, streamer_is_live)
                    .await
                {
                    error!("Content switch failed: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to start rotation session: {}", e);
                self.components.notifier.rotation_error(&e.to_string()).await;
            }
        }
    }

    async fn execute_prepared_rotation(&mut self, slug: &str) {
        let c = self.components.clone();
        if self.temp_playback.is_active() {
            warn!("Refusing prepared rotation while temp playback is active");
            return;
        }
        // Executing another prepared rotation supersedes a replaying one.
        self.finish_executing_prepared();
        let meta = match self.prepared.begin_execution(slug) {
            Ok(meta) => meta,
            Err(e) => {
                error!("Cannot execute prepared rotation {}: {}", slug, e);
                return;
            }
        };
        let folder = match self.prepared.resolve_folder(slug) {
            Ok(folder) => folder,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        info!("Executing prepared rotation '{}' ({})", meta.title, slug);
        let switch = async {
            c.compositor.switch_scene(&c.scenes.rotation_screen).await?;
            tokio::time::sleep(Duration::from_millis(1500)).await;
            c.compositor.stop_media_source(&c.scenes.media_source).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            c.compositor
                .update_media_source(&c.scenes.media_source, &folder, None)
                .await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            c.compositor.switch_scene(&c.scenes.stream).await?;
            Ok::<(), osrobs::ObsError>(())
        };
        match switch.await {
            Ok(()) => {
                // Prepared rotations keep their files so they can replay.
                self.monitor.initialize(&folder);
                self.monitor.set_delete_on_transition(false);
                self.executing_prepared = Some(slug.to_string());

                let title = osrrotation::title::truncate_stream_title(
                    &self.rotation.switcher().build_stream_title(&meta.playlists),
                );
                categories::push_stream_info(&c.platforms, &title, None).await;
            }
            Err(e) => {
                error!("Failed to start prepared rotation {}: {}", slug, e);
                let _ = self.prepared.complete_execution(slug);
            }
        }
    }

    fn maybe_start_background_download(&mut self) {
        let c = &self.components;
        if self.downloads_triggered_this_rotation
            || self.current_session_id.is_none()
            || self.temp_playback.is_active()
            || self.fallback.is_active()
            || c.downloads.is_in_progress()
            || c.downloads.has_prepared()
        {
            return;
        }
        // Parked override content takes priority over fresh downloads.
        if osrutils::has_video_files(&c.pending_backup_folder()) {
            return;
        }

        match self.selector.select_for_rotation(None) {
            Ok(playlists) if !playlists.is_empty() => {
                let started = c.downloads.spawn_batch(
                    playlist_refs(&playlists),
                    &c.pending_folder(),
                    c.ytdlp_options(),
                    BatchKind::NextRotation,
                    true,
                    true,
                );
                if started {
                    self.downloads_triggered_this_rotation = true;
                    debug!("Download triggered (pending folder empty)");
                }
            }
            Ok(_) => {}
            Err(e) => error!("Background download selection failed: {}", e),
        }
    }

    // ── Dashboard ────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: DashboardCommand) {
        let c = self.components.clone();
        match command {
            DashboardCommand::SkipVideo => {
                if let Err(e) = c.compositor.next_media(&c.scenes.media_source).await {
                    error!("Skip video failed: {}", e);
                }
            }
            DashboardCommand::TriggerRotation => {
                info!("Dashboard requested rotation");
                if self.temp_playback.is_active() {
                    warn!("Ignoring rotation request during temp playback");
                    return;
                }
                if let Some(session_id) = self.current_session_id.take() {
                    let _ = c.store.end_session(session_id);
                }
                self.start_fresh_rotation(None).await;
            }
            DashboardCommand::PauseStream => {
                self.manual_pause = true;
                if let Err(e) = c.compositor.switch_scene(&c.scenes.pause).await {
                    error!("Pause failed: {}", e);
                }
            }
            DashboardCommand::ResumeStream => {
                self.manual_pause = false;
                if let Err(e) = c.compositor.switch_scene(&c.scenes.stream).await {
                    error!("Resume failed: {}", e);
                }
            }
            DashboardCommand::UpdateSetting { key, value } => {
                if let Err(e) = c.config.update_setting(&key, value) {
                    warn!("Setting update rejected: {}", e);
                }
            }
            DashboardCommand::AddPlaylist { name, url, priority, is_short, category } => {
                let mut playlists = c.config.playlists();
                if playlists.iter().any(|p| p.name.eq_ignore_ascii_case(&name)) {
                    warn!("Playlist '{}' already exists", name);
                    return;
                }
                playlists.push(osrconfig::PlaylistEntry {
                    name,
                    url,
                    enabled: true,
                    priority: priority.unwrap_or(1),
                    twitch_category: None,
                    kick_category: None,
                    category,
                    is_short: is_short.unwrap_or(false),
                });
                if let Err(e) = c.config.replace_playlists(playlists) {
                    error!("Failed to add playlist: {}", e);
                } else {
                    self.sync_config_playlists();
                }
            }
            DashboardCommand::UpdatePlaylist {
                name,
                url,
                priority,
                is_short,
                twitch_category,
                kick_category,
            } => {
                let mut playlists = c.config.playlists();
                let Some(entry) =
                    playlists.iter_mut().find(|p| p.name.eq_ignore_ascii_case(&name))
                else {
                    warn!("Playlist '{}' not found", name);
                    return;
                };
                if let Some(url) = url {
                    entry.url = url;
                }
                if let Some(priority) = priority {
                    entry.priority = priority;
                }
                if let Some(is_short) = is_short {
                    entry.is_short = is_short;
                }
                if twitch_category.is_some() {
                    entry.twitch_category = twitch_category;
                }
                if kick_category.is_some() {
                    entry.kick_category = kick_category;
                }
                if let Err(e) = c.config.replace_playlists(playlists) {
                    error!("Failed to update playlist: {}", e);
                } else {
                    self.sync_config_playlists();
                }
            }
            DashboardCommand::RemovePlaylist { name } => {
                let playlists: Vec<_> = c
                    .config
                    .playlists()
                    .into_iter()
                    .filter(|p| !p.name.eq_ignore_ascii_case(&name))
                    .collect();
                if let Err(e) = c.config.replace_playlists(playlists) {
                    error!("Failed to remove playlist: {}", e);
                }
                let _ = c.store.remove_playlist(&name);
            }
            DashboardCommand::RenamePlaylist { old_name, new_name } => {
                let mut playlists = c.config.playlists();
                if let Some(entry) =
                    playlists.iter_mut().find(|p| p.name.eq_ignore_ascii_case(&old_name))
                {
                    entry.name = new_name.clone();
                    if let Err(e) = c.config.replace_playlists(playlists) {
                        error!("Failed to rename playlist: {}", e);
                        return;
                    }
                    let _ = c.store.rename_playlist(&old_name, &new_name);
                }
            }
            DashboardCommand::TogglePlaylist { name } => {
                let mut playlists = c.config.playlists();
                if let Some(entry) =
                    playlists.iter_mut().find(|p| p.name.eq_ignore_ascii_case(&name))
                {
                    entry.enabled = !entry.enabled;
                    if let Err(e) = c.config.replace_playlists(playlists) {
                        error!("Failed to toggle playlist: {}", e);
                    } else {
                        self.sync_config_playlists();
                    }
                }
            }
            DashboardCommand::CreatePreparedRotation { title, playlists } => {
                if let Err(e) = self.prepared.create(&title, playlists) {
                    error!("Failed to create prepared rotation: {}", e);
                }
            }
            DashboardCommand::DownloadPreparedRotation { slug } => {
                if let Err(e) = self.prepared.start_download(&slug) {
                    error!("Failed to start prepared download: {}", e);
                }
            }
            DashboardCommand::ExecutePreparedRotation { slug } => {
                self.execute_prepared_rotation(&slug).await;
            }
            DashboardCommand::DeletePreparedRotation { slug } => {
                if let Err(e) = self.prepared.delete(&slug) {
                    error!("Failed to delete prepared rotation: {}", e);
                }
            }
            DashboardCommand::SchedulePreparedRotation { slug, scheduled_at } => {
                match chrono::DateTime::parse_from_rfc3339(&scheduled_at) {
                    Ok(at) => {
                        if let Err(e) = self.prepared.schedule(&slug, at.with_timezone(&chrono::Utc))
                        {
                            error!("Failed to schedule prepared rotation: {}", e);
                        }
                    }
                    Err(e) => warn!("Bad schedule timestamp '{}': {}", scheduled_at, e),
                }
            }
            DashboardCommand::CancelPreparedSchedule { slug } => {
                if let Err(e) = self.prepared.cancel_schedule(&slug) {
                    error!("Failed to cancel schedule: {}", e);
                }
            }
            DashboardCommand::CancelPreparedDownload { slug } => {
                if let Err(e) = self.prepared.cancel_download(&slug) {
                    error!("Failed to cancel prepared download: {}", e);
                }
            }
            DashboardCommand::ClearCompletedPrepared => {
                let removed = self.prepared.clear_completed();
                info!("Cleared {} completed prepared rotation(s)", removed);
            }
            DashboardCommand::ReloadEnv => {
                self.env = EnvSettings::load();
                info!("Environment reloaded");
            }
            DashboardCommand::UpdateEnv { key, value } => {
                if let Err(e) =
                    osrconfig::env::update_env_file(std::path::Path::new(".env"), &key, &value)
                {
                    warn!("Env update rejected: {}", e);
                }
            }
        }
    }

    fn publish_dashboard_state(&self) {
        let c = &self.components;
        let session = c.store.current_session().ok().flatten();

        let mut state = serde_json::json!({
            "connected_to_compositor": c.compositor.is_connected(),
            "stream_status": match self.last_stream_status {
                StreamStatus::Live => "live",
                StreamStatus::Offline => "offline",
                StreamStatus::Unknown => "unknown",
            },
            "manual_pause": self.manual_pause,
            "current_video": self.monitor.current_video_original_name(),
            "all_content_consumed": self.monitor.all_content_consumed(),
            "temp_playback_active": self.temp_playback.is_active(),
            "fallback_active": self.fallback.is_active(),
            "download_in_progress": c.downloads.is_in_progress(),
            "session": session.as_ref().map(|s| serde_json::json!({
                "id": s.id,
                "stream_title": s.stream_title,
                "started_at": s.started_at,
                "playback_cursor_ms": s.playback_cursor_ms,
                "next_playlists": s.next_playlists,
                "next_playlists_status": s.next_playlists_status,
            })),
        });
        if let Some(obj) = state.as_object_mut() {
            if let Some(prepared) = self.prepared.dashboard_state().as_object() {
                for (key, value) in prepared {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }

        *self.dashboard_state.write().unwrap() = state;
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    async fn shutdown_cleanup(&mut self) {
        info!("Shutdown event detected, performing cleanup...");
        let c = &self.components;

        if let Some(session_id) = self.current_session_id {
            if let Err(e) = c.store.end_session(session_id) {
                error!("Failed to end session on shutdown: {}", e);
            }
        }

        c.downloads.shutdown();
        c.downloads.wait_for_idle(Duration::from_secs(5)).await;

        c.notifier.automation_shutdown().await;
        info!("Cleanup complete, exiting...");
    }
}
