use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use osrconfig::{ConfigProvider, PlaylistEntry};
use osrobs::protocol::{MediaState, MediaStatus};
use osrobs::{Compositor, MediaEvent, ObsError};
use osrplayback::PlaybackMonitor;
use osrrotation::fallback::{FallbackController, FallbackTier};
use osrrotation::manager::RotationManager;
use osrrotation::temp_playback::TempPlaybackHandler;
use osrrotation::{playlist_refs, Components, SceneNames};
use osrstore::Store;
use tempfile::TempDir;

/// Recording compositor stub shared by the handler tests.
struct StubCompositor {
    connected: AtomicBool,
    scene: Mutex<String>,
    scene_history: Mutex<Vec<String>>,
    source_updates: Mutex<Vec<Vec<String>>>,
    stops: Mutex<usize>,
    seeks: Mutex<Vec<i64>>,
    media_cursor: Mutex<Option<i64>>,
    alerts_shown: Mutex<Vec<String>>,
    alert_visible: AtomicBool,
}

impl StubCompositor {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            scene: Mutex::new("OSR Stream".to_string()),
            scene_history: Mutex::new(Vec::new()),
            source_updates: Mutex::new(Vec::new()),
            stops: Mutex::new(0),
            seeks: Mutex::new(Vec::new()),
            media_cursor: Mutex::new(Some(0)),
            alerts_shown: Mutex::new(Vec::new()),
            alert_visible: AtomicBool::new(false),
        }
    }

    fn last_update(&self) -> Option<Vec<String>> {
        self.source_updates.lock().unwrap().last().cloned()
    }

    fn set_cursor(&self, cursor_ms: i64) {
        *self.media_cursor.lock().unwrap() = Some(cursor_ms);
    }
}

#[async_trait]
impl Compositor for StubCompositor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn current_scene(&self) -> osrobs::Result<String> {
        Ok(self.scene.lock().unwrap().clone())
    }

    async fn switch_scene(&self, scene: &str) -> osrobs::Result<()> {
        *self.scene.lock().unwrap() = scene.to_string();
        self.scene_history.lock().unwrap().push(scene.to_string());
        Ok(())
    }

    async fn verify_scenes(&self, _required: &[String]) -> osrobs::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn stop_media_source(&self, _source: &str) -> osrobs::Result<()> {
        *self.stops.lock().unwrap() += 1;
        Ok(())
    }

    async fn update_media_source(
        &self,
        _source: &str,
        folder: &Path,
        playlist: Option<&[String]>,
    ) -> osrobs::Result<Vec<String>> {
        let files = match playlist {
            Some(list) => list.to_vec(),
            None => osrutils::video_files_sorted(folder),
        };
        if files.is_empty() {
            return Err(ObsError::EmptyPlaylist);
        }
        self.source_updates.lock().unwrap().push(files.clone());
        Ok(files)
    }

    async fn media_status(&self, _source: &str) -> osrobs::Result<MediaStatus> {
        Ok(MediaStatus {
            state: MediaState::Playing,
            cursor_ms: *self.media_cursor.lock().unwrap(),
            duration_ms: Some(600_000),
        })
    }

    async fn seek_media(&self, _source: &str, cursor_ms: i64) -> osrobs::Result<()> {
        self.seeks.lock().unwrap().push(cursor_ms);
        Ok(())
    }

    async fn play_media(&self, _source: &str) -> osrobs::Result<()> {
        Ok(())
    }

    async fn next_media(&self, _source: &str) -> osrobs::Result<()> {
        Ok(())
    }

    async fn render_total_frames(&self) -> osrobs::Result<u64> {
        Ok(1)
    }

    async fn stream_active(&self) -> osrobs::Result<bool> {
        Ok(true)
    }

    async fn start_stream(&self) -> osrobs::Result<()> {
        Ok(())
    }

    async fn show_alert(&self, _scene: &str, _source: &str, text: &str) -> osrobs::Result<()> {
        self.alerts_shown.lock().unwrap().push(text.to_string());
        self.alert_visible.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn hide_alert(&self, _scene: &str, _source: &str) -> osrobs::Result<()> {
        self.alert_visible.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    _root: TempDir,
    components: Arc<Components>,
    compositor: Arc<StubCompositor>,
    monitor: PlaybackMonitor,
    event_tx: crossbeam_channel::Sender<MediaEvent>,
    live: PathBuf,
    pending: PathBuf,
}

fn scenes() -> SceneNames {
    SceneNames {
        stream: "OSR Stream".to_string(),
        pause: "OSR Pause screen".to_string(),
        rotation_screen: "OSR Rotation screen".to_string(),
        media_source: "OSR Playlist".to_string(),
        alert_source: "OSR Alert".to_string(),
    }
}

fn entry(name: &str) -> PlaylistEntry {
    PlaylistEntry {
        name: name.to_string(),
        url: format!("https://example.com/{}", name),
        enabled: true,
        priority: 1,
        twitch_category: None,
        kick_category: None,
        category: None,
        is_short: false,
    }
}

fn fixture(playlist_names: &[&str]) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let content = root.path().join("content");
    let live = content.join("live");
    let pending = content.join("pending");
    std::fs::create_dir_all(&live).unwrap();
    std::fs::create_dir_all(&pending).unwrap();

    let config = ConfigProvider::new(
        root.path().join("playlists.json"),
        root.path().join("manual_override.json"),
    )
    .unwrap();
    config
        .replace_playlists(playlist_names.iter().map(|n| entry(n)).collect())
        .unwrap();
    config
        .update_setting("stream_title_template", serde_json::json!("24/7 | {GAMES} | !playlist"))
        .unwrap();
    // Point the content folders at the fixture tree (not dashboard-writable
    // keys, so patch the document directly).
    let raw = std::fs::read_to_string(root.path().join("playlists.json")).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    value["settings"]["video_folder"] = serde_json::json!(live.to_string_lossy());
    value["settings"]["next_rotation_folder"] = serde_json::json!(pending.to_string_lossy());
    std::fs::write(
        root.path().join("playlists.json"),
        serde_json::to_vec_pretty(&value).unwrap(),
    )
    .unwrap();

    let store = Arc::new(Store::open_in_memory().unwrap());
    for name in playlist_names {
        store
            .add_playlist(name, &format!("https://example.com/{}", name), true, 1)
            .unwrap();
    }

    let compositor = Arc::new(StubCompositor::new());
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let monitor = PlaybackMonitor::new(event_rx, "OSR Playlist", "OSR Stream");

    let components = Arc::new(Components {
        store,
        config: Arc::new(config),
        compositor: compositor.clone() as Arc<dyn Compositor>,
        platforms: Arc::new(osrplatforms::PlatformManager::new()),
        notifier: osrnotify::Notifier::disabled(),
        downloads: Arc::new(osrdownload::DownloadManager::new()),
        scenes: scenes(),
    });

    Fixture {
        _root: root,
        components,
        compositor,
        monitor,
        event_tx,
        live,
        pending,
    }
}

fn stage_pending(fixture: &Fixture, files: &[&str]) {
    for name in files {
        std::fs::write(fixture.pending.join(name), b"video-bytes").unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_content_switch() {
    let mut fx = fixture(&["A", "B"]);
    let c = fx.components.clone();
    stage_pending(&fx, &["A_1_first.mp4", "A_2_second.mp4", "B_1_other.webm"]);

    // The pending set was pre-staged by a finished background download.
    let playlists = c.store.enabled_playlists().unwrap();
    for p in &playlists {
        let pid = p.id;
        for file in osrutils::video_files_sorted(&fx.pending) {
            if osrutils::folders::stem_matches_playlist(&file, &p.name) {
                c.store.add_video(pid, &file, None, 60, 1, Some(&p.name)).unwrap();
            }
        }
    }
    c.downloads.set_prepared(playlist_refs(&playlists));

    let manager = RotationManager::new(c.clone());
    let session_id = manager.start_session(None).await.unwrap();
    manager
        .execute_content_switch(&mut fx.monitor, false)
        .await
        .unwrap();

    // Pending drained into live with ordering prefixes applied.
    assert!(osrutils::video_files_sorted(&fx.pending).is_empty());
    let live_files = osrutils::video_files_sorted(&fx.live);
    assert_eq!(
        live_files,
        vec!["01_A_1_first.mp4", "01_A_2_second.mp4", "02_B_1_other.webm"]
    );

    // Media source carries every file; viewers are back on the stream scene.
    assert_eq!(fx.compositor.last_update().unwrap().len(), 3);
    assert_eq!(*fx.compositor.scene.lock().unwrap(), "OSR Stream");

    // Session state: title from the template, first file tracked.
    let session = c.store.session_by_id(session_id).unwrap().unwrap();
    assert!(session.is_current);
    assert_eq!(session.stream_title.as_deref(), Some("24/7 | A | B | !playlist"));
    assert_eq!(
        fx.monitor.current_video_original_name().as_deref(),
        Some("A_1_first.mp4")
    );

    // Selected playlists were marked played.
    for playlist in c.store.enabled_playlists().unwrap() {
        assert_eq!(playlist.play_count, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_switch_refused_during_temp_playback() {
    let mut fx = fixture(&["A"]);
    let c = fx.components.clone();
    stage_pending(&fx, &["A_1_first.mp4"]);

    let ids: Vec<i64> = c.store.enabled_playlists().unwrap().iter().map(|p| p.id).collect();
    let session = c.store.create_rotation_session(&ids, "t", 0).unwrap();
    c.store
        .save_temp_playback_state(session, &["A_1_first.mp4".to_string()], 0, "/tmp/p", 0)
        .unwrap();

    let manager = RotationManager::new(c.clone());
    let err = manager
        .execute_content_switch(&mut fx.monitor, false)
        .await
        .unwrap_err();
    assert!(matches!(err, osrrotation::RotationError::TempPlaybackActive));
    // Live folder untouched.
    assert!(osrutils::video_files_sorted(&fx.pending).len() == 1);
}

#[tokio::test(start_paused = true)]
async fn test_crash_recovery_resume_schedules_deferred_seek() {
    let mut fx = fixture(&["A"]);
    let c = fx.components.clone();

    std::fs::write(fx.live.join("vid.webm"), b"video-bytes").unwrap();
    let ids: Vec<i64> = c.store.enabled_playlists().unwrap().iter().map(|p| p.id).collect();
    let session_id = c.store.create_rotation_session(&ids, "title", 0).unwrap();
    c.store
        .save_playback_position(session_id, 123_000, Some("vid.webm"))
        .unwrap();

    let manager = RotationManager::new(c.clone());
    let session = c.store.current_session().unwrap().unwrap();
    let seek = manager
        .resume_normal_session(&mut fx.monitor, &session)
        .await
        .unwrap()
        .expect("seek scheduled");

    assert_eq!(seek.cursor_ms, 123_000);
    assert_eq!(seek.video, "vid.webm");
    // The media source was re-synced with the live folder.
    assert_eq!(fx.compositor.last_update().unwrap(), vec!["vid.webm"]);
    assert_eq!(fx.monitor.current_video_original_name().as_deref(), Some("vid.webm"));
}

#[tokio::test(start_paused = true)]
async fn test_resume_skips_seek_when_video_changed() {
    let mut fx = fixture(&["A"]);
    let c = fx.components.clone();

    std::fs::write(fx.live.join("other.webm"), b"video-bytes").unwrap();
    let ids: Vec<i64> = c.store.enabled_playlists().unwrap().iter().map(|p| p.id).collect();
    let session_id = c.store.create_rotation_session(&ids, "title", 0).unwrap();
    c.store
        .save_playback_position(session_id, 55_000, Some("vid.webm"))
        .unwrap();

    let manager = RotationManager::new(c.clone());
    let session = c.store.current_session().unwrap().unwrap();
    let seek = manager
        .resume_normal_session(&mut fx.monitor, &session)
        .await
        .unwrap();
    assert!(seek.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_tier_one_and_recovery() {
    let mut fx = fixture(&["A"]);
    let c = fx.components.clone();

    // Tier-1 content exists.
    let fallback_folder = c.fallback_folder();
    std::fs::create_dir_all(&fallback_folder).unwrap();
    std::fs::write(fallback_folder.join("bak.mp4"), b"video-bytes").unwrap();
    // The live folder still has something, but tier 1 wins.
    std::fs::write(fx.live.join("leftover.mp4"), b"video-bytes").unwrap();

    let mut fallback = FallbackController::new(c.clone());
    assert!(!fallback.record_download_failure());
    assert!(!fallback.record_download_failure());
    assert!(fallback.record_download_failure());

    let tier = fallback.activate(&mut fx.monitor).await.unwrap();
    assert_eq!(tier, FallbackTier::FallbackFolder);
    assert!(fallback.is_active());
    assert_eq!(fx.compositor.last_update().unwrap(), vec!["bak.mp4"]);
    assert!(!fx.monitor.delete_on_transition());
    assert!(fx.compositor.alert_visible.load(Ordering::SeqCst));
    assert_eq!(*fx.compositor.scene.lock().unwrap(), "OSR Stream");

    // A later successful download restores normal playback.
    fallback.record_download_success();
    fallback.deactivate(&mut fx.monitor).await.unwrap();
    assert!(!fallback.is_active());
    assert_eq!(fallback.consecutive_failures(), 0);
    assert!(fx.monitor.delete_on_transition());
    assert!(!fx.compositor.alert_visible.load(Ordering::SeqCst));
    assert_eq!(fx.compositor.last_update().unwrap(), vec!["leftover.mp4"]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_tier_two_loops_remaining() {
    let mut fx = fixture(&["A"]);
    let c = fx.components.clone();
    std::fs::write(fx.live.join("leftover.mp4"), b"video-bytes").unwrap();
    fx.monitor.initialize(&fx.live);

    let mut fallback = FallbackController::new(c.clone());
    let tier = fallback.activate(&mut fx.monitor).await.unwrap();
    assert_eq!(tier, FallbackTier::LoopRemaining);
    assert!(!fx.monitor.delete_on_transition());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_tier_three_pause_screen() {
    let mut fx = fixture(&["A"]);
    let c = fx.components.clone();

    let mut fallback = FallbackController::new(c.clone());
    let tier = fallback.activate(&mut fx.monitor).await.unwrap();
    assert_eq!(tier, FallbackTier::PauseScreen);
    assert_eq!(*fx.compositor.scene.lock().unwrap(), "OSR Pause screen");
}

#[tokio::test(start_paused = true)]
async fn test_temp_playback_exit_preserves_cursor() {
    let mut fx = fixture(&["X", "Y"]);
    let c = fx.components.clone();

    // Streaming from pending; X is mid-play, Y just finished downloading.
    stage_pending(&fx, &["X_3_three.webm", "X_4_four.webm"]);
    let ids: Vec<i64> = c.store.enabled_playlists().unwrap().iter().map(|p| p.id).collect();
    let session_id = c.store.create_rotation_session(&ids, "old title", 0).unwrap();
    let names = vec!["X".to_string(), "Y".to_string()];
    c.store.set_next_playlists(session_id, &names).unwrap();
    c.store.complete_next_playlists(session_id, &names).unwrap();
    c.store
        .save_temp_playback_state(
            session_id,
            &["X_3_three.webm".to_string(), "X_4_four.webm".to_string()],
            0,
            &fx.pending.to_string_lossy(),
            0,
        )
        .unwrap();
    // The per-tick cursor writer has the authoritative position.
    c.store
        .save_playback_position(session_id, 27_000, Some("X_3_three.webm"))
        .unwrap();
    fx.compositor.set_cursor(27_000);

    fx.monitor.initialize(&fx.pending);
    fx.monitor.set_temp_playback_mode(true);

    let mut handler = TempPlaybackHandler::new(c.clone());
    handler.set_session_id(Some(session_id));
    // Mirror the active state reached through activation.
    let session = c.store.current_session().unwrap().unwrap();
    assert!(session.next_rotation_ready());

    let seek = handler.exit(&mut fx.monitor).await.unwrap().expect("seek preserved");
    assert_eq!(seek.cursor_ms, 27_000);
    assert_eq!(seek.video, "X_3_three.webm");

    // Pending consolidated into live with prefixes; the resumed video is
    // first in the reloaded source playlist.
    assert!(osrutils::video_files_sorted(&fx.pending).is_empty());
    let live_files = osrutils::video_files_sorted(&fx.live);
    assert_eq!(live_files, vec!["01_X_3_three.webm", "01_X_4_four.webm"]);
    let loaded = fx.compositor.last_update().unwrap();
    assert_eq!(loaded[0], "01_X_3_three.webm");

    // Temp state cleared, monitor back on live with the right pointer.
    assert!(c.store.temp_playback_state(session_id).unwrap().is_none());
    assert!(!fx.monitor.needs_vlc_refresh());
    assert_eq!(
        fx.monitor.current_video_original_name().as_deref(),
        Some("X_3_three.webm")
    );

    // Consumed playlist Y dropped from the regenerated title.
    let session = c.store.current_session().unwrap().unwrap();
    assert_eq!(session.stream_title.as_deref(), Some("24/7 | X | !playlist"));
}

#[tokio::test(start_paused = true)]
async fn test_temp_playback_restore_reorders_saved_video_first() {
    let mut fx = fixture(&["X"]);
    let c = fx.components.clone();

    stage_pending(&fx, &["x1.webm", "x2.webm", "x3.webm"]);
    let ids: Vec<i64> = c.store.enabled_playlists().unwrap().iter().map(|p| p.id).collect();
    let session_id = c.store.create_rotation_session(&ids, "t", 0).unwrap();
    c.store
        .set_next_playlists(session_id, &vec!["X".to_string()])
        .unwrap();
    let playlist = vec!["x1.webm".to_string(), "x2.webm".to_string(), "x3.webm".to_string()];
    c.store
        .save_temp_playback_state(session_id, &playlist, 0, &fx.pending.to_string_lossy(), 0)
        .unwrap();
    c.store
        .save_playback_position(session_id, 42_000, Some("x2.webm"))
        .unwrap();

    let mut handler = TempPlaybackHandler::new(c.clone());
    handler.set_session_id(Some(session_id));
    let session = c.store.current_session().unwrap().unwrap();
    let state = c.store.temp_playback_state(session_id).unwrap().unwrap();

    let restored = handler.restore(&mut fx.monitor, &session, &state).await.unwrap();
    assert!(restored);
    assert!(handler.is_active());

    // x2 plays first so the deferred seek lands on it.
    let loaded = fx.compositor.last_update().unwrap();
    assert_eq!(loaded[0], "x2.webm");
    assert_eq!(fx.monitor.current_video_original_name().as_deref(), Some("x2.webm"));
    assert!(fx.monitor.is_temp_playback_mode());
    let _ = &fx.event_tx;
}
