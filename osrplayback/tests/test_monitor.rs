use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use crossbeam_channel::Sender;
use osrobs::protocol::{MediaState, MediaStatus};
use osrobs::{Compositor, MediaEvent, ObsError};
use osrplayback::PlaybackMonitor;
use tempfile::TempDir;

/// Recording compositor stub: always on the stream scene unless told
/// otherwise, and remembers every media source reconfiguration.
struct StubCompositor {
    connected: AtomicBool,
    scene: Mutex<String>,
    source_updates: Mutex<Vec<Vec<String>>>,
}

impl StubCompositor {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            scene: Mutex::new("OSR Stream".to_string()),
            source_updates: Mutex::new(Vec::new()),
        }
    }

    fn set_scene(&self, scene: &str) {
        *self.scene.lock().unwrap() = scene.to_string();
    }

    fn updates(&self) -> Vec<Vec<String>> {
        self.source_updates.lock().unwrap().clone()
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
        self.set_scene(scene);
        Ok(())
    }

    async fn verify_scenes(&self, _required: &[String]) -> osrobs::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn stop_media_source(&self, _source: &str) -> osrobs::Result<()> {
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
            cursor_ms: Some(0),
            duration_ms: Some(1000),
        })
    }

    async fn seek_media(&self, _source: &str, _cursor_ms: i64) -> osrobs::Result<()> {
        Ok(())
    }

    async fn play_media(&self, _source: &str) -> osrobs::Result<()> {
        Ok(())
    }

    async fn next_media(&self, _source: &str) -> osrobs::Result<()> {
        Ok(())
    }

    async fn render_total_frames(&self) -> osrobs::Result<u64> {
        Ok(0)
    }

    async fn stream_active(&self) -> osrobs::Result<bool> {
        Ok(false)
    }

    async fn start_stream(&self) -> osrobs::Result<()> {
        Ok(())
    }

    async fn show_alert(&self, _scene: &str, _source: &str, _text: &str) -> osrobs::Result<()> {
        Ok(())
    }

    async fn hide_alert(&self, _scene: &str, _source: &str) -> osrobs::Result<()> {
        Ok(())
    }
}

fn folder_with(files: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in files {
        std::fs::write(dir.path().join(name), b"video-bytes").unwrap();
    }
    dir
}

fn monitor_on(folder: &Path) -> (PlaybackMonitor, Sender<MediaEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut monitor = PlaybackMonitor::new(rx, "OSR Playlist", "OSR Stream");
    monitor.initialize(folder);
    (monitor, tx)
}

fn files_in(folder: &Path) -> Vec<String> {
    osrutils::video_files_sorted(folder)
}

#[tokio::test]
async fn test_initialize_tracks_first_file_alphabetically() {
    let dir = folder_with(&["02_b.mp4", "01_a.mp4", "03_c.webm"]);
    let (monitor, _tx) = monitor_on(dir.path());
    assert_eq!(monitor.current_video(), Some("01_a.mp4"));
    assert_eq!(monitor.current_video_original_name().as_deref(), Some("a.mp4"));
}

#[tokio::test]
async fn test_genuine_transition_deletes_and_advances() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4", "02_c.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();

    // The post-initialize reconfiguration fires a spurious started; it
    // must not count.
    tx.send(MediaEvent::Started).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(!report.transition);
    assert_eq!(files_in(dir.path()).len(), 3);

    // A genuine advance deletes the finished file and moves on.
    tx.send(MediaEvent::Started).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(report.transition);
    assert_eq!(report.previous_video.as_deref(), Some("a.mp4"));
    assert_eq!(report.current_video.as_deref(), Some("b.mp4"));
    assert_eq!(files_in(dir.path()), vec!["01_b.mp4", "02_c.mp4"]);
    // The source was reloaded with the remaining files.
    assert_eq!(compositor.updates(), vec![vec!["01_b.mp4", "02_c.mp4"]]);
}

#[tokio::test]
async fn test_rapid_skips_processed_sequentially() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4", "02_c.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();

    tx.send(MediaEvent::Started).unwrap(); // spurious (init)
    tx.send(MediaEvent::Started).unwrap();
    tx.send(MediaEvent::Started).unwrap();

    let report = monitor.check(&compositor).await;
    assert!(report.transition);
    // Two genuine transitions: a.mp4 and b.mp4 both consumed.
    assert_eq!(report.previous_video.as_deref(), Some("b.mp4"));
    assert_eq!(report.current_video.as_deref(), Some("c.mp4"));
    assert_eq!(files_in(dir.path()), vec!["02_c.mp4"]);
}

#[tokio::test]
async fn test_last_video_marks_all_consumed() {
    let dir = folder_with(&["01_only.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();

    tx.send(MediaEvent::Ended).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(report.transition);
    assert!(report.all_consumed);
    assert!(monitor.all_content_consumed());
    assert!(files_in(dir.path()).is_empty());

    // The flag is sticky: further checks short-circuit.
    tx.send(MediaEvent::Started).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(!report.transition);
    assert!(report.all_consumed);
}

#[tokio::test]
async fn test_temp_playback_signals_refresh_instead_of_deleting_last() {
    let dir = folder_with(&["x1.webm"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    monitor.set_temp_playback_mode(true);
    let compositor = StubCompositor::new();

    tx.send(MediaEvent::Ended).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(report.transition);
    assert!(!report.all_consumed);
    assert!(monitor.needs_vlc_refresh());
    // The file survives so the orchestrator can rebuild the playlist from
    // the grown folder.
    assert_eq!(files_in(dir.path()), vec!["x1.webm"]);

    monitor.clear_vlc_refresh_flag();
    assert!(!monitor.needs_vlc_refresh());
}

#[tokio::test]
async fn test_no_delete_mode_advances_by_index() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    monitor.set_delete_on_transition(false);
    let compositor = StubCompositor::new();

    tx.send(MediaEvent::Started).unwrap(); // spurious (init)
    monitor.check(&compositor).await;

    tx.send(MediaEvent::Started).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(report.transition);
    assert_eq!(report.previous_video.as_deref(), Some("a.mp4"));
    assert_eq!(report.current_video.as_deref(), Some("b.mp4"));
    // Nothing deleted, no source reload.
    assert_eq!(files_in(dir.path()).len(), 2);
    assert!(compositor.updates().is_empty());
}

#[tokio::test]
async fn test_no_delete_mode_wraps_to_first_file() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4", "02_c.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    monitor.set_delete_on_transition(false);
    let compositor = StubCompositor::new();

    tx.send(MediaEvent::Started).unwrap(); // spurious (init)
    monitor.check(&compositor).await;

    // Advance through the whole list: a -> b -> c.
    tx.send(MediaEvent::Started).unwrap();
    tx.send(MediaEvent::Started).unwrap();
    monitor.check(&compositor).await;
    assert_eq!(monitor.current_video_original_name().as_deref(), Some("c.mp4"));

    // The player loops, so past the last file the tracker wraps back to
    // the first instead of declaring the content consumed.
    tx.send(MediaEvent::Started).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(report.transition);
    assert_eq!(report.previous_video.as_deref(), Some("c.mp4"));
    assert_eq!(report.current_video.as_deref(), Some("a.mp4"));
    assert!(!report.all_consumed);
    assert!(!monitor.all_content_consumed());
    // Nothing was deleted across the full cycle.
    assert_eq!(files_in(dir.path()).len(), 3);

    // And the next lap keeps going.
    tx.send(MediaEvent::Started).unwrap();
    let report = monitor.check(&compositor).await;
    assert_eq!(report.current_video.as_deref(), Some("b.mp4"));
}

#[tokio::test]
async fn test_no_delete_single_file_never_latches_consumed() {
    let dir = folder_with(&["bak.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    monitor.set_delete_on_transition(false);
    let compositor = StubCompositor::new();

    // Several replays of the only file: the monitor must keep running so
    // it still reacts once the mode ends, rather than latching consumed
    // after one playthrough.
    for _ in 0..3 {
        tx.send(MediaEvent::Ended).unwrap();
        let report = monitor.check(&compositor).await;
        assert!(!report.all_consumed);
        assert!(!monitor.all_content_consumed());
    }
    assert_eq!(monitor.current_video_original_name().as_deref(), Some("bak.mp4"));
    assert_eq!(files_in(dir.path()), vec!["bak.mp4"]);
}

#[tokio::test]
async fn test_events_drained_while_off_stream_scene() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();
    compositor.set_scene("OSR Pause screen");

    tx.send(MediaEvent::Started).unwrap();
    tx.send(MediaEvent::Ended).unwrap();
    let report = monitor.check(&compositor).await;
    assert!(!report.transition);

    // Back on the stream scene the stale events are gone.
    compositor.set_scene("OSR Stream");
    let report = monitor.check(&compositor).await;
    assert!(!report.transition);
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_events_drained_while_disconnected() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();
    compositor.connected.store(false, Ordering::SeqCst);

    tx.send(MediaEvent::Ended).unwrap();
    tx.send(MediaEvent::Ended).unwrap();
    assert!(!monitor.check(&compositor).await.transition);

    compositor.connected.store(true, Ordering::SeqCst);
    assert!(!monitor.check(&compositor).await.transition);
}

#[tokio::test]
async fn test_suspension_makes_check_a_noop() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();

    monitor.suspend();
    tx.send(MediaEvent::Ended).unwrap();
    assert!(!monitor.check(&compositor).await.transition);

    monitor.resume();
    // Resume arms suppression for the reconnect's spurious started.
    tx.send(MediaEvent::Started).unwrap();
    assert!(!monitor.check(&compositor).await.transition);
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_transition_previous_differs_from_current() {
    let dir = folder_with(&["01_a.mp4", "01_b.mp4", "02_c.mp4"]);
    let (mut monitor, tx) = monitor_on(dir.path());
    let compositor = StubCompositor::new();

    tx.send(MediaEvent::Started).unwrap(); // spurious
    monitor.check(&compositor).await;

    for _ in 0..2 {
        tx.send(MediaEvent::Started).unwrap();
        let report = monitor.check(&compositor).await;
        if report.transition {
            assert_ne!(report.previous_video, report.current_video);
            let previous = report.previous_video.unwrap();
            // The finished file no longer exists on disk.
            assert!(!files_in(dir.path())
                .iter()
                .any(|f| osrutils::strip_ordering_prefix(f) == previous));
        }
    }
}

#[test]
fn test_set_current_video_overrides_alphabetical_choice() {
    let dir = folder_with(&["01_a.mp4", "02_b.mp4"]);
    let (tx, rx) = crossbeam_channel::unbounded::<MediaEvent>();
    drop(tx);
    let mut monitor = PlaybackMonitor::new(rx, "OSR Playlist", "OSR Stream");
    monitor.initialize(dir.path());
    monitor.set_current_video("02_b.mp4");
    assert_eq!(monitor.current_video_original_name().as_deref(), Some("b.mp4"));
}
