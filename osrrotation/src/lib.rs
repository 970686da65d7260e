//! Rotation logic: selection, content switching, fallback tiers, temp
//! playback, prepared rotations and the session lifecycle.
//!
//! Every handler here is driven by the orchestrator's tick loop; none of
//! them spawn their own timers. Handlers share the long-lived components
//! through [`Components`] and receive the mutable [`PlaybackMonitor`] as
//! an argument, so folder mutations stay funnelled through one call path
//! at a time.

pub mod categories;
pub mod error;
pub mod fallback;
pub mod manager;
pub mod override_handler;
pub mod prepared;
pub mod selector;
pub mod switcher;
pub mod temp_playback;
pub mod title;

pub use error::{Result, RotationError};

use std::path::PathBuf;
use std::sync::Arc;

use osrconfig::{ConfigProvider, Settings};
use osrdownload::{DownloadManager, PlaylistRef, YtDlpOptions};
use osrnotify::Notifier;
use osrobs::Compositor;
use osrplatforms::PlatformManager;
use osrstore::{Playlist, Store};

/// Compositor scene and source names, resolved from the environment.
#[derive(Debug, Clone)]
pub struct SceneNames {
    pub stream: String,
    pub pause: String,
    pub rotation_screen: String,
    pub media_source: String,
    pub alert_source: String,
}

/// Long-lived components shared by the rotation handlers.
pub struct Components {
    pub store: Arc<Store>,
    pub config: Arc<ConfigProvider>,
    pub compositor: Arc<dyn Compositor>,
    pub platforms: Arc<PlatformManager>,
    pub notifier: Notifier,
    pub downloads: Arc<DownloadManager>,
    pub scenes: SceneNames,
}

impl Components {
    pub fn settings(&self) -> Settings {
        self.config.settings()
    }

    /// The folder the media source plays from.
    pub fn live_folder(&self) -> PathBuf {
        self.settings().video_folder
    }

    /// The staging folder for the next rotation's downloads.
    pub fn pending_folder(&self) -> PathBuf {
        self.settings().next_rotation_folder
    }

    /// Tier-1 emergency content, sibling of the live folder.
    pub fn fallback_folder(&self) -> PathBuf {
        content_sibling(&self.live_folder(), "fallback")
    }

    /// Base directory for prepared rotations, sibling of the live folder.
    pub fn prepared_base(&self) -> PathBuf {
        content_sibling(&self.live_folder(), "prepared")
    }

    /// Scratch folder holding live content during an override.
    pub fn override_backup_folder(&self) -> PathBuf {
        content_sibling(&self.live_folder(), "temp_backup_override")
    }

    /// Scratch folder holding a displaced pending rotation.
    pub fn pending_backup_folder(&self) -> PathBuf {
        content_sibling(&self.live_folder(), "temp_pending_backup")
    }

    pub fn ytdlp_options(&self) -> YtDlpOptions {
        let settings = self.settings();
        YtDlpOptions {
            use_cookies: settings.yt_dlp_use_cookies,
            browser_for_cookies: settings.yt_dlp_browser_for_cookies,
            verbose: settings.yt_dlp_verbose,
            retry_attempts: settings.download_retry_attempts,
        }
    }

    /// Apply queued downloader hand-offs on the store-owner thread.
    ///
    /// Drains the video registration queue and the two pending-DB slots.
    /// Called every tick and immediately after a blocking download so the
    /// rename/category passes see current rows.
    pub fn drain_download_queues(&self, current_session_id: Option<i64>) {
        for registration in self.downloads.registrations().drain() {
            if let Err(e) = self.store.add_video(
                registration.playlist_id,
                &registration.filename,
                Some(&registration.title),
                registration.duration_seconds,
                registration.file_size_mb,
                Some(&registration.playlist_name),
            ) {
                tracing::error!(
                    "Error registering queued video {}: {}",
                    registration.filename,
                    e
                );
            }
        }

        let Some(session_id) = current_session_id else {
            return;
        };
        if let Some(names) = self.downloads.take_pending_initialize() {
            if let Err(e) = self.store.set_next_playlists(session_id, &names) {
                tracing::error!("Failed to initialize next_playlists tracking: {}", e);
            } else {
                tracing::info!(
                    "Initialized next_playlists tracking in session {}: {:?}",
                    session_id,
                    names
                );
            }
        }
        if let Some(names) = self.downloads.take_pending_complete() {
            if let Err(e) = self.store.complete_next_playlists(session_id, &names) {
                tracing::error!("Failed to mark next_playlists completed: {}", e);
            }
        }
    }
}

fn content_sibling(live_folder: &std::path::Path, name: &str) -> PathBuf {
    match live_folder.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

/// Convert store playlists to the download worker's slim references.
pub fn playlist_refs(playlists: &[Playlist]) -> Vec<PlaylistRef> {
    playlists
        .iter()
        .map(|p| PlaylistRef {
            id: p.id,
            name: p.name.clone(),
            url: p.url.clone(),
        })
        .collect()
}
