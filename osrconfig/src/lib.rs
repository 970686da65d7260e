//! Configuration provider for the rotation controller.
//!
//! Owns two JSON documents: `playlists.json` (playlist roster + settings)
//! and `manual_override.json` (one-shot operator override). Both are
//! created with sensible defaults when absent. Change detection is
//! mtime-based: `has_config_changed()` / `has_override_changed()` return
//! true exactly once per file modification.
//!
//! Environment configuration (`.env`) lives in [`env`] as a typed record.

pub mod env;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Errors raised by the configuration provider.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown setting key: {0}")]
    UnknownSetting(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One playlist entry from `playlists.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistEntry {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kick_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub is_short: bool,
}

/// Application settings from `playlists.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Historical fallback when per-video durations are unknown.
    #[serde(default = "default_rotation_hours")]
    pub rotation_hours: u64,
    pub video_folder: PathBuf,
    pub next_rotation_folder: PathBuf,
    #[serde(default = "default_min_playlists")]
    pub min_playlists_per_rotation: usize,
    #[serde(default = "default_max_playlists")]
    pub max_playlists_per_rotation: usize,
    #[serde(default = "default_retry_attempts")]
    pub download_retry_attempts: u32,
    #[serde(default = "default_title_template")]
    pub stream_title_template: String,
    /// Disables the streamer-live pause behaviour entirely.
    #[serde(default)]
    pub ignore_streamer: bool,
    #[serde(default)]
    pub notify_video_transitions: bool,
    #[serde(default = "default_live_check_interval")]
    pub live_check_interval_seconds: u64,
    #[serde(default)]
    pub yt_dlp_use_cookies: bool,
    #[serde(default = "default_cookie_browser")]
    pub yt_dlp_browser_for_cookies: String,
    #[serde(default)]
    pub yt_dlp_verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rotation_hours: default_rotation_hours(),
            video_folder: PathBuf::from("content/live"),
            next_rotation_folder: PathBuf::from("content/pending"),
            min_playlists_per_rotation: default_min_playlists(),
            max_playlists_per_rotation: default_max_playlists(),
            download_retry_attempts: default_retry_attempts(),
            stream_title_template: default_title_template(),
            ignore_streamer: false,
            notify_video_transitions: false,
            live_check_interval_seconds: default_live_check_interval(),
            yt_dlp_use_cookies: false,
            yt_dlp_browser_for_cookies: default_cookie_browser(),
            yt_dlp_verbose: false,
        }
    }
}

/// The `playlists.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistsDocument {
    pub playlists: Vec<PlaylistEntry>,
    pub settings: Settings,
}

/// The `manual_override.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualOverride {
    #[serde(default)]
    pub override_active: bool,
    #[serde(default)]
    pub selected_playlists: Vec<String>,
    #[serde(default)]
    pub trigger_now: bool,
}

/// Settings keys the dashboard is allowed to update.
const UPDATABLE_SETTINGS: &[&str] = &[
    "rotation_hours",
    "min_playlists_per_rotation",
    "max_playlists_per_rotation",
    "download_retry_attempts",
    "stream_title_template",
    "ignore_streamer",
    "notify_video_transitions",
    "live_check_interval_seconds",
    "yt_dlp_use_cookies",
    "yt_dlp_browser_for_cookies",
    "yt_dlp_verbose",
];

/// Hot-reloaded view over the two config documents.
pub struct ConfigProvider {
    config_path: PathBuf,
    override_path: PathBuf,
    last_config_mtime: Mutex<Option<SystemTime>>,
    last_override_mtime: Mutex<Option<SystemTime>>,
}

impl ConfigProvider {
    /// Open the provider, creating default documents where missing.
    pub fn new(config_path: impl Into<PathBuf>, override_path: impl Into<PathBuf>) -> Result<Self> {
        let provider = Self {
            config_path: config_path.into(),
            override_path: override_path.into(),
            last_config_mtime: Mutex::new(None),
            last_override_mtime: Mutex::new(None),
        };

        if !provider.config_path.exists() {
            provider.write_default_config()?;
        }
        if !provider.override_path.exists() {
            provider.write_json(&provider.override_path, &ManualOverride::default())?;
            info!("Created default override at {}", provider.override_path.display());
        }

        Ok(provider)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn write_default_config(&self) -> Result<()> {
        let default = PlaylistsDocument {
            playlists: vec![PlaylistEntry {
                name: "Example Playlist".to_string(),
                url: "https://www.youtube.com/playlist?list=EXAMPLE".to_string(),
                enabled: true,
                priority: 1,
                twitch_category: None,
                kick_category: None,
                category: None,
                is_short: false,
            }],
            settings: Settings::default(),
        };
        self.write_json(&self.config_path, &default)?;
        info!("Created default config at {}", self.config_path.display());
        Ok(())
    }

    /// Load and validate the playlists document.
    pub fn load(&self) -> Result<PlaylistsDocument> {
        let doc: PlaylistsDocument = self.read_json(&self.config_path)?;
        validate(&doc)?;
        Ok(doc)
    }

    /// Playlist entries, or empty when the document is unreadable.
    ///
    /// Read failures keep the controller running on last-good values, so
    /// they are logged rather than propagated.
    pub fn playlists(&self) -> Vec<PlaylistEntry> {
        match self.load() {
            Ok(doc) => doc.playlists,
            Err(e) => {
                error!("Failed to load playlists config: {}", e);
                Vec::new()
            }
        }
    }

    /// Current settings, falling back to defaults on a broken document.
    pub fn settings(&self) -> Settings {
        match self.load() {
            Ok(doc) => doc.settings,
            Err(e) => {
                error!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        }
    }

    /// Look up one playlist entry by name (case-insensitive).
    pub fn playlist_by_name(&self, name: &str) -> Option<PlaylistEntry> {
        self.playlists()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// True exactly once after each modification of `playlists.json`.
    pub fn has_config_changed(&self) -> bool {
        Self::probe_mtime(&self.config_path, &self.last_config_mtime)
    }

    /// True exactly once after each modification of `manual_override.json`.
    pub fn has_override_changed(&self) -> bool {
        Self::probe_mtime(&self.override_path, &self.last_override_mtime)
    }

    fn probe_mtime(path: &Path, cache: &Mutex<Option<SystemTime>>) -> bool {
        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                return false;
            }
        };

        let mut last = cache.lock().unwrap();
        match *last {
            Some(prev) if mtime <= prev => false,
            _ => {
                *last = Some(mtime);
                true
            }
        }
    }

    /// The override document, when marked active.
    pub fn active_override(&self) -> Option<ManualOverride> {
        match self.read_json::<ManualOverride>(&self.override_path) {
            Ok(doc) if doc.override_active => Some(doc),
            Ok(_) => None,
            Err(e) => {
                error!("Failed to load override document: {}", e);
                None
            }
        }
    }

    /// Rewrite the override document with all fields zeroed. Idempotent.
    pub fn clear_override(&self) -> Result<()> {
        self.write_json(&self.override_path, &ManualOverride::default())?;
        info!("Manual override cleared");
        Ok(())
    }

    /// Apply a dashboard settings update to `playlists.json`.
    ///
    /// Only keys on the allow-list are accepted; values are type-checked by
    /// re-deserialising the patched document before writing it back.
    pub fn update_setting(&self, key: &str, value: serde_json::Value) -> Result<()> {
        if !UPDATABLE_SETTINGS.contains(&key) {
            return Err(ConfigError::UnknownSetting(key.to_string()));
        }

        let mut raw: serde_json::Value = self.read_json(&self.config_path)?;
        let settings = raw
            .get_mut("settings")
            .and_then(|s| s.as_object_mut())
            .ok_or_else(|| ConfigError::Invalid("settings object missing".to_string()))?;
        settings.insert(key.to_string(), value);

        let doc: PlaylistsDocument =
            serde_json::from_value(raw).map_err(|source| ConfigError::Parse {
                path: self.config_path.clone(),
                source,
            })?;
        validate(&doc)?;
        self.write_json(&self.config_path, &doc)?;
        info!("Updated setting '{}'", key);
        Ok(())
    }

    /// Replace the playlist roster (dashboard playlist CRUD writes).
    pub fn replace_playlists(&self, playlists: Vec<PlaylistEntry>) -> Result<()> {
        let mut doc = self.load()?;
        doc.playlists = playlists;
        validate(&doc)?;
        self.write_json(&self.config_path, &doc)
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        let data = serde_json::to_vec_pretty(value).expect("config documents serialize");
        fs::write(path, data).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Reject documents missing the required fields.
fn validate(doc: &PlaylistsDocument) -> Result<()> {
    for playlist in &doc.playlists {
        if playlist.name.trim().is_empty() {
            return Err(ConfigError::Invalid("playlist with empty name".to_string()));
        }
        if playlist.url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "playlist '{}' has an empty url",
                playlist.name
            )));
        }
    }

    let settings = &doc.settings;
    if settings.video_folder.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("video_folder is required".to_string()));
    }
    if settings.next_rotation_folder.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("next_rotation_folder is required".to_string()));
    }
    if settings.min_playlists_per_rotation > settings.max_playlists_per_rotation {
        return Err(ConfigError::Invalid(
            "min_playlists_per_rotation exceeds max_playlists_per_rotation".to_string(),
        ));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}
fn default_priority() -> i64 {
    1
}
fn default_rotation_hours() -> u64 {
    12
}
fn default_min_playlists() -> usize {
    2
}
fn default_max_playlists() -> usize {
    4
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_title_template() -> String {
    "24/7 Variety | {GAMES} | !playlist".to_string()
}
fn default_live_check_interval() -> u64 {
    15
}
fn default_cookie_browser() -> String {
    "firefox".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> (tempfile::TempDir, ConfigProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConfigProvider::new(
            dir.path().join("playlists.json"),
            dir.path().join("manual_override.json"),
        )
        .unwrap();
        (dir, provider)
    }

    #[test]
    fn test_creates_defaults() {
        let (_dir, provider) = provider();
        let doc = provider.load().unwrap();
        assert_eq!(doc.playlists.len(), 1);
        assert!(doc.playlists[0].enabled);
        assert_eq!(doc.settings.min_playlists_per_rotation, 2);
        assert!(provider.active_override().is_none());
    }

    #[test]
    fn test_change_probe_fires_once() {
        let (dir, provider) = provider();
        // First probe observes the freshly created file.
        assert!(provider.has_config_changed());
        assert!(!provider.has_config_changed());

        // Touch the file with a strictly newer mtime.
        let path = dir.path().join("playlists.json");
        let contents = fs::read(&path).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, contents).unwrap();

        assert!(provider.has_config_changed());
        assert!(!provider.has_config_changed());
    }

    #[test]
    fn test_clear_override_is_idempotent() {
        let (dir, provider) = provider();
        let doc = ManualOverride {
            override_active: true,
            selected_playlists: vec!["CATS".to_string()],
            trigger_now: true,
        };
        fs::write(
            dir.path().join("manual_override.json"),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();

        assert!(provider.active_override().is_some());
        provider.clear_override().unwrap();
        assert!(provider.active_override().is_none());
        provider.clear_override().unwrap();

        let raw: ManualOverride = serde_json::from_slice(
            &fs::read(dir.path().join("manual_override.json")).unwrap(),
        )
        .unwrap();
        assert!(!raw.override_active);
        assert!(!raw.trigger_now);
        assert!(raw.selected_playlists.is_empty());
    }

    #[test]
    fn test_update_setting_allow_list() {
        let (_dir, provider) = provider();
        provider
            .update_setting("max_playlists_per_rotation", serde_json::json!(5))
            .unwrap();
        assert_eq!(provider.settings().max_playlists_per_rotation, 5);

        let err = provider
            .update_setting("video_folder", serde_json::json!("/tmp/elsewhere"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSetting(_)));
    }

    #[test]
    fn test_invalid_document_rejected() {
        let (dir, _provider) = provider();
        let path = dir.path().join("playlists.json");
        fs::write(
            &path,
            br#"{"playlists": [{"name": "", "url": "x"}], "settings": {"rotation_hours": 1, "video_folder": "a", "next_rotation_folder": "b"}}"#,
        )
        .unwrap();

        let provider =
            ConfigProvider::new(&path, dir.path().join("manual_override.json")).unwrap();
        assert!(provider.load().is_err());
        // Broken roster keeps the controller on defaults rather than dying.
        assert_eq!(provider.settings().rotation_hours, 12);
    }

    #[test]
    fn test_playlist_lookup_is_case_insensitive() {
        let (_dir, provider) = provider();
        assert!(provider.playlist_by_name("example playlist").is_some());
        assert!(provider.playlist_by_name("missing").is_none());
    }
}
