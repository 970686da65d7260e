//! Per-platform stream category resolution.

use osrconfig::{ConfigProvider, PlaylistEntry};
use osrplatforms::PlatformManager;
use osrstore::Store;
use osrutils::strip_ordering_prefix;
use tracing::{debug, error, warn};

/// Resolved categories, one per platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformCategories {
    pub twitch: String,
    pub kick: String,
}

impl PlatformCategories {
    pub fn for_platform(&self, platform: &str) -> &str {
        match platform {
            "Kick" => &self.kick,
            _ => &self.twitch,
        }
    }
}

/// Resolve per-platform categories from a playlist config entry.
///
/// Each playlist may set `twitch_category` and/or `kick_category`; when
/// only one is present it is shared. The legacy `category` field comes
/// next, then the playlist name.
pub fn resolve_playlist_categories(entry: &PlaylistEntry) -> PlatformCategories {
    let twitch = entry
        .twitch_category
        .clone()
        .or_else(|| entry.category.clone());
    let kick = entry.kick_category.clone().or_else(|| entry.category.clone());

    let (twitch, kick) = match (twitch, kick) {
        (Some(t), Some(k)) => (t, k),
        (Some(t), None) => (t.clone(), t),
        (None, Some(k)) => (k.clone(), k),
        (None, None) => (entry.name.clone(), entry.name.clone()),
    };

    PlatformCategories { twitch, kick }
}

/// Resolve per-platform categories for a video on disk.
///
/// Strips the ordering prefix, finds the video's source playlist in the
/// store and maps it onto the playlist's configured categories.
pub fn resolve_category_for_video(
    video_filename: &str,
    store: &Store,
    config: &ConfigProvider,
) -> Option<PlatformCategories> {
    if video_filename.is_empty() {
        return None;
    }

    let clean_filename = strip_ordering_prefix(video_filename);
    let video = match store.video_by_filename(clean_filename) {
        Ok(Some(video)) => video,
        Ok(None) => {
            debug!("Video not found in database: {}", clean_filename);
            return None;
        }
        Err(e) => {
            error!("Error getting category for video {}: {}", video_filename, e);
            return None;
        }
    };

    let playlist_name = video.playlist_name?;
    match config.playlist_by_name(&playlist_name) {
        Some(entry) => Some(resolve_playlist_categories(&entry)),
        None => {
            warn!(
                "Playlist '{}' not found in config for video: {}",
                playlist_name, video_filename
            );
            None
        }
    }
}

/// Push title + per-platform categories in one request per platform.
pub async fn push_stream_info(
    platforms: &PlatformManager,
    title: &str,
    categories: Option<&PlatformCategories>,
) {
    for platform in platforms.platforms() {
        let category = categories.map(|c| c.for_platform(platform.name()).to_string());
        if let Err(e) = platform
            .update_stream_info(title, category.as_deref())
            .await
        {
            error!("[{}] stream info update failed: {}", platform.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        twitch: Option<&str>,
        kick: Option<&str>,
        legacy: Option<&str>,
    ) -> PlaylistEntry {
        PlaylistEntry {
            name: "CATS".to_string(),
            url: "u".to_string(),
            enabled: true,
            priority: 1,
            twitch_category: twitch.map(|s| s.to_string()),
            kick_category: kick.map(|s| s.to_string()),
            category: legacy.map(|s| s.to_string()),
            is_short: false,
        }
    }

    #[test]
    fn test_both_platform_categories() {
        let cats = resolve_playlist_categories(&entry(Some("Cat Game"), Some("Animals"), None));
        assert_eq!(cats.twitch, "Cat Game");
        assert_eq!(cats.kick, "Animals");
    }

    #[test]
    fn test_single_category_is_shared() {
        let cats = resolve_playlist_categories(&entry(Some("Cat Game"), None, None));
        assert_eq!(cats.twitch, "Cat Game");
        assert_eq!(cats.kick, "Cat Game");

        let cats = resolve_playlist_categories(&entry(None, Some("Animals"), None));
        assert_eq!(cats.twitch, "Animals");
        assert_eq!(cats.kick, "Animals");
    }

    #[test]
    fn test_legacy_then_name_fallback() {
        let cats = resolve_playlist_categories(&entry(None, None, Some("Legacy")));
        assert_eq!(cats.twitch, "Legacy");
        assert_eq!(cats.kick, "Legacy");

        let cats = resolve_playlist_categories(&entry(None, None, None));
        assert_eq!(cats.twitch, "CATS");
        assert_eq!(cats.kick, "CATS");
    }

    #[test]
    fn test_resolve_for_video_strips_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigProvider::new(
            dir.path().join("playlists.json"),
            dir.path().join("manual_override.json"),
        )
        .unwrap();
        config
            .replace_playlists(vec![entry(Some("Cat Game"), None, None)])
            .unwrap();

        let store = Store::open_in_memory().unwrap();
        let pid = store.add_playlist("CATS", "u", true, 1).unwrap();
        store
            .add_video(pid, "CATS_1_intro.mp4", None, 10, 1, Some("CATS"))
            .unwrap();

        let cats = resolve_category_for_video("01_CATS_1_intro.mp4", &store, &config).unwrap();
        assert_eq!(cats.twitch, "Cat Game");

        assert!(resolve_category_for_video("01_unknown.mp4", &store, &config).is_none());
        assert!(resolve_category_for_video("", &store, &config).is_none());
    }
}
