//! Playlist selection for the next rotation.

use std::collections::HashSet;
use std::sync::Arc;

use osrconfig::ConfigProvider;
use osrstore::{Playlist, PrepStatus, Store};
use tracing::{debug, error, info};

use crate::Result;

/// Picks playlists under recency and long/short balance constraints.
pub struct Selector {
    store: Arc<Store>,
    config: Arc<ConfigProvider>,
}

impl Selector {
    pub fn new(store: Arc<Store>, config: Arc<ConfigProvider>) -> Self {
        Self { store, config }
    }

    /// Select playlists for the next rotation.
    ///
    /// Manual selection filters the allowed set by name; automatic
    /// selection balances long and short playlists. Either way, playlists
    /// already fully prepared for the next rotation (status COMPLETED) are
    /// excluded — PENDING ones may be re-selected since a half-finished
    /// download is presumed incomplete.
    pub fn select_for_rotation(&self, manual_selection: Option<&[String]>) -> Result<Vec<Playlist>> {
        let config_playlists = self.config.playlists();
        let allowed: HashSet<String> = config_playlists
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.clone())
            .collect();

        let excluded = self.playlists_in_pipeline()?;
        if !excluded.is_empty() {
            debug!("Excluding from selection (prepared and ready): {:?}", excluded);
        }

        let candidates: Vec<Playlist> = self
            .store
            .enabled_playlists()?
            .into_iter()
            .filter(|p| allowed.contains(&p.name) && !excluded.contains(&p.name))
            .collect();

        if let Some(manual) = manual_selection {
            let selected: Vec<Playlist> = candidates
                .into_iter()
                .filter(|p| manual.iter().any(|name| name.eq_ignore_ascii_case(&p.name)))
                .collect();
            info!(
                "Manual selection: {:?}",
                selected.iter().map(|p| &p.name).collect::<Vec<_>>()
            );
            return Ok(selected);
        }

        self.select_automatic(candidates)
    }

    /// Playlists currently prepared and ready for the next rotation.
    fn playlists_in_pipeline(&self) -> Result<HashSet<String>> {
        let Some(session) = self.store.current_session()? else {
            return Ok(HashSet::new());
        };
        Ok(session
            .next_playlists
            .iter()
            .filter(|name| {
                session.next_playlists_status.get(*name) == Some(&PrepStatus::Completed)
            })
            .cloned()
            .collect())
    }

    fn select_automatic(&self, candidates: Vec<Playlist>) -> Result<Vec<Playlist>> {
        if candidates.is_empty() {
            error!("No eligible playlists available (all in preparation or disabled)");
            return Ok(Vec::new());
        }

        let settings = self.config.settings();
        let min = settings.min_playlists_per_rotation;
        let max = settings.max_playlists_per_rotation;

        // Short playlists download fast but also play out fast; a rotation
        // of nothing but shorts churns through downloads. At least one
        // long playlist is always kept when any exists.
        let is_short = |name: &str| {
            self.config
                .playlist_by_name(name)
                .map(|entry| entry.is_short)
                .unwrap_or(false)
        };
        let (shorts, long): (Vec<Playlist>, Vec<Playlist>) =
            candidates.into_iter().partition(|p| is_short(&p.name));

        debug!(
            "Available long playlists: {:?}",
            long.iter().map(|p| &p.name).collect::<Vec<_>>()
        );
        debug!(
            "Available shorts playlists: {:?}",
            shorts.iter().map(|p| &p.name).collect::<Vec<_>>()
        );

        let available = long.len() + shorts.len();
        let target = available.min(max).max(min).min(available);

        // Reserve all but one of the minimum slots for long content, and
        // never fewer than one.
        let min_long = min.saturating_sub(1).max(1);
        let mut num_long = long.len().min(min_long);

        let num_shorts = target.saturating_sub(num_long).min(shorts.len());
        // Too few shorts: backfill with more long playlists.
        num_long = long
            .len()
            .min(target.saturating_sub(num_shorts))
            .max(num_long);

        let mut selected: Vec<Playlist> = long.into_iter().take(num_long).collect();
        selected.extend(shorts.into_iter().take(num_shorts));

        info!(
            "Auto-selected {} playlists: {:?} ({} long, {} shorts)",
            selected.len(),
            selected.iter().map(|p| &p.name).collect::<Vec<_>>(),
            num_long,
            selected.len() - num_long,
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osrconfig::PlaylistEntry;

    fn entry(name: &str, is_short: bool) -> PlaylistEntry {
        PlaylistEntry {
            name: name.to_string(),
            url: format!("https://example.com/{}", name),
            enabled: true,
            priority: 1,
            twitch_category: None,
            kick_category: None,
            category: None,
            is_short,
        }
    }

    fn setup(entries: Vec<PlaylistEntry>) -> (tempfile::TempDir, Arc<Store>, Arc<ConfigProvider>) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigProvider::new(
            dir.path().join("playlists.json"),
            dir.path().join("manual_override.json"),
        )
        .unwrap();
        config.replace_playlists(entries.clone()).unwrap();

        let store = Store::open_in_memory().unwrap();
        for e in &entries {
            store.add_playlist(&e.name, &e.url, e.enabled, e.priority).unwrap();
        }
        (dir, Arc::new(store), Arc::new(config))
    }

    #[test]
    fn test_selection_bounds_and_never_played_first() {
        let (_dir, store, config) =
            setup(vec![entry("A", false), entry("B", false), entry("C", false)]);
        let selector = Selector::new(store.clone(), config);

        let selected = selector.select_for_rotation(None).unwrap();
        // min=2, max=4, three available -> all three.
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn test_max_caps_selection() {
        let entries: Vec<PlaylistEntry> =
            (0..6).map(|i| entry(&format!("P{}", i), false)).collect();
        let (_dir, store, config) = setup(entries);
        let selector = Selector::new(store, config);

        let selected = selector.select_for_rotation(None).unwrap();
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_never_all_shorts() {
        let (_dir, store, config) = setup(vec![
            entry("LONG", false),
            entry("S1", true),
            entry("S2", true),
            entry("S3", true),
            entry("S4", true),
        ]);
        let selector = Selector::new(store, config);

        let selected = selector.select_for_rotation(None).unwrap();
        assert!(selected.iter().any(|p| p.name == "LONG"));
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_too_few_shorts_backfills_with_long() {
        let (_dir, store, config) = setup(vec![
            entry("L1", false),
            entry("L2", false),
            entry("L3", false),
            entry("L4", false),
            entry("S1", true),
        ]);
        let selector = Selector::new(store, config);

        let selected = selector.select_for_rotation(None).unwrap();
        assert_eq!(selected.len(), 4);
        let shorts = selected.iter().filter(|p| p.name == "S1").count();
        assert_eq!(shorts, 1);
    }

    #[test]
    fn test_completed_preparation_excluded_pending_reselectable() {
        let (_dir, store, config) = setup(vec![
            entry("A", false),
            entry("B", false),
            entry("C", false),
        ]);

        let ids: Vec<i64> = store
            .enabled_playlists()
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        let session = store.create_rotation_session(&ids, "t", 0).unwrap();
        store
            .set_next_playlists(session, &vec!["A".to_string(), "B".to_string()])
            .unwrap();
        store
            .update_playlist_status(session, "A", PrepStatus::Completed)
            .unwrap();

        let selector = Selector::new(store, config);
        let selected = selector.select_for_rotation(None).unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        // A is downloaded and waiting; B is only PENDING (presumed
        // incomplete) and may be picked again.
        assert!(!names.contains(&"A"));
        assert!(names.contains(&"B"));
        assert!(names.contains(&"C"));
    }

    #[test]
    fn test_manual_selection_respects_allowed_and_excluded() {
        let (_dir, store, config) = setup(vec![entry("A", false), entry("B", false)]);
        let selector = Selector::new(store, config);

        let manual = vec!["a".to_string(), "Missing".to_string()];
        let selected = selector.select_for_rotation(Some(&manual)).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "A");
    }

    #[test]
    fn test_disabled_config_entries_not_selectable() {
        let mut disabled = entry("A", false);
        disabled.enabled = false;
        let (_dir, store, config) = setup(vec![disabled, entry("B", false)]);
        let selector = Selector::new(store, config);

        let selected = selector.select_for_rotation(None).unwrap();
        let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
        assert!(!names.contains(&"A"));
        assert!(names.contains(&"B"));
    }
}
