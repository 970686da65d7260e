//! Operator-curated prepared rotations.
//!
//! A prepared rotation is a named folder under the prepared base holding
//! downloaded videos plus a `metadata.json` describing its lifecycle:
//! `created → downloading → ready → scheduled → executing → completed`.
//! Slugs are filesystem names and are validated hard — no separators, no
//! NUL, no dotfiles, and the resolved path must stay inside the base.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use osrdownload::BatchKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{playlist_refs, Components, Result, RotationError};

pub const METADATA_FILENAME: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreparedStatus {
    Created,
    Downloading,
    Ready,
    Scheduled,
    Executing,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedMeta {
    pub title: String,
    pub playlists: Vec<String>,
    pub status: PreparedStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub video_count: usize,
    #[serde(default)]
    pub is_fallback: bool,
}

pub struct PreparedRotationManager {
    components: Arc<Components>,
}

impl PreparedRotationManager {
    pub fn new(components: Arc<Components>) -> Self {
        Self { components }
    }

    fn base(&self) -> PathBuf {
        self.components.prepared_base()
    }

    /// Resolve a slug to its folder, rejecting traversal attempts.
    pub fn resolve_folder(&self, slug: &str) -> Result<PathBuf> {
        if slug.is_empty()
            || slug.starts_with('.')
            || slug.contains('/')
            || slug.contains('\\')
            || slug.contains('\0')
        {
            return Err(RotationError::InvalidSlug(slug.to_string()));
        }

        let base = self.base();
        let folder = base.join(slug);

        // Belt and braces: the canonicalised path must stay inside the
        // canonicalised base.
        if folder.exists() {
            let canonical = folder.canonicalize()?;
            let canonical_base = base.canonicalize()?;
            if !canonical.starts_with(&canonical_base) {
                return Err(RotationError::InvalidSlug(slug.to_string()));
            }
        }
        Ok(folder)
    }

    /// On startup, any rotation left `executing` by a crash goes back to
    /// `ready`.
    pub fn reset_stale_executing(&self) {
        for (slug, mut meta) in self.list_all() {
            if meta.status == PreparedStatus::Executing {
                warn!("Resetting stale executing prepared rotation: {}", slug);
                meta.status = PreparedStatus::Ready;
                let _ = self.write_meta(&slug, &meta);
            }
        }
    }

    pub fn create(&self, title: &str, playlist_names: Vec<String>) -> Result<(String, PreparedMeta)> {
        if playlist_names.is_empty() {
            return Err(RotationError::Invalid("prepared rotation needs at least one playlist".into()));
        }

        let slug = self.unique_slug(title);
        let folder = self.resolve_folder(&slug)?;
        std::fs::create_dir_all(&folder)?;

        let meta = PreparedMeta {
            title: title.to_string(),
            playlists: playlist_names,
            status: PreparedStatus::Created,
            created_at: Utc::now().to_rfc3339(),
            scheduled_at: None,
            video_count: 0,
            is_fallback: false,
        };
        self.write_meta(&slug, &meta)?;
        info!("Created prepared rotation '{}' ({})", title, slug);
        Ok((slug, meta))
    }

    pub fn list_all(&self) -> Vec<(String, PreparedMeta)> {
        let mut rotations = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.base()) else {
            return rotations;
        };
        for entry in entries.flatten() {
            let Ok(slug) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(meta) = self.read_meta(&slug) {
                rotations.push((slug, meta));
            }
        }
        rotations.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        rotations
    }

    pub fn get(&self, slug: &str) -> Option<PreparedMeta> {
        self.read_meta(slug)
    }

    pub fn delete(&self, slug: &str) -> Result<()> {
        let meta = self.read_meta(slug).ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        if meta.status == PreparedStatus::Executing {
            return Err(RotationError::Invalid("cannot delete an executing rotation".into()));
        }
        let folder = self.resolve_folder(slug)?;
        std::fs::remove_dir_all(&folder)?;
        info!("Deleted prepared rotation {}", slug);
        Ok(())
    }

    pub fn clear_completed(&self) -> usize {
        let mut removed = 0usize;
        for (slug, meta) in self.list_all() {
            if meta.status == PreparedStatus::Completed && self.delete(&slug).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn is_any_downloading(&self) -> bool {
        self.list_all()
            .iter()
            .any(|(_, meta)| meta.status == PreparedStatus::Downloading)
    }

    /// Start downloading a prepared rotation's playlists into its folder.
    pub fn start_download(&self, slug: &str) -> Result<()> {
        let c = &self.components;
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        if meta.status == PreparedStatus::Downloading {
            return Err(RotationError::Invalid("already downloading".into()));
        }

        let playlists = c.store.playlists_by_names(&meta.playlists)?;
        if playlists.is_empty() {
            return Err(RotationError::Invalid(format!(
                "none of the playlists exist: {:?}",
                meta.playlists
            )));
        }

        let folder = self.resolve_folder(slug)?;
        let started = c.downloads.spawn_batch(
            playlist_refs(&playlists),
            &folder,
            c.ytdlp_options(),
            BatchKind::Prepared(slug.to_string()),
            false,
            false,
        );
        if !started {
            return Err(RotationError::Invalid("download worker is busy".into()));
        }

        meta.status = PreparedStatus::Downloading;
        self.write_meta(slug, &meta)?;
        info!("Started download for prepared rotation {}", slug);
        Ok(())
    }

    /// Called from the tick loop when a prepared batch outcome arrives.
    pub fn finish_download(&self, slug: &str, success: bool) {
        let Some(mut meta) = self.read_meta(slug) else {
            return;
        };
        // A cancel may have flipped the status mid-download; the thread
        // just completed into a folder the operator can delete.
        if meta.status != PreparedStatus::Downloading {
            debug!("Prepared rotation {} no longer downloading; outcome ignored", slug);
            return;
        }
        meta.status = if success {
            PreparedStatus::Ready
        } else {
            PreparedStatus::Created
        };
        if let Ok(folder) = self.resolve_folder(slug) {
            meta.video_count = osrutils::video_files_sorted(&folder).len();
        }
        let _ = self.write_meta(slug, &meta);
        info!(
            "Prepared rotation {} download finished (success: {}, {} videos)",
            slug, success, meta.video_count
        );
    }

    /// Flip a downloading rotation back to created and erase partials.
    pub fn cancel_download(&self, slug: &str) -> Result<()> {
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        if meta.status != PreparedStatus::Downloading {
            return Err(RotationError::Invalid("not downloading".into()));
        }
        meta.status = PreparedStatus::Created;
        meta.video_count = 0;
        self.write_meta(slug, &meta)?;

        let folder = self.resolve_folder(slug)?;
        for file in osrutils::video_files_sorted(&folder) {
            let _ = std::fs::remove_file(folder.join(file));
        }
        info!("Cancelled download for prepared rotation {}", slug);
        Ok(())
    }

    pub fn schedule(&self, slug: &str, scheduled_at: DateTime<Utc>) -> Result<()> {
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        if meta.status != PreparedStatus::Ready && meta.status != PreparedStatus::Scheduled {
            return Err(RotationError::Invalid("only ready rotations can be scheduled".into()));
        }
        meta.status = PreparedStatus::Scheduled;
        meta.scheduled_at = Some(scheduled_at.to_rfc3339());
        self.write_meta(slug, &meta)?;
        info!("Scheduled prepared rotation {} for {}", slug, scheduled_at);
        Ok(())
    }

    pub fn cancel_schedule(&self, slug: &str) -> Result<()> {
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        if meta.status != PreparedStatus::Scheduled {
            return Err(RotationError::Invalid("not scheduled".into()));
        }
        meta.status = PreparedStatus::Ready;
        meta.scheduled_at = None;
        self.write_meta(slug, &meta)
    }

    /// A scheduled rotation whose time has arrived, if any.
    pub fn check_scheduled(&self, now: DateTime<Utc>) -> Option<String> {
        for (slug, meta) in self.list_all() {
            if meta.status != PreparedStatus::Scheduled {
                continue;
            }
            let Some(at) = meta
                .scheduled_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            else {
                continue;
            };
            if at.with_timezone(&Utc) <= now {
                return Some(slug);
            }
        }
        None
    }

    pub fn begin_execution(&self, slug: &str) -> Result<PreparedMeta> {
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        if !matches!(meta.status, PreparedStatus::Ready | PreparedStatus::Scheduled) {
            return Err(RotationError::Invalid(format!(
                "prepared rotation {} is not ready to execute",
                slug
            )));
        }
        meta.status = PreparedStatus::Executing;
        meta.scheduled_at = None;
        self.write_meta(slug, &meta)?;
        Ok(meta)
    }

    pub fn complete_execution(&self, slug: &str) -> Result<()> {
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        meta.status = PreparedStatus::Completed;
        self.write_meta(slug, &meta)
    }

    pub fn executing_slug(&self) -> Option<String> {
        self.list_all()
            .into_iter()
            .find(|(_, meta)| meta.status == PreparedStatus::Executing)
            .map(|(slug, _)| slug)
    }

    pub fn set_fallback(&self, slug: &str, value: bool) -> Result<()> {
        // Only one rotation can be the fallback.
        if value {
            for (other, mut meta) in self.list_all() {
                if meta.is_fallback && other != slug {
                    meta.is_fallback = false;
                    let _ = self.write_meta(&other, &meta);
                }
            }
        }
        let mut meta = self
            .read_meta(slug)
            .ok_or_else(|| RotationError::PreparedNotFound(slug.into()))?;
        meta.is_fallback = value;
        self.write_meta(slug, &meta)
    }

    pub fn fallback_slug(&self) -> Option<String> {
        self.list_all()
            .into_iter()
            .find(|(_, meta)| meta.is_fallback && meta.video_count > 0)
            .map(|(slug, _)| slug)
    }

    pub fn dashboard_state(&self) -> serde_json::Value {
        let rotations: Vec<serde_json::Value> = self
            .list_all()
            .into_iter()
            .map(|(slug, meta)| {
                serde_json::json!({
                    "slug": slug,
                    "title": meta.title,
                    "playlists": meta.playlists,
                    "status": meta.status,
                    "created_at": meta.created_at,
                    "scheduled_at": meta.scheduled_at,
                    "video_count": meta.video_count,
                    "is_fallback": meta.is_fallback,
                })
            })
            .collect();
        serde_json::json!({ "prepared_rotations": rotations })
    }

    // ── Metadata I/O ─────────────────────────────────────────────────

    fn read_meta(&self, slug: &str) -> Option<PreparedMeta> {
        let folder = self.resolve_folder(slug).ok()?;
        let raw = std::fs::read(folder.join(METADATA_FILENAME)).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Corrupt metadata for prepared rotation {}: {}", slug, e);
                None
            }
        }
    }

    fn write_meta(&self, slug: &str, meta: &PreparedMeta) -> Result<()> {
        let folder = self.resolve_folder(slug)?;
        std::fs::create_dir_all(&folder)?;
        std::fs::write(
            folder.join(METADATA_FILENAME),
            serde_json::to_vec_pretty(meta).expect("metadata serializes"),
        )?;
        Ok(())
    }

    fn unique_slug(&self, title: &str) -> String {
        let base_slug = slugify(title);
        let mut slug = base_slug.clone();
        let mut counter = 2;
        while self.base().join(&slug).exists() {
            slug = format!("{}-{}", base_slug, counter);
            counter += 1;
        }
        slug
    }
}

/// Filesystem-safe slug: lowercase alphanumerics with single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "rotation".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Weekend Marathon!"), "weekend-marathon");
        assert_eq!(slugify("  CATS + MW2  "), "cats-mw2");
        assert_eq!(slugify("///"), "rotation");
    }
}
