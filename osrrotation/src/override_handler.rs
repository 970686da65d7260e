//! Manual override protocol.
//!
//! The operator drops `{override_active, selected_playlists, trigger_now}`
//! into the override document; the orchestrator consumes it exactly once.
//! Before the override rotation replaces the live content, any prepared
//! pending rotation is parked in `temp_pending_backup/` and the live
//! folder is copied to `temp_backup_override/` so both can come back.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::{Components, Result};

pub struct OverrideHandler {
    components: Arc<Components>,
}

impl OverrideHandler {
    pub fn new(components: Arc<Components>) -> Self {
        Self { components }
    }

    /// Consume a triggered override: validate, clear the document, return
    /// the selected playlist names.
    ///
    /// Returns `None` when no override is pending or validation failed
    /// (an invalid document is still cleared so it cannot re-fire).
    pub fn check_and_consume(&self) -> Option<Vec<String>> {
        let c = &self.components;
        if !c.config.has_override_changed() {
            return None;
        }
        let doc = c.config.active_override()?;
        if !doc.trigger_now {
            return None;
        }

        info!("Manual override triggered");
        if let Err(e) = c.config.clear_override() {
            error!("Failed to clear override document: {}", e);
        }

        let allowed: Vec<String> = c
            .config
            .playlists()
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| p.name)
            .collect();
        let selected: Vec<String> = doc
            .selected_playlists
            .into_iter()
            .filter(|name| allowed.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .collect();

        if selected.is_empty() {
            warn!("Override ignored: no valid playlists selected");
            return None;
        }
        Some(selected)
    }

    /// Park a pending rotation out of the downloader's way.
    pub fn backup_prepared_rotation(&self) -> Result<bool> {
        let c = &self.components;
        let pending = c.pending_folder();
        if !osrutils::has_video_files(&pending) {
            return Ok(false);
        }
        let backup = c.pending_backup_folder();
        osrutils::folders::move_folder_contents(&pending, &backup)?;
        info!("Backed up pending rotation to {}", backup.display());
        Ok(true)
    }

    /// Bring a parked pending rotation back once the override is done.
    pub fn restore_prepared_rotation(&self) -> Result<bool> {
        let c = &self.components;
        let backup = c.pending_backup_folder();
        if !osrutils::has_video_files(&backup) {
            return Ok(false);
        }
        let pending = c.pending_folder();
        if osrutils::has_video_files(&pending) {
            warn!("Pending folder not empty; leaving backed-up rotation parked");
            return Ok(false);
        }
        osrutils::folders::move_folder_contents(&backup, &pending)?;
        info!("Restored backed-up pending rotation to {}", pending.display());
        Ok(true)
    }

    /// Record the suspension of the current session for later restore.
    pub fn suspend_current_session(&self, cursor_ms: i64, current_video: Option<&str>) -> Result<()> {
        let c = &self.components;
        let Some(session) = c.store.current_session()? else {
            return Ok(());
        };
        let data = serde_json::json!({
            "suspended_at": Utc::now().to_rfc3339(),
            "cursor_ms": cursor_ms,
            "current_video": current_video,
            "backup_success": false,
        });
        c.store.update_session_suspension_data(session.id, &data)?;
        info!("Recorded session {} suspension for override", session.id);
        Ok(())
    }
}
