//! Dashboard command surface.

use serde::Deserialize;

/// Commands the web dashboard can issue over the WebSocket channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DashboardCommand {
    SkipVideo,
    TriggerRotation,
    PauseStream,
    ResumeStream,
    UpdateSetting {
        key: String,
        value: serde_json::Value,
    },
    AddPlaylist {
        name: String,
        url: String,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        is_short: Option<bool>,
        #[serde(default)]
        category: Option<String>,
    },
    UpdatePlaylist {
        name: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        is_short: Option<bool>,
        #[serde(default)]
        twitch_category: Option<String>,
        #[serde(default)]
        kick_category: Option<String>,
    },
    RemovePlaylist {
        name: String,
    },
    RenamePlaylist {
        old_name: String,
        new_name: String,
    },
    TogglePlaylist {
        name: String,
    },
    CreatePreparedRotation {
        title: String,
        playlists: Vec<String>,
    },
    DownloadPreparedRotation {
        slug: String,
    },
    ExecutePreparedRotation {
        slug: String,
    },
    DeletePreparedRotation {
        slug: String,
    },
    SchedulePreparedRotation {
        slug: String,
        scheduled_at: String,
    },
    CancelPreparedSchedule {
        slug: String,
    },
    CancelPreparedDownload {
        slug: String,
    },
    ClearCompletedPrepared,
    ReloadEnv,
    UpdateEnv {
        key: String,
        value: String,
    },
}
