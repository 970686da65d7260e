//! Typed view over the `.env` environment record.
//!
//! Secrets and host-level wiring (compositor endpoint, scene names,
//! platform credentials) live in `.env` so the JSON config documents stay
//! shareable. The dashboard may rewrite a restricted set of keys; secret
//! values are write-only over that channel.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::{ConfigError, Result};

/// Environment keys the dashboard is allowed to write.
pub const UPDATABLE_ENV_KEYS: &[&str] = &[
    "OBS_HOST",
    "OBS_PORT",
    "OBS_PASSWORD",
    "SCENE_PAUSE",
    "SCENE_STREAM",
    "SCENE_ROTATION_SCREEN",
    "VLC_SOURCE_NAME",
    "ENABLE_TWITCH",
    "ENABLE_KICK",
    "TWITCH_CLIENT_ID",
    "TWITCH_CLIENT_SECRET",
    "TWITCH_USER_LOGIN",
    "TWITCH_BROADCASTER_ID",
    "KICK_CLIENT_ID",
    "KICK_CLIENT_SECRET",
    "KICK_CHANNEL_ID",
    "DISCORD_WEBHOOK_URL",
    "TARGET_TWITCH_STREAMER",
    "TARGET_KICK_STREAMER",
];

/// Keys whose values must never be echoed back to the dashboard.
pub const SECRET_ENV_KEYS: &[&str] = &[
    "OBS_PASSWORD",
    "TWITCH_CLIENT_SECRET",
    "KICK_CLIENT_SECRET",
    "DISCORD_WEBHOOK_URL",
];

/// Typed snapshot of the environment configuration.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub obs_host: String,
    pub obs_port: u16,
    pub obs_password: String,
    /// Path to the compositor executable for freeze recovery.
    pub obs_exe_path: Option<PathBuf>,
    pub scene_pause: String,
    pub scene_stream: String,
    pub scene_rotation_screen: String,
    pub vlc_source_name: String,
    pub alert_source_name: String,
    pub enable_twitch: bool,
    pub enable_kick: bool,
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub twitch_user_login: String,
    pub twitch_broadcaster_id: String,
    pub kick_client_id: String,
    pub kick_client_secret: String,
    pub kick_channel_id: String,
    pub kick_token_cache: PathBuf,
    pub discord_webhook_url: Option<String>,
    pub target_twitch_streamer: String,
    pub target_kick_streamer: Option<String>,
    pub dashboard_url: Option<String>,
    pub dashboard_api_key: Option<String>,
}

impl EnvSettings {
    /// Load `.env` from the working directory (if present) and build the
    /// typed record from the process environment.
    pub fn load() -> Self {
        // Absent .env is fine; real deployments may export vars directly.
        let _ = dotenvy::dotenv();

        Self {
            obs_host: var_or("OBS_HOST", "127.0.0.1"),
            obs_port: std::env::var("OBS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4455),
            obs_password: var_or("OBS_PASSWORD", ""),
            obs_exe_path: std::env::var("OBS_PATH").ok().map(PathBuf::from),
            scene_pause: var_or("SCENE_PAUSE", "OSR Pause screen"),
            scene_stream: var_or("SCENE_STREAM", "OSR Stream"),
            scene_rotation_screen: var_or("SCENE_ROTATION_SCREEN", "OSR Rotation screen"),
            vlc_source_name: var_or("VLC_SOURCE_NAME", "OSR Playlist"),
            alert_source_name: var_or("ALERT_SOURCE_NAME", "OSR Alert"),
            enable_twitch: bool_var("ENABLE_TWITCH"),
            enable_kick: bool_var("ENABLE_KICK"),
            twitch_client_id: var_or("TWITCH_CLIENT_ID", ""),
            twitch_client_secret: var_or("TWITCH_CLIENT_SECRET", ""),
            twitch_user_login: var_or("TWITCH_USER_LOGIN", ""),
            twitch_broadcaster_id: var_or("TWITCH_BROADCASTER_ID", ""),
            kick_client_id: var_or("KICK_CLIENT_ID", ""),
            kick_client_secret: var_or("KICK_CLIENT_SECRET", ""),
            kick_channel_id: var_or("KICK_CHANNEL_ID", ""),
            kick_token_cache: PathBuf::from(var_or("KICK_TOKEN_CACHE", "kick_tokens.json")),
            discord_webhook_url: non_empty_var("DISCORD_WEBHOOK_URL"),
            target_twitch_streamer: var_or("TARGET_TWITCH_STREAMER", ""),
            target_kick_streamer: non_empty_var("TARGET_KICK_STREAMER"),
            dashboard_url: non_empty_var("DASHBOARD_URL"),
            dashboard_api_key: non_empty_var("DASHBOARD_API_KEY"),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn bool_var(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

/// Update one `KEY=VALUE` line in a `.env` file.
///
/// Existing lines for the key are replaced in place; new keys are appended.
/// Only allow-listed keys are accepted, so the dashboard cannot introduce
/// arbitrary variables.
pub fn update_env_file(path: &Path, key: &str, value: &str) -> Result<()> {
    if !UPDATABLE_ENV_KEYS.contains(&key) {
        return Err(ConfigError::UnknownSetting(key.to_string()));
    }
    if value.contains('\n') || value.contains('\r') {
        return Err(ConfigError::Invalid(format!("value for {} contains a newline", key)));
    }

    let existing = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in existing.lines() {
        let is_target = line
            .split_once('=')
            .map(|(k, _)| k.trim() == key)
            .unwrap_or(false);
        if is_target {
            lines.push(format!("{}={}", key, value));
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }

    let mut output = lines.join("\n");
    output.push('\n');
    fs::write(path, output).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Updated environment key '{}'", key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_env_file_replaces_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "OBS_HOST=10.0.0.1\nOBS_PORT=4455\n").unwrap();

        update_env_file(&path, "OBS_HOST", "10.0.0.2").unwrap();
        update_env_file(&path, "SCENE_STREAM", "Main").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("OBS_HOST=10.0.0.2"));
        assert!(!contents.contains("10.0.0.1"));
        assert!(contents.contains("OBS_PORT=4455"));
        assert!(contents.contains("SCENE_STREAM=Main"));
    }

    #[test]
    fn test_update_env_file_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let err = update_env_file(&path, "PATH", "/evil").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSetting(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_update_env_file_rejects_newline_injection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let err = update_env_file(&path, "OBS_HOST", "a\nOBS_PASSWORD=stolen").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
