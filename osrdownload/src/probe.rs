//! Media metadata probing via ffprobe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Video duration in whole seconds, or 0 when it cannot be determined.
///
/// Probing failures are not fatal: a zero duration only degrades the
/// rotation-length estimate, which falls back to `rotation_hours`.
pub async fn video_duration_seconds(path: &Path) -> i64 {
    let child = tokio::process::Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("ffprobe not found; install ffmpeg for video duration detection");
            return 0;
        }
        Err(e) => {
            warn!("Failed to spawn ffprobe for {}: {}", path.display(), e);
            return 0;
        }
    };

    let output = match tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("ffprobe failed for {}: {}", path.display(), e);
            return 0;
        }
        Err(_) => {
            warn!("Timeout probing duration for {}", path.display());
            return 0;
        }
    };

    if !output.status.success() {
        warn!(
            "ffprobe returned {:?} for {}",
            output.status.code(),
            path.display()
        );
        return 0;
    }

    let duration = parse_duration(&output.stdout);
    debug!("Probed duration for {}: {}s", path.display(), duration);
    duration
}

fn parse_duration(stdout: &[u8]) -> i64 {
    serde_json::from_slice::<serde_json::Value>(stdout)
        .ok()
        .and_then(|v| {
            v.get("format")
                .and_then(|f| f.get("duration"))
                .and_then(|d| d.as_str())
                .and_then(|s| s.parse::<f64>().ok())
        })
        .map(|secs| secs as i64)
        .unwrap_or(0)
}
