//! Render-stall freeze detection and one-shot process recovery.
//!
//! Polls `GetStats` every 20 s and tracks `renderTotalFrames`. Three
//! consecutive stalled polls (~60 s without a new frame) mean the
//! compositor process is hung even though the WebSocket still answers.
//! Recovery kills the process, clears its crash sentinel so no safe-mode
//! dialog blocks the relaunch, starts it again and resumes streaming when
//! it was active before the kill. A second freeze after a failed recovery
//! is surfaced as final and left to the operator.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::{ObsError, Result};
use crate::manager::Compositor;

const POLL_INTERVAL: Duration = Duration::from_secs(20);
const STALL_THRESHOLD: u32 = 3;
const LAUNCH_WAIT: Duration = Duration::from_secs(8);

/// Outcome of a freeze check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeAction {
    /// The compositor is frozen; recovery should be attempted.
    Frozen,
    /// Frozen again after a failed recovery; no automatic restart.
    FrozenFinal,
}

/// Monitors compositor render output and recovers from process freezes.
pub struct FreezeMonitor {
    exe_path: Option<PathBuf>,
    last_render_frames: Option<u64>,
    stall_count: u32,
    last_check: Option<Instant>,
    recovery_blocked: bool,
    was_streaming: bool,
}

impl FreezeMonitor {
    pub fn new(exe_path: Option<PathBuf>) -> Self {
        if exe_path.is_none() {
            warn!(
                "Compositor executable path not configured; freeze recovery will \
                 detect but cannot relaunch"
            );
        }
        Self {
            exe_path,
            last_render_frames: None,
            stall_count: 0,
            last_check: None,
            recovery_blocked: false,
            was_streaming: false,
        }
    }

    /// Call every tick; internally polls only every 20 s.
    pub async fn check(&mut self, compositor: &dyn Compositor) -> Option<FreezeAction> {
        let now = Instant::now();
        if let Some(last) = self.last_check {
            if now.duration_since(last) < POLL_INTERVAL {
                return None;
            }
        }
        self.last_check = Some(now);

        match compositor.render_total_frames().await {
            Ok(frames) => self.observe(frames),
            Err(e) => {
                // A dead socket is the reconnect manager's problem, not a
                // freeze; drop the baseline so stale counts can't compare.
                debug!("Freeze monitor: GetStats failed ({}), skipping check", e);
                self.reset_sampling();
                None
            }
        }
    }

    /// Feed one render-frame sample into the stall state machine.
    pub fn observe(&mut self, render_total: u64) -> Option<FreezeAction> {
        let Some(last) = self.last_render_frames else {
            self.last_render_frames = Some(render_total);
            return None;
        };

        if render_total > last {
            self.last_render_frames = Some(render_total);
            self.stall_count = 0;
            return None;
        }

        self.stall_count += 1;
        warn!(
            "Freeze monitor: render frames stalled ({}/{}) — renderTotalFrames={}",
            self.stall_count, STALL_THRESHOLD, render_total
        );

        if self.stall_count < STALL_THRESHOLD {
            return None;
        }

        self.stall_count = 0;
        self.last_render_frames = None;

        if self.recovery_blocked {
            error!(
                "Compositor frozen again after a failed recovery — not restarting, \
                 manual intervention required"
            );
            return Some(FreezeAction::FrozenFinal);
        }
        Some(FreezeAction::Frozen)
    }

    /// Record whether the compositor was streaming (call before the kill).
    pub async fn capture_stream_state(&mut self, compositor: &dyn Compositor) -> bool {
        match compositor.stream_active().await {
            Ok(active) => {
                info!(
                    "Freeze recovery: stream was {}",
                    if active { "active" } else { "inactive" }
                );
                self.was_streaming = active;
            }
            Err(e) => {
                warn!("Failed to capture stream status before kill: {}", e);
                self.was_streaming = false;
            }
        }
        self.was_streaming
    }

    pub fn was_streaming(&self) -> bool {
        self.was_streaming
    }

    /// Force-kill the compositor process.
    pub fn kill_compositor(&mut self) -> bool {
        warn!("Freeze recovery: killing compositor process...");
        let output = if cfg!(windows) {
            std::process::Command::new("taskkill")
                .args(["/F", "/IM", "obs64.exe"])
                .output()
        } else {
            std::process::Command::new("pkill")
                .args(["-9", "obs"])
                .output()
        };

        match output {
            Ok(out) if out.status.success() => {
                info!("Freeze recovery: compositor process killed");
                self.reset_sampling();
                true
            }
            Ok(out) => {
                warn!(
                    "Freeze recovery: kill returned non-zero: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                false
            }
            Err(e) => {
                error!("Freeze recovery: failed to kill compositor: {}", e);
                false
            }
        }
    }

    /// Relaunch the compositor executable and wait for it to initialize.
    pub async fn launch_compositor(&self) -> Result<()> {
        let Some(exe) = &self.exe_path else {
            return Err(ObsError::Recovery(
                "compositor executable path unknown (set OBS_PATH)".to_string(),
            ));
        };
        if !exe.is_file() {
            return Err(ObsError::Recovery(format!(
                "compositor executable not found at {}",
                exe.display()
            )));
        }

        clear_crash_sentinel();

        info!("Freeze recovery: launching compositor from {}...", exe.display());
        let mut command = std::process::Command::new(exe);
        command.args(["--minimize-to-tray", "--disable-missing-files-check"]);
        if let Some(dir) = exe.parent() {
            command.current_dir(dir);
        }
        command
            .spawn()
            .map_err(|e| ObsError::Recovery(format!("failed to launch compositor: {}", e)))?;

        info!("Freeze recovery: waiting {:?} for compositor to initialize...", LAUNCH_WAIT);
        tokio::time::sleep(LAUNCH_WAIT).await;
        Ok(())
    }

    /// Re-start streaming when it was active before the kill.
    pub async fn resume_streaming(&self, compositor: &dyn Compositor) -> Result<()> {
        if !self.was_streaming {
            info!("Freeze recovery: compositor was not streaming — skipping StartStream");
            return Ok(());
        }
        info!("Freeze recovery: resuming streaming (StartStream)...");
        compositor.start_stream().await
    }

    /// Record the outcome of a recovery cycle.
    ///
    /// After a restart `renderTotalFrames` resets to near zero, so the old
    /// baseline must be dropped either way. A failed recovery blocks future
    /// automatic restarts.
    pub fn mark_recovery_attempted(&mut self, succeeded: bool) {
        self.recovery_blocked = !succeeded;
        self.reset_sampling();
    }

    fn reset_sampling(&mut self) {
        self.last_render_frames = None;
        self.stall_count = 0;
    }
}

/// Delete the compositor's startup sentinel files.
///
/// OBS drops a `run_<uuid>` file in `.sentinel/` at startup and removes it
/// on clean exit; stale entries from a forced kill make the next launch
/// show the safe-mode prompt, which would block an unattended relaunch.
fn clear_crash_sentinel() {
    let sentinel_dir = if cfg!(windows) {
        std::env::var("APPDATA")
            .map(|appdata| PathBuf::from(appdata).join("obs-studio").join(".sentinel"))
            .ok()
    } else {
        std::env::var("HOME")
            .map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("obs-studio")
                    .join(".sentinel")
            })
            .ok()
    };

    let Some(dir) = sentinel_dir.filter(|d| d.is_dir()) else {
        return;
    };

    let mut count = 0usize;
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && std::fs::remove_file(&path).is_ok() {
                count += 1;
            }
        }
    }
    if count > 0 {
        info!("Freeze recovery: cleared {} stale sentinel file(s)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_advancing_never_triggers() {
        let mut monitor = FreezeMonitor::new(None);
        assert_eq!(monitor.observe(100), None);
        assert_eq!(monitor.observe(101), None);
        assert_eq!(monitor.observe(250), None);
    }

    #[test]
    fn test_three_stalls_trigger_recovery() {
        let mut monitor = FreezeMonitor::new(None);
        assert_eq!(monitor.observe(100), None);
        assert_eq!(monitor.observe(100), None);
        assert_eq!(monitor.observe(100), None);
        assert_eq!(monitor.observe(100), Some(FreezeAction::Frozen));
        // Baseline is dropped after the trigger.
        assert_eq!(monitor.observe(3), None);
    }

    #[test]
    fn test_stall_counter_resets_on_advance() {
        let mut monitor = FreezeMonitor::new(None);
        monitor.observe(100);
        assert_eq!(monitor.observe(100), None);
        assert_eq!(monitor.observe(100), None);
        // Advances just before the threshold.
        assert_eq!(monitor.observe(101), None);
        assert_eq!(monitor.observe(101), None);
        assert_eq!(monitor.observe(101), None);
        assert_eq!(monitor.observe(101), Some(FreezeAction::Frozen));
    }

    #[test]
    fn test_failed_recovery_blocks_future_restarts() {
        let mut monitor = FreezeMonitor::new(None);
        monitor.observe(100);
        monitor.observe(100);
        monitor.observe(100);
        assert_eq!(monitor.observe(100), Some(FreezeAction::Frozen));

        monitor.mark_recovery_attempted(false);

        monitor.observe(5);
        monitor.observe(5);
        monitor.observe(5);
        assert_eq!(monitor.observe(5), Some(FreezeAction::FrozenFinal));
    }

    #[test]
    fn test_successful_recovery_keeps_monitor_armed() {
        let mut monitor = FreezeMonitor::new(None);
        monitor.observe(100);
        monitor.observe(100);
        monitor.observe(100);
        assert_eq!(monitor.observe(100), Some(FreezeAction::Frozen));

        monitor.mark_recovery_attempted(true);

        monitor.observe(5);
        monitor.observe(5);
        monitor.observe(5);
        assert_eq!(monitor.observe(5), Some(FreezeAction::Frozen));
    }
}
