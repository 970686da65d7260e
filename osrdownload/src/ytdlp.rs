//! yt-dlp subprocess invocation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::{DownloadError, Result};

/// Hard ceiling on one playlist download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

/// Downloader knobs surfaced through the settings document.
#[derive(Debug, Clone)]
pub struct YtDlpOptions {
    pub use_cookies: bool,
    pub browser_for_cookies: String,
    pub verbose: bool,
    pub retry_attempts: u32,
}

impl Default for YtDlpOptions {
    fn default() -> Self {
        Self {
            use_cookies: false,
            browser_for_cookies: "firefox".to_string(),
            verbose: false,
            retry_attempts: 3,
        }
    }
}

/// Argument list for one playlist download.
///
/// The download archive makes deleted videos stay deleted: files removed
/// by the playback monitor are still listed in `archive.txt`, so a resumed
/// download into the same folder skips them instead of re-fetching.
pub fn command_args(playlist_url: &str, output_folder: &Path, options: &YtDlpOptions) -> Vec<String> {
    let mut args = vec!["--no-warnings".to_string()];
    if options.verbose {
        args.push("--verbose".to_string());
    } else {
        args.push("-q".to_string());
    }
    if options.use_cookies {
        args.push("--cookies-from-browser".to_string());
        args.push(options.browser_for_cookies.clone());
    }
    args.push("--user-agent".to_string());
    args.push(USER_AGENT.to_string());
    args.push("--retries".to_string());
    args.push("10".to_string());
    args.push("--fragment-retries".to_string());
    args.push("10".to_string());
    args.push("--ignore-errors".to_string());
    args.push("--geo-bypass".to_string());
    args.push("--continue".to_string());
    args.push("--download-archive".to_string());
    args.push(
        output_folder
            .join(osrutils::DOWNLOAD_ARCHIVE_FILENAME)
            .to_string_lossy()
            .into_owned(),
    );
    args.push("-o".to_string());
    args.push(
        output_folder
            .join("%(playlist_title)s_%(playlist_index)s_%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned(),
    );
    args.push(playlist_url.to_string());
    args
}

/// Run one yt-dlp download attempt.
async fn run_once(playlist_url: &str, output_folder: &Path, options: &YtDlpOptions) -> Result<bool> {
    let args = command_args(playlist_url, output_folder, options);
    let mut child = tokio::process::Command::new("yt-dlp")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DownloadError::ToolMissing("yt-dlp")
            } else {
                DownloadError::Spawn(e)
            }
        })?;

    let output = match tokio::time::timeout(DOWNLOAD_TIMEOUT, child.wait_with_output()).await {
        Ok(result) => result.map_err(DownloadError::Spawn)?,
        Err(_) => {
            warn!("Download timed out after 1 hour: {}", playlist_url);
            return Ok(false);
        }
    };

    if output.status.success() {
        Ok(true)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            "yt-dlp returned {:?}: {}",
            output.status.code(),
            stderr.chars().take(200).collect::<String>()
        );
        Ok(false)
    }
}

/// Download one playlist with retries. Returns true on success.
pub async fn download_playlist(
    playlist_url: &str,
    output_folder: &Path,
    options: &YtDlpOptions,
) -> Result<bool> {
    std::fs::create_dir_all(output_folder).map_err(DownloadError::Spawn)?;

    let attempts = options.retry_attempts.max(1);
    for attempt in 1..=attempts {
        info!("Downloading playlist (attempt {}/{}): {}", attempt, attempts, playlist_url);
        match run_once(playlist_url, output_folder, options).await {
            Ok(true) => {
                info!("Successfully downloaded playlist: {}", playlist_url);
                return Ok(true);
            }
            Ok(false) => {}
            Err(DownloadError::ToolMissing(tool)) => {
                error!("{} not found on PATH — install it to enable downloads", tool);
                return Err(DownloadError::ToolMissing(tool));
            }
            Err(e) => warn!("Download error (attempt {}/{}): {}", attempt, attempts, e),
        }
    }

    error!("Failed to download playlist after {} attempts: {}", attempts, playlist_url);
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_command_args_default() {
        let folder = PathBuf::from("/tmp/pending");
        let args = command_args("https://example.com/list", &folder, &YtDlpOptions::default());

        assert!(args.contains(&"-q".to_string()));
        assert!(!args.contains(&"--verbose".to_string()));
        assert!(!args.contains(&"--cookies-from-browser".to_string()));
        assert!(args.contains(&"--geo-bypass".to_string()));
        assert!(args.contains(&"--continue".to_string()));

        let archive_pos = args.iter().position(|a| a == "--download-archive").unwrap();
        assert!(args[archive_pos + 1].ends_with("archive.txt"));

        let output_pos = args.iter().position(|a| a == "-o").unwrap();
        assert!(args[output_pos + 1].contains("%(playlist_title)s_%(playlist_index)s_%(title)s"));

        assert_eq!(args.last().unwrap(), "https://example.com/list");
    }

    #[test]
    fn test_command_args_cookies_and_verbose() {
        let folder = PathBuf::from("/tmp/pending");
        let options = YtDlpOptions {
            use_cookies: true,
            browser_for_cookies: "chromium".to_string(),
            verbose: true,
            retry_attempts: 3,
        };
        let args = command_args("u", &folder, &options);

        assert!(args.contains(&"--verbose".to_string()));
        assert!(!args.contains(&"-q".to_string()));
        let cookie_pos = args.iter().position(|a| a == "--cookies-from-browser").unwrap();
        assert_eq!(args[cookie_pos + 1], "chromium");
    }
}
