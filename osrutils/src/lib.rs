//! Shared video filename and folder helpers used across the workspace.
//!
//! Centralizes the recognised video extensions, the two-digit ordering
//! prefix convention (`NN_`), sorted folder scans and the folder-switch
//! primitives so the handlers don't each grow their own copy.

pub mod folders;

use std::path::Path;

/// Video extensions the rotation pipeline recognises (lowercase, with dot).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".webm", ".flv", ".mov"];

/// Name of the yt-dlp download archive kept in the pending folder.
///
/// The archive must never be moved into the live folder during a content
/// switch and must never be offered to the media source as playable content.
pub const DOWNLOAD_ARCHIVE_FILENAME: &str = "archive.txt";

/// Returns true when `filename` carries a recognised video extension.
pub fn is_video_file(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Strip the ordering prefix (e.g. `01_`) from a video filename.
///
/// Videos are stored in the database without the prefix, so this recovers
/// the original filename for lookups. Filenames without a prefix are
/// returned unchanged.
pub fn strip_ordering_prefix(filename: &str) -> &str {
    let bytes = filename.as_bytes();
    if bytes.len() > 3
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'_'
    {
        &filename[3..]
    } else {
        filename
    }
}

/// Build the two-digit ordering prefix for a 1-based playlist position.
pub fn ordering_prefix(position: usize) -> String {
    format!("{:02}_", position)
}

/// Returns the `NN` prefix digits of a filename, when present.
pub fn ordering_prefix_of(filename: &str) -> Option<&str> {
    let bytes = filename.as_bytes();
    if bytes.len() > 3
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'_'
    {
        Some(&filename[..2])
    } else {
        None
    }
}

/// Video files in `folder`, sorted alphabetically (prefix-ordered).
///
/// Missing or unreadable folders yield an empty list; the caller decides
/// whether that is worth reporting.
pub fn video_files_sorted(folder: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_video_file(name))
        .collect();
    files.sort();
    files
}

/// Whether `folder` contains at least one recognised video file.
pub fn has_video_files(folder: &Path) -> bool {
    !video_files_sorted(folder).is_empty()
}

/// Extract a display title from a downloaded filename.
///
/// Drops the extension, removes bracketed quality tags like `[720p]` or
/// `(1080p)` and collapses whitespace. For the downloader's output template
/// `<playlist>_<index>_<title>.<ext>` the playlist/index part is stripped
/// first so the database title matches what the viewer sees.
pub fn extract_title_from_filename(filename: &str) -> String {
    let stem = match filename.rfind('.') {
        Some(idx) if is_video_file(filename) => &filename[..idx],
        _ => filename,
    };

    // Output template part: "<playlist>_<index>_<title>"
    let stem = match split_template_title(stem) {
        Some(title) => title,
        None => stem,
    };

    let mut title = String::with_capacity(stem.len());
    let mut depth = 0usize;
    for ch in stem.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => title.push(ch),
            _ => {}
        }
    }

    let collapsed: Vec<&str> = title.split_whitespace().collect();
    collapsed.join(" ")
}

/// Extract the unique playlist-name stems from files in a folder.
///
/// Filenames follow `<playlist>_<index>_<title>.<ext>`; everything before
/// the `_<index>_` separator is the playlist name.
pub fn playlists_in_folder(folder: &Path) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for file in video_files_sorted(folder) {
        let stem = strip_ordering_prefix(&file);
        if let Some(name) = split_template_playlist(stem) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    names
}

/// Title part of a `<playlist>_<index>_<title>` stem, if it parses.
fn split_template_title(stem: &str) -> Option<&str> {
    let (_, rest) = split_on_index(stem)?;
    Some(rest)
}

/// Playlist part of a `<playlist>_<index>_<title>` stem, if it parses.
fn split_template_playlist(stem: &str) -> Option<&str> {
    let (playlist, _) = split_on_index(stem)?;
    Some(playlist)
}

/// Split a stem on its first `_<digits>_` separator.
fn split_on_index(stem: &str) -> Option<(&str, &str)> {
    let bytes = stem.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b'_' {
                return Some((&stem[..i], &stem[j + 1..]));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file("clip.mp4"));
        assert!(is_video_file("CLIP.WEBM"));
        assert!(is_video_file("01_show_3_part one.mkv"));
        assert!(!is_video_file("archive.txt"));
        assert!(!is_video_file("clip.mp4.part"));
    }

    #[test]
    fn test_strip_ordering_prefix() {
        assert_eq!(strip_ordering_prefix("01_CATS Being the Boss.webm"), "CATS Being the Boss.webm");
        assert_eq!(strip_ordering_prefix("12_x.mp4"), "x.mp4");
        assert_eq!(strip_ordering_prefix("no_prefix.mp4"), "no_prefix.mp4");
        assert_eq!(strip_ordering_prefix("1_short.mp4"), "1_short.mp4");
        assert_eq!(strip_ordering_prefix("123_three.mp4"), "123_three.mp4");
    }

    #[test]
    fn test_prefix_round_trip() {
        for (position, name) in [(1, "a.mp4"), (2, "b.webm"), (10, "c.mkv")] {
            let prefixed = format!("{}{}", ordering_prefix(position), name);
            assert_eq!(strip_ordering_prefix(&prefixed), name);
        }
    }

    #[test]
    fn test_ordering_prefix_of() {
        assert_eq!(ordering_prefix_of("02_clip.mp4"), Some("02"));
        assert_eq!(ordering_prefix_of("clip.mp4"), None);
    }

    #[test]
    fn test_extract_title_from_filename() {
        assert_eq!(
            extract_title_from_filename("CATS_3_Being the Boss [720p].webm"),
            "Being the Boss"
        );
        assert_eq!(extract_title_from_filename("Plain Clip.mp4"), "Plain Clip");
        assert_eq!(
            extract_title_from_filename("MW2_12_Nuke  Speedrun (1080p).mp4"),
            "Nuke Speedrun"
        );
    }

    #[test]
    fn test_video_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.webm", "notes.txt", "c.MOV"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(video_files_sorted(dir.path()), vec!["a.webm", "b.mp4", "c.MOV"]);
        assert!(video_files_sorted(Path::new("/nonexistent/folder")).is_empty());
    }

    #[test]
    fn test_playlists_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["01_CATS_1_intro.mp4", "01_CATS_2_more.mp4", "02_MW2_1_run.webm"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(playlists_in_folder(dir.path()), vec!["CATS", "MW2"]);
    }
}
