//! Folder-switch primitives for the content rotation protocol.
//!
//! Three components mutate content folders: the downloader writes into
//! `pending/`, the content-switch handler wipes `live/` and moves files
//! across, and the playback monitor deletes single files. The move/wipe
//! primitives live here so the handlers share one implementation of the
//! archive-file exclusion rules.

use std::io;
use std::path::Path;

use tracing::{error, info, warn};

use crate::DOWNLOAD_ARCHIVE_FILENAME;

/// Delete every entry inside `folder` (files and subdirectories).
///
/// Individual failures are logged and skipped so one locked file does not
/// leave the rest of a stale rotation behind.
pub fn wipe_folder(folder: &Path) -> io::Result<()> {
    if !folder.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            error!("Failed to delete {}: {}", path.display(), e);
        }
    }
    Ok(())
}

/// Move everything from `from` into `to`, excluding the download archive.
///
/// The archive file is removed from `from` after the move so a fresh
/// download cycle starts with a clean slate. Cross-device moves fall back
/// to copy-then-delete.
pub fn move_folder_contents(from: &Path, to: &Path) -> io::Result<()> {
    if !from.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(to)?;

    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy() == DOWNLOAD_ARCHIVE_FILENAME {
            continue;
        }
        let src = entry.path();
        let dst = to.join(&name);
        if let Err(e) = move_entry(&src, &dst) {
            error!("Failed to move {} to {}: {}", src.display(), dst.display(), e);
        }
    }

    let archive = from.join(DOWNLOAD_ARCHIVE_FILENAME);
    if archive.exists() {
        if let Err(e) = std::fs::remove_file(&archive) {
            warn!("Failed to remove download archive {}: {}", archive.display(), e);
        }
    }

    Ok(())
}

/// Copy everything from `from` into `to` without touching `from`.
///
/// Used by the override protocol to add content on top of the live folder
/// and to back up folders before a destructive switch.
pub fn copy_folder_contents(from: &Path, to: &Path) -> io::Result<usize> {
    if !from.exists() {
        return Ok(0);
    }
    std::fs::create_dir_all(to)?;

    let mut copied = 0usize;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let src = entry.path();
        if !src.is_file() {
            continue;
        }
        let dst = to.join(entry.file_name());
        std::fs::copy(&src, &dst)?;
        copied += 1;
    }
    Ok(copied)
}

/// Standard content switch: wipe `live`, then move `pending` into it.
pub fn switch_content_folders(live: &Path, pending: &Path) -> io::Result<()> {
    wipe_folder(live)?;
    move_folder_contents(pending, live)?;
    info!("Content folders switched: {} -> {}", pending.display(), live.display());
    Ok(())
}

/// Rename videos in `folder` with a playlist ordering prefix.
///
/// `playlist_order` is the selection order of the rotation; videos whose
/// filename starts with a playlist name get that playlist's 1-based
/// two-digit prefix so alphabetical playback groups by playlist. Files
/// already carrying a prefix are left alone (idempotent across restarts).
pub fn rename_with_playlist_prefix(folder: &Path, playlist_order: &[String]) -> io::Result<usize> {
    let mut renamed = 0usize;

    for file in crate::video_files_sorted(folder) {
        if crate::ordering_prefix_of(&file).is_some() {
            continue;
        }
        let Some(position) = playlist_order
            .iter()
            .position(|name| stem_matches_playlist(&file, name))
        else {
            continue;
        };

        let new_name = format!("{}{}", crate::ordering_prefix(position + 1), file);
        let src = folder.join(&file);
        let dst = folder.join(&new_name);
        match std::fs::rename(&src, &dst) {
            Ok(()) => renamed += 1,
            Err(e) => error!("Failed to rename {} to {}: {}", file, new_name, e),
        }
    }

    Ok(renamed)
}

/// Whether a downloaded filename belongs to `playlist`.
///
/// The downloader's output template starts filenames with the playlist
/// title, so a prefix match (whitespace-insensitive) is sufficient.
pub fn stem_matches_playlist(filename: &str, playlist: &str) -> bool {
    let compact_file: String = filename.chars().filter(|c| !c.is_whitespace()).collect();
    let compact_playlist: String = playlist.chars().filter(|c| !c.is_whitespace()).collect();
    compact_file
        .to_lowercase()
        .starts_with(&compact_playlist.to_lowercase())
}

fn move_entry(src: &Path, dst: &Path) -> io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) if src.is_file() => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}
