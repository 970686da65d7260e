//! Stream title generation and truncation.

use tracing::{info, warn};

/// Kick's title limit; Twitch allows more, so the shorter bound wins.
pub const MAX_TITLE_LENGTH: usize = 140;

/// Substitute `{GAMES}` in the template with the uppercased playlist
/// names joined by ` | `.
pub fn generate_stream_title(template: &str, playlists: &[String]) -> String {
    let games = if playlists.is_empty() {
        "VARIETY".to_string()
    } else {
        playlists
            .iter()
            .map(|name| name.to_uppercase())
            .collect::<Vec<_>>()
            .join(" | ")
    };
    template.replace("{GAMES}", &games)
}

/// Truncate a stream title to the platform limit.
///
/// Long titles lose trailing `| PLAYLIST` segments one at a time; the
/// template portion before the first separator is always preserved. A
/// trailing ` | ` is appended when it still fits, matching the template's
/// shape.
pub fn truncate_stream_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LENGTH {
        return title.to_string();
    }

    let parts: Vec<&str> = title.split(" | ").collect();
    if parts.len() < 2 {
        warn!(
            "Could not parse title for truncation: {}...",
            title.chars().take(50).collect::<String>()
        );
        return title.chars().take(MAX_TITLE_LENGTH).collect();
    }

    let mut result = parts[0].to_string();
    for part in &parts[1..] {
        let candidate = format!("{} | {}", result, part);
        if candidate.chars().count() <= MAX_TITLE_LENGTH {
            result = candidate;
        } else {
            break;
        }
    }

    if !result.ends_with(" | ") && result.chars().count() + 3 <= MAX_TITLE_LENGTH {
        result.push_str(" | ");
    }

    info!(
        "Truncated title from {} to {} chars: {}",
        title.chars().count(),
        result.chars().count(),
        result
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_title_substitutes_games() {
        let title = generate_stream_title(
            "24/7 Variety | {GAMES} | !playlist",
            &["cats".to_string(), "mw2".to_string()],
        );
        assert_eq!(title, "24/7 Variety | CATS | MW2 | !playlist");
    }

    #[test]
    fn test_generate_title_empty_selection() {
        let title = generate_stream_title("{GAMES}", &[]);
        assert_eq!(title, "VARIETY");
    }

    #[test]
    fn test_short_title_unchanged() {
        assert_eq!(truncate_stream_title("short title"), "short title");
    }

    #[test]
    fn test_truncation_drops_trailing_playlists() {
        let playlists: Vec<String> = (0..12).map(|i| format!("PLAYLIST-NUMBER-{:02}", i)).collect();
        let title = generate_stream_title("24/7 | {GAMES}", &playlists);
        assert!(title.len() > MAX_TITLE_LENGTH);

        let truncated = truncate_stream_title(&title);
        assert!(truncated.chars().count() <= MAX_TITLE_LENGTH);
        // Template prefix survives.
        assert!(truncated.starts_with("24/7"));
        // The first playlist survives, the tail is dropped.
        assert!(truncated.contains("PLAYLIST-NUMBER-00"));
        assert!(!truncated.contains("PLAYLIST-NUMBER-11"));
    }

    #[test]
    fn test_truncation_keeps_separator_shape() {
        let playlists: Vec<String> = (0..12).map(|i| format!("PLAYLIST-NUMBER-{:02}", i)).collect();
        let title = generate_stream_title("24/7 | {GAMES}", &playlists);
        let truncated = truncate_stream_title(&title);
        assert!(truncated.ends_with(" | "));
    }

    #[test]
    fn test_unparseable_long_title_hard_truncates() {
        let title = "x".repeat(200);
        let truncated = truncate_stream_title(&title);
        assert_eq!(truncated.chars().count(), MAX_TITLE_LENGTH);
    }
}
