//! Event-driven playback monitoring.
//!
//! The compositor fires `MediaInputPlaybackStarted` / `...Ended` events on
//! the media source; the connection layer normalises them into a queue the
//! [`PlaybackMonitor`] drains once per tick. The monitor owns
//! current-video tracking, deletion of finished files, the media-source
//! refresh after a deletion, and the `all_content_consumed` /
//! `needs_vlc_refresh` signals the orchestrator acts on.

mod monitor;

pub use monitor::{PlaybackMonitor, TransitionReport};

use osrobs::MediaEvent;

/// Count genuine transitions in a batch of media events.
///
/// Event behaviour of the compositor's VLC integration:
///
/// * `started` fires each time a new **track** begins — both on natural
///   advances and whenever the source is (re)configured.
/// * `ended` fires when the **entire playlist** finishes, not per track
///   (on some versions it fires per track as well).
///
/// `started` is therefore the per-track signal, but reconfigurations fire
/// a spurious one: `suppress_started` (decremented here) absorbs those.
/// Each `ended` always counts as one transition and locally absorbs one
/// immediately-following `started` so the `ended→started` pair the
/// compositor emits at a playlist boundary counts once, not twice.
pub fn count_transitions(events: &[MediaEvent], suppress_started: &mut u32) -> usize {
    let mut transitions = 0usize;
    let mut local_suppress = 0u32;

    for event in events {
        match event {
            MediaEvent::Ended => {
                transitions += 1;
                local_suppress += 1;
            }
            MediaEvent::Started => {
                if *suppress_started > 0 {
                    *suppress_started -= 1;
                    tracing::debug!(
                        "Suppressed spurious 'started' event (source reconfiguration, remaining: {})",
                        suppress_started
                    );
                } else if local_suppress > 0 {
                    local_suppress -= 1;
                } else {
                    transitions += 1;
                }
            }
        }
    }

    transitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use MediaEvent::{Ended, Started};

    #[test]
    fn test_no_events_no_transitions() {
        let mut suppress = 1;
        assert_eq!(count_transitions(&[], &mut suppress), 0);
        assert_eq!(suppress, 1);
    }

    #[test]
    fn test_single_started_is_genuine() {
        let mut suppress = 0;
        assert_eq!(count_transitions(&[Started], &mut suppress), 1);
    }

    #[test]
    fn test_suppression_absorbs_reconfiguration_start() {
        let mut suppress = 1;
        assert_eq!(count_transitions(&[Started], &mut suppress), 0);
        assert_eq!(suppress, 0);
        // The next one is genuine.
        assert_eq!(count_transitions(&[Started], &mut suppress), 1);
    }

    #[test]
    fn test_ended_started_pair_counts_once() {
        let mut suppress = 0;
        assert_eq!(count_transitions(&[Ended, Started], &mut suppress), 1);
    }

    #[test]
    fn test_ended_alone_counts() {
        let mut suppress = 0;
        assert_eq!(count_transitions(&[Ended], &mut suppress), 1);
    }

    #[test]
    fn test_mixed_sequence_with_initial_suppression() {
        // started (absorbed by counter), ended (+1, arms local suppress),
        // started (paired with ended), started (genuine) => 2 transitions.
        let mut suppress = 1;
        let events = [Started, Ended, Started, Started];
        assert_eq!(count_transitions(&events, &mut suppress), 2);
        assert_eq!(suppress, 0);
    }

    #[test]
    fn test_rapid_skips_count_individually() {
        let mut suppress = 0;
        let events = [Started, Started, Started];
        assert_eq!(count_transitions(&events, &mut suppress), 3);
    }

    #[test]
    fn test_local_suppress_does_not_leak_across_calls() {
        let mut suppress = 0;
        assert_eq!(count_transitions(&[Ended], &mut suppress), 1);
        // The pairing window closed with the previous batch.
        assert_eq!(count_transitions(&[Started], &mut suppress), 1);
    }
}
