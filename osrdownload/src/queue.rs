//! Cross-thread hand-off of downloaded-video metadata.
//!
//! The download worker must never touch the store (the main thread is its
//! single writer), so finished files are described here and inserted by
//! the tick loop when it drains the queue.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

/// Bounded capacity; at one registration per downloaded video this is far
/// beyond any realistic batch.
const QUEUE_CAPACITY: usize = 1024;

/// Metadata for one downloaded video awaiting database registration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRegistration {
    pub playlist_id: i64,
    pub playlist_name: String,
    pub filename: String,
    pub title: String,
    pub duration_seconds: i64,
    pub file_size_mb: i64,
}

/// Thread-safe FIFO from the download worker to the store owner.
#[derive(Clone)]
pub struct RegistrationQueue {
    tx: Sender<VideoRegistration>,
    rx: Receiver<VideoRegistration>,
}

impl Default for RegistrationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        Self { tx, rx }
    }

    /// Queue one video for registration. Called from the worker.
    pub fn enqueue(&self, registration: VideoRegistration) {
        match self.tx.try_send(registration) {
            Ok(()) => {}
            Err(TrySendError::Full(registration)) => {
                // The main loop drains every tick; a full queue means it has
                // been wedged for a long time. Dropping the oldest intent
                // beats blocking the download worker forever.
                warn!(
                    "Registration queue full, dropping oldest entry to queue {}",
                    registration.filename
                );
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(registration);
            }
            Err(TrySendError::Disconnected(registration)) => {
                warn!("Registration queue closed, dropping {}", registration.filename);
            }
        }
    }

    /// Drain every pending registration. Called from the tick loop.
    pub fn drain(&self) -> Vec<VideoRegistration> {
        let pending: Vec<VideoRegistration> = self.rx.try_iter().collect();
        if !pending.is_empty() {
            debug!("Drained {} queued video registrations", pending.len());
        }
        pending
    }

    pub fn has_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(filename: &str) -> VideoRegistration {
        VideoRegistration {
            playlist_id: 1,
            playlist_name: "CATS".to_string(),
            filename: filename.to_string(),
            title: "t".to_string(),
            duration_seconds: 60,
            file_size_mb: 10,
        }
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let queue = RegistrationQueue::new();
        queue.enqueue(registration("a.mp4"));
        queue.enqueue(registration("b.mp4"));
        assert!(queue.has_pending());

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].filename, "a.mp4");
        assert_eq!(drained[1].filename, "b.mp4");
        assert!(!queue.has_pending());
        assert!(queue.drain().is_empty());
    }
}
