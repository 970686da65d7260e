//! Log capture for the dashboard feed.
//!
//! A tracing `Layer` formats every event into a [`LogEntry`] and fans it
//! out over a broadcast channel; the dashboard client forwards entries as
//! they are produced and lagging consumers simply miss the oldest ones.

use std::fmt::Write as _;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One formatted log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Broadcast hub for log entries.
#[derive(Clone)]
pub struct LogHub {
    tx: broadcast::Sender<LogEntry>,
}

impl LogHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn layer(&self) -> LogLayer {
        LogLayer { tx: self.tx.clone() }
    }
}

/// tracing layer feeding the hub.
pub struct LogLayer {
    tx: broadcast::Sender<LogEntry>,
}

impl<S: tracing::Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        // No subscribers, no work.
        if self.tx.receiver_count() == 0 {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string().to_lowercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        };
        let _ = self.tx.send(entry);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            let _ = write!(self.message, "{}={}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_layer_captures_events() {
        let hub = LogHub::new(16);
        let mut rx = hub.subscribe();

        let subscriber = tracing_subscriber::registry().with(hub.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("rotation {} ready", 7);
        });

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.level, "info");
        assert!(entry.message.contains("rotation 7 ready"));
    }

    #[test]
    fn test_layer_skips_work_without_subscribers() {
        let hub = LogHub::new(16);
        let subscriber = tracing_subscriber::registry().with(hub.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("nobody listening");
        });
        // Subscribing after the fact sees nothing.
        let mut rx = hub.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
