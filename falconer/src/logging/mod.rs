//! Logging setup and the observable log sink.
//!
//! Every tracing event is rendered once and multicast over a bounded
//! broadcast channel so the transport layer can stream logs to web clients.
//! A subscriber that falls behind lags and is dropped by the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "falconer=info,sqlx=warn";

/// Broadcast channel capacity for log events.
const LOG_BROADCAST_CAPACITY: usize = 1024;

/// A single log event, as streamed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Handle for subscribing to the log stream.
#[derive(Clone)]
pub struct LogObserver {
    tx: broadcast::Sender<LogEvent>,
}

impl LogObserver {
    fn new(tx: broadcast::Sender<LogEvent>) -> Self {
        Self { tx }
    }

    /// Subscribe to log events; the receiver lags and drops when it falls
    /// behind the channel capacity.
    pub fn observe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Layer that converts every event into a [`LogEvent`] and multicasts it.
struct BroadcastLayer {
    tx: broadcast::Sender<LogEvent>,
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        // A send failure only means there is no observer attached.
        let _ = self.tx.send(LogEvent {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// Initialise the global subscriber: stdout fmt layer, the broadcast
/// observer layer and, when enabled, a non-blocking daily-rotated file.
///
/// The returned guard must be held for the lifetime of the process so the
/// file writer flushes on shutdown.
pub fn init(cfg: &LoggingConfig) -> Result<(LogObserver, Option<WorkerGuard>)> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
    let observer = LogObserver::new(tx.clone());

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let broadcast_layer = BroadcastLayer { tx };

    let mut guard = None;
    let file_layer = if cfg.enable_file_logging {
        let path = std::path::Path::new(&cfg.log_path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file = path
            .file_name()
            .ok_or_else(|| Error::config(format!("invalid log path: {}", cfg.log_path)))?;

        let appender = tracing_appender::rolling::daily(dir, file);
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);

        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .with(broadcast_layer)
        .try_init()
        .map_err(|e| Error::config(format!("failed to initialise logging: {e}")))?;

    Ok((observer, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_observers() {
        let (tx, mut rx) = broadcast::channel(16);
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer { tx });

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(url = "https://x/v1", "requesting download");
        });

        let event = rx.try_recv().expect("one event");
        assert_eq!(event.level, "INFO");
        assert_eq!(event.message, "requesting download");
    }

    #[tokio::test]
    async fn laggards_drop_oldest_events() {
        let (tx, mut rx) = broadcast::channel(2);
        let subscriber = tracing_subscriber::registry().with(BroadcastLayer { tx });

        tracing::subscriber::with_default(subscriber, || {
            for i in 0..5 {
                tracing::info!("event {i}");
            }
        });

        // The receiver lagged; the channel reports how much was skipped.
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
