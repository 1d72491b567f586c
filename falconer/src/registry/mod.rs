//! In-memory process registry.
//!
//! Concurrent id-to-driver map with read-heavy access. `all()` returns
//! snapshots by value so callers never hold the registry lock while
//! inspecting handles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{DownloaderKind, ProcessSnapshot};
use crate::downloader::{CompletionEvent, CompletionSender, Downloader};
use crate::{Error, Result};

pub struct Registry {
    table: Arc<RwLock<HashMap<String, Arc<dyn Downloader>>>>,
    events_tx: mpsc::UnboundedSender<CompletionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<CompletionEvent>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            table: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Sender handed to drivers so they can announce completion.
    pub fn completion_sender(&self) -> CompletionSender {
        self.events_tx.clone()
    }

    /// Look up a driver by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Downloader>> {
        self.table
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("process", id))
    }

    /// Store a driver and return its id.
    pub fn set(&self, driver: Arc<dyn Downloader>) -> String {
        let id = driver.id();
        self.table.write().insert(id.clone(), driver);
        id
    }

    /// Remove an entry, if present.
    pub fn delete(&self, id: &str) {
        self.table.write().remove(id);
    }

    pub fn keys(&self) -> Vec<String> {
        self.table.read().keys().cloned().collect()
    }

    /// By-value snapshots of every registered handle, consistent at the
    /// moment of the read lock.
    pub fn all(&self) -> Vec<ProcessSnapshot> {
        self.table.read().values().map(|d| d.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Compaction listener: live-stream entries are transient, so they are
    /// dropped from the registry once their driver completes.
    pub fn run_event_listener(&self, token: CancellationToken) {
        let Some(mut rx) = self.events_rx.lock().take() else {
            warn!("registry event listener already running");
            return;
        };

        let table = Arc::clone(&self.table);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            if event.kind == DownloaderKind::Livestream {
                                info!(id = %event.id, "compacting registry");
                                table.write().remove(&event.id);
                            }
                        }
                        None => break,
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{DriverConfig, GenericDownloader, LiveStreamDownloader};
    use std::time::Duration;

    fn test_cfg() -> DriverConfig {
        DriverConfig {
            downloader_path: "yt-dlp".to_string(),
            download_dir: "/dl".into(),
        }
    }

    #[test]
    fn set_get_delete_round_trip() {
        let registry = Registry::new();
        let driver = GenericDownloader::new(
            "https://x/v1",
            Vec::new(),
            test_cfg(),
            registry.completion_sender(),
        );

        let id = registry.set(driver);
        assert!(registry.get(&id).is_ok());
        assert_eq!(registry.keys(), vec![id.clone()]);
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.all()[0].id, id);

        registry.delete(&id);
        assert!(registry.get(&id).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_id_is_not_found() {
        let registry = Registry::new();
        match registry.get("nope") {
            Err(err) => assert!(err.to_string().contains("not found")),
            Ok(_) => panic!("missing"),
        }
    }

    #[tokio::test]
    async fn livestream_completion_compacts_entry() {
        let registry = Registry::new();
        let token = CancellationToken::new();
        registry.run_event_listener(token.clone());

        let driver = LiveStreamDownloader::new(
            "https://twitch.tv/u",
            Vec::new(),
            test_cfg(),
            None,
            registry.completion_sender(),
        );
        let id = registry.set(driver);

        registry
            .events_tx
            .send(CompletionEvent {
                id: id.clone(),
                kind: DownloaderKind::Livestream,
            })
            .expect("send event");

        for _ in 0..50 {
            if registry.get(&id).is_err() {
                token.cancel();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("livestream entry was never compacted");
    }

    #[tokio::test]
    async fn generic_completion_is_retained() {
        let registry = Registry::new();
        let token = CancellationToken::new();
        registry.run_event_listener(token.clone());

        let driver = GenericDownloader::new(
            "https://x/v1",
            Vec::new(),
            test_cfg(),
            registry.completion_sender(),
        );
        let id = registry.set(driver);

        registry
            .events_tx
            .send(CompletionEvent {
                id: id.clone(),
                kind: DownloaderKind::Generic,
            })
            .expect("send event");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.get(&id).is_ok());
        token.cancel();
    }
}
