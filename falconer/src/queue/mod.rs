//! Bounded work queue over the downloader drivers.
//!
//! `N` workers consume the download queue; one worker consumes the metadata
//! queue so the remote site never sees parallel metadata children.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::downloader::Downloader;
use crate::{Error, Result, metadata};

type DriverMessage = Arc<dyn Downloader>;

pub struct MessageQueue {
    concurrency: usize,
    downloader_path: String,
    download_tx: mpsc::Sender<DriverMessage>,
    metadata_tx: mpsc::Sender<DriverMessage>,
    download_rx: Mutex<Option<mpsc::Receiver<DriverMessage>>>,
    metadata_rx: Mutex<Option<mpsc::Receiver<DriverMessage>>>,
    token: CancellationToken,
}

impl MessageQueue {
    /// Create the queue with `queue_size` download workers.
    ///
    /// The download queue buffers twice the worker count, the metadata queue
    /// four times, so admission stays bounded under bursts.
    pub fn new(
        queue_size: i64,
        downloader_path: impl Into<String>,
        token: CancellationToken,
    ) -> Result<Arc<Self>> {
        if queue_size <= 0 {
            return Err(Error::validation("invalid queue size"));
        }
        let concurrency = queue_size as usize;

        let (download_tx, download_rx) = mpsc::channel(concurrency * 2);
        let (metadata_tx, metadata_rx) = mpsc::channel(concurrency * 4);

        Ok(Arc::new(Self {
            concurrency,
            downloader_path: downloader_path.into(),
            download_tx,
            metadata_tx,
            download_rx: Mutex::new(Some(download_rx)),
            metadata_rx: Mutex::new(Some(metadata_rx)),
            token,
        }))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Enqueue a driver for download. After shutdown the publication is
    /// logged and dropped; the caller sees no failure.
    pub async fn publish(&self, driver: DriverMessage) {
        driver.set_pending(true);

        if self.token.is_cancelled() {
            warn!(id = %driver.id(), "queue stopped, dropping publication");
            return;
        }

        if self.download_tx.send(driver).await.is_err() {
            warn!("download queue closed, dropping publication");
        }
    }

    /// Spawn the download workers and the serial metadata worker.
    pub fn setup_consumers(&self) {
        let (download_rx, metadata_rx) = {
            let download_rx = self.download_rx.lock().take();
            let metadata_rx = self.metadata_rx.lock().take();
            match (download_rx, metadata_rx) {
                (Some(d), Some(m)) => (d, m),
                _ => {
                    warn!("queue consumers already set up");
                    return;
                }
            }
        };

        let shared_rx = Arc::new(tokio::sync::Mutex::new(download_rx));
        for worker in 0..self.concurrency {
            tokio::spawn(download_worker(
                worker,
                Arc::clone(&shared_rx),
                self.metadata_tx.clone(),
                self.token.clone(),
            ));
        }

        tokio::spawn(metadata_worker(
            metadata_rx,
            self.downloader_path.clone(),
            self.token.clone(),
        ));
    }

    /// Cancel the queue scope; pending receives wind down.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

async fn download_worker(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DriverMessage>>>,
    metadata_tx: mpsc::Sender<DriverMessage>,
    token: CancellationToken,
) {
    loop {
        // Lock only for the receive so siblings can take the next item.
        let message = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = token.cancelled() => None,
                message = rx.recv() => message,
            }
        };
        let Some(driver) = message else { break };

        if driver.is_completed() {
            continue;
        }

        info!(worker, id = %driver.id(), "started process");

        // Enrichment runs alongside the download on the serial queue.
        if metadata_tx.send(driver.clone()).await.is_err() {
            warn!("metadata queue closed");
        }

        if let Err(e) = driver.clone().start().await {
            warn!(id = %driver.id(), err = %e, "process ended with error");
        }
    }
}

async fn metadata_worker(
    mut rx: mpsc::Receiver<DriverMessage>,
    downloader_path: String,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => None,
            message = rx.recv() => message,
        };
        let Some(driver) = message else { break };

        if driver.is_completed() {
            warn!(id = %driver.id(), status = "completed", "process has an illegal state");
            continue;
        }

        match metadata::fetch_default(&driver.url(), &downloader_path).await {
            Ok(meta) => driver.set_metadata(meta),
            Err(e) => warn!(id = %driver.id(), err = %e, "failed to retrieve metadata"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        DownloadMetadata, DownloadOutput, DownloadProgress, DownloaderKind, ProcessSnapshot,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubDriver {
        id: String,
        completed: AtomicBool,
        started: AtomicBool,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
        hold: Duration,
    }

    impl StubDriver {
        fn new(running: Arc<AtomicUsize>, max_running: Arc<AtomicUsize>, hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: uuid::Uuid::new_v4().to_string(),
                completed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                running,
                max_running,
                hold,
            })
        }
    }

    #[async_trait]
    impl Downloader for StubDriver {
        async fn start(self: Arc<Self>) -> crate::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.completed.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> crate::Result<()> {
            Ok(())
        }
        fn id(&self) -> String {
            self.id.clone()
        }
        fn url(&self) -> String {
            "https://x/v1".to_string()
        }
        fn kind(&self) -> DownloaderKind {
            DownloaderKind::Generic
        }
        fn snapshot(&self) -> ProcessSnapshot {
            ProcessSnapshot::default()
        }
        fn set_output(&self, _output: DownloadOutput) {}
        fn set_progress(&self, _progress: DownloadProgress) {}
        fn set_metadata(&self, _metadata: DownloadMetadata) {}
        fn update_saved_file_path(&self, _path: &str) {}
        fn set_pending(&self, _pending: bool) {}
        fn is_completed(&self) -> bool {
            self.completed.load(Ordering::SeqCst)
        }
        fn restore_from_snapshot(&self, _snapshot: &ProcessSnapshot) {}
    }

    #[test]
    fn zero_queue_size_is_rejected() {
        let err = MessageQueue::new(0, "yt-dlp", CancellationToken::new())
            .err()
            .expect("invalid size");
        assert!(err.to_string().contains("invalid queue size"));
    }

    #[tokio::test]
    async fn concurrent_downloads_never_exceed_concurrency() {
        let queue = MessageQueue::new(2, "/nonexistent", CancellationToken::new())
            .expect("queue");
        queue.setup_consumers();

        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let drivers: Vec<_> = (0..6)
            .map(|_| {
                StubDriver::new(
                    Arc::clone(&running),
                    Arc::clone(&max_running),
                    Duration::from_millis(30),
                )
            })
            .collect();

        for driver in &drivers {
            queue.publish(driver.clone()).await;
        }

        for _ in 0..100 {
            if drivers.iter().all(|d| d.is_completed()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(drivers.iter().all(|d| d.is_completed()));
        assert!(max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn completed_drivers_are_dropped() {
        let queue = MessageQueue::new(1, "/nonexistent", CancellationToken::new())
            .expect("queue");
        queue.setup_consumers();

        let running = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let driver = StubDriver::new(running, max, Duration::ZERO);
        driver.completed.store(true, Ordering::SeqCst);

        queue.publish(driver.clone()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!driver.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn publications_after_stop_are_dropped() {
        let queue = MessageQueue::new(1, "/nonexistent", CancellationToken::new())
            .expect("queue");
        queue.setup_consumers();
        queue.stop();

        let running = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let driver = StubDriver::new(running, max, Duration::ZERO);

        queue.publish(driver.clone()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!driver.started.load(Ordering::SeqCst));
    }
}
