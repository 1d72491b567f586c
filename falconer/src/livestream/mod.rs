//! Live-stream monitor.
//!
//! Owns the long-running "wait for live" drivers keyed by url. Completed
//! drivers report on the done channel and are detached from both the
//! in-memory map and the persisted bucket.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::database::repositories::LivestreamsRepository;
use crate::domain::PipelineTemplate;
use crate::downloader::{Downloader, DriverConfig, LiveStatus, LiveStreamDownloader};
use crate::pipeline;
use crate::registry::Registry;
use crate::{Error, Result};

/// Capacity of the done channel; completions are rare and tiny.
const DONE_CHANNEL_CAPACITY: usize = 16;

pub struct Monitor {
    streams: Arc<RwLock<HashMap<String, Arc<LiveStreamDownloader>>>>,
    done_tx: mpsc::Sender<String>,
    done_rx: Mutex<Option<mpsc::Receiver<String>>>,
    registry: Arc<Registry>,
    repo: LivestreamsRepository,
    driver_cfg: DriverConfig,
    template: Option<PipelineTemplate>,
}

impl Monitor {
    pub fn new(
        registry: Arc<Registry>,
        repo: LivestreamsRepository,
        driver_cfg: DriverConfig,
    ) -> Arc<Self> {
        Self::with_template(registry, repo, driver_cfg, None)
    }

    /// Create with a stored pipeline template instead of the built-in
    /// default.
    pub fn with_template(
        registry: Arc<Registry>,
        repo: LivestreamsRepository,
        driver_cfg: DriverConfig,
        template: Option<PipelineTemplate>,
    ) -> Arc<Self> {
        let (done_tx, done_rx) = mpsc::channel(DONE_CHANNEL_CAPACITY);
        Arc::new(Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            done_tx,
            done_rx: Mutex::new(Some(done_rx)),
            registry,
            repo,
            driver_cfg,
            template,
        })
    }

    /// Consume driver completions, detaching each finished stream.
    pub fn schedule(&self, token: CancellationToken) {
        let Some(mut rx) = self.done_rx.lock().take() else {
            warn!("live-stream monitor scheduler already running");
            return;
        };

        let streams = Arc::clone(&self.streams);
        let repo = self.repo.clone();
        tokio::spawn(async move {
            loop {
                let url = tokio::select! {
                    _ = token.cancelled() => None,
                    url = rx.recv() => url,
                };
                let Some(url) = url else { break };

                info!(url = %url, "live-stream capture finished");
                streams.write().remove(&url);
                if let Err(e) = repo.delete(&url).await {
                    error!(url = %url, err = %e, "failed to delete live-stream entry");
                }
            }
        });
    }

    /// Start watching a url: build the pipeline, spawn the driver, persist
    /// the entry.
    pub async fn add(&self, url: &str) -> Result<()> {
        let template = self.template.clone().unwrap_or_else(|| {
            pipeline::default_live_template(&self.driver_cfg.download_dir, capture_label(url))
        });
        let pipes = pipeline::build(&template);

        let driver = LiveStreamDownloader::new(
            url,
            pipes,
            self.driver_cfg.clone(),
            Some(self.done_tx.clone()),
            self.registry.completion_sender(),
        );

        self.registry.set(driver.clone());
        self.streams.write().insert(url.to_string(), driver.clone());
        self.repo.put(url).await?;

        tokio::spawn(async move {
            if let Err(e) = driver.clone().start().await {
                error!(err = %e, "live-stream capture failed");
            }
        });

        info!(url = %url, "watching live stream");
        Ok(())
    }

    /// Stop the driver behind a url; detachment happens via the done channel.
    pub async fn remove(&self, url: &str) -> Result<()> {
        let driver = self
            .streams
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::not_found("live stream", url))?;
        driver.stop().await
    }

    pub async fn remove_all(&self) -> Result<()> {
        let drivers: Vec<_> = self.streams.read().values().cloned().collect();
        for driver in drivers {
            driver.stop().await?;
        }
        Ok(())
    }

    /// Per-url wait/running status.
    pub fn status(&self) -> HashMap<String, LiveStatus> {
        self.streams
            .read()
            .iter()
            .map(|(url, driver)| (url.clone(), driver.live_status()))
            .collect()
    }

    /// Re-add every persisted url.
    pub async fn restore(&self) -> Result<()> {
        for url in self.repo.list().await? {
            self.add(&url).await?;
        }
        Ok(())
    }
}

/// Human-facing label for the default capture filename.
fn capture_label(url: &str) -> &str {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("live")
}
