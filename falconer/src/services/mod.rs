//! Service container: wiring, startup restore and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::database::DbPool;
use crate::database::repositories::{
    DownloadsRepository, LivestreamsRepository, PipelinesRepository, SubscriptionsRepository,
    TemplatesRepository,
};
use crate::domain::{DownloadIntent, ProcessSnapshot};
use crate::downloader::{Downloader, DriverConfig, GenericDownloader};
use crate::livestream;
use crate::playlist;
use crate::queue::MessageQueue;
use crate::registry::Registry;
use crate::subscription::TaskRunner;
use crate::twitch;
use crate::Result;

/// How often the registry is flushed into the store.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything the transport layer talks to.
pub struct ServiceContainer {
    pub pool: DbPool,
    pub registry: Arc<Registry>,
    pub queue: Arc<MessageQueue>,
    pub live_monitor: Arc<livestream::Monitor>,
    pub twitch_monitor: Arc<twitch::Monitor>,
    pub task_runner: Arc<TaskRunner>,
    pub downloads_repo: DownloadsRepository,
    pub pipelines_repo: PipelinesRepository,
    pub templates_repo: TemplatesRepository,
    driver_cfg: DriverConfig,
    twitch_interval: Duration,
    token: CancellationToken,
}

impl ServiceContainer {
    /// Wire every service; fails fast on an invalid queue size.
    pub fn new(pool: DbPool, cfg: &AppConfig) -> Result<Arc<Self>> {
        info!("initializing service container");

        let token = CancellationToken::new();
        let driver_cfg = DriverConfig::from_app(cfg);

        let registry = Registry::new();
        let queue = MessageQueue::new(
            cfg.server.queue_size,
            driver_cfg.downloader_path.clone(),
            token.child_token(),
        )?;

        let downloads_repo = DownloadsRepository::new(pool.clone());
        let pipelines_repo = PipelinesRepository::new(pool.clone());
        let templates_repo = TemplatesRepository::new(pool.clone());

        let live_monitor = livestream::Monitor::new(
            registry.clone(),
            LivestreamsRepository::new(pool.clone()),
            driver_cfg.clone(),
        );

        let twitch_monitor = twitch::Monitor::new(
            Arc::new(twitch::AuthenticationManager::new(
                cfg.twitch.client_id.clone(),
                cfg.twitch.client_secret.clone(),
            )),
            cfg.session_dir(),
        );

        let task_runner = TaskRunner::new(
            SubscriptionsRepository::new(pool.clone()),
            registry.clone(),
            queue.clone(),
            driver_cfg.clone(),
            token.child_token(),
        );

        Ok(Arc::new(Self {
            pool,
            registry,
            queue,
            live_monitor,
            twitch_monitor,
            task_runner,
            downloads_repo,
            pipelines_repo,
            templates_repo,
            driver_cfg,
            twitch_interval: cfg.twitch_check_interval(),
            token,
        }))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start consumers, monitors and the snapshotter, then restore the
    /// persisted state.
    pub async fn initialize(&self) -> Result<()> {
        self.queue.setup_consumers();
        self.registry.run_event_listener(self.token.child_token());
        self.live_monitor.schedule(self.token.child_token());

        let republished = self.restore_downloads().await?;
        info!(republished, "restored download state");

        if let Err(e) = self.live_monitor.restore().await {
            error!(err = %e, "failed to restore live-stream monitor");
        }
        if let Err(e) = self.twitch_monitor.restore().await {
            error!(err = %e, "failed to restore twitch monitor");
        }

        let monitor = self.twitch_monitor.clone();
        let handler = twitch::default_download_handler(
            self.registry.clone(),
            self.queue.clone(),
            self.driver_cfg.clone(),
        );
        let twitch_token = self.token.child_token();
        let interval = self.twitch_interval;
        tokio::spawn(async move {
            monitor.run(twitch_token, interval, handler).await;
        });

        self.task_runner.clone().spawn_all().await?;
        self.spawn_snapshotter();

        Ok(())
    }

    /// The single user-facing admission path: playlist detection, fan-out,
    /// registry admission and publication.
    pub async fn submit_intent(&self, intent: &DownloadIntent) -> Result<()> {
        playlist::detect(intent, &self.registry, &self.queue, &self.driver_cfg).await
    }

    /// Stop the process behind an id.
    pub async fn stop_process(&self, id: &str) -> Result<()> {
        self.registry.get(id)?.stop().await
    }

    /// Client-visible view of every tracked process.
    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        self.registry.all()
    }

    /// Scan the persisted snapshots, rebuild generic drivers and republish
    /// everything that never completed. Returns the republish count.
    async fn restore_downloads(&self) -> Result<usize> {
        let mut republished = 0;

        for snapshot in self.downloads_repo.list().await? {
            if snapshot.downloader_kind != crate::domain::DownloaderKind::Generic {
                continue;
            }

            let driver = GenericDownloader::from_snapshot(
                &snapshot,
                self.driver_cfg.clone(),
                self.registry.completion_sender(),
            );
            self.registry.set(driver.clone());

            if !snapshot.completed {
                self.queue.publish(driver).await;
                republished += 1;
            }
        }

        Ok(republished)
    }

    fn spawn_snapshotter(&self) {
        let registry = self.registry.clone();
        let repo = self.downloads_repo.clone();
        let token = self.token.child_token();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("snapshotting downloads state");
                        if let Err(e) = repo.upsert_all(&registry.all()).await {
                            error!(err = %e, "failed to persist snapshots");
                        }
                    }
                }
            }
        });
    }

    /// Graceful shutdown: stop admission, persist what we know, close the
    /// store.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down services");

        self.queue.stop();
        self.token.cancel();

        if let Err(e) = self.twitch_monitor.persist().await {
            warn!(err = %e, "failed to persist twitch watch list");
        }

        let snapshots = self.registry.all();
        if let Err(e) = self.downloads_repo.upsert_all(&snapshots).await {
            warn!(err = %e, "failed to write final snapshot");
        }

        self.pool.close().await;
        Ok(())
    }
}
