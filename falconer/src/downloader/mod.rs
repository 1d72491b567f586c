//! Child-process drivers for the external downloader binary.
//!
//! Two driver variants share one capability set: the generic driver records
//! a resource to disk and reports JSON progress, the live-stream driver
//! pipes the media stream through a processing pipeline (`crate::pipeline`).

mod consumer;
mod generic;
mod livestream;
pub(crate) mod utils;

pub use consumer::{JsonLogConsumer, LogConsumer, TranscoderLogConsumer};
pub use generic::GenericDownloader;
pub use livestream::{LiveStatus, LiveStreamDownloader};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::config::AppConfig;
use crate::domain::{
    DownloadMetadata, DownloadOutput, DownloadProgress, DownloaderKind, ProcessSnapshot,
};

/// Default output filename template handed to the downloader.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Paths a driver needs to spawn its child; cloned at construction so
/// drivers never touch global state.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub downloader_path: String,
    pub download_dir: PathBuf,
}

impl DriverConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            downloader_path: cfg.paths.downloader_path.clone(),
            download_dir: cfg.download_dir(),
        }
    }
}

/// Emitted by a driver once its run reaches a terminal state.
///
/// The registry compacts `livestream` entries on these events.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub id: String,
    pub kind: DownloaderKind,
}

/// Sender half drivers use to announce completion.
pub type CompletionSender = mpsc::UnboundedSender<CompletionEvent>;

/// Mutable handle state, owned by a driver behind its own lock.
#[derive(Debug, Default)]
pub(crate) struct HandleState {
    pub id: String,
    pub url: String,
    pub params: Vec<String>,
    pub output: DownloadOutput,
    pub metadata: DownloadMetadata,
    pub progress: DownloadProgress,
    pub pending: bool,
    pub completed: bool,
}

impl HandleState {
    pub(crate) fn new(url: String, params: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            params,
            ..Default::default()
        }
    }

    pub(crate) fn snapshot(&self, kind: DownloaderKind) -> ProcessSnapshot {
        ProcessSnapshot {
            id: self.id.clone(),
            progress: self.progress.clone(),
            metadata: self.metadata.clone(),
            output: self.output.clone(),
            params: self.params.clone(),
            downloader_kind: kind,
            completed: self.completed,
        }
    }

    pub(crate) fn apply_snapshot(&mut self, snapshot: &ProcessSnapshot) {
        self.id = snapshot.id.clone();
        self.url = snapshot.metadata.url.clone();
        self.metadata = snapshot.metadata.clone();
        self.progress = snapshot.progress.clone();
        self.output = snapshot.output.clone();
        self.params = snapshot.params.clone();
        self.completed = snapshot.completed;
        self.pending = false;
    }
}

/// The capability set shared by both driver variants.
///
/// Drivers are held behind `Arc` in the registry; all mutable state lives
/// behind the driver's own locks.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Run the child to completion. Intended to be called from a queue
    /// worker; returns when the child exits.
    async fn start(self: Arc<Self>) -> Result<()>;

    /// Deliver SIGTERM to the child's process group.
    ///
    /// Fails when no child is attached.
    async fn stop(&self) -> Result<()>;

    fn id(&self) -> String;
    fn url(&self) -> String;
    fn kind(&self) -> DownloaderKind;

    /// By-value view of the current state.
    fn snapshot(&self) -> ProcessSnapshot;

    fn set_output(&self, output: DownloadOutput);
    fn set_progress(&self, progress: DownloadProgress);
    fn set_metadata(&self, metadata: DownloadMetadata);
    fn update_saved_file_path(&self, path: &str);
    fn set_pending(&self, pending: bool);
    fn is_completed(&self) -> bool;

    /// Re-create identity from a persisted snapshot; no child is attached
    /// afterwards.
    fn restore_from_snapshot(&self, snapshot: &ProcessSnapshot);
}
