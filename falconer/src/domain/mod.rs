//! Shared domain types: intents, handle state, snapshots and the persisted
//! document shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A client's request to start one download. Immutable after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadIntent {
    pub url: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Which driver variant backs a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    #[default]
    Generic,
    Livestream,
}

impl DownloaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Livestream => "livestream",
        }
    }
}

impl std::fmt::Display for DownloaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a download process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessStatus {
    #[default]
    Pending,
    Downloading,
    Completed,
    Errored,
    LiveStreamWaiting,
}

/// Live progress surface of a handle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    #[serde(rename = "process_status")]
    pub status: ProcessStatus,
    pub percentage: String,
    pub speed: f64,
    pub eta: f64,
}

/// Where and how the download is saved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadOutput {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "savedFilePath", default)]
    pub saved_file_path: String,
}

/// Remote resource description as reported by the downloader's JSON dump.
///
/// `entries` is populated when the document describes a playlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadMetadata {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uploader: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(rename = "_type", default)]
    pub kind: String,
    #[serde(default)]
    pub entries: Option<Vec<DownloadMetadata>>,
    #[serde(rename = "playlist_title", default)]
    pub playlist_title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl DownloadMetadata {
    pub fn is_playlist(&self) -> bool {
        self.kind == "playlist"
    }
}

/// Serialisable by-value view of a handle; persisted and client-visible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: String,
    pub progress: DownloadProgress,
    #[serde(rename = "info")]
    pub metadata: DownloadMetadata,
    pub output: DownloadOutput,
    pub params: Vec<String>,
    #[serde(rename = "downloader_name")]
    pub downloader_kind: DownloaderKind,
    #[serde(default)]
    pub completed: bool,
}

/// Decoded form of the download progress template line.
#[derive(Debug, Deserialize)]
pub struct ProgressTemplate {
    pub percentage: String,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
}

/// Decoded form of the postprocess template line.
#[derive(Debug, Deserialize)]
pub struct PostprocessTemplate {
    pub filepath: String,
}

/// A cron-published source with a fan-out cursor.
///
/// `cursor` is the index of the last expanded item already processed and is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub cron_expr: String,
    #[serde(default)]
    pub cursor: i64,
}

/// One stage of a stored streaming pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    #[serde(rename = "type")]
    pub kind: PipelineStepKind,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStepKind {
    Transcoder,
    Filewriter,
}

/// A named, persisted streaming pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTemplate {
    pub id: String,
    pub name: String,
    pub steps: Vec<PipelineStep>,
}

/// A user-defined collection of downloader arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
}
