//! Log consumers attached to a driver's output stream.
//!
//! The generic driver emits JSON progress lines, the live driver forwards
//! free-form transcoder output; each gets its own consumer type.

use tracing::info;

use super::Downloader;
use super::utils::short_id;
use crate::domain::{
    DownloadProgress, PostprocessTemplate, ProcessStatus, ProgressTemplate,
};

/// Consumes one line of child output and reflects it on the downloader.
pub trait LogConsumer: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse_line(&self, line: &str, downloader: &dyn Downloader);
}

/// Parses the structured progress/postprocess template lines.
#[derive(Debug, Default)]
pub struct JsonLogConsumer;

impl JsonLogConsumer {
    pub fn new() -> Self {
        Self
    }
}

impl LogConsumer for JsonLogConsumer {
    fn name(&self) -> &'static str {
        "json-log-consumer"
    }

    fn parse_line(&self, line: &str, downloader: &dyn Downloader) {
        // Tolerate the template framing prefix in either variant.
        let payload = line
            .strip_prefix("download:")
            .or_else(|| line.strip_prefix("postprocess:"))
            .unwrap_or(line)
            .trim();

        if let Ok(progress) = serde_json::from_str::<ProgressTemplate>(payload) {
            let id = downloader.id();
            info!(
                id = %short_id(&id),
                url = %downloader.url(),
                percentage = %progress.percentage,
                "progress"
            );

            downloader.set_progress(DownloadProgress {
                status: ProcessStatus::Downloading,
                percentage: progress.percentage,
                speed: progress.speed.unwrap_or(0.0),
                eta: progress.eta.unwrap_or(0.0),
            });
        }

        if let Ok(postprocess) = serde_json::from_str::<PostprocessTemplate>(payload) {
            downloader.update_saved_file_path(&postprocess.filepath);
        }
    }
}

/// Forwards transcoder output verbatim to the log stream.
#[derive(Debug, Default)]
pub struct TranscoderLogConsumer;

impl TranscoderLogConsumer {
    pub fn new() -> Self {
        Self
    }
}

impl LogConsumer for TranscoderLogConsumer {
    fn name(&self) -> &'static str {
        "transcoder-log-consumer"
    }

    fn parse_line(&self, line: &str, downloader: &dyn Downloader) {
        info!(
            id = %downloader.id(),
            url = %downloader.url(),
            output = %line,
            "transcoder output"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{
        DownloadMetadata, DownloadOutput, DownloaderKind, ProcessSnapshot,
    };
    use async_trait::async_trait;
    use parking_lot::RwLock;

    #[derive(Default)]
    struct RecordingDownloader {
        progress: RwLock<Option<DownloadProgress>>,
        saved_path: RwLock<Option<String>>,
    }

    #[async_trait]
    impl Downloader for RecordingDownloader {
        async fn start(self: Arc<Self>) -> crate::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> crate::Result<()> {
            Ok(())
        }
        fn id(&self) -> String {
            "aaaa-bbbb".to_string()
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
        fn set_progress(&self, progress: DownloadProgress) {
            *self.progress.write() = Some(progress);
        }
        fn set_metadata(&self, _metadata: DownloadMetadata) {}
        fn update_saved_file_path(&self, path: &str) {
            *self.saved_path.write() = Some(path.to_string());
        }
        fn set_pending(&self, _pending: bool) {}
        fn is_completed(&self) -> bool {
            false
        }
        fn restore_from_snapshot(&self, _snapshot: &ProcessSnapshot) {}
    }

    #[test]
    fn progress_lines_update_progress() {
        let d = RecordingDownloader::default();
        let consumer = JsonLogConsumer::new();

        consumer.parse_line(r#"{"eta":12.5,"percentage":" 42.0%","speed":1024.0}"#, &d);

        let progress = d.progress.read().clone().expect("progress set");
        assert_eq!(progress.status, ProcessStatus::Downloading);
        assert_eq!(progress.percentage, " 42.0%");
        assert_eq!(progress.speed, 1024.0);
        assert_eq!(progress.eta, 12.5);
        assert!(d.saved_path.read().is_none());
    }

    #[test]
    fn postprocess_lines_update_saved_path() {
        let d = RecordingDownloader::default();
        let consumer = JsonLogConsumer::new();

        consumer.parse_line(r#"{"filepath":"/dl/video.mp4"}"#, &d);

        assert_eq!(d.saved_path.read().as_deref(), Some("/dl/video.mp4"));
        assert!(d.progress.read().is_none());
    }

    #[test]
    fn framed_lines_are_tolerated() {
        let d = RecordingDownloader::default();
        let consumer = JsonLogConsumer::new();

        consumer.parse_line(r#"download:{"eta":1.0,"percentage":"9.1%","speed":2.0}"#, &d);
        assert!(d.progress.read().is_some());
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let d = RecordingDownloader::default();
        let consumer = JsonLogConsumer::new();

        consumer.parse_line("[youtube] extracting URL", &d);
        assert!(d.progress.read().is_none());
        assert!(d.saved_path.read().is_none());
    }
}
