//! Generic downloader driver.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use process_utils::{ProcessGroupExt, tokio_command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::consumer::{JsonLogConsumer, LogConsumer};
use super::utils;
use super::{
    CompletionEvent, CompletionSender, DEFAULT_FILENAME_TEMPLATE, Downloader, DriverConfig,
    HandleState,
};
use crate::domain::{
    DownloadMetadata, DownloadOutput, DownloadProgress, DownloaderKind, ProcessSnapshot,
    ProcessStatus,
};
use crate::{Error, Result};

/// Progress template: one JSON line per tick, whitespace squashed.
const DOWNLOAD_TEMPLATE: &str =
    r#"download:{"eta":%(progress.eta)s,"percentage":"%(progress._percent_str)s","speed":%(progress.speed)s}"#;

/// Postprocess template: the final file path once postprocessing settles.
const POSTPROCESS_TEMPLATE: &str = r#"postprocess:{"filepath":"%(info.filepath)s"}"#;

/// Capacity of the stdout line channel feeding the log consumer.
const LOG_CHANNEL_CAPACITY: usize = 64;

pub struct GenericDownloader {
    state: RwLock<HandleState>,
    child_pid: Mutex<Option<u32>>,
    cfg: DriverConfig,
    consumer: JsonLogConsumer,
    events: CompletionSender,
}

impl GenericDownloader {
    pub fn new(
        url: impl Into<String>,
        params: Vec<String>,
        cfg: DriverConfig,
        events: CompletionSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HandleState::new(url.into(), params)),
            child_pid: Mutex::new(None),
            cfg,
            consumer: JsonLogConsumer::new(),
            events,
        })
    }

    /// Rebuild a driver from a persisted snapshot; no child is attached.
    pub fn from_snapshot(
        snapshot: &ProcessSnapshot,
        cfg: DriverConfig,
        events: CompletionSender,
    ) -> Arc<Self> {
        let driver = Self::new("", Vec::new(), cfg, events);
        driver.restore_from_snapshot(snapshot);
        driver
    }

    /// Argument list for the child: url without implicit playlist expansion,
    /// fixed flags, both progress templates, then the user params with the
    /// output flag appended unless the caller overrode the paths.
    fn compose_args(&self) -> Vec<String> {
        let mut state = self.state.write();
        state.params = utils::sanitize_args(&state.params);

        let mut out = DownloadOutput {
            path: self.cfg.download_dir.to_string_lossy().into_owned(),
            filename: DEFAULT_FILENAME_TEMPLATE.to_string(),
            saved_file_path: String::new(),
        };
        if !state.output.path.is_empty() {
            out.path = state.output.path.clone();
        }
        if !state.output.filename.is_empty() {
            out.filename = state.output.filename.clone();
        }
        utils::build_filename(&mut out);
        state.output.path = out.path.clone();
        state.output.filename = out.filename.clone();

        let mut args: Vec<String> = vec![
            utils::strip_playlist_query(&state.url).to_string(),
            "--newline".to_string(),
            "--no-colors".to_string(),
            "--no-playlist".to_string(),
            "--progress-template".to_string(),
            DOWNLOAD_TEMPLATE.to_string(),
            "--progress-template".to_string(),
            POSTPROCESS_TEMPLATE.to_string(),
            "--no-exec".to_string(),
        ];

        let overrides_paths = state
            .params
            .iter()
            .any(|p| p == "-P" || p == "--paths");
        if !overrides_paths {
            state.params.push("-o".to_string());
            state.params.push(format!("{}/{}", out.path, out.filename));
        }

        args.extend(state.params.iter().cloned());
        args
    }

    /// Move to a terminal state exactly once and announce it.
    fn finish(&self, status: ProcessStatus) {
        let event = {
            let mut state = self.state.write();
            if state.completed {
                return;
            }
            state.completed = true;
            state.pending = false;
            state.progress.status = status;
            CompletionEvent {
                id: state.id.clone(),
                kind: DownloaderKind::Generic,
            }
        };
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Downloader for GenericDownloader {
    async fn start(self: Arc<Self>) -> Result<()> {
        self.set_pending(true);

        let args = self.compose_args();
        let (id, url) = {
            let state = self.state.read();
            (state.id.clone(), state.url.clone())
        };

        info!(url = %url, params = ?args, "requesting download");

        let mut cmd = tokio_command(&self.cfg.downloader_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.own_process_group();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(url = %url, err = %e, "failed to start downloader process");
                self.finish(ProcessStatus::Errored);
                return Err(Error::download(format!("failed to start downloader: {e}")));
            }
        };
        *self.child_pid.lock() = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::download("downloader stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::download("downloader stderr unavailable"))?;

        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<String>(LOG_CHANNEL_CAPACITY);

        tokio::spawn(utils::pump_lines(stdout, tx));
        tokio::spawn(utils::log_child_errors(
            stderr,
            utils::short_id(&id).to_string(),
            url.clone(),
        ));

        let consumer_token = token.clone();
        let me = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = consumer_token.cancelled() => {
                        debug!(url = %me.url(), consumer = me.consumer.name(), "detaching logs");
                        break;
                    }
                    line = rx.recv() => match line {
                        Some(line) => me.consumer.parse_line(&line, me.as_ref()),
                        None => break,
                    }
                }
            }
        });

        self.set_pending(false);

        let status = child.wait().await;
        token.cancel();
        *self.child_pid.lock() = None;

        match status {
            Ok(s) if s.success() => {
                self.finish(ProcessStatus::Completed);
                Ok(())
            }
            Ok(s) => {
                self.finish(ProcessStatus::Errored);
                Err(Error::download(format!("downloader exited with {s}")))
            }
            Err(e) => {
                self.finish(ProcessStatus::Errored);
                Err(e.into())
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        // The downloader fans out into subprocesses; the whole group gets
        // the signal, exactly once.
        let pid = self.child_pid.lock().take();
        let Some(pid) = pid else {
            return Err(Error::download("no attached process"));
        };

        let result = process_utils::terminate_group(pid)
            .map_err(|e| Error::download(e.to_string()));
        self.finish(ProcessStatus::Completed);
        result
    }

    fn id(&self) -> String {
        self.state.read().id.clone()
    }

    fn url(&self) -> String {
        self.state.read().url.clone()
    }

    fn kind(&self) -> DownloaderKind {
        DownloaderKind::Generic
    }

    fn snapshot(&self) -> ProcessSnapshot {
        self.state.read().snapshot(DownloaderKind::Generic)
    }

    fn set_output(&self, output: DownloadOutput) {
        self.state.write().output = output;
    }

    fn set_progress(&self, progress: DownloadProgress) {
        self.state.write().progress = progress;
    }

    fn set_metadata(&self, metadata: DownloadMetadata) {
        self.state.write().metadata = metadata;
    }

    fn update_saved_file_path(&self, path: &str) {
        self.state.write().output.saved_file_path = path.to_string();
    }

    fn set_pending(&self, pending: bool) {
        self.state.write().pending = pending;
    }

    fn is_completed(&self) -> bool {
        self.state.read().completed
    }

    fn restore_from_snapshot(&self, snapshot: &ProcessSnapshot) {
        self.state.write().apply_snapshot(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> DriverConfig {
        DriverConfig {
            downloader_path: "yt-dlp".to_string(),
            download_dir: "/dl".into(),
        }
    }

    fn driver(url: &str, params: &[&str]) -> Arc<GenericDownloader> {
        let (events, _rx) = mpsc::unbounded_channel();
        GenericDownloader::new(
            url,
            params.iter().map(|s| s.to_string()).collect(),
            test_cfg(),
            events,
        )
    }

    #[test]
    fn compose_args_appends_default_output() {
        let d = driver("https://y/watch?v=a?list=PL1", &[]);
        let args = d.compose_args();

        assert_eq!(args[0], "https://y/watch?v=a");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--no-exec".to_string()));
        assert_eq!(
            args.iter().filter(|a| *a == "--progress-template").count(),
            2
        );

        let o_pos = args.iter().position(|a| a == "-o").expect("-o present");
        assert_eq!(args[o_pos + 1], "/dl/%(title)s.%(ext)s");
    }

    #[test]
    fn compose_args_respects_paths_override() {
        let d = driver("https://y/v", &["-P", "/elsewhere"]);
        let args = d.compose_args();
        assert!(!args.contains(&"-o".to_string()));
        assert!(args.contains(&"-P".to_string()));
    }

    #[test]
    fn compose_args_uses_caller_rename() {
        let d = driver("https://y/v", &[]);
        d.set_output(DownloadOutput {
            filename: "my title".to_string(),
            ..Default::default()
        });
        let args = d.compose_args();
        let o_pos = args.iter().position(|a| a == "-o").expect("-o present");
        assert_eq!(args[o_pos + 1], "/dl/my title.%(ext)s");
    }

    #[test]
    fn compose_args_sanitizes_params() {
        let d = driver("https://y/v", &["-o", "-", "&&", "rm -rf /"]);
        let args = d.compose_args();
        assert!(!args.iter().any(|a| a.contains("rm -rf")));
        assert!(!args.contains(&"&&".to_string()));
    }

    #[tokio::test]
    async fn stop_without_child_fails() {
        let d = driver("https://y/v", &[]);
        let err = d.stop().await.expect_err("no process attached");
        assert!(err.to_string().contains("no attached process"));
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let d = driver("https://y/v", &["-f", "best"]);
        d.set_metadata(DownloadMetadata {
            url: "https://y/v".to_string(),
            title: "a title".to_string(),
            ..Default::default()
        });
        let snap = d.snapshot();

        let (events, _rx) = mpsc::unbounded_channel();
        let restored = GenericDownloader::from_snapshot(&snap, test_cfg(), events);

        assert_eq!(restored.id(), d.id());
        assert_eq!(restored.url(), "https://y/v");
        assert!(!restored.is_completed());
        assert_eq!(restored.snapshot().params, vec!["-f", "best"]);
    }

    #[test]
    fn finish_fires_completion_event_once() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let d = GenericDownloader::new("https://y/v", Vec::new(), test_cfg(), events);

        d.finish(ProcessStatus::Completed);
        d.finish(ProcessStatus::Errored);

        let event = rx.try_recv().expect("one event");
        assert_eq!(event.id, d.id());
        assert!(rx.try_recv().is_err());
        // The second finish never overwrote the terminal status.
        assert_eq!(d.snapshot().progress.status, ProcessStatus::Completed);
    }
}
