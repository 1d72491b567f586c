//! Live-stream downloader driver.
//!
//! Pipes the media stream from the child's stdout through a processing
//! pipeline. Progress on stderr is free-form; wait-state lines are parsed to
//! surface how far away the stream start is.

use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use process_utils::{ProcessGroupExt, tokio_command};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::consumer::{LogConsumer, TranscoderLogConsumer};
use super::utils;
use super::{CompletionEvent, CompletionSender, Downloader, DriverConfig, HandleState};
use crate::domain::{
    DownloadMetadata, DownloadOutput, DownloadProgress, DownloaderKind, ProcessSnapshot,
    ProcessStatus,
};
use crate::pipeline::{self, ByteStream, Pipe};
use crate::{Error, Result};

/// Capacity of the stderr line channel feeding the log consumer.
const LOG_CHANNEL_CAPACITY: usize = 64;

/// Wait-state line printed while the stream has not started yet.
static WAIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)remaining time until next attempt:\s*(\d{2}):(\d{2}):(\d{2})")
        .expect("valid wait pattern")
});

/// Status surface of a waiting or running live capture.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LiveStatus {
    pub status: ProcessStatus,
    pub wait_time_seconds: u64,
    pub live_date: Option<DateTime<Utc>>,
}

pub struct LiveStreamDownloader {
    state: RwLock<HandleState>,
    child_pid: Mutex<Option<u32>>,
    cfg: DriverConfig,
    consumer: TranscoderLogConsumer,
    pipes: Vec<Box<dyn Pipe>>,
    done: Option<mpsc::Sender<String>>,
    events: CompletionSender,
    wait_time_secs: RwLock<u64>,
    live_date: RwLock<Option<DateTime<Utc>>>,
}

impl LiveStreamDownloader {
    pub fn new(
        url: impl Into<String>,
        pipes: Vec<Box<dyn Pipe>>,
        cfg: DriverConfig,
        done: Option<mpsc::Sender<String>>,
        events: CompletionSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(HandleState::new(url.into(), Vec::new())),
            child_pid: Mutex::new(None),
            cfg,
            consumer: TranscoderLogConsumer::new(),
            pipes,
            done,
            events,
            wait_time_secs: RwLock::new(0),
            live_date: RwLock::new(None),
        })
    }

    /// Per-url status for the live monitor.
    pub fn live_status(&self) -> LiveStatus {
        LiveStatus {
            status: self.state.read().progress.status,
            wait_time_seconds: *self.wait_time_secs.read(),
            live_date: *self.live_date.read(),
        }
    }

    fn observe_wait_line(&self, line: &str) {
        if let Some(caps) = WAIT_PATTERN.captures(line) {
            let hours: u64 = caps[1].parse().unwrap_or(0);
            let minutes: u64 = caps[2].parse().unwrap_or(0);
            let seconds: u64 = caps[3].parse().unwrap_or(0);
            let wait = hours * 3600 + minutes * 60 + seconds;

            *self.wait_time_secs.write() = wait;
            *self.live_date.write() =
                Some(Utc::now() + chrono::Duration::seconds(wait as i64));
        }
    }

    /// Default sink when no stage writes to disk.
    fn fallback_path(&self, id: &str) -> std::path::PathBuf {
        let timestamp = Utc::now().format("%Y-%m-%d %H-%M-%S");
        self.cfg
            .download_dir
            .join(format!("{id} (live) {timestamp}.mp4"))
    }

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
                kind: DownloaderKind::Livestream,
            }
        };
        let _ = self.events.send(event);

        if let Some(done) = &self.done {
            let _ = done.try_send(self.url());
        }
    }
}

#[async_trait]
impl Downloader for LiveStreamDownloader {
    async fn start(self: Arc<Self>) -> Result<()> {
        self.set_pending(true);

        let (id, url) = {
            let state = self.state.read();
            (state.id.clone(), state.url.clone())
        };

        let args = [
            url.as_str(),
            "--newline",
            "--no-colors",
            "--no-playlist",
            "--no-exec",
            "-o",
            "-",
        ];

        info!(url = %url, "starting live-stream capture");

        let mut cmd = tokio_command(&self.cfg.downloader_path);
        cmd.args(args)
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

        let media = child
            .stdout
            .take()
            .ok_or_else(|| Error::download("media stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::download("downloader stderr unavailable"))?;

        // Chain the pipeline over the media stream.
        let mut reader: ByteStream = Box::new(media);
        for pipe in &self.pipes {
            reader = match pipe.connect(reader).await {
                Ok(next) => next,
                Err(e) => {
                    error!(pipe = pipe.name(), err = %e, "pipe failed");
                    self.finish(ProcessStatus::Errored);
                    return Err(e);
                }
            };
        }

        // No sink in the chain: drain into a default file instead.
        if !pipeline::has_file_writer(&self.pipes) {
            let path = self.fallback_path(&id);
            let mut tail = reader;
            tokio::spawn(async move {
                match tokio::fs::File::create(&path).await {
                    Ok(mut file) => {
                        if let Err(e) = tokio::io::copy(&mut tail, &mut file).await {
                            error!(err = %e, "fallback copy error");
                        } else {
                            info!(path = %path.display(), "download saved");
                        }
                    }
                    Err(e) => error!(err = %e, "failed to create fallback file"),
                }
            });
        } else {
            drop(reader);
        }

        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<String>(LOG_CHANNEL_CAPACITY);
        tokio::spawn(utils::pump_lines(stderr, tx));

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
                        Some(line) => {
                            me.observe_wait_line(&line);
                            me.consumer.parse_line(&line, me.as_ref());
                        }
                        None => break,
                    }
                }
            }
        });

        self.set_progress(DownloadProgress {
            status: ProcessStatus::LiveStreamWaiting,
            ..Default::default()
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
        DownloaderKind::Livestream
    }

    fn snapshot(&self) -> ProcessSnapshot {
        self.state.read().snapshot(DownloaderKind::Livestream)
    }

    fn set_output(&self, _output: DownloadOutput) {
        // Output is fixed to `-o -`; sinks are pipeline stages.
    }

    fn set_progress(&self, progress: DownloadProgress) {
        self.state.write().progress = progress;
    }

    fn set_metadata(&self, metadata: DownloadMetadata) {
        self.state.write().metadata = metadata;
    }

    fn update_saved_file_path(&self, _path: &str) {
        // The pipeline's sink owns the artifact path.
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

    fn driver() -> Arc<LiveStreamDownloader> {
        let (events, _rx) = mpsc::unbounded_channel();
        LiveStreamDownloader::new("https://twitch.tv/u", Vec::new(), test_cfg(), None, events)
    }

    #[test]
    fn wait_lines_update_status_surface() {
        let d = driver();
        d.observe_wait_line("[wait] Remaining time until next attempt: 00:05:23");

        let status = d.live_status();
        assert_eq!(status.wait_time_seconds, 5 * 60 + 23);
        assert!(status.live_date.is_some());
    }

    #[test]
    fn unrelated_lines_leave_wait_state_alone() {
        let d = driver();
        d.observe_wait_line("[youtube] extracting URL");
        assert_eq!(d.live_status().wait_time_seconds, 0);
        assert!(d.live_status().live_date.is_none());
    }

    #[test]
    fn fallback_path_is_a_file_under_download_dir() {
        let d = driver();
        let path = d.fallback_path("abcd");
        assert!(path.starts_with("/dl"));
        let name = path.file_name().expect("file name").to_string_lossy();
        assert!(name.starts_with("abcd (live) "));
        assert!(name.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn completion_signals_done_channel() {
        let (done_tx, mut done_rx) = mpsc::channel(4);
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let d = LiveStreamDownloader::new(
            "https://twitch.tv/u",
            Vec::new(),
            test_cfg(),
            Some(done_tx),
            events,
        );

        d.finish(ProcessStatus::Completed);

        assert_eq!(done_rx.try_recv().ok().as_deref(), Some("https://twitch.tv/u"));
        let event = events_rx.try_recv().expect("completion event");
        assert_eq!(event.kind, DownloaderKind::Livestream);
    }
}
