//! Streaming pipeline over a live media stream.
//!
//! A pipeline is an ordered list of stages, each exposing
//! `connect(upstream) -> downstream`. Stages own only their upstream reader
//! and their own child process.

mod file_writer;
mod transcoder;

pub use file_writer::FileWriter;
pub use transcoder::Transcoder;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::Result;
use crate::domain::{PipelineStep, PipelineStepKind, PipelineTemplate};

/// The byte stream flowing between stages.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// One reader-to-reader stage.
#[async_trait]
pub trait Pipe: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach to the upstream reader, returning the downstream one.
    ///
    /// A failure here aborts pipeline construction and propagates out of the
    /// driver's start.
    async fn connect(&self, upstream: ByteStream) -> Result<ByteStream>;
}

/// Materialise the stages of a stored template.
///
/// Only a trailing file sink drains the stream; a mid-chain one tees so
/// later stages still see the bytes.
pub fn build(template: &PipelineTemplate) -> Vec<Box<dyn Pipe>> {
    let last = template.steps.len().saturating_sub(1);
    template
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| build_step(step, i == last))
        .collect()
}

fn build_step(step: &PipelineStep, is_last: bool) -> Box<dyn Pipe> {
    match step.kind {
        PipelineStepKind::Transcoder => Box::new(Transcoder::new(step.args.clone())),
        PipelineStepKind::Filewriter => Box::new(FileWriter::new(
            PathBuf::from(step.path.clone().unwrap_or_default()),
            is_last,
        )),
    }
}

/// Whether any stage is a file sink; without one the driver falls back to a
/// default output file.
pub fn has_file_writer(pipes: &[Box<dyn Pipe>]) -> bool {
    pipes.iter().any(|p| p.name() == FileWriter::NAME)
}

/// The built-in live capture pipeline: transcode to webm, then sink to a
/// file named after the capture.
pub fn default_live_template(download_dir: &std::path::Path, label: &str) -> PipelineTemplate {
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H-%M-%S");
    let path = download_dir.join(format!("{label} (live) {timestamp}.webm"));

    PipelineTemplate {
        id: Uuid::new_v4().to_string(),
        name: "default-live".to_string(),
        steps: vec![
            PipelineStep {
                kind: PipelineStepKind::Transcoder,
                args: vec![
                    "-c:a".to_string(),
                    "libopus".to_string(),
                    "-c:v".to_string(),
                    "libsvtav1".to_string(),
                    "-crf".to_string(),
                    "30".to_string(),
                    "-preset".to_string(),
                    "7".to_string(),
                ],
                path: None,
                extension: None,
            },
            PipelineStep {
                kind: PipelineStepKind::Filewriter,
                args: Vec::new(),
                path: Some(path.to_string_lossy().into_owned()),
                extension: Some("webm".to_string()),
            },
        ],
    }
}
