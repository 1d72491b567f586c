//! Transcoder stage: pipes the stream through an ffmpeg child.

use std::process::Stdio;

use async_trait::async_trait;
use process_utils::{ProcessGroupExt, tokio_command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use super::{ByteStream, Pipe};
use crate::{Error, Result};

/// Transcoder binary. Media work is delegated entirely to this child.
const TRANSCODER_BIN: &str = "ffmpeg";

/// Spawns a transcoder child with stdin fed from upstream and stdout exposed
/// as the stage output. Stderr is consumed line-wise into the logs.
pub struct Transcoder {
    args: Vec<String>,
}

impl Transcoder {
    pub const NAME: &'static str = "ffmpeg-transcoder";

    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

#[async_trait]
impl Pipe for Transcoder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn connect(&self, mut upstream: ByteStream) -> Result<ByteStream> {
        let mut cmd = tokio_command(TRANSCODER_BIN);
        cmd.arg("-i")
            .arg("pipe:0")
            .args(&self.args)
            .arg("-f")
            .arg("webm")
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.own_process_group();

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::pipeline(format!("failed to spawn transcoder: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::pipeline("transcoder stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::pipeline("transcoder stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::pipeline("transcoder stderr unavailable"))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(log = %line, "ffmpeg transcoder");
            }
        });

        // Feed the child and close its stdin on EOF so it can flush.
        tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut upstream, &mut stdin).await {
                error!(err = %e, "transcoder stdin error");
            }
            drop(stdin);
            // Reap the child once the stream is done.
            let _ = child.wait().await;
        });

        Ok(Box::new(stdout))
    }
}
