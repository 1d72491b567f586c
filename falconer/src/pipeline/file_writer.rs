//! File sink stage, in final (draining) or intermediate (teeing) mode.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

use super::{ByteStream, Pipe};
use crate::{Error, Result};

/// Buffer size for the tee loop and the intermediate duplex pipe.
const COPY_BUF_SIZE: usize = 64 * 1024;

pub struct FileWriter {
    path: PathBuf,
    is_final: bool,
}

impl FileWriter {
    pub const NAME: &'static str = "file-writer";

    pub fn new(path: PathBuf, is_final: bool) -> Self {
        Self { path, is_final }
    }
}

#[async_trait]
impl Pipe for FileWriter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn connect(&self, mut upstream: ByteStream) -> Result<ByteStream> {
        let mut file = File::create(&self.path)
            .await
            .map_err(|e| Error::pipeline(format!("failed to create {}: {e}", self.path.display())))?;
        let path = self.path.clone();

        if self.is_final {
            // Final mode: this sink drains the stream; nothing meaningful
            // flows further down the chain.
            tokio::spawn(async move {
                match tokio::io::copy(&mut upstream, &mut file).await {
                    Ok(_) => {
                        let _ = file.flush().await;
                        info!(path = %path.display(), "download saved");
                    }
                    Err(e) => error!(err = %e, "file writer (final) error"),
                }
            });

            return Ok(Box::new(tokio::io::empty()));
        }

        // Intermediate mode: tee into the file and a pipe so later stages
        // see the same bytes.
        let (read_half, mut write_half) = tokio::io::duplex(COPY_BUF_SIZE);

        tokio::spawn(async move {
            let mut buf = vec![0u8; COPY_BUF_SIZE];
            loop {
                match upstream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = file.write_all(&buf[..n]).await {
                            error!(err = %e, "file writer (pipeline) error");
                            break;
                        }
                        if write_half.write_all(&buf[..n]).await.is_err() {
                            // downstream hung up
                            break;
                        }
                    }
                    Err(e) => {
                        error!(err = %e, "file writer (pipeline) read error");
                        break;
                    }
                }
            }
            let _ = file.flush().await;
        });

        Ok(Box::new(read_half))
    }
}
