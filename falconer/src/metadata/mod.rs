//! Metadata fetching via the downloader's JSON dump flag.

use std::process::Stdio;

use chrono::Utc;
use process_utils::{ProcessGroupExt, tokio_command};
use tracing::info;

use crate::domain::DownloadMetadata;
use crate::{Error, Result};

/// Run `<downloader> <url> -J` and decode the resulting document.
///
/// On a non-zero exit the child's buffered stderr becomes the error message.
pub async fn fetch_default(url: &str, downloader_path: &str) -> Result<DownloadMetadata> {
    let mut cmd = tokio_command(downloader_path);
    cmd.arg(url)
        .arg("-J")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.own_process_group();

    info!(url = %url, "retrieving metadata");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(Error::download(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let mut meta: DownloadMetadata = serde_json::from_slice(&output.stdout)?;
    if meta.url.is_empty() {
        meta.url = url.to_string();
    }
    if meta.created_at.is_none() {
        meta.created_at = Some(Utc::now());
    }

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_downloader(script: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake-dl");
        let mut f = std::fs::File::create(&path).expect("create script");
        writeln!(f, "#!/bin/sh\n{script}").expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        let path_str = path.to_string_lossy().into_owned();
        (dir, path_str)
    }

    #[tokio::test]
    async fn decodes_the_json_dump() {
        let (_dir, bin) = fake_downloader(
            r#"echo '{"title":"a video","_type":"video","duration":12.0}'"#,
        );

        let meta = fetch_default("https://x/v1", &bin).await.expect("fetch");
        assert_eq!(meta.title, "a video");
        assert_eq!(meta.url, "https://x/v1");
        assert!(meta.created_at.is_some());
        assert!(!meta.is_playlist());
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let (_dir, bin) = fake_downloader("echo 'ERROR: unsupported url' >&2; exit 1");

        let err = fetch_default("https://x/v1", &bin).await.expect_err("fail");
        assert!(err.to_string().contains("unsupported url"));
    }
}
