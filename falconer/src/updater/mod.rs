//! Downloader binary maintenance: self-update and version query.

use std::process::Stdio;
use std::time::Duration;

use process_utils::tokio_command;
use tracing::info;

use crate::{Error, Result};

/// Upper bound on the version query; the binary may be probing the network.
const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the downloader's built-in self-update and wait for it.
pub async fn update_downloader(downloader_path: &str) -> Result<()> {
    info!(binary = %downloader_path, "updating downloader");

    let status = tokio_command(downloader_path)
        .arg("-U")
        .stdin(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        return Err(Error::download(format!("updater exited with {status}")));
    }
    Ok(())
}

/// First line of `<binary> --version`, bounded by a 10 s timeout.
pub async fn downloader_version(downloader_path: &str) -> Result<String> {
    let output = tokio::time::timeout(
        VERSION_QUERY_TIMEOUT,
        tokio_command(downloader_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| Error::download("version query timed out"))??;

    if !output.status.success() {
        return Err(Error::download(format!(
            "version query exited with {}",
            output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_binary(script: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake-dl");
        let mut f = std::fs::File::create(&path).expect("create script");
        writeln!(f, "#!/bin/sh\n{script}").expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        (dir, path.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn version_returns_first_line() {
        let (_dir, bin) = fake_binary("echo '2026.01.31'; echo 'noise'");
        let version = downloader_version(&bin).await.expect("version");
        assert_eq!(version, "2026.01.31");
    }

    #[tokio::test]
    async fn failed_update_is_an_error() {
        let (_dir, bin) = fake_binary("exit 3");
        assert!(update_downloader(&bin).await.is_err());
    }
}
