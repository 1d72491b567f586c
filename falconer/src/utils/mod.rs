//! Small filesystem helpers.

use std::path::{Path, PathBuf};

use crate::Result;

/// The downloader picks this file up via its cookies flag.
const COOKIES_FILE: &str = "cookies.txt";

/// Store user-supplied cookies verbatim.
pub async fn write_cookies(dir: &Path, cookies: &str) -> Result<PathBuf> {
    let path = dir.join(COOKIES_FILE);
    tokio::fs::write(&path, cookies).await?;
    Ok(path)
}

/// Read back the stored cookies, if any.
pub async fn read_cookies(dir: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(dir.join(COOKIES_FILE)).await {
        Ok(cookies) => Ok(Some(cookies)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
