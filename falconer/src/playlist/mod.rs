//! Playlist detection and fan-out.
//!
//! A single intent may point at a playlist; the expander resolves the
//! metadata tree and turns each entry into its own queued download.

use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use process_utils::{ProcessGroupExt, tokio_command};
use tracing::info;

use crate::domain::{DownloadIntent, DownloadMetadata, DownloadOutput};
use crate::downloader::{Downloader, DriverConfig, GenericDownloader};
use crate::queue::MessageQueue;
use crate::registry::Registry;
use crate::{Error, Result};

/// Spacing of the virtual creation times stamped onto fan-out entries, in
/// milliseconds. Keeps the UI ordering deterministic.
const CREATED_AT_SPACING_MS: i64 = 10;

/// Resolve the metadata tree with playlist flattening enabled.
pub async fn fetch_tree(
    url: &str,
    params: &[String],
    downloader_path: &str,
) -> Result<DownloadMetadata> {
    let mut cmd = tokio_command(downloader_path);
    cmd.arg(url)
        .args(params)
        .arg("--flat-playlist")
        .arg("-J")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.own_process_group();

    info!(url = %url, "decoding playlist metadata");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(Error::download(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let tree: DownloadMetadata = serde_json::from_slice(&output.stdout)?;
    if tree.kind.is_empty() {
        return Err(Error::validation("probably not a valid URL"));
    }

    Ok(tree)
}

/// Deduplicate entries by url (preserving order), drop nested playlists and
/// apply any caller-supplied entry-range modifiers.
pub fn expand_entries(
    entries: Vec<DownloadMetadata>,
    params: &[String],
) -> Result<Vec<DownloadMetadata>> {
    let mut seen = std::collections::HashSet::new();
    let mut expanded: Vec<DownloadMetadata> = entries
        .into_iter()
        .filter(|entry| seen.insert(entry.url.clone()))
        .filter(|entry| !entry.url.contains("list="))
        .collect();

    apply_modifiers(&mut expanded, params)?;
    Ok(expanded)
}

/// Subslice the expansion according to a `--playlist-items start:stop`
/// modifier (1-based, inclusive), when present.
fn apply_modifiers(entries: &mut Vec<DownloadMetadata>, params: &[String]) -> Result<()> {
    let Some(pos) = params
        .iter()
        .position(|p| p == "--playlist-items" || p == "-I")
    else {
        return Ok(());
    };

    let range = params
        .get(pos + 1)
        .ok_or_else(|| Error::validation("missing playlist-items range"))?;

    let (start, stop) = match range.split_once(':') {
        Some((start, stop)) => (start, stop),
        None => (range.as_str(), range.as_str()),
    };

    let start: usize = start
        .parse()
        .map_err(|_| Error::validation(format!("invalid playlist range: {range}")))?;
    let stop: usize = if stop.is_empty() {
        entries.len()
    } else {
        stop.parse()
            .map_err(|_| Error::validation(format!("invalid playlist range: {range}")))?
    };

    if start == 0 || start > stop {
        return Err(Error::validation(format!("invalid playlist range: {range}")));
    }

    let stop = stop.min(entries.len());
    if start > entries.len() {
        entries.clear();
        return Ok(());
    }

    *entries = entries.drain(start - 1..stop).collect();
    Ok(())
}

/// Detect whether the intent targets a playlist and publish one generic
/// driver per resulting resource.
pub async fn detect(
    intent: &DownloadIntent,
    registry: &Arc<Registry>,
    queue: &Arc<MessageQueue>,
    driver_cfg: &DriverConfig,
) -> Result<()> {
    let tree = fetch_tree(&intent.url, &intent.params, &driver_cfg.downloader_path).await?;

    if !tree.is_playlist() {
        let driver = GenericDownloader::new(
            intent.url.clone(),
            intent.params.clone(),
            driver_cfg.clone(),
            registry.completion_sender(),
        );
        driver.set_output(DownloadOutput {
            path: intent.path.clone().unwrap_or_default(),
            filename: intent.rename.clone().unwrap_or_default(),
            saved_file_path: String::new(),
        });

        registry.set(driver.clone());
        queue.publish(driver).await;
        info!(url = %intent.url, "sending new process to message queue");
        return Ok(());
    }

    let entries = expand_entries(tree.entries.unwrap_or_default(), &intent.params)?;
    info!(url = %intent.url, count = entries.len(), "playlist detected");

    for (i, mut entry) in entries.into_iter().enumerate() {
        // Each entry becomes an individual download, so the playlist title
        // placeholder resolves against the parent tree.
        let rename = intent
            .rename
            .clone()
            .unwrap_or_default()
            .replacen("%(playlist_title)s", &tree.playlist_title, 1);

        entry.created_at =
            Some(Utc::now() + chrono::Duration::milliseconds(CREATED_AT_SPACING_MS * i as i64));

        let driver = GenericDownloader::new(
            entry.url.clone(),
            intent.params.clone(),
            driver_cfg.clone(),
            registry.completion_sender(),
        );
        driver.set_output(DownloadOutput {
            path: intent.path.clone().unwrap_or_default(),
            filename: rename,
            saved_file_path: String::new(),
        });
        driver.set_metadata(entry);

        registry.set(driver.clone());
        queue.publish(driver).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str) -> DownloadMetadata {
        DownloadMetadata {
            url: url.to_string(),
            ..Default::default()
        }
    }

    fn params(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expansion_dedupes_and_drops_nested_playlists() {
        let entries = vec![entry("a"), entry("a"), entry("b?list=x"), entry("c")];

        let expanded = expand_entries(entries, &[]).expect("expand");
        let urls: Vec<_> = expanded.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "c"]);
    }

    #[test]
    fn modifiers_subslice_one_based_inclusive() {
        let entries = vec![entry("a"), entry("b"), entry("c"), entry("d")];

        let expanded =
            expand_entries(entries, &params(&["--playlist-items", "2:3"])).expect("expand");
        let urls: Vec<_> = expanded.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["b", "c"]);
    }

    #[test]
    fn open_ended_range_runs_to_the_end() {
        let entries = vec![entry("a"), entry("b"), entry("c")];

        let expanded = expand_entries(entries, &params(&["-I", "2:"])).expect("expand");
        let urls: Vec<_> = expanded.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["b", "c"]);
    }

    #[test]
    fn invalid_range_is_rejected() {
        let entries = vec![entry("a")];
        assert!(expand_entries(entries, &params(&["-I", "0:2"])).is_err());
    }

    #[test]
    fn single_index_selects_one_entry() {
        let entries = vec![entry("a"), entry("b"), entry("c")];

        let expanded = expand_entries(entries, &params(&["-I", "2"])).expect("expand");
        let urls: Vec<_> = expanded.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["b"]);
    }
}
