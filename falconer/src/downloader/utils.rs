//! Argument sanitation, output-template normalisation and line pumping
//! shared by the drivers.

use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::error;

use crate::domain::DownloadOutput;

/// Arguments matching this pattern smell like shell chaining and are never
/// forwarded to the child.
static SHELL_HAZARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\$\{)|(&&)").expect("valid hazard pattern"));

/// Drop empty arguments and cut the list at the first shell-hazard match.
///
/// Everything after a hazard belongs to the chained command the hazard was
/// meant to introduce, so the tail is discarded with it.
pub(crate) fn sanitize_args(params: &[String]) -> Vec<String> {
    let mut clean = Vec::with_capacity(params.len());
    for param in params {
        if SHELL_HAZARD.is_match(param) {
            break;
        }
        if param.is_empty() {
            continue;
        }
        clean.push(param.clone());
    }
    clean
}

/// Normalise the output filename template.
///
/// A template that does not end in the extension placeholder gets one
/// appended; a doubled placeholder collapses to a single occurrence.
pub(crate) fn build_filename(output: &mut DownloadOutput) {
    if !output.filename.is_empty() && !output.filename.ends_with(".%(ext)s") {
        output.filename.push_str(".%(ext)s");
    }

    output.filename = output
        .filename
        .replacen(".%(ext)s.%(ext)s", ".%(ext)s", 1);
}

/// Strip a `?list=` query suffix so the child never expands a playlist
/// implicitly.
pub(crate) fn strip_playlist_query(url: &str) -> &str {
    url.split("?list").next().unwrap_or(url)
}

/// First segment of a UUID, for compact log correlation.
pub(crate) fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

/// Pump lines from a child stream into a channel until EOF or the receiver
/// goes away.
pub(crate) async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Log every line of the child's error stream.
pub(crate) async fn log_child_errors<R>(reader: R, id: String, url: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        error!(id = %id, url = %url, err = %line, "downloader process error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sanitize_cuts_at_shell_chain() {
        let params = args(&["-o", "-", "&&", "rm -rf /"]);
        assert_eq!(sanitize_args(&params), args(&["-o", "-"]));
    }

    #[test]
    fn sanitize_drops_empty_and_expansion() {
        assert_eq!(
            sanitize_args(&args(&["", "-f", "best"])),
            args(&["-f", "best"])
        );
        assert_eq!(sanitize_args(&args(&["${HOME}", "-f"])), Vec::<String>::new());
    }

    #[test]
    fn filename_gets_extension_placeholder() {
        let mut out = DownloadOutput {
            filename: "foo".to_string(),
            ..Default::default()
        };
        build_filename(&mut out);
        assert_eq!(out.filename, "foo.%(ext)s");
    }

    #[test]
    fn filename_with_placeholder_is_untouched() {
        let mut out = DownloadOutput {
            filename: "foo.%(ext)s".to_string(),
            ..Default::default()
        };
        build_filename(&mut out);
        assert_eq!(out.filename, "foo.%(ext)s");
    }

    #[test]
    fn doubled_placeholder_collapses() {
        let mut out = DownloadOutput {
            filename: "foo.%(ext)s.%(ext)s".to_string(),
            ..Default::default()
        };
        build_filename(&mut out);
        assert_eq!(out.filename, "foo.%(ext)s");
    }

    #[test]
    fn playlist_query_is_stripped() {
        assert_eq!(
            strip_playlist_query("https://y/watch?v=a?list=PL123"),
            "https://y/watch?v=a"
        );
        assert_eq!(strip_playlist_query("https://y/watch?v=a"), "https://y/watch?v=a");
    }

    #[tokio::test]
    async fn pump_lines_forwards_until_eof() {
        let data = b"first\nsecond\n".to_vec();
        let (tx, mut rx) = mpsc::channel(8);
        pump_lines(std::io::Cursor::new(data), tx).await;

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
        assert!(rx.recv().await.is_none());
    }
}
