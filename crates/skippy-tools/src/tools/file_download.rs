//! `file_download` tool — stream a URL to disk.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::{args, Tool, ToolResult};

pub struct FileDownloadTool {
    client: reqwest::Client,
    dir: String,
}

impl FileDownloadTool {
    pub fn new(dir: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            dir,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DownloadArgs {
    url: Option<String>,
    filename: Option<String>,
}

#[async_trait]
impl Tool for FileDownloadTool {
    fn name(&self) -> &str {
        "file_download"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: DownloadArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(url) = parsed.url.as_deref() else {
            return ToolResult::error("missing required parameter: url");
        };

        let filename = parsed
            .filename
            .clone()
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| "download.bin".to_string());
        // Strip any path components the model may have slipped in.
        let filename = std::path::Path::new(&filename)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download.bin".to_string());
        let dest = std::path::Path::new(&self.dir).join(&filename);

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            return ToolResult::error(format!("cannot create download dir '{}': {e}", self.dir));
        }

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("download of {url} failed: {e}")),
        };
        if !resp.status().is_success() {
            return ToolResult::error(format!("download of {url} returned {}", resp.status()));
        }

        let mut file = match tokio::fs::File::create(&dest).await {
            Ok(f) => f,
            Err(e) => return ToolResult::error(format!("cannot create '{}': {e}", dest.display())),
        };
        let mut stream = resp.bytes_stream();
        let mut bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => return ToolResult::error(format!("download interrupted: {e}")),
            };
            bytes += chunk.len() as u64;
            if let Err(e) = file.write_all(&chunk).await {
                return ToolResult::error(format!("write to '{}' failed: {e}", dest.display()));
            }
        }
        if let Err(e) = file.flush().await {
            return ToolResult::error(format!("flush of '{}' failed: {e}", dest.display()));
        }

        info!(url, path = %dest.display(), bytes, "file downloaded");
        ToolResult::success(serde_json::json!({
            "path": dest.to_string_lossy(),
            "bytes": bytes,
        }))
    }

    fn context(&self) -> String {
        r#"Operations:
- {url, filename?} -> {path, bytes}. Streams the URL into the configured download directory."#
            .to_string()
    }
}

fn filename_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;
    let name = without_query.rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_extraction() {
        assert_eq!(
            filename_from_url("https://x.test/a/b/report.pdf?dl=1"),
            Some("report.pdf".to_string())
        );
        assert_eq!(filename_from_url("https://x.test/dir/"), None);
    }
}
