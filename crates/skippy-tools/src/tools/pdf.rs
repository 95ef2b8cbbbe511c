//! `pdf` tool — text extraction.

use async_trait::async_trait;
use serde::Deserialize;

use crate::{args, Tool, ToolResult};

const DEFAULT_MAX_CHARS: usize = 100_000;

pub struct PdfTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PdfArgs {
    #[serde(alias = "path")]
    filepath: Option<String>,
    max_chars: Option<usize>,
}

#[async_trait]
impl Tool for PdfTool {
    fn name(&self) -> &str {
        "pdf"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: PdfArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(path) = parsed.filepath else {
            return ToolResult::error("missing required parameter: filepath");
        };
        let max_chars = parsed.max_chars.unwrap_or(DEFAULT_MAX_CHARS);

        // Extraction parses the whole document; keep it off the runtime threads.
        let result = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path)).await;
        match result {
            Ok(Ok(text)) => {
                let truncated = text.chars().count() > max_chars;
                let text: String = text.chars().take(max_chars).collect();
                ToolResult::success(serde_json::json!({
                    "text": text,
                    "truncated": truncated,
                }))
            }
            Ok(Err(e)) => ToolResult::error(format!("PDF extraction failed: {e}")),
            Err(e) => ToolResult::error(format!("PDF extraction panicked: {e}")),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {filepath, max_chars?} -> {text, truncated}. Extracts plain text; default cap 100000 chars."#
            .to_string()
    }
}
