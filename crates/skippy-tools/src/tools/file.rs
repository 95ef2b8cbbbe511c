//! `file` tool — read, write, patch, list, delete.
//!
//! Patch takes a list of find/replace changes and applies them in order
//! against the current content; the write goes through a temp file + rename
//! so a crash mid-write never corrupts the original.

use async_trait::async_trait;
use serde::Deserialize;

use crate::{args, Tool, ToolResult};

pub struct FileTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileArgs {
    op: Option<String>,
    #[serde(alias = "path")]
    filepath: Option<String>,
    content: Option<String>,
    changes: Option<Vec<Change>>,
}

#[derive(Deserialize, Clone)]
pub struct Change {
    pub find: String,
    pub replace: String,
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: FileArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let op = parsed.op.as_deref().unwrap_or_else(|| {
            // No explicit op: infer from the payload.
            if parsed.changes.is_some() {
                "patch"
            } else if parsed.content.is_some() {
                "write"
            } else {
                "read"
            }
        });
        let Some(path) = parsed.filepath.as_deref() else {
            return ToolResult::error("missing required parameter: filepath");
        };

        match op {
            "read" => read_file(path),
            "write" => match parsed.content.as_deref() {
                Some(content) => write_file(path, content),
                None => ToolResult::error("missing required parameter: content"),
            },
            "patch" => match parsed.changes {
                Some(changes) if !changes.is_empty() => patch_file(path, &changes),
                _ => ToolResult::error("missing required parameter: changes"),
            },
            "list" => list_dir(path),
            "delete" => delete_file(path),
            other => ToolResult::error(format!(
                "unknown op '{other}'; expected read, write, patch, list, or delete"
            )),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {op: "read", filepath} -> {content}
- {op: "write", filepath, content} -> {bytes_written}. Creates parent directories; overwrites.
  For multi-line content, omit `content` from the JSON and append a
  ===SKIPPY_FILE_START:<filepath>=== block after the envelope.
- {op: "patch", filepath, changes: [{find, replace}, ...]} -> {replacements}.
  Each `find` must appear verbatim in the file. For multi-line changes, omit
  `changes` and append a ===SKIPPY_PATCH_START:<filepath>=== block instead.
- {op: "list", filepath} -> {entries: [name, ...]}
- {op: "delete", filepath} -> {}
Result shape: {success, output?, error?}"#
            .to_string()
    }
}

fn read_file(path: &str) -> ToolResult {
    match std::fs::read_to_string(path) {
        Ok(content) => ToolResult::success(serde_json::json!({ "content": content })),
        Err(e) => ToolResult::error(format!("failed to read '{path}': {e}")),
    }
}

fn write_file(path: &str, content: &str) -> ToolResult {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("failed to create directories for '{path}': {e}"));
            }
        }
    }
    match std::fs::write(path, content) {
        Ok(()) => ToolResult::success(serde_json::json!({ "bytes_written": content.len() })),
        Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
    }
}

fn patch_file(path: &str, changes: &[Change]) -> ToolResult {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("failed to read '{path}': {e}")),
    };

    let mut updated = content;
    let mut replacements = 0usize;
    for change in changes {
        if !updated.contains(&change.find) {
            return ToolResult::error(format!(
                "find text not found in '{path}': {:?}. Read the file and copy the text verbatim.",
                truncate(&change.find, 120)
            ));
        }
        updated = updated.replacen(&change.find, &change.replace, 1);
        replacements += 1;
    }

    let tmp_path = format!("{path}.skippy_patch_tmp");
    if let Err(e) = std::fs::write(&tmp_path, &updated) {
        return ToolResult::error(format!("failed to write temp file '{tmp_path}': {e}"));
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return ToolResult::error(format!("failed to rename temp file to '{path}': {e}"));
    }
    ToolResult::success(serde_json::json!({ "replacements": replacements }))
}

fn list_dir(path: &str) -> ToolResult {
    match std::fs::read_dir(path) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| {
                    let mut name = e.file_name().to_string_lossy().into_owned();
                    if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    name
                })
                .collect();
            names.sort();
            ToolResult::success(serde_json::json!({ "entries": names }))
        }
        Err(e) => ToolResult::error(format!("failed to list '{path}': {e}")),
    }
}

fn delete_file(path: &str) -> ToolResult {
    match std::fs::remove_file(path) {
        Ok(()) => ToolResult::success(serde_json::json!({})),
        Err(e) => ToolResult::error(format!("failed to delete '{path}': {e}")),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt").to_string_lossy().into_owned();
        let tool = FileTool;

        let r = tool
            .run(serde_json::json!({"op": "write", "filepath": path, "content": "hi"}))
            .await;
        assert!(r.success, "{:?}", r.error);

        let r = tool
            .run(serde_json::json!({"op": "read", "filepath": path}))
            .await;
        assert_eq!(r.output["content"], "hi");
    }

    #[tokio::test]
    async fn patch_applies_changes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.txt");
        std::fs::write(&path, "one two three").unwrap();
        let tool = FileTool;

        let r = tool
            .run(serde_json::json!({
                "op": "patch",
                "filepath": path.to_string_lossy(),
                "changes": [
                    {"find": "two", "replace": "2"},
                    {"find": "three", "replace": "3"}
                ]
            }))
            .await;
        assert!(r.success);
        assert_eq!(r.output["replacements"], 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one 2 3");
    }

    #[tokio::test]
    async fn patch_with_missing_find_text_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.txt");
        std::fs::write(&path, "hello").unwrap();
        let tool = FileTool;

        let r = tool
            .run(serde_json::json!({
                "op": "patch",
                "filepath": path.to_string_lossy(),
                "changes": [{"find": "absent", "replace": "x"}]
            }))
            .await;
        assert!(r.is_failure());
        assert!(r.error.as_deref().unwrap().contains("find text not found"));
        // File untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn op_is_inferred_from_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.txt").to_string_lossy().into_owned();
        let tool = FileTool;
        let r = tool
            .run(serde_json::json!({"filepath": path, "content": "x"}))
            .await;
        assert!(r.success, "bare content should mean write");
    }
}
