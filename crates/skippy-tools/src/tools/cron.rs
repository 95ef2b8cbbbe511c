//! `cron` tool — manage scheduled jobs from the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use skippy_scheduler::types::normalize_spec;
use skippy_scheduler::CronStore;

use crate::{args, Tool, ToolResult};

pub struct CronTool {
    store: Arc<CronStore>,
}

impl CronTool {
    pub fn new(store: Arc<CronStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct CronOpArgs {
    op: Option<String>,
    id: Option<String>,
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        // Job specs carry free-form fields, so op routing is tolerant here
        // and `add` validation happens in the scheduler's normalizer.
        let header: CronOpArgs = match args::parse(&input) {
            Ok(h) => h,
            Err(e) => return ToolResult::error(e),
        };

        match header.op.as_deref().unwrap_or("add") {
            "add" => match normalize_spec(&input) {
                Ok(job) => match self.store.add_job(&job) {
                    Ok(()) => ToolResult::success(serde_json::json!({ "job": job })),
                    Err(e) => ToolResult::error(e.to_string()),
                },
                Err(e) => ToolResult::error(e.to_string()),
            },
            "list" => match self.store.list_jobs() {
                Ok(jobs) => ToolResult::success(serde_json::json!({ "jobs": jobs })),
                Err(e) => ToolResult::error(e.to_string()),
            },
            "remove" => {
                let Some(id) = header.id.as_deref() else {
                    return ToolResult::error("missing required parameter: id");
                };
                match self.store.remove_job(id) {
                    Ok(()) => ToolResult::success(serde_json::json!({})),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            "enable" | "disable" => {
                let Some(id) = header.id.as_deref() else {
                    return ToolResult::error("missing required parameter: id");
                };
                let disabled = header.op.as_deref() == Some("disable");
                match self.store.set_disabled(id, disabled) {
                    Ok(()) => ToolResult::success(serde_json::json!({})),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            other => ToolResult::error(format!(
                "unknown op '{other}'; expected add, list, remove, enable, or disable"
            )),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {op: "add", type: "one_time"|"interval"|"schedule", ...} -> {job}
  one_time: time (RFC 3339) or delay (seconds)
  interval: interval_ms
  schedule: schedule: {days: [0-6, 0=Sunday], hour, minute}
  action: command (bash) or message (prompt to the assistant)
- {op: "list"} -> {jobs}
- {op: "remove"|"enable"|"disable", id} -> {}
one_time jobs delete themselves after firing."#
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> CronTool {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        skippy_scheduler::db::init_db(&conn).unwrap();
        CronTool::new(Arc::new(CronStore::new(conn)))
    }

    #[tokio::test]
    async fn add_then_list_then_remove() {
        let t = tool();
        let r = t
            .run(serde_json::json!({
                "op": "add", "type": "interval", "interval_ms": 60000,
                "message": "check the oven"
            }))
            .await;
        assert!(r.success, "{:?}", r.error);
        let id = r.output["job"]["id"].as_str().unwrap().to_string();

        let r = t.run(serde_json::json!({"op": "list"})).await;
        assert_eq!(r.output["jobs"].as_array().unwrap().len(), 1);

        let r = t.run(serde_json::json!({"op": "remove", "id": id})).await;
        assert!(r.success);
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_with_reason() {
        let t = tool();
        let r = t
            .run(serde_json::json!({"op": "add", "type": "interval", "message": "x"}))
            .await;
        assert!(r.is_failure());
        assert!(r.error.unwrap().contains("interval_ms"));
    }
}
