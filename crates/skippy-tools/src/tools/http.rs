//! `http` tool — plain GET/POST for the model.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{args, Tool, ToolResult};

const MAX_BODY_BYTES: usize = 128 * 1024;

pub struct HttpTool {
    client: reqwest::Client,
}

impl HttpTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpArgs {
    op: Option<String>,
    url: Option<String>,
    headers: Option<HashMap<String, String>>,
    body: Option<String>,
    json: Option<serde_json::Value>,
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: HttpArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(url) = parsed.url.as_deref() else {
            return ToolResult::error("missing required parameter: url");
        };
        let op = parsed.op.as_deref().unwrap_or("get");

        let mut request = match op {
            "get" => self.client.get(url),
            "post" => {
                let mut r = self.client.post(url);
                if let Some(json) = &parsed.json {
                    r = r.json(json);
                } else if let Some(body) = &parsed.body {
                    r = r.body(body.clone());
                }
                r
            }
            other => {
                return ToolResult::error(format!("unknown op '{other}'; expected get or post"))
            }
        };
        if let Some(headers) = &parsed.headers {
            for (k, v) in headers {
                request = request.header(k, v);
            }
        }

        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                let truncated = body.len() > MAX_BODY_BYTES;
                let body = if truncated {
                    let mut end = MAX_BODY_BYTES;
                    while !body.is_char_boundary(end) {
                        end -= 1;
                    }
                    body[..end].to_string()
                } else {
                    body
                };
                let result = serde_json::json!({
                    "status": status,
                    "body": body,
                    "truncated": truncated,
                });
                if (200..300).contains(&status) {
                    ToolResult::success(result)
                } else {
                    ToolResult {
                        success: false,
                        output: result,
                        error: Some(format!("HTTP {status} from {url}")),
                    }
                }
            }
            Err(e) => ToolResult::error(format!("request to {url} failed: {e}")),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {op: "get", url, headers?} -> {status, body, truncated}
- {op: "post", url, json? | body?, headers?} -> {status, body, truncated}
Bodies over 128 KB are truncated. Non-2xx statuses are failures carrying the body."#
            .to_string()
    }
}
