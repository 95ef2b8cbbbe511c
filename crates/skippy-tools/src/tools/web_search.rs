//! `web_search` tool — query a SearxNG-compatible endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use skippy_core::config::WebSearchToolConfig;

use crate::{args, Tool, ToolResult};

pub struct WebSearchTool {
    client: reqwest::Client,
    config: Option<WebSearchToolConfig>,
}

impl WebSearchTool {
    pub fn new(config: Option<WebSearchToolConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    query: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let Some(config) = &self.config else {
            return ToolResult::error(
                "web search is not configured; set tools.web_search.endpoint in Skippy.json",
            );
        };
        let parsed: SearchArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(query) = parsed.query.as_deref().filter(|q| !q.trim().is_empty()) else {
            return ToolResult::error("missing required parameter: query");
        };
        let limit = parsed.limit.unwrap_or(5).min(20);

        let url = format!(
            "{}/search?q={}&format=json",
            config.endpoint.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("search request failed: {e}")),
        };
        if !resp.status().is_success() {
            return ToolResult::error(format!("search endpoint returned {}", resp.status()));
        }
        let body: SearxResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("unreadable search response: {e}")),
        };

        let results: Vec<serde_json::Value> = body
            .results
            .into_iter()
            .take(limit)
            .map(|r| {
                serde_json::json!({
                    "title": r.title,
                    "url": r.url,
                    "snippet": r.content,
                })
            })
            .collect();
        ToolResult::success(serde_json::json!({ "results": results }))
    }

    fn context(&self) -> String {
        r#"Operations:
- {query, limit?} -> {results: [{title, url, snippet}]}. Default limit 5, max 20."#
            .to_string()
    }
}
