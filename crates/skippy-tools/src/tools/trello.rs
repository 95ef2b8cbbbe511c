//! `trello` tool — boards, lists, and cards through the Trello REST API.

use async_trait::async_trait;
use serde::Deserialize;

use skippy_core::config::TrelloToolConfig;

use crate::{args, Tool, ToolResult};

const API: &str = "https://api.trello.com/1";

pub struct TrelloTool {
    client: reqwest::Client,
    config: Option<TrelloToolConfig>,
}

impl TrelloTool {
    pub fn new(config: Option<TrelloToolConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn auth(&self) -> Result<String, ToolResult> {
        match &self.config {
            Some(cfg) => Ok(format!("key={}&token={}", cfg.key, cfg.token)),
            None => Err(ToolResult::error(
                "Trello is not configured; set tools.trello.key and tools.trello.token",
            )),
        }
    }

    async fn get_json(&self, url: String) -> ToolResult {
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Trello request failed: {e}")),
        };
        if !resp.status().is_success() {
            return ToolResult::error(format!("Trello returned {}", resp.status()));
        }
        match resp.json::<serde_json::Value>().await {
            Ok(body) => ToolResult::success(body),
            Err(e) => ToolResult::error(format!("unreadable Trello response: {e}")),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TrelloArgs {
    op: Option<String>,
    board_id: Option<String>,
    list_id: Option<String>,
    name: Option<String>,
    desc: Option<String>,
}

#[async_trait]
impl Tool for TrelloTool {
    fn name(&self) -> &str {
        "trello"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: TrelloArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let auth = match self.auth() {
            Ok(a) => a,
            Err(r) => return r,
        };

        match parsed.op.as_deref().unwrap_or("boards") {
            "boards" => {
                self.get_json(format!("{API}/members/me/boards?fields=id,name&{auth}"))
                    .await
            }
            "lists" => {
                let Some(board) = parsed.board_id.as_deref() else {
                    return ToolResult::error("missing required parameter: board_id");
                };
                self.get_json(format!("{API}/boards/{board}/lists?fields=id,name&{auth}"))
                    .await
            }
            "cards" => {
                let Some(list) = parsed.list_id.as_deref() else {
                    return ToolResult::error("missing required parameter: list_id");
                };
                self.get_json(format!("{API}/lists/{list}/cards?fields=id,name,desc&{auth}"))
                    .await
            }
            "add_card" => {
                let Some(list) = parsed.list_id.as_deref() else {
                    return ToolResult::error("missing required parameter: list_id");
                };
                let Some(name) = parsed.name.as_deref() else {
                    return ToolResult::error("missing required parameter: name");
                };
                let url = format!(
                    "{API}/cards?idList={}&name={}&desc={}&{auth}",
                    urlencoding::encode(list),
                    urlencoding::encode(name),
                    urlencoding::encode(parsed.desc.as_deref().unwrap_or(""))
                );
                let resp = match self.client.post(&url).send().await {
                    Ok(r) => r,
                    Err(e) => return ToolResult::error(format!("Trello request failed: {e}")),
                };
                if !resp.status().is_success() {
                    return ToolResult::error(format!("Trello returned {}", resp.status()));
                }
                match resp.json::<serde_json::Value>().await {
                    Ok(body) => ToolResult::success(body),
                    Err(e) => ToolResult::error(format!("unreadable Trello response: {e}")),
                }
            }
            other => ToolResult::error(format!(
                "unknown op '{other}'; expected boards, lists, cards, or add_card"
            )),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {op: "boards"} -> [{id, name}]
- {op: "lists", board_id} -> [{id, name}]
- {op: "cards", list_id} -> [{id, name, desc}]
- {op: "add_card", list_id, name, desc?} -> the created card"#
            .to_string()
    }
}
