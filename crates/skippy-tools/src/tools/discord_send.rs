//! `discord` tool — send a message to a channel without ending the turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{args, Tool, ToolResult};

/// Outbound chat interface. Implemented by the Discord gateway; injected
/// here so the tool crate stays platform-agnostic.
#[async_trait]
pub trait ChatEgress: Send + Sync {
    /// `channel` is a name or numeric id, as the model knows it.
    async fn send_message(&self, channel: &str, content: &str) -> Result<(), String>;
}

pub struct DiscordSendTool {
    egress: Arc<dyn ChatEgress>,
}

impl DiscordSendTool {
    pub fn new(egress: Arc<dyn ChatEgress>) -> Self {
        Self { egress }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SendArgs {
    channel: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl Tool for DiscordSendTool {
    fn name(&self) -> &str {
        "discord"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let parsed: SendArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(channel) = parsed.channel.as_deref() else {
            return ToolResult::error("missing required parameter: channel");
        };
        let Some(message) = parsed.message.as_deref().filter(|m| !m.is_empty()) else {
            return ToolResult::error("missing required parameter: message");
        };

        match self.egress.send_message(channel, message).await {
            Ok(()) => ToolResult::success(serde_json::json!({})),
            Err(e) => ToolResult::error(format!("send to '{channel}' failed: {e}")),
        }
    }

    fn context(&self) -> String {
        r#"Operations:
- {channel, message} -> {}. Sends a Discord message immediately, outside the
  final answer. Use the channel name or id."#
            .to_string()
    }
}
