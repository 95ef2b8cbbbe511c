//! Outbound message path for the `discord` tool.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId};

use skippy_tools::tools::ChatEgress;

use crate::send::send_chunked;

/// Sends to a channel by numeric id or by name within the configured guild.
pub struct DiscordEgress {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordEgress {
    pub fn new(http: Arc<Http>, guild_id: GuildId) -> Self {
        Self { http, guild_id }
    }

    async fn resolve(&self, channel: &str) -> Result<ChannelId, String> {
        if let Ok(id) = channel.parse::<u64>() {
            return Ok(ChannelId::new(id));
        }
        let wanted = channel.trim_start_matches('#').to_lowercase();
        let channels = self
            .guild_id
            .channels(&self.http)
            .await
            .map_err(|e| format!("channel listing failed: {e}"))?;
        channels
            .values()
            .find(|c| c.name.to_lowercase() == wanted)
            .map(|c| c.id)
            .ok_or_else(|| format!("no channel named '{channel}'"))
    }
}

#[async_trait]
impl ChatEgress for DiscordEgress {
    async fn send_message(&self, channel: &str, content: &str) -> Result<(), String> {
        let channel_id = self.resolve(channel).await?;
        send_chunked(&self.http, channel_id, content)
            .await
            .map_err(|e| e.to_string())
    }
}
