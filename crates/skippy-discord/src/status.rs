//! Status bubbles: small progress messages sent while a chain runs,
//! recorded and deleted once the final answer is out.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use tokio::sync::Mutex;
use tracing::debug;

use skippy_agent::StatusSink;

/// Every bubble starts with this marker; history retrieval filters on it.
pub const STATUS_PREFIX: &str = "\u{2699} ";

pub struct DiscordStatusSink {
    http: Arc<Http>,
    channel_id: ChannelId,
    sent: Mutex<Vec<MessageId>>,
}

impl DiscordStatusSink {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self {
            http,
            channel_id,
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StatusSink for DiscordStatusSink {
    async fn emit(&self, text: &str) {
        match self
            .channel_id
            .say(&self.http, format!("{STATUS_PREFIX}{text}"))
            .await
        {
            Ok(msg) => self.sent.lock().await.push(msg.id),
            Err(e) => debug!(error = %e, "status bubble send failed"),
        }
    }

    async fn cleanup(&self) {
        let ids: Vec<MessageId> = self.sent.lock().await.drain(..).collect();
        for id in ids {
            if let Err(e) = self.channel_id.delete_message(&self.http, id).await {
                debug!(error = %e, "status bubble delete failed");
            }
        }
    }
}
