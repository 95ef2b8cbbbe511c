//! Conversation history comes from the platform itself: fetch the last N
//! messages, drop our own status bubbles, and prefix the prompt with them.
//! There is no internal conversation store.

use serenity::builder::GetMessages;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::ChannelId;
use tracing::debug;

use crate::status::STATUS_PREFIX;

/// Build the prompt for an inbound message, with recent history prepended.
pub async fn prompt_with_history(
    http: &Http,
    channel_id: ChannelId,
    limit: usize,
    current: &str,
) -> String {
    let history = fetch_history(http, channel_id, limit).await;
    if history.is_empty() {
        return current.to_string();
    }
    format!("Recent conversation:\n{history}\n\nCurrent request: {current}")
}

/// Last `limit` messages as `author: content` lines, oldest first.
pub async fn fetch_history(http: &Http, channel_id: ChannelId, limit: usize) -> String {
    let builder = GetMessages::new().limit(limit.min(100) as u8);
    let mut messages: Vec<Message> = match channel_id.messages(http, builder).await {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "history fetch failed");
            return String::new();
        }
    };
    // The API returns newest first.
    messages.reverse();

    messages
        .iter()
        .filter(|m| !is_status_bubble(m))
        .map(|m| format!("{}: {}", m.author.name, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Our own progress bubbles never belong in the history the model sees.
fn is_status_bubble(message: &Message) -> bool {
    message.author.bot && message.content.starts_with(STATUS_PREFIX)
}
