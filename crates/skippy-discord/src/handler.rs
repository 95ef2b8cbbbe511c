use std::sync::{Arc, OnceLock};

use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::channel::{Channel, ChannelType, Message};
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::prelude::{Context, EventHandler};
use tracing::{info, warn};

use skippy_agent::{run_prompt, PromptRequest, StatusSink};

use crate::history::prompt_with_history;
use crate::status::DiscordStatusSink;
use crate::typing::TypingHandle;
use crate::GatewayHost;

/// Serenity event handler wired to the orchestrator.
pub struct SkippyHandler<H: GatewayHost> {
    host: Arc<H>,
    bot_id: OnceLock<UserId>,
}

impl<H: GatewayHost> SkippyHandler<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            bot_id: OnceLock::new(),
        }
    }
}

#[async_trait]
impl<H: GatewayHost> EventHandler for SkippyHandler<H> {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        info!(name = %ready.user.name, "Discord bot connected");
        crate::commands::register_commands(&ctx, &self.host.config().discord.guild_id).await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(bot_id) = self.bot_id.get().copied() else {
            return;
        };
        if !should_respond(&ctx, &msg, bot_id).await {
            return;
        }

        let content = strip_mention(&msg.content, bot_id).trim().to_string();
        if content.is_empty() && msg.attachments.is_empty() {
            return;
        }

        let channel_key = msg.channel_id.to_string();
        // One active chain per channel; a second prompt neither cancels nor
        // joins the first.
        if self.host.aborts().is_active(&channel_key) {
            let _ = msg
                .reply(
                    &ctx.http,
                    "I'm still working on the previous request here. Use /stop to abort it.",
                )
                .await;
            return;
        }

        let history_limit = self.host.config().discord.message_history_limit;
        let prompt =
            prompt_with_history(&ctx.http, msg.channel_id, history_limit, &content).await;

        let image_sources: Vec<String> = msg
            .attachments
            .iter()
            .filter(|a| {
                a.content_type
                    .as_deref()
                    .is_some_and(|t| t.starts_with("image/"))
            })
            .map(|a| a.url.clone())
            .collect();

        let request = PromptRequest {
            prompt,
            channel: Some(channel_key.clone()),
            user: Some(msg.author.name.clone()),
            model: None,
            extra_context: None,
            image_sources,
        };

        let host = Arc::clone(&self.host);
        let http = Arc::clone(&ctx.http);
        let channel_id = msg.channel_id;
        tokio::spawn(async move {
            let typing = TypingHandle::start(Arc::clone(&http), channel_id);
            let status = DiscordStatusSink::new(Arc::clone(&http), channel_id);

            let outcome = run_prompt(host.as_ref(), request, &status).await;
            typing.stop();

            match outcome {
                Ok(outcome) => {
                    if outcome.aborted {
                        let _ = channel_id.say(&http, "Stopped.").await;
                        status.cleanup().await;
                    } else if !outcome.final_answer.is_empty() {
                        if let Err(e) =
                            crate::send::send_chunked(&http, channel_id, &outcome.final_answer)
                                .await
                        {
                            warn!(error = %e, "final answer send failed");
                        }
                        // Bubbles go away only after the answer is delivered.
                        status.cleanup().await;
                    }
                }
                Err(e) => {
                    warn!(channel = %channel_key, error = %e, "prompt chain failed");
                    let _ = channel_id
                        .say(&http, format!("Something went wrong: {e}"))
                        .await;
                    status.cleanup().await;
                }
            }
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            crate::commands::handle_interaction(&self.host, &ctx, &command).await;
        }
    }
}

/// The ingress gate:
/// (a) DMs always get a response.
/// (b) In a multi-member channel, only when the bot is mentioned.
/// (c) In a channel whose visible human membership is exactly one, every
///     message gets a response.
async fn should_respond(ctx: &Context, msg: &Message, bot_id: UserId) -> bool {
    if msg.guild_id.is_none() {
        return true;
    }
    if msg.mentions_user_id(bot_id) {
        return true;
    }
    visible_humans(ctx, msg, bot_id).await == Some(1)
}

/// Count non-bot members who can see this channel. Thread membership is
/// fetched from the API when the cache has nothing.
async fn visible_humans(ctx: &Context, msg: &Message, bot_id: UserId) -> Option<usize> {
    let channel = match msg.channel(ctx).await {
        Ok(Channel::Guild(channel)) => channel,
        Ok(_) => return None,
        Err(e) => {
            warn!(error = %e, "channel resolve failed");
            return None;
        }
    };

    if matches!(
        channel.kind,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
    ) {
        match ctx.http.get_channel_thread_members(channel.id).await {
            Ok(members) => {
                let humans = members
                    .iter()
                    .map(|m| m.user_id)
                    .filter(|id| *id != bot_id)
                    .count();
                return Some(humans);
            }
            Err(e) => {
                warn!(error = %e, "thread member fetch failed");
                return None;
            }
        }
    }

    match channel.members(&ctx.cache) {
        Ok(members) => Some(members.iter().filter(|m| !m.user.bot).count()),
        Err(e) => {
            warn!(error = %e, "channel member listing failed");
            None
        }
    }
}

/// Remove a leading `<@123>` / `<@!123>` mention of the bot.
fn strip_mention(content: &str, bot_id: UserId) -> &str {
    let trimmed = content.trim_start();
    for prefix in [format!("<@{bot_id}>"), format!("<@!{bot_id}>")] {
        if let Some(rest) = trimmed.strip_prefix(&prefix) {
            return rest.trim_start();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_prefix_is_stripped() {
        let id = UserId::new(42);
        assert_eq!(strip_mention("<@42> hello", id), "hello");
        assert_eq!(strip_mention("<@!42>  hi", id), "hi");
        assert_eq!(strip_mention("plain text", id), "plain text");
        // Someone else's mention stays.
        assert_eq!(strip_mention("<@7> hey", id), "<@7> hey");
    }
}
