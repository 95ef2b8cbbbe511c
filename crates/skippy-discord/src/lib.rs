//! Discord gateway: ingress gating, history retrieval, status bubbles,
//! chunked egress, and the slash-command surface.

pub mod commands;
pub mod egress;
pub mod error;
pub mod handler;
pub mod history;
pub mod send;
pub mod status;
pub mod typing;

use std::sync::Arc;

use serenity::prelude::GatewayIntents;
use tracing::info;

use skippy_llm::OllamaClient;

pub use error::DiscordError;
pub use handler::SkippyHandler;

/// What the gateway needs from the daemon beyond the agent context:
/// model introspection and the runtime-mutable settings the slash commands
/// touch.
pub trait GatewayHost: skippy_agent::AgentContext + 'static {
    fn ollama(&self) -> &OllamaClient;
    /// Switch the default model and persist the config change.
    fn set_model(&self, model: String);
    /// Change the loop limit at runtime (already validated to 1..=200).
    fn set_loop_limit(&self, limit: u32);
}

/// Connect and run until the client stops.
pub async fn run<H: GatewayHost>(host: Arc<H>) -> Result<(), DiscordError> {
    let token = host.config().discord.token.clone();
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = SkippyHandler::new(host);
    let mut client = serenity::Client::builder(&token, intents)
        .event_handler(handler)
        .await?;

    info!("Discord gateway starting");
    client.start().await?;
    Ok(())
}
