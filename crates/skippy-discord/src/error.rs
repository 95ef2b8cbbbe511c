use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("Discord client error: {0}")]
    Client(#[from] serenity::Error),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),
}
