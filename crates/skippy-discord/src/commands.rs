//! Slash commands — `/stop`, `/clear`, `/model`, `/loop_limit`, `/context`.
//!
//! Registered per guild in `ready()`; dispatched from `interaction_create`.

use std::sync::Arc;

use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse, GetMessages,
};
use serenity::model::application::{CommandInteraction, CommandOptionType};
use serenity::model::id::{GuildId, MessageId};
use serenity::prelude::Context;
use tracing::{info, warn};

use skippy_agent::ContextItemKind;

use crate::GatewayHost;

/// Messages older than this cannot be bulk-deleted by the platform.
const CLEAR_CUTOFF_DAYS: i64 = 14;

pub async fn register_commands(ctx: &Context, guild_id: &str) {
    let commands = vec![
        CreateCommand::new("stop").description("Abort the in-flight request in this channel"),
        CreateCommand::new("clear").description("Delete recent messages in this channel"),
        CreateCommand::new("model")
            .description("Show available models or switch the active one")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "name", "Model to switch to")
                    .required(false),
            ),
        CreateCommand::new("loop_limit")
            .description("Show or set the agentic step limit (1-200)")
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "value", "New limit")
                    .required(false),
            ),
        CreateCommand::new("context")
            .description("Manage persistent context files and images")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "action",
                    "add | remove | list | status | clear",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "kind", "file | image")
                    .required(false),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "path", "Path to add")
                    .required(false),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "index",
                    "1-based index to remove",
                )
                .required(false),
            ),
    ];

    let Ok(gid) = guild_id.parse::<u64>() else {
        warn!(guild_id, "invalid guild id; slash commands not registered");
        return;
    };
    match GuildId::new(gid).set_commands(&ctx.http, commands).await {
        Ok(cmds) => info!(guild = gid, count = cmds.len(), "slash commands registered"),
        Err(e) => warn!(guild = gid, error = %e, "slash command registration failed"),
    }
}

pub async fn handle_interaction<H: GatewayHost>(
    host: &Arc<H>,
    ctx: &Context,
    command: &CommandInteraction,
) {
    // Defer first: model listing and clears can outlive the 3s window.
    let defer = CreateInteractionResponse::Defer(
        CreateInteractionResponseMessage::new().ephemeral(true),
    );
    if let Err(e) = command.create_response(&ctx.http, defer).await {
        warn!(error = %e, "interaction defer failed");
        return;
    }

    let reply = match command.data.name.as_str() {
        "stop" => handle_stop(host, command),
        "clear" => handle_clear(ctx, command).await,
        "model" => handle_model(host, command).await,
        "loop_limit" => handle_loop_limit(host, command),
        "context" => handle_context(host, command),
        other => format!("Unknown command: {other}"),
    };

    let edit = EditInteractionResponse::new().content(reply);
    if let Err(e) = command.edit_response(&ctx.http, edit).await {
        warn!(error = %e, "interaction response failed");
    }
}

fn handle_stop<H: GatewayHost>(host: &Arc<H>, command: &CommandInteraction) -> String {
    let channel_key = command.channel_id.to_string();
    if host.aborts().is_active(&channel_key) {
        host.aborts().request(&channel_key);
        "Stopping the current request.".to_string()
    } else {
        "Nothing is running in this channel.".to_string()
    }
}

/// Delete messages in batches up to the platform's 14-day bulk cutoff.
async fn handle_clear(ctx: &Context, command: &CommandInteraction) -> String {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(CLEAR_CUTOFF_DAYS);
    let channel_id = command.channel_id;
    let mut deleted = 0usize;

    loop {
        let batch = match channel_id
            .messages(&ctx.http, GetMessages::new().limit(100))
            .await
        {
            Ok(batch) => batch,
            Err(e) => return format!("Fetch failed after {deleted} deletions: {e}"),
        };
        let ids: Vec<MessageId> = batch
            .iter()
            .filter(|m| {
                chrono::DateTime::from_timestamp(m.timestamp.unix_timestamp(), 0)
                    .is_some_and(|t| t > cutoff)
            })
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            break;
        }
        let result = if ids.len() == 1 {
            channel_id.delete_message(&ctx.http, ids[0]).await
        } else {
            channel_id.delete_messages(&ctx.http, ids.iter().copied()).await
        };
        if let Err(e) = result {
            return format!("Deletion stopped after {deleted} messages: {e}");
        }
        deleted += ids.len();
        if ids.len() < 100 {
            break;
        }
    }
    format!("Deleted {deleted} messages.")
}

async fn handle_model<H: GatewayHost>(host: &Arc<H>, command: &CommandInteraction) -> String {
    let name = option_str(command, "name");
    match name {
        None => match host.ollama().list_models().await {
            Ok(models) => {
                let current = host.current_model();
                let mut lines = vec![format!("Active model: {current}")];
                for m in models {
                    lines.push(format!(
                        "- {} ({}, {}, ctx {})",
                        m.name,
                        m.param_size,
                        m.quantization,
                        m.context_length
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    ));
                }
                lines.join("\n")
            }
            Err(e) => format!("Model listing failed: {e}"),
        },
        Some(name) => match host.ollama().introspect(&name).await {
            Ok(info) => {
                host.set_model(name.clone());
                format!(
                    "Switched to {name} ({}, ctx {}).",
                    info.param_size,
                    info.context_length
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "?".to_string())
                )
            }
            Err(e) => format!("Cannot switch to '{name}': {e}"),
        },
    }
}

fn handle_loop_limit<H: GatewayHost>(host: &Arc<H>, command: &CommandInteraction) -> String {
    match option_i64(command, "value") {
        None => format!("Loop limit: {}", host.loop_limit()),
        Some(v) if (1..=200).contains(&v) => {
            host.set_loop_limit(v as u32);
            format!("Loop limit set to {v}.")
        }
        Some(v) => format!("{v} is out of range; the limit must be 1-200."),
    }
}

fn handle_context<H: GatewayHost>(host: &Arc<H>, command: &CommandInteraction) -> String {
    let action = option_str(command, "action").unwrap_or_default();
    let store = host.persistent();
    match action.as_str() {
        "add" => {
            let Some(path) = option_str(command, "path") else {
                return "`path` is required for add.".to_string();
            };
            let kind = match option_str(command, "kind").as_deref() {
                Some("image") => ContextItemKind::Image,
                _ => ContextItemKind::File,
            };
            let added_by = command.user.name.clone();
            match store.add(kind, &path, &added_by) {
                Ok(()) => format!("Added {path}."),
                Err(e) => format!("Add failed: {e}"),
            }
        }
        "remove" => match option_i64(command, "index") {
            Some(index) if index >= 1 => match store.remove(index as usize) {
                Ok(Some(item)) => format!("Removed {}.", item.path),
                Ok(None) => format!("No item at index {index}."),
                Err(e) => format!("Remove failed: {e}"),
            },
            _ => "`index` (1-based) is required for remove.".to_string(),
        },
        "list" => {
            let items = store.list();
            if items.is_empty() {
                "No persistent context items.".to_string()
            } else {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        format!(
                            "{}. [{}] {} (added by {})",
                            i + 1,
                            match item.kind {
                                ContextItemKind::File => "file",
                                ContextItemKind::Image => "image",
                            },
                            item.path,
                            item.added_by
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "status" => {
            let files = store.files();
            let bytes: u64 = files
                .iter()
                .filter_map(|f| std::fs::metadata(&f.path).ok())
                .map(|m| m.len())
                .sum();
            let estimated = bytes / 4;
            let window = host
                .config()
                .ollama
                .context_window
                .or_else(|| host.detected_context_window())
                .unwrap_or(1_000_000);
            format!(
                "{} file(s), {} image(s); ~{estimated} tokens of {window} window ({:.1}%).",
                files.len(),
                store.image_paths().len(),
                estimated as f64 / window as f64 * 100.0
            )
        }
        "clear" => match store.clear() {
            Ok(n) => format!("Cleared {n} items."),
            Err(e) => format!("Clear failed: {e}"),
        },
        other => format!("Unknown action '{other}'; use add/remove/list/status/clear."),
    }
}

fn option_str(command: &CommandInteraction, name: &str) -> Option<String> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
        .map(str::to_string)
}

fn option_i64(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_i64())
}
