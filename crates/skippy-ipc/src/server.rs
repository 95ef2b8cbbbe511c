use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use skippy_agent::{run_prompt, AgentContext, PromptRequest, StatusSink};

use crate::protocol::{IpcRequest, IpcResponse, OutputTarget};

/// Whole-connection budget: read, orchestrate, respond.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(300);

/// The daemon side of IPC: the agent context plus direct chat egress for
/// `message` requests and `output: chat`.
#[async_trait]
pub trait IpcHost: AgentContext + 'static {
    async fn send_chat(&self, channel: Option<&str>, content: &str) -> Result<(), String>;
}

/// Bind and serve until `shutdown` broadcasts `true`. Removes a stale
/// socket at bind and restricts the fresh one to the owning user.
pub async fn run<H: IpcHost>(
    host: Arc<H>,
    socket_path: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    let listener = UnixListener::bind(&socket_path)?;
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
    info!(path = %socket_path.display(), "IPC server listening");

    loop {
        tokio::select! {
            accept = listener.accept() => {
                let (stream, _) = accept?;
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    let result = tokio::time::timeout(
                        SOCKET_TIMEOUT,
                        handle_connection(stream, host),
                    )
                    .await;
                    match result {
                        Ok(Err(e)) => error!(error = %e, "IPC connection failed"),
                        Err(_) => warn!("IPC connection timed out"),
                        _ => {}
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }
    }

    cleanup_socket(&socket_path);
    Ok(())
}

pub fn cleanup_socket(socket_path: &Path) {
    let _ = std::fs::remove_file(socket_path);
}

/// Status frames for a prompt driven over IPC.
struct IpcStatusSink {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

#[async_trait]
impl StatusSink for IpcStatusSink {
    async fn emit(&self, text: &str) {
        let mut writer = self.writer.lock().await;
        let _ = write_frame(
            &mut writer,
            &IpcResponse::Status {
                content: text.to_string(),
            },
        )
        .await;
    }
}

async fn handle_connection<H: IpcHost>(
    stream: UnixStream,
    host: Arc<H>,
) -> std::io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let writer = Arc::new(Mutex::new(write_half));

    let request: IpcRequest = match serde_json::from_str(line.trim()) {
        Ok(req) => req,
        Err(e) => {
            let mut w = writer.lock().await;
            write_frame(
                &mut w,
                &IpcResponse::Error {
                    message: format!("bad request: {e}"),
                },
            )
            .await?;
            return Ok(());
        }
    };

    match request {
        IpcRequest::Prompt {
            prompt,
            output,
            channel,
            user,
            model,
            context,
        } => {
            let status = IpcStatusSink {
                writer: Arc::clone(&writer),
            };
            let req = PromptRequest {
                prompt,
                channel: channel.clone(),
                user,
                model,
                extra_context: context,
                image_sources: vec![],
            };
            let frame = match run_prompt(host.as_ref(), req, &status).await {
                Ok(outcome) if outcome.aborted => IpcResponse::Error {
                    message: "aborted".to_string(),
                },
                Ok(outcome) => {
                    if output == OutputTarget::Chat {
                        if let Err(e) = host
                            .send_chat(channel.as_deref(), &outcome.final_answer)
                            .await
                        {
                            warn!(error = %e, "chat delivery of IPC answer failed");
                        }
                    }
                    IpcResponse::Done {
                        content: outcome.final_answer,
                    }
                }
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            };
            let mut w = writer.lock().await;
            write_frame(&mut w, &frame).await?;
        }
        IpcRequest::Message {
            message, channel, ..
        } => {
            let frame = match host.send_chat(channel.as_deref(), &message).await {
                Ok(()) => IpcResponse::Done {
                    content: String::new(),
                },
                Err(e) => IpcResponse::Error { message: e },
            };
            let mut w = writer.lock().await;
            write_frame(&mut w, &frame).await?;
        }
    }

    Ok(())
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &IpcResponse,
) -> std::io::Result<()> {
    let encoded = serde_json::to_string(frame)?;
    writer.write_all(encoded.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
