use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ChatRequest, OllamaClient};
use crate::error::LlmError;
use crate::stream::StreamEvent;

/// The chat seam the orchestrator talks through. `OllamaClient` is the
/// production implementation; tests script their own.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        req: &ChatRequest,
        tx: Option<&mpsc::Sender<StreamEvent>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(
        &self,
        req: &ChatRequest,
        tx: Option<&mpsc::Sender<StreamEvent>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, LlmError> {
        OllamaClient::chat(self, req, tx, cancel).await
    }
}
