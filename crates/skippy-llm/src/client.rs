use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skippy_core::config::OllamaConfig;

use crate::error::LlmError;
use crate::stream::StreamEvent;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// One chat call. `context` is prepended to `prompt` as a single user
/// message; `images` are base64 blobs attached to that message.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub context: String,
    pub images: Vec<String>,
}

/// What `/api/show` reports about a model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub param_size: String,
    pub quantization: String,
    pub context_length: Option<u64>,
}

pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    api_key: Option<String>,
    total_timeout: Duration,
    inactivity_timeout: Duration,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(cfg: &OllamaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: cfg.host.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            total_timeout: Duration::from_secs(cfg.timeout),
            inactivity_timeout: Duration::from_secs(cfg.stream_inactivity_timeout),
            max_retries: cfg.max_retries,
        }
    }

    /// Streaming chat. Forwards deltas to `tx` (when given) and returns the
    /// full collected text. `cancel` aborts the transport immediately.
    ///
    /// Retries only retryable failures with exponential backoff (1s, 2s, 4s,
    /// capped at 30s), honoring a server-supplied Retry-After when parseable.
    /// Timeout and stall are terminal for the whole call, not per attempt.
    pub async fn chat(
        &self,
        req: &ChatRequest,
        tx: Option<&mpsc::Sender<StreamEvent>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, LlmError> {
        let mut attempt: u32 = 0;
        loop {
            let result = self.chat_once(req, tx, cancel).await;
            match result {
                Err(ref e) if e.is_retryable() && attempt < self.max_retries => {
                    let backoff =
                        (BACKOFF_BASE_MS << attempt.min(5)).min(BACKOFF_CAP_MS);
                    let wait = match e {
                        LlmError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => (*ms).min(BACKOFF_CAP_MS),
                        _ => backoff,
                    };
                    attempt += 1;
                    warn!(attempt, wait_ms = wait, error = %e, "retrying LLM request");
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
                other => return other,
            }
        }
    }

    async fn chat_once(
        &self,
        req: &ChatRequest,
        tx: Option<&mpsc::Sender<StreamEvent>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, LlmError> {
        let deadline = tokio::time::Instant::now() + self.total_timeout;
        let body = build_chat_body(req);
        let url = format!("{}/api/chat", self.host);

        debug!(model = %req.model, images = req.images.len(), "sending chat request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let send = request.send();
        let resp = tokio::select! {
            r = tokio::time::timeout_at(deadline, send) => {
                r.map_err(|_| LlmError::Timeout)?.map_err(classify_transport)?
            }
            _ = cancelled(cancel) => return Err(LlmError::Cancelled),
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let message = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, message));
        }

        self.drain_stream(resp, deadline, tx, cancel).await
    }

    /// Parse Ollama's newline-delimited JSON stream. Each line is one JSON
    /// object; `done: true` carries the final token counts.
    async fn drain_stream(
        &self,
        resp: reqwest::Response,
        deadline: tokio::time::Instant,
        tx: Option<&mpsc::Sender<StreamEvent>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, LlmError> {
        let mut byte_stream = resp.bytes_stream();
        let mut collected = String::new();
        let mut line_buf = String::new();
        let mut model = String::new();
        let mut tokens_in = 0u32;
        let mut tokens_out = 0u32;

        loop {
            let next = tokio::select! {
                n = tokio::time::timeout(self.inactivity_timeout, byte_stream.next()) => {
                    match n {
                        Ok(n) => n,
                        Err(_) => {
                            let err = LlmError::StreamStalled {
                                secs: self.inactivity_timeout.as_secs(),
                            };
                            self.emit_error(tx, &err).await;
                            return Err(err);
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.emit_error(tx, &LlmError::Timeout).await;
                    return Err(LlmError::Timeout);
                }
                _ = cancelled(cancel) => return Err(LlmError::Cancelled),
            };

            let chunk = match next {
                Some(Ok(c)) => c,
                Some(Err(e)) => {
                    let err = LlmError::Network(e.to_string());
                    self.emit_error(tx, &err).await;
                    return Err(err);
                }
                None => break,
            };

            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };
            line_buf.push_str(text);

            // Split off complete lines, keep the trailing partial.
            let lines: Vec<&str> = line_buf.split('\n').collect();
            let (complete, remainder) = lines.split_at(lines.len() - 1);
            let remainder = remainder.first().unwrap_or(&"").to_string();

            for line in complete {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<StreamChunk>(line) {
                    Ok(parsed) => {
                        if model.is_empty() {
                            model = parsed.model.clone();
                        }
                        if parsed.done {
                            tokens_in = parsed.prompt_eval_count.unwrap_or(0);
                            tokens_out = parsed.eval_count.unwrap_or(0);
                        }
                        let delta = parsed.message.map(|m| m.content).unwrap_or_default();
                        if !delta.is_empty() {
                            collected.push_str(&delta);
                            if let Some(tx) = tx {
                                let _ = tx.send(StreamEvent::TextDelta { text: delta }).await;
                            }
                        }
                    }
                    Err(e) => warn!(line, err = %e, "unparseable stream chunk"),
                }
            }
            line_buf = remainder;
        }

        if let Some(tx) = tx {
            let _ = tx
                .send(StreamEvent::Done {
                    model,
                    tokens_in,
                    tokens_out,
                })
                .await;
        }
        Ok(collected)
    }

    async fn emit_error(&self, tx: Option<&mpsc::Sender<StreamEvent>>, err: &LlmError) {
        if let Some(tx) = tx {
            let _ = tx
                .send(StreamEvent::Error {
                    message: err.to_string(),
                })
                .await;
        }
    }

    /// `/api/show` — parameter size, quantization, and context length.
    /// Called once at startup to detect the effective context window.
    pub async fn introspect(&self, model: &str) -> Result<ModelInfo, LlmError> {
        let url = format!("{}/api/show", self.host);
        let mut request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": model }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.map_err(classify_transport)?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, None, message));
        }
        let show: ShowResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(model_info_from_show(model, show))
    }

    /// `/api/tags`, enriched with per-model context length via `/api/show`.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let url = format!("{}/api/tags", self.host);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.map_err(classify_transport)?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, None, message));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut out = Vec::with_capacity(tags.models.len());
        for m in tags.models {
            let context_length = match self.introspect(&m.name).await {
                Ok(info) => info.context_length,
                Err(e) => {
                    debug!(model = %m.name, error = %e, "introspection failed during list");
                    None
                }
            };
            out.push(ModelInfo {
                name: m.name,
                param_size: m.details.parameter_size.unwrap_or_default(),
                quantization: m.details.quantization_level.unwrap_or_default(),
                context_length,
            });
        }
        Ok(out)
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn build_chat_body(req: &ChatRequest) -> serde_json::Value {
    let content = if req.context.is_empty() {
        req.prompt.clone()
    } else {
        format!("{}\n{}", req.context, req.prompt)
    };
    let mut message = serde_json::json!({ "role": "user", "content": content });
    if !req.images.is_empty() {
        message["images"] = serde_json::json!(req.images);
    }
    serde_json::json!({
        "model": req.model,
        "messages": [message],
        "stream": true,
    })
}

fn classify_transport(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(e.to_string())
    }
}

fn classify_status(status: u16, retry_after_ms: Option<u64>, message: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Unauthorized,
        429 => LlmError::RateLimited { retry_after_ms },
        502 | 503 | 504 => LlmError::ServiceUnavailable { status },
        _ => LlmError::Api { status, message },
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1_000)
}

fn model_info_from_show(name: &str, show: ShowResponse) -> ModelInfo {
    // model_info keys are architecture-prefixed, e.g. "llama.context_length".
    let context_length = show.model_info.as_ref().and_then(|info| {
        info.iter()
            .find(|(k, _)| k.ends_with(".context_length"))
            .and_then(|(_, v)| v.as_u64())
    });
    let details = show.details.unwrap_or_default();
    ModelInfo {
        name: name.to_string(),
        param_size: details.parameter_size.unwrap_or_default(),
        quantization: details.quantization_level.unwrap_or_default(),
        context_length,
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: String,
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ShowResponse {
    details: Option<ModelDetails>,
    model_info: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Deserialize, Default)]
struct ModelDetails {
    parameter_size: Option<String>,
    quantization_level: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    details: ModelDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_joins_context_and_prompt() {
        let req = ChatRequest {
            model: "m".into(),
            prompt: "hi".into(),
            context: "ctx".into(),
            images: vec![],
        };
        let body = build_chat_body(&req);
        assert_eq!(body["messages"][0]["content"], "ctx\nhi");
        assert!(body["messages"][0].get("images").is_none());
    }

    #[test]
    fn chat_body_attaches_images() {
        let req = ChatRequest {
            model: "m".into(),
            prompt: "p".into(),
            context: String::new(),
            images: vec!["aGk=".into()],
        };
        let body = build_chat_body(&req);
        assert_eq!(body["messages"][0]["content"], "p");
        assert_eq!(body["messages"][0]["images"][0], "aGk=");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, None, String::new()),
            LlmError::Unauthorized
        ));
        assert!(matches!(
            classify_status(429, Some(2000), String::new()),
            LlmError::RateLimited {
                retry_after_ms: Some(2000)
            }
        ));
        assert!(matches!(
            classify_status(503, None, String::new()),
            LlmError::ServiceUnavailable { status: 503 }
        ));
        assert!(matches!(
            classify_status(400, None, String::new()),
            LlmError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn retryable_set_is_exact() {
        assert!(LlmError::RateLimited {
            retry_after_ms: None
        }
        .is_retryable());
        assert!(LlmError::ServiceUnavailable { status: 502 }.is_retryable());
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(!LlmError::Unauthorized.is_retryable());
        assert!(!LlmError::Timeout.is_retryable());
        assert!(!LlmError::StreamStalled { secs: 120 }.is_retryable());
    }

    #[test]
    fn context_length_found_by_suffix() {
        let show: ShowResponse = serde_json::from_value(serde_json::json!({
            "details": {"parameter_size": "8B", "quantization_level": "Q4_K_M"},
            "model_info": {
                "general.architecture": "llama",
                "llama.context_length": 131072
            }
        }))
        .unwrap();
        let info = model_info_from_show("llama3", show);
        assert_eq!(info.context_length, Some(131072));
        assert_eq!(info.param_size, "8B");
    }
}
