use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Total wall-clock budget for the call was exceeded.
    #[error("LLM request timed out")]
    Timeout,

    /// No chunk arrived within the stream-inactivity window.
    #[error("LLM stream stalled (no data for {secs}s)")]
    StreamStalled { secs: u64 },

    #[error("LLM endpoint rejected credentials (401)")]
    Unauthorized,

    #[error("LLM endpoint rate limited the request (429)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("LLM endpoint unavailable ({status})")]
    ServiceUnavailable { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl LlmError {
    /// Transient failures worth another attempt: 429, 502/503/504, and
    /// connection-level resets. Everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::ServiceUnavailable { .. }
                | LlmError::Network(_)
        )
    }
}
