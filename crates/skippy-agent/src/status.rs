use async_trait::async_trait;

/// Where loop progress goes: Discord status bubbles, IPC status frames,
/// or nowhere (cron-fired prompts).
///
/// The orchestrator emits at: start ("thinking"), each iteration past the
/// first, each tool execution, and completion. The host deletes or closes
/// whatever it rendered in `cleanup`, after the final answer is delivered.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn emit(&self, text: &str);

    /// Tear down rendered status artifacts. Called by the host once the
    /// final answer is out; never called when the answer is empty.
    async fn cleanup(&self) {}
}

/// Sink for callers with nothing to show.
pub struct NoopStatus;

#[async_trait]
impl StatusSink for NoopStatus {
    async fn emit(&self, _text: &str) {}
}
