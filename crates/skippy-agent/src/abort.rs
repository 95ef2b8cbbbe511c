use dashmap::{DashMap, DashSet};
use tokio_util::sync::CancellationToken;

/// Per-channel abort flags plus the cancellation tokens of live chains.
///
/// An abort is an explicit user action. The flag is polled at the loop top,
/// after each LLM completion, and before each tool; the token additionally
/// cancels an in-flight LLM stream at the transport layer.
#[derive(Default)]
pub struct AbortRegistry {
    pending: DashSet<String>,
    active: DashMap<String, CancellationToken>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a starting chain. Returns the token the LLM client watches.
    pub fn begin(&self, channel: &str) -> CancellationToken {
        self.pending.remove(channel);
        let token = CancellationToken::new();
        self.active.insert(channel.to_string(), token.clone());
        token
    }

    /// Request an abort for a channel. Cancels the live stream if any.
    pub fn request(&self, channel: &str) {
        self.pending.insert(channel.to_string());
        if let Some(token) = self.active.get(channel) {
            token.cancel();
        }
    }

    pub fn is_requested(&self, channel: &str) -> bool {
        self.pending.contains(channel)
    }

    /// Is a chain currently running on this channel?
    pub fn is_active(&self, channel: &str) -> bool {
        self.active.contains_key(channel)
    }

    /// Chain finished (normally or aborted): drop the token and the flag.
    pub fn end(&self, channel: &str) {
        self.active.remove(channel);
        self.pending.remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_cancels_the_active_token() {
        let reg = AbortRegistry::new();
        let token = reg.begin("general");
        assert!(!reg.is_requested("general"));

        reg.request("general");
        assert!(reg.is_requested("general"));
        assert!(token.is_cancelled());

        reg.end("general");
        assert!(!reg.is_requested("general"));
    }

    #[test]
    fn begin_clears_a_stale_flag() {
        let reg = AbortRegistry::new();
        reg.request("general");
        let _token = reg.begin("general");
        assert!(!reg.is_requested("general"));
    }
}
