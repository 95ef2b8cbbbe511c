use dashmap::DashMap;

use crate::orchestrator::ToolInvocation;

/// Saved loop state, offered when the iteration budget runs out.
#[derive(Debug, Clone)]
pub struct PendingContinuation {
    pub tool_results: Vec<ToolInvocation>,
    pub resume_prompt: String,
    pub original_prompt: String,
    pub loop_count: u32,
}

/// One pending continuation per channel, replaced atomically.
#[derive(Default)]
pub struct ContinuationMap {
    inner: DashMap<String, PendingContinuation>,
}

impl ContinuationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, channel: &str, continuation: PendingContinuation) {
        self.inner.insert(channel.to_string(), continuation);
    }

    /// Remove and return the saved state. The next prompt either resumes it
    /// (affirmative reply) or has implicitly discarded it.
    pub fn take(&self, channel: &str) -> Option<PendingContinuation> {
        self.inner.remove(channel).map(|(_, v)| v)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.inner.contains_key(channel)
    }
}

/// Is this message an affirmative answer to "would you like me to continue?"
pub fn is_affirmative(message: &str) -> bool {
    let normalized: String = message
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    matches!(
        normalized.split_whitespace().collect::<Vec<_>>().join(" ").as_str(),
        "y" | "yes"
            | "yep"
            | "yeah"
            | "yup"
            | "sure"
            | "ok"
            | "okay"
            | "continue"
            | "proceed"
            | "go"
            | "go ahead"
            | "do it"
            | "please do"
            | "keep going"
            | "yes please"
            | "sure go ahead"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmative_tokens() {
        for msg in ["yes", "Yes!", "  yep ", "go ahead", "OK", "keep going", "sure."] {
            assert!(is_affirmative(msg), "{msg:?} should be affirmative");
        }
        for msg in ["no", "stop", "what is 2+2?", "yes but change the plan first"] {
            assert!(!is_affirmative(msg), "{msg:?} should not be affirmative");
        }
    }

    #[test]
    fn saved_state_is_single_entry_per_channel() {
        let map = ContinuationMap::new();
        let cont = PendingContinuation {
            tool_results: vec![],
            resume_prompt: "a".into(),
            original_prompt: "a".into(),
            loop_count: 2,
        };
        map.save("ch", cont.clone());
        map.save(
            "ch",
            PendingContinuation {
                resume_prompt: "b".into(),
                ..cont
            },
        );
        let taken = map.take("ch").unwrap();
        assert_eq!(taken.resume_prompt, "b");
        assert!(map.take("ch").is_none(), "take consumes");
    }
}
