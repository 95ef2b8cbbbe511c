use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] skippy_llm::LlmError),

    #[error("could not extract a response envelope: {0}")]
    Parse(String),

    #[error("context budget exceeded: ~{estimated} tokens against a {window}-token window")]
    ContextBudget { estimated: usize, window: u64 },

    #[error("memory error: {0}")]
    Memory(#[from] skippy_memory::MemoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
