//! The prompt orchestrator: context assembly, dual-channel response
//! parsing, tool dispatch, and the bounded agentic loop.

pub mod abort;
pub mod context;
pub mod continuation;
pub mod envelope;
pub mod error;
pub mod images;
pub mod orchestrator;
pub mod parser;
pub mod persistent;
pub mod status;

pub use abort::AbortRegistry;
pub use context::AgentContext;
pub use continuation::{ContinuationMap, PendingContinuation};
pub use envelope::{Action, ControlEnvelope};
pub use error::AgentError;
pub use orchestrator::{run_prompt, PromptOutcome, PromptRequest, ToolInvocation};
pub use persistent::{ContextItem, ContextItemKind, PersistentContext};
pub use status::{NoopStatus, StatusSink};
