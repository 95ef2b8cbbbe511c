//! Tool system: the uniform contract every side-effectful capability
//! implements, argument normalization, and the dispatching registry.

pub mod args;
pub mod registry;
pub mod tools;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of executing a tool operation. `success == false` (or a non-null
/// `error`) forces the agentic loop to give the model another turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.success || self.error.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool init failed: {0}")]
    Init(String),
}

/// The uniform tool contract.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Dispatch name. Matching against LLM output is case-insensitive.
    fn name(&self) -> &str;

    /// One-time startup hook. Most tools have nothing to do.
    async fn init(&self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute one operation with normalized arguments.
    async fn run(&self, args: serde_json::Value) -> ToolResult;

    /// Capability document: a human-readable schema of the tool's
    /// operations, argument shapes, and result shape. Compiled into the
    /// Condensed Tool Context at startup.
    fn context(&self) -> String;
}
