use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use skippy_llm::{ChatBackend, ChatRequest};

use crate::{args, Tool, ToolError, ToolResult};

const SUMMARIZE_PROMPT: &str = "Condense the following tool documentation into a compact \
reference the assistant can keep in its system prompt. For every tool keep: its name, each \
operation, required and optional arguments with types, and the result shape. Drop prose and \
examples. Output plain text, grouped per tool.";

/// Registry of all tools. Dispatch is by case-insensitive name; arguments
/// are normalized once at this boundary.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    condensed: OnceLock<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            condensed: OnceLock::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Initialise every tool. A failing tool is reported but does not take
    /// the daemon down; its operations will fail at dispatch instead.
    pub async fn init_all(&self) -> Vec<(String, ToolError)> {
        let mut failures = Vec::new();
        for tool in &self.tools {
            if let Err(e) = tool.init().await {
                warn!(tool = tool.name(), error = %e, "tool init failed");
                failures.push((tool.name().to_string(), e));
            }
        }
        failures
    }

    /// Every capability document, concatenated.
    pub fn raw_context(&self) -> String {
        let mut out = String::new();
        for tool in &self.tools {
            out.push_str(&format!("## Tool: {}\n", tool.name()));
            out.push_str(tool.context().trim());
            out.push_str("\n\n");
        }
        out
    }

    /// Compile the Condensed Tool Context: one summarization pass over the
    /// concatenated capability documents, performed once per process
    /// lifetime and cached. Falls back to the raw concatenation when the
    /// pass fails or returns nothing.
    pub async fn compile_context(&self, llm: &dyn ChatBackend, model: &str) -> &str {
        if let Some(cached) = self.condensed.get() {
            return cached;
        }
        let raw = self.raw_context();
        let req = ChatRequest {
            model: model.to_string(),
            prompt: raw.clone(),
            context: SUMMARIZE_PROMPT.to_string(),
            images: vec![],
        };
        let condensed = match llm.chat(&req, None, None).await {
            Ok(text) if !text.trim().is_empty() => {
                info!(
                    raw_len = raw.len(),
                    condensed_len = text.len(),
                    "tool context compiled"
                );
                text
            }
            Ok(_) => {
                warn!("tool context summarization returned nothing; using raw text");
                raw
            }
            Err(e) => {
                warn!(error = %e, "tool context summarization failed; using raw text");
                raw
            }
        };
        let _ = self.condensed.set(condensed);
        self.condensed.get().expect("just set")
    }

    /// The cached condensed context, if compiled.
    pub fn condensed_context(&self) -> Option<&str> {
        self.condensed.get().map(|s| s.as_str())
    }

    /// Normalize arguments and run the named tool. An unknown tool name is
    /// an ordinary failed result so the model can correct itself.
    pub async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::error(format!(
                "unknown tool: '{}'. Available tools: {}",
                name,
                self.names().join(", ")
            ));
        };
        tool.run(args::normalize(arguments)).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
