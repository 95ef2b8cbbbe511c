//! Per-request context assembly and the application-context trait that
//! decouples the orchestrator from the daemon's wiring.

use tracing::warn;

use skippy_core::config::SkippyConfig;
use skippy_llm::ChatBackend;
use skippy_memory::MemoryStore;
use skippy_tools::registry::ToolRegistry;

use crate::abort::AbortRegistry;
use crate::continuation::ContinuationMap;
use crate::persistent::PersistentContext;

/// Everything a prompt chain needs, implemented by the daemon's `AppState`
/// and by test harnesses. Channel hosts never reach around this trait.
pub trait AgentContext: Send + Sync {
    fn config(&self) -> &SkippyConfig;
    fn llm(&self) -> &dyn ChatBackend;
    fn memory(&self) -> &MemoryStore;
    fn tools(&self) -> &ToolRegistry;
    fn aborts(&self) -> &AbortRegistry;
    fn continuations(&self) -> &ContinuationMap;
    fn persistent(&self) -> &PersistentContext;

    /// Context window reported by model introspection at startup, if any.
    fn detected_context_window(&self) -> Option<u64>;

    /// The model in effect right now (changeable at runtime via commands).
    fn current_model(&self) -> String;

    /// The loop limit in effect right now (changeable at runtime).
    fn loop_limit(&self) -> u32;
}

/// The fixed rules block. Part of the external contract: models are
/// prompted with the block grammar verbatim.
pub const SYSTEM_RULES: &str = r#"You are Skippy, a personal assistant daemon. You act by emitting
exactly one JSON object per turn, with this shape:

{
  "reasoning": "short private reasoning",
  "actions": [
    {"type": "tool_call", "tool": "<name>", "arguments": { ... }, "reasoning": "why"}
  ],
  "final_answer": "message for the user when you are done",
  "continue": true | false
}

Rules:
- Set "continue": true while more tool work remains; set it to false and fill
  "final_answer" when you are done.
- Tool results from your previous actions are appended to the next prompt.
- NEVER place multi-line file content or patch text inside the JSON. Instead
  omit that argument and append delimited blocks AFTER the closing brace:

===SKIPPY_FILE_START:<path>===
<verbatim file content>
===SKIPPY_FILE_END===

===SKIPPY_PATCH_START:<path>===
===FIND===
<verbatim text to find>
===REPLACE===
<verbatim replacement>
===SKIPPY_PATCH_END===

  A patch block may hold several FIND/REPLACE pairs. The content is applied
  to the action whose arguments name the same filepath.
- Emit nothing else outside the JSON object and the blocks."#;

/// Build the system block in its fixed order. Failures inside optional
/// sections (memory, skills, listings) degrade to omission, never to a
/// failed prompt.
pub fn assemble_context(ctx: &dyn AgentContext, user: &str, channel: Option<&str>) -> String {
    let mut out = String::with_capacity(8 * 1024);
    out.push_str(SYSTEM_RULES);
    out.push_str("\n\n");

    let now = chrono::Local::now();
    out.push_str(&format!(
        "Current time: {} ({})\n",
        now.format("%a %Y-%m-%d %H:%M:%S"),
        now.offset()
    ));
    out.push_str(&format!("Current user: {user}\n"));
    if let Some(channel) = channel {
        out.push_str(&format!("Current channel: {channel}\n"));
    }

    out.push_str("\n## Available tools\n");
    match ctx.tools().condensed_context() {
        Some(condensed) => out.push_str(condensed),
        None => out.push_str(&ctx.tools().raw_context()),
    }
    out.push('\n');

    match ctx.memory().known_channels() {
        Ok(channels) if !channels.is_empty() => {
            out.push_str("\n## Known channels\n");
            for name in channels {
                out.push_str(&format!("- {name}\n"));
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "known-channel listing failed"),
    }

    let categories = &ctx.config().memory.context_categories;
    match ctx.memory().context_memories(categories) {
        Ok(sections) if !sections.is_empty() => {
            out.push_str("\n## Memory\n");
            for (category, items) in sections {
                out.push_str(&format!("### {category}\n"));
                for item in items {
                    out.push_str(&format!("- {}: {}\n", item.key, render_value(&item.value)));
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "memory context failed"),
    }

    match ctx.memory().context_skills(user) {
        Ok(skills) if !skills.is_empty() => {
            out.push_str("\n## Skills\n");
            for skill in skills {
                out.push_str(&format!(
                    "{} [{}]: {}\n",
                    skill.name, skill.owner, skill.description
                ));
                if !skill.instructions.is_empty() {
                    out.push_str(&format!("Instructions: {}\n", skill.instructions));
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "skill context failed"),
    }

    if let Ok(cwd) = std::env::current_dir() {
        out.push_str(&format!("\n## Working directory\n{}\n", cwd.display()));
        if let Ok(entries) = std::fs::read_dir(&cwd) {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            for name in names.iter().take(50) {
                out.push_str(&format!("- {name}\n"));
            }
        }
    }

    // Persistent files are read fresh on every prompt.
    for item in ctx.persistent().files() {
        match std::fs::read_to_string(&item.path) {
            Ok(content) => {
                out.push_str(&format!("\n<file path=\"{}\">\n{}\n</file>\n", item.path, content));
            }
            Err(e) => warn!(path = %item.path, error = %e, "persistent context file unreadable"),
        }
    }

    out
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
