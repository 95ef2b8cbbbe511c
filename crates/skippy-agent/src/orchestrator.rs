//! The agentic loop: LLM turn → parse → execute tools → feed results back,
//! until the model declares itself done or the budget runs out.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use skippy_llm::{ChatRequest, LlmError};

use crate::context::{assemble_context, AgentContext};
use crate::continuation::{is_affirmative, PendingContinuation};
use crate::envelope::ControlEnvelope;
use crate::error::{AgentError, Result};
use crate::images::load_images;
use crate::parser::{parse_response, FileBlock, ParseOutcome, PatchBlock};
use crate::status::StatusSink;

const DEFAULT_CONTEXT_WINDOW: u64 = 1_000_000;
const SUMMARY_TIMEOUT_SECS: u64 = 180;
const SUMMARY_APOLOGY: &str =
    "I finished the work but couldn't put together a summary. Please check the tool results.";

/// One inbound prompt, from the gateway, IPC, or the scheduler.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub prompt: String,
    /// Channel key for abort/continuation bookkeeping. `None` means a
    /// detached chain (cron, bare IPC).
    pub channel: Option<String>,
    pub user: Option<String>,
    pub model: Option<String>,
    pub extra_context: Option<String>,
    /// Image URLs or paths, attached on the first iteration only.
    pub image_sources: Vec<String>,
}

/// One executed tool call, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

#[derive(Debug)]
pub struct PromptOutcome {
    pub final_answer: String,
    pub aborted: bool,
    pub loop_count: u32,
    pub tool_results: Vec<ToolInvocation>,
    pub last_response: Option<ControlEnvelope>,
}

/// Drive one full prompt chain. At most one chain per channel is the
/// caller's contract; chains on different channels are independent.
pub async fn run_prompt(
    ctx: &dyn AgentContext,
    req: PromptRequest,
    status: &dyn StatusSink,
) -> Result<PromptOutcome> {
    let channel_key = req
        .channel
        .clone()
        .unwrap_or_else(|| "_direct".to_string());
    let user = req
        .user
        .clone()
        .unwrap_or_else(|| ctx.config().discord.default_user.clone());

    // A saved continuation is resumed by an affirmative reply and discarded
    // by anything else.
    let mut tool_results: Vec<ToolInvocation> = Vec::new();
    let mut prompt = req.prompt.clone();
    if let Some(saved) = ctx.continuations().take(&channel_key) {
        if is_affirmative(&req.prompt) {
            info!(channel = %channel_key, prior_steps = saved.loop_count, "resuming continuation");
            status.emit("resuming where I left off").await;
            tool_results = saved.tool_results;
            prompt = saved.resume_prompt;
        } else {
            info!(channel = %channel_key, "discarding continuation; running fresh");
        }
    }

    let cancel = ctx.aborts().begin(&channel_key);
    let outcome = run_loop(ctx, &req, &channel_key, &user, prompt, tool_results, status, &cancel).await;
    ctx.aborts().end(&channel_key);
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    ctx: &dyn AgentContext,
    req: &PromptRequest,
    channel_key: &str,
    user: &str,
    original_prompt: String,
    mut tool_results: Vec<ToolInvocation>,
    status: &dyn StatusSink,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<PromptOutcome> {
    status.emit("thinking").await;

    let assembled = assemble_context(ctx, user, req.channel.as_deref());
    let mut images = load_images(&collect_image_sources(ctx, req)).await;

    let model = req.model.clone().unwrap_or_else(|| ctx.current_model());
    let loop_limit = ctx.loop_limit().max(1);
    let mut loop_count: u32 = 0;
    let mut last_response: Option<ControlEnvelope> = None;

    loop {
        if ctx.aborts().is_requested(channel_key) {
            return Ok(aborted(loop_count, tool_results, last_response));
        }
        loop_count += 1;
        if loop_count > 1 {
            status.emit(&format!("processing step {loop_count}")).await;
        }

        let iteration_prompt =
            build_iteration_prompt(&original_prompt, req.extra_context.as_deref(), &tool_results, loop_count, loop_limit);
        log_budget(ctx, &assembled, &iteration_prompt)?;

        let chat_req = ChatRequest {
            model: model.clone(),
            prompt: iteration_prompt,
            context: assembled.clone(),
            images: std::mem::take(&mut images),
        };
        let raw = match ctx.llm().chat(&chat_req, None, Some(cancel)).await {
            Ok(raw) => raw,
            Err(LlmError::Cancelled) => {
                return Ok(aborted(loop_count, tool_results, last_response))
            }
            Err(e) => return Err(e.into()),
        };
        if ctx.aborts().is_requested(channel_key) {
            return Ok(aborted(loop_count, tool_results, last_response));
        }

        let (envelope, blocks, repaired) = match parse_response(&raw) {
            ParseOutcome::Parsed {
                envelope,
                blocks,
                repaired,
            } => (envelope, blocks, repaired),
            ParseOutcome::MissingControlFields { .. } => {
                warn!(channel = %channel_key, "response carried no control fields");
                tool_results.push(system_note(
                    "Your last response had none of actions/final_answer/continue. \
                     Reply with exactly one JSON object in the required envelope format.",
                ));
                if loop_count >= loop_limit {
                    return Ok(save_continuation(
                        ctx, channel_key, original_prompt, tool_results, loop_count, loop_limit,
                        last_response,
                    ));
                }
                continue;
            }
            ParseOutcome::NoJson => {
                return Err(AgentError::Parse(format!(
                    "no JSON envelope found in a {}-char response",
                    raw.len()
                )));
            }
        };
        if repaired {
            tool_results.push(system_note(
                "Warning: your last response was not valid JSON and had to be repaired. \
                 Emit exactly one clean JSON object next time.",
            ));
        }
        last_response = Some(envelope.clone());

        // Execute this turn's actions in emission order.
        let mut any_failure = false;
        for action in &envelope.actions {
            if ctx.aborts().is_requested(channel_key) {
                return Ok(aborted(loop_count, tool_results, last_response));
            }
            if action.action_type != "tool_call" {
                continue;
            }
            status.emit(&format!("running {}", action.tool)).await;

            let mut arguments = action.arguments.clone();
            inject_blocks(&mut arguments, &blocks.file_blocks, &blocks.patch_blocks);

            let result = ctx.tools().dispatch(&action.tool, arguments.clone()).await;
            if result.is_failure() {
                any_failure = true;
            }
            tool_results.push(ToolInvocation {
                tool: action.tool.clone(),
                arguments,
                result: serde_json::to_value(&result).unwrap_or_else(
                    |e| serde_json::json!({ "success": false, "error": e.to_string(), "exitCode": 1 }),
                ),
            });
        }

        // A failed tool must be seen by the model even if it declared done.
        let continue_ = envelope.continue_ || any_failure;

        if !continue_ && (!envelope.final_answer.is_empty() || envelope.actions.is_empty()) {
            status.emit("done").await;
            let final_answer = if envelope.final_answer.is_empty() && !tool_results.is_empty() {
                fallback_summary(ctx, &model, &original_prompt, &tool_results).await
            } else {
                envelope.final_answer.clone()
            };
            return Ok(PromptOutcome {
                final_answer,
                aborted: false,
                loop_count,
                tool_results,
                last_response,
            });
        }

        if loop_count >= loop_limit {
            return Ok(save_continuation(
                ctx, channel_key, original_prompt, tool_results, loop_count, loop_limit,
                last_response,
            ));
        }
    }
}

fn aborted(
    loop_count: u32,
    tool_results: Vec<ToolInvocation>,
    last_response: Option<ControlEnvelope>,
) -> PromptOutcome {
    PromptOutcome {
        final_answer: String::new(),
        aborted: true,
        loop_count,
        tool_results,
        last_response,
    }
}

fn system_note(message: &str) -> ToolInvocation {
    ToolInvocation {
        tool: "_system".to_string(),
        arguments: serde_json::json!({}),
        result: serde_json::json!({ "success": false, "error": message }),
    }
}

fn save_continuation(
    ctx: &dyn AgentContext,
    channel_key: &str,
    original_prompt: String,
    tool_results: Vec<ToolInvocation>,
    loop_count: u32,
    loop_limit: u32,
    last_response: Option<ControlEnvelope>,
) -> PromptOutcome {
    let resume_prompt = format!(
        "{original_prompt}\n\n(You were interrupted by the step limit; pick up where you left off.)"
    );
    ctx.continuations().save(
        channel_key,
        PendingContinuation {
            tool_results: tool_results.clone(),
            resume_prompt,
            original_prompt,
            loop_count,
        },
    );
    info!(channel = %channel_key, loop_count, "loop limit reached; continuation saved");
    PromptOutcome {
        final_answer: format!(
            "I've hit my step limit ({loop_limit} steps) and there's still work to do. \
             Would you like me to continue?"
        ),
        aborted: false,
        loop_count,
        tool_results,
        last_response,
    }
}

/// Iterations after the first carry the accumulated tool results so the
/// model can react to them; the chat itself is a single user message.
fn build_iteration_prompt(
    original: &str,
    extra_context: Option<&str>,
    tool_results: &[ToolInvocation],
    loop_count: u32,
    loop_limit: u32,
) -> String {
    let base = match extra_context {
        Some(extra) => format!("<context>\n{extra}\n</context>\n\n{original}"),
        None => original.to_string(),
    };
    if tool_results.is_empty() {
        return base;
    }
    let results =
        serde_json::to_string_pretty(tool_results).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{base}\n\nPrevious actions and results (step {loop_count} of {loop_limit}):\n\
         ```json\n{results}\n```\n\
         Continue working toward the goal, or finish with a final_answer."
    )
}

/// Chars/4 estimate against the effective window. Observational unless
/// `prompt.enforce_context_budget` is set.
fn log_budget(ctx: &dyn AgentContext, context: &str, prompt: &str) -> Result<()> {
    let estimated = (context.len() + prompt.len()) / 4;
    let window = ctx
        .config()
        .ollama
        .context_window
        .or_else(|| ctx.detected_context_window())
        .unwrap_or(DEFAULT_CONTEXT_WINDOW);
    let utilization = estimated as f64 / window as f64 * 100.0;
    info!(estimated_tokens = estimated, window, utilization = format!("{utilization:.1}%"), "iteration budget");

    if ctx.config().prompt.enforce_context_budget && estimated as u64 > window {
        return Err(AgentError::ContextBudget { estimated, window });
    }
    Ok(())
}

fn collect_image_sources(ctx: &dyn AgentContext, req: &PromptRequest) -> Vec<String> {
    let mut sources = req.image_sources.clone();
    sources.extend(ctx.persistent().image_paths());
    sources
}

/// Route the out-of-band payload into the action that names the same file.
fn inject_blocks(
    arguments: &mut serde_json::Value,
    file_blocks: &[FileBlock],
    patch_blocks: &[PatchBlock],
) {
    let Some(path) = arguments
        .get("filepath")
        .or_else(|| arguments.get("path"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
    else {
        return;
    };
    let Some(args) = arguments.as_object_mut() else {
        return;
    };

    if !args.contains_key("content") {
        if let Some(block) = file_blocks.iter().find(|b| b.path == path) {
            args.insert(
                "content".to_string(),
                serde_json::Value::String(block.content.clone()),
            );
        }
    }
    if !args.contains_key("changes") {
        if let Some(block) = patch_blocks.iter().find(|b| b.path == path) {
            let changes: Vec<serde_json::Value> = block
                .changes
                .iter()
                .map(|c| serde_json::json!({ "find": c.find, "replace": c.replace }))
                .collect();
            args.insert("changes".to_string(), serde_json::Value::Array(changes));
        }
    }
}

/// The model ended the loop without a final answer after doing work; ask it
/// once for a short user-facing message, with a hard timeout.
async fn fallback_summary(
    ctx: &dyn AgentContext,
    model: &str,
    original_prompt: &str,
    tool_results: &[ToolInvocation],
) -> String {
    let results = serde_json::to_string(tool_results).unwrap_or_else(|_| "[]".to_string());
    let req = ChatRequest {
        model: model.to_string(),
        prompt: format!(
            "The user asked: {original_prompt}\n\nThese tool calls were executed:\n{results}\n\n\
             Write a short, friendly message telling the user what was done. Plain text only."
        ),
        context: String::new(),
        images: vec![],
    };
    match tokio::time::timeout(
        std::time::Duration::from_secs(SUMMARY_TIMEOUT_SECS),
        ctx.llm().chat(&req, None, None),
    )
    .await
    {
        Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
            warn!("fallback summary unavailable");
            SUMMARY_APOLOGY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use skippy_core::config::*;
    use skippy_llm::{ChatBackend, ChatRequest, LlmError, StreamEvent};
    use skippy_memory::MemoryStore;
    use skippy_tools::registry::ToolRegistry;
    use skippy_tools::tools::FileTool;
    use skippy_tools::{Tool, ToolResult};

    use super::*;
    use crate::abort::AbortRegistry;
    use crate::continuation::ContinuationMap;
    use crate::persistent::PersistentContext;
    use crate::status::NoopStatus;

    /// Scripted backend: returns canned responses in order.
    struct ScriptedBackend {
        responses: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: responses.into_iter().map(String::from).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _req: &ChatRequest,
            _tx: Option<&mpsc::Sender<StreamEvent>>,
            cancel: Option<&CancellationToken>,
        ) -> std::result::Result<String, LlmError> {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(LlmError::Cancelled);
            }
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| LlmError::Parse("script exhausted".to_string()))
        }
    }

    struct TestCtx {
        config: SkippyConfig,
        backend: ScriptedBackend,
        memory: MemoryStore,
        tools: ToolRegistry,
        aborts: Arc<AbortRegistry>,
        continuations: ContinuationMap,
        persistent: PersistentContext,
        loop_limit: u32,
    }

    impl AgentContext for TestCtx {
        fn config(&self) -> &SkippyConfig {
            &self.config
        }
        fn llm(&self) -> &dyn ChatBackend {
            &self.backend
        }
        fn memory(&self) -> &MemoryStore {
            &self.memory
        }
        fn tools(&self) -> &ToolRegistry {
            &self.tools
        }
        fn aborts(&self) -> &AbortRegistry {
            &self.aborts
        }
        fn continuations(&self) -> &ContinuationMap {
            &self.continuations
        }
        fn persistent(&self) -> &PersistentContext {
            &self.persistent
        }
        fn detected_context_window(&self) -> Option<u64> {
            None
        }
        fn current_model(&self) -> String {
            "test-model".to_string()
        }
        fn loop_limit(&self) -> u32 {
            self.loop_limit
        }
    }

    fn test_config() -> SkippyConfig {
        serde_json::from_value(serde_json::json!({
            "discord": {"token": "t", "guildId": "1"},
            "ollama": {"model": "test-model"}
        }))
        .unwrap()
    }

    fn ctx_with(responses: Vec<&str>, tmp: &tempfile::TempDir) -> TestCtx {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        skippy_memory::db::init_db(&conn).unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(FileTool));
        TestCtx {
            config: test_config(),
            backend: ScriptedBackend::new(responses),
            memory: MemoryStore::new(conn),
            tools,
            aborts: Arc::new(AbortRegistry::new()),
            continuations: ContinuationMap::new(),
            persistent: PersistentContext::load(tmp.path().join("context.json")),
            loop_limit: 10,
        }
    }

    fn request(prompt: &str) -> PromptRequest {
        PromptRequest {
            prompt: prompt.to_string(),
            channel: Some("general".to_string()),
            user: Some("alice".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn simple_question_is_one_turn_no_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_with(
            vec![r#"{"reasoning": "", "actions": [], "final_answer": "4", "continue": false}"#],
            &tmp,
        );
        let out = run_prompt(&ctx, request("What is 2+2?"), &NoopStatus)
            .await
            .unwrap();
        assert_eq!(out.final_answer, "4");
        assert_eq!(out.loop_count, 1);
        assert!(out.tool_results.is_empty());
        assert!(!out.aborted);
    }

    #[tokio::test]
    async fn single_tool_then_answer() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "hi").unwrap();
        let read_turn = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "read", "filepath": "{}"}}}}], "continue": true}}"#,
            file.display()
        );
        let ctx = ctx_with(
            vec![
                &read_turn,
                r#"{"actions": [], "final_answer": "hi", "continue": false}"#,
            ],
            &tmp,
        );
        let out = run_prompt(&ctx, request("Read the file"), &NoopStatus)
            .await
            .unwrap();
        assert_eq!(out.final_answer, "hi");
        assert_eq!(out.loop_count, 2);
        assert_eq!(out.tool_results.len(), 1);
        assert_eq!(out.tool_results[0].tool, "file");
        assert_eq!(out.tool_results[0].result["output"]["content"], "hi");
    }

    #[tokio::test]
    async fn out_of_band_file_write_lands_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("x.py");
        let p = target.display().to_string();
        let envelope = serde_json::json!({
            "actions": [{"tool": "file", "arguments": {"op": "write", "filepath": p}}],
            "continue": true
        })
        .to_string();
        let turn1 = format!(
            "{envelope}\n===SKIPPY_FILE_START:{p}===\ndef f():\n  return 1\n===SKIPPY_FILE_END==="
        );
        let ctx = ctx_with(
            vec![
                &turn1,
                r#"{"actions": [], "final_answer": "written", "continue": false}"#,
            ],
            &tmp,
        );
        let out = run_prompt(&ctx, request("Write the function"), &NoopStatus)
            .await
            .unwrap();
        assert_eq!(out.final_answer, "written");
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "def f():\n  return 1\n"
        );
    }

    #[tokio::test]
    async fn failed_patch_forces_an_extra_turn() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.txt");
        std::fs::write(&file, "mode=slow\n").unwrap();
        let p = file.display().to_string();

        // Turn 1 claims to be done, but its patch misses; the loop must not stop.
        let turn1 = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "patch", "filepath": "{p}", "changes": [{{"find": "mode=fast", "replace": "mode=turbo"}}]}}}}], "final_answer": "patched", "continue": false}}"#
        );
        let turn2 = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "read", "filepath": "{p}"}}}}], "continue": true}}"#
        );
        let turn3 = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "patch", "filepath": "{p}", "changes": [{{"find": "mode=slow", "replace": "mode=turbo"}}]}}}}], "final_answer": "fixed", "continue": false}}"#
        );
        let ctx = ctx_with(vec![&turn1, &turn2, &turn3], &tmp);
        let out = run_prompt(&ctx, request("Set turbo mode"), &NoopStatus)
            .await
            .unwrap();
        assert_eq!(out.final_answer, "fixed");
        assert_eq!(out.loop_count, 3);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "mode=turbo\n");
        let failure = &out.tool_results[0];
        assert_eq!(failure.result["success"], false);
        assert!(failure.result["error"]
            .as_str()
            .unwrap()
            .contains("find text not found"));
    }

    #[tokio::test]
    async fn loop_limit_saves_continuation_and_affirmative_resumes() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("log.txt");
        std::fs::write(&file, "x").unwrap();
        let work_turn = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "read", "filepath": "{}"}}}}], "continue": true}}"#,
            file.display()
        );
        let mut ctx = ctx_with(
            vec![
                &work_turn,
                &work_turn,
                // Served after the resume:
                r#"{"actions": [], "final_answer": "all done", "continue": false}"#,
            ],
            &tmp,
        );
        ctx.loop_limit = 2;

        let out = run_prompt(&ctx, request("Do a long job"), &NoopStatus)
            .await
            .unwrap();
        assert_eq!(out.loop_count, 2);
        assert!(out.final_answer.contains("step limit (2 steps)"));
        assert!(ctx.continuations.contains("general"));
        assert_eq!(out.tool_results.len(), 2);

        let resumed = run_prompt(&ctx, request("yes"), &NoopStatus).await.unwrap();
        assert_eq!(resumed.final_answer, "all done");
        // The saved results were restored into the resumed chain.
        assert_eq!(resumed.tool_results.len(), 2);
        assert!(!ctx.continuations.contains("general"));
    }

    #[tokio::test]
    async fn non_affirmative_reply_discards_continuation() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_with(
            vec![r#"{"actions": [], "final_answer": "fresh", "continue": false}"#],
            &tmp,
        );
        ctx.continuations.save(
            "general",
            PendingContinuation {
                tool_results: vec![ToolInvocation {
                    tool: "file".into(),
                    arguments: serde_json::json!({}),
                    result: serde_json::json!({"success": true}),
                }],
                resume_prompt: "old".into(),
                original_prompt: "old".into(),
                loop_count: 2,
            },
        );
        let out = run_prompt(&ctx, request("what's the weather?"), &NoopStatus)
            .await
            .unwrap();
        assert_eq!(out.final_answer, "fresh");
        assert!(out.tool_results.is_empty(), "saved results discarded");
        assert!(!ctx.continuations.contains("general"));
    }

    /// Tool that requests an abort on its own channel, then succeeds.
    struct AbortingTool {
        aborts: Arc<AbortRegistry>,
    }

    #[async_trait]
    impl Tool for AbortingTool {
        fn name(&self) -> &str {
            "slow_job"
        }
        async fn run(&self, _args: serde_json::Value) -> ToolResult {
            self.aborts.request("general");
            ToolResult::success(serde_json::json!({}))
        }
        fn context(&self) -> String {
            "slow_job {} -> {}".to_string()
        }
    }

    #[tokio::test]
    async fn abort_mid_chain_stops_before_the_next_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let benign = tmp.path().join("ok.txt");
        std::fs::write(&benign, "ok").unwrap();
        let read_turn = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "read", "filepath": "{}"}}}}], "continue": true}}"#,
            benign.display()
        );
        // Turn 3 queues two tools; the first aborts the channel, the second
        // must never run.
        let turn3 = r#"{"actions": [
            {"tool": "slow_job", "arguments": {}},
            {"tool": "file", "arguments": {"op": "read", "filepath": "/tmp/never"}}
        ], "continue": true}"#;
        let mut ctx = ctx_with(vec![&read_turn, &read_turn, turn3], &tmp);
        let aborts = Arc::clone(&ctx.aborts);
        ctx.tools.register(Arc::new(AbortingTool { aborts }));

        let out = run_prompt(&ctx, request("long task"), &NoopStatus)
            .await
            .unwrap();
        assert!(out.aborted);
        assert_eq!(out.loop_count, 3);
        // Two reads, then the aborting tool; the trailing file read never ran.
        assert_eq!(out.tool_results.len(), 3);
        assert_eq!(out.tool_results[2].tool, "slow_job");
    }

    #[tokio::test]
    async fn parse_miss_injects_system_note_and_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_with(
            vec![
                r#"{"thoughts": "no control fields here"}"#,
                r#"{"actions": [], "final_answer": "recovered", "continue": false}"#,
            ],
            &tmp,
        );
        let out = run_prompt(&ctx, request("hello"), &NoopStatus).await.unwrap();
        assert_eq!(out.final_answer, "recovered");
        assert_eq!(out.loop_count, 2);
        assert_eq!(out.tool_results[0].tool, "_system");
    }

    #[tokio::test]
    async fn unparseable_response_is_a_terminal_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_with(vec!["I refuse to emit JSON."], &tmp);
        let err = run_prompt(&ctx, request("hello"), &NoopStatus)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[tokio::test]
    async fn repaired_json_surfaces_a_system_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_with(
            vec![
                r#"{actions: [], final_answer: "ok", continue: false}"#,
            ],
            &tmp,
        );
        let out = run_prompt(&ctx, request("hello"), &NoopStatus).await.unwrap();
        assert_eq!(out.final_answer, "ok");
        assert_eq!(out.tool_results.len(), 1);
        assert_eq!(out.tool_results[0].tool, "_system");
        assert!(out.tool_results[0].result["error"]
            .as_str()
            .unwrap()
            .contains("repaired"));
    }

    #[tokio::test]
    async fn empty_final_answer_after_tools_uses_fallback_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f.txt");
        std::fs::write(&file, "data").unwrap();
        let read_turn = format!(
            r#"{{"actions": [{{"tool": "file", "arguments": {{"op": "read", "filepath": "{}"}}}}], "continue": true}}"#,
            file.display()
        );
        let ctx = ctx_with(
            vec![
                &read_turn,
                r#"{"actions": [], "final_answer": "", "continue": false}"#,
                // Served to the fallback-summary call:
                "I read the file for you.",
            ],
            &tmp,
        );
        let out = run_prompt(&ctx, request("read it"), &NoopStatus).await.unwrap();
        assert_eq!(out.final_answer, "I read the file for you.");
    }

    #[tokio::test]
    async fn enforced_budget_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with(vec![r#"{"actions": [], "final_answer": "x", "continue": false}"#], &tmp);
        ctx.config.prompt.enforce_context_budget = true;
        ctx.config.ollama.context_window = Some(1);
        let err = run_prompt(&ctx, request("hello"), &NoopStatus)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ContextBudget { .. }));
    }
}
