//! `AppState`: every shared service behind one `Arc`, implementing the
//! context traits the orchestrator, gateway, IPC server, and scheduler
//! consume.

use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use tracing::{error, info, warn};

use skippy_agent::{
    run_prompt, AbortRegistry, AgentContext, ContinuationMap, NoopStatus, PersistentContext,
    PromptRequest,
};
use skippy_core::config::SkippyConfig;
use skippy_core::paths;
use skippy_llm::{ChatBackend, OllamaClient};
use skippy_memory::MemoryStore;
use skippy_scheduler::{CronJob, CronStore, JobAction, JobSink};
use skippy_tools::registry::ToolRegistry;
use skippy_tools::tools::{
    BashTool, ChatEgress, CronTool, DiscordSendTool, FileDownloadTool, FileTool, HttpTool,
    MemoryTool, PdfTool, TrelloTool, WeatherTool, WebSearchTool,
};

pub struct AppState {
    config: SkippyConfig,
    llm: OllamaClient,
    memory: Arc<MemoryStore>,
    cron: Arc<CronStore>,
    tools: ToolRegistry,
    aborts: AbortRegistry,
    continuations: ContinuationMap,
    persistent: PersistentContext,
    detected_window: OnceLock<u64>,
    model: RwLock<String>,
    loop_limit: RwLock<u32>,
    egress: Arc<dyn ChatEgress>,
}

impl AppState {
    pub fn new(
        config: SkippyConfig,
        memory: Arc<MemoryStore>,
        cron: Arc<CronStore>,
        egress: Arc<dyn ChatEgress>,
    ) -> Self {
        let llm = OllamaClient::new(&config.ollama);

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(BashTool::new(config.tools.bash.unsafe_mode)));
        tools.register(Arc::new(FileTool));
        tools.register(Arc::new(PdfTool));
        tools.register(Arc::new(HttpTool::new()));
        tools.register(Arc::new(WebSearchTool::new(config.tools.web_search.clone())));
        tools.register(Arc::new(WeatherTool::new(config.tools.weather.clone())));
        tools.register(Arc::new(DiscordSendTool::new(Arc::clone(&egress))));
        tools.register(Arc::new(MemoryTool::new(Arc::clone(&memory))));
        tools.register(Arc::new(CronTool::new(Arc::clone(&cron))));
        tools.register(Arc::new(FileDownloadTool::new(config.tools.download.dir.clone())));
        tools.register(Arc::new(TrelloTool::new(config.tools.trello.clone())));

        let model = RwLock::new(config.ollama.model.clone());
        let loop_limit = RwLock::new(config.prompt.loop_limit);
        Self {
            persistent: PersistentContext::load(paths::context_file()),
            config,
            llm,
            memory,
            cron,
            tools,
            aborts: AbortRegistry::new(),
            continuations: ContinuationMap::new(),
            detected_window: OnceLock::new(),
            model,
            loop_limit,
            egress,
        }
    }

    /// Startup sequence: tool init, tool-context compilation, model
    /// introspection. Individual failures degrade, they do not abort boot.
    pub async fn initialize(&self) {
        let failures = self.tools.init_all().await;
        for (tool, e) in &failures {
            warn!(tool = %tool, error = %e, "tool disabled by init failure");
        }

        let model = self.current_model();
        self.tools.compile_context(&self.llm, &model).await;

        match self.llm.introspect(&model).await {
            Ok(info) => {
                info!(
                    model = %model,
                    params = %info.param_size,
                    quant = %info.quantization,
                    context_length = ?info.context_length,
                    "model introspected"
                );
                if let Some(window) = info.context_length {
                    let _ = self.detected_window.set(window);
                }
            }
            Err(e) => warn!(model = %model, error = %e, "model introspection failed"),
        }
    }

    pub fn cron_store(&self) -> Arc<CronStore> {
        Arc::clone(&self.cron)
    }

    /// Rewrite the config file with the new default model so a restart
    /// keeps it.
    fn persist_model(&self, model: &str) {
        let path = paths::config_file();
        let updated = std::fs::read_to_string(&path)
            .ok()
            .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
            .map(|mut root| {
                root["ollama"]["model"] = serde_json::Value::String(model.to_string());
                root
            });
        match updated {
            Some(root) => {
                if let Err(e) = std::fs::write(
                    &path,
                    serde_json::to_string_pretty(&root).unwrap_or_default(),
                ) {
                    warn!(error = %e, "model persist failed");
                }
            }
            None => warn!("model persist skipped: config file unreadable"),
        }
    }
}

impl AgentContext for AppState {
    fn config(&self) -> &SkippyConfig {
        &self.config
    }
    fn llm(&self) -> &dyn ChatBackend {
        &self.llm
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
        self.detected_window.get().copied()
    }
    fn current_model(&self) -> String {
        self.model.read().unwrap().clone()
    }
    fn loop_limit(&self) -> u32 {
        *self.loop_limit.read().unwrap()
    }
}

impl skippy_discord::GatewayHost for AppState {
    fn ollama(&self) -> &OllamaClient {
        &self.llm
    }

    fn set_model(&self, model: String) {
        info!(model = %model, "default model changed");
        *self.model.write().unwrap() = model.clone();
        self.persist_model(&model);
    }

    fn set_loop_limit(&self, limit: u32) {
        info!(limit, "loop limit changed");
        *self.loop_limit.write().unwrap() = limit;
    }
}

#[async_trait]
impl skippy_ipc::IpcHost for AppState {
    async fn send_chat(&self, channel: Option<&str>, content: &str) -> Result<(), String> {
        let Some(channel) = channel else {
            return Err("a channel is required for chat output".to_string());
        };
        self.egress.send_message(channel, content).await
    }
}

#[async_trait]
impl JobSink for AppState {
    async fn fire(&self, job: CronJob) {
        match job.action {
            JobAction::Bash { command } => {
                info!(job_id = %job.id, command = %command, "cron bash action");
                match tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .output()
                    .await
                {
                    Ok(out) if !out.status.success() => {
                        error!(
                            job_id = %job.id,
                            code = out.status.code().unwrap_or(-1),
                            stderr = %String::from_utf8_lossy(&out.stderr),
                            "cron bash action failed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(job_id = %job.id, error = %e, "cron bash spawn failed"),
                }
            }
            JobAction::Prompt { text } => {
                info!(job_id = %job.id, "cron prompt action");
                let request = PromptRequest {
                    prompt: text,
                    channel: Some(format!("cron:{}", job.id)),
                    user: Some(self.config.discord.default_user.clone()),
                    ..Default::default()
                };
                if let Err(e) = run_prompt(self, request, &NoopStatus).await {
                    error!(job_id = %job.id, error = %e, "cron prompt failed");
                }
            }
        }
    }
}
