use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkippyError};

/// Top-level config (`~/.Skippy/Skippy.json` + `SKIPPY_*` env overrides).
/// Immutable after load; shared via `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippyConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub discord: DiscordConfig,
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    #[serde(rename = "guildId")]
    pub guild_id: String,
    #[serde(rename = "messageHistoryLimit", default = "default_history_limit")]
    pub message_history_limit: usize,
    /// User identity assumed for prompts that arrive without one (IPC, cron).
    #[serde(default = "default_user")]
    pub default_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(rename = "apiKey", default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Total wall-clock budget for one chat call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Abort the stream if no chunk arrives within this many seconds.
    #[serde(default = "default_inactivity_secs")]
    pub stream_inactivity_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Explicit context-window cap. Overrides whatever introspection reports.
    #[serde(default)]
    pub context_window: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Maximum agentic-loop iterations before a continuation is offered.
    #[serde(default = "default_loop_limit")]
    pub loop_limit: u32,
    /// When true, an iteration whose token estimate exceeds the effective
    /// context window fails before the LLM call. Default is observe-only.
    #[serde(default)]
    pub enforce_context_budget: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            loop_limit: default_loop_limit(),
            enforce_context_budget: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Memory categories auto-injected into every prompt, in order.
    #[serde(default = "default_context_categories")]
    pub context_categories: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_categories: default_context_categories(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub bash: BashToolConfig,
    #[serde(default)]
    pub weather: Option<WeatherToolConfig>,
    #[serde(default)]
    pub web_search: Option<WebSearchToolConfig>,
    #[serde(default)]
    pub trello: Option<TrelloToolConfig>,
    #[serde(default)]
    pub download: DownloadToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BashToolConfig {
    /// Allow the shell tool when the daemon runs as root.
    #[serde(rename = "unsafe", default)]
    pub unsafe_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherToolConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchToolConfig {
    /// SearxNG-compatible search endpoint.
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrelloToolConfig {
    pub key: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadToolConfig {
    #[serde(default = "default_download_dir")]
    pub dir: String,
}

impl Default for DownloadToolConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_history_limit() -> usize {
    25
}
fn default_user() -> String {
    "owner".to_string()
}
fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_inactivity_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_loop_limit() -> u32 {
    10
}
fn default_context_categories() -> Vec<String> {
    vec!["general".to_string()]
}
fn default_download_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/Downloads")
}

impl SkippyConfig {
    /// Load config from a JSON file with `SKIPPY_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.Skippy/Skippy.json
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(std::path::PathBuf::from)
            .unwrap_or_else(crate::paths::config_file);

        if !path.exists() {
            return Err(SkippyError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let config: SkippyConfig = Figment::new()
            .merge(Json::file(&path))
            .merge(Env::prefixed("SKIPPY_").split("_"))
            .extract()
            .map_err(|e| SkippyError::Config(e.to_string()))?;

        if config.discord.token.is_empty() {
            return Err(SkippyError::Config("discord.token is empty".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("Skippy.json");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "discord": {"token": "t", "guildId": "1"},
                "ollama": {"model": "llama3"}
            }"#,
        );
        let cfg = SkippyConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.discord.message_history_limit, 25);
        assert_eq!(cfg.ollama.host, "http://localhost:11434");
        assert_eq!(cfg.ollama.timeout, 600);
        assert_eq!(cfg.prompt.loop_limit, 10);
        assert!(!cfg.prompt.enforce_context_budget);
        assert_eq!(cfg.memory.context_categories, vec!["general"]);
        assert!(!cfg.tools.bash.unsafe_mode);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = SkippyConfig::load(Some("/nonexistent/Skippy.json")).unwrap_err();
        assert!(matches!(err, SkippyError::Config(_)));
    }

    #[test]
    fn load_is_idempotent_through_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "discord": {"token": "t", "guildId": "1", "messageHistoryLimit": 50},
                "ollama": {"model": "llama3", "context_window": 8192},
                "prompt": {"loop_limit": 5}
            }"#,
        );
        let cfg = SkippyConfig::load(Some(&path)).unwrap();
        let rewritten = dir.path().join("rewritten.json");
        std::fs::write(&rewritten, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
        let cfg2 = SkippyConfig::load(Some(&rewritten.to_string_lossy())).unwrap();
        assert_eq!(cfg2.discord.message_history_limit, 50);
        assert_eq!(cfg2.ollama.context_window, Some(8192));
        assert_eq!(cfg2.prompt.loop_limit, 5);
    }

    #[test]
    fn unsafe_flag_round_trips_under_its_json_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "discord": {"token": "t", "guildId": "1"},
                "ollama": {"model": "m"},
                "tools": {"bash": {"unsafe": true}}
            }"#,
        );
        let cfg = SkippyConfig::load(Some(&path)).unwrap();
        assert!(cfg.tools.bash.unsafe_mode);
    }
}
