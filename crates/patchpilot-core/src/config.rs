//! Service configuration.
//!
//! Sources, first match wins: an explicit file path, `PATCHPILOT_CONFIG`,
//! `patchpilot.toml` in the working directory, then environment variables
//! over built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "patchpilot.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSection,
    pub workers: WorkersSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkersSection {
    pub count: usize,
    pub max_retries: u32,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub idle_sleep_ms: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            count: 20,
            max_retries: 5,
            max_concurrent: 15,
            max_queue_size: 10_000,
            idle_sleep_ms: 10,
        }
    }
}

impl WorkersSection {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSection {
    pub max_turns: usize,
    pub deferred_timeout_secs: u64,
    pub expiry_poll_ms: u64,
    pub temperature: f32,
    /// How long finished tasks stay visible to `GET /tasks/{id}`.
    pub finished_task_ttl_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: 50,
            deferred_timeout_secs: 300,
            expiry_poll_ms: 500,
            temperature: 0.1,
            finished_task_ttl_secs: 3600,
        }
    }
}

impl AgentSection {
    pub fn deferred_timeout(&self) -> Duration {
        Duration::from_secs(self.deferred_timeout_secs)
    }

    pub fn expiry_poll(&self) -> Duration {
        Duration::from_millis(self.expiry_poll_ms.max(1))
    }

    pub fn finished_task_ttl(&self) -> Duration {
        Duration::from_secs(self.finished_task_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
}

impl ServiceConfig {
    /// Load configuration, preferring `explicit` when given.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path.display(), err))?;
        toml::from_str(&contents)
            .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), err))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = var("PATCHPILOT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PATCHPILOT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(count) = var("PATCHPILOT_WORKERS").and_then(|v| v.parse().ok()) {
            self.workers.count = count;
        }
        if let Some(retries) = var("PATCHPILOT_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.workers.max_retries = retries;
        }
        if let Some(base_url) = var("PATCHPILOT_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(model) = var("PATCHPILOT_LLM_MODEL") {
            self.llm.model = model;
        }
    }

    /// API key read from the environment variable named in `[llm]`.
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env::var_os("PATCHPILOT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = Path::new(DEFAULT_CONFIG_FILE);
    local.exists().then(|| local.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.workers.count, 20);
        assert_eq!(config.workers.max_retries, 5);
        assert_eq!(config.agent.deferred_timeout(), Duration::from_secs(300));
        assert_eq!(config.agent.finished_task_ttl(), Duration::from_secs(3600));
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[agent]\ndeferred_timeout_secs = 30\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.agent.deferred_timeout_secs, 30);
        assert_eq!(config.agent.max_turns, 50);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(ServiceConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PATCHPILOT_PORT", "9200"),
            ("PATCHPILOT_WORKERS", "4"),
            ("PATCHPILOT_LLM_MODEL", "local-model"),
            ("PATCHPILOT_HOST", "  "),
            ("PATCHPILOT_MAX_RETRIES", "not-a-number"),
        ]);
        let mut config = ServiceConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9200);
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.workers.max_retries, 5);
    }
}
