//! Configuration system (layered: code > env > config file).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TendrilError};
use crate::models::ModelRef;
use crate::types::AgentConfig;

const DEFAULT_MODEL: &str = "openai:gpt-4o-mini";
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 120_000;

/// Per-model behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Extract `<think>...</think>` spans from content deltas as reasoning.
    pub parse_think_tags: bool,
}

/// Engine configuration.
///
/// Resolution order, lowest to highest precedence:
/// 1. TOML config file ([`EngineConfig::load`])
/// 2. Environment variables (`TENDRIL_*`, `.env` honoured)
/// 3. Explicit `with_*` calls in code
///
/// ```toml
/// default_model = "openai:gpt-4o-mini"
/// default_tool_ids = ["web_search"]
/// stream_idle_timeout_ms = 60000
///
/// [models."ollama:deepseek-r1"]
/// parse_think_tags = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_model: String,
    pub default_tool_ids: Vec<String>,
    /// Keyed by `provider:model_id` selector.
    pub models: HashMap<String, ModelSettings>,
    /// `0` disables the idle timeout.
    pub stream_idle_timeout_ms: u64,
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            default_tool_ids: Vec::new(),
            models: HashMap::new(),
            stream_idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            data_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::new().apply_env(|key| std::env::var(key).ok())
    }

    /// Read a TOML config file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let _ = dotenvy::dotenv();
        Self::from_toml_str(&raw)?.apply_env(|key| std::env::var(key).ok())
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `TENDRIL_*` overrides using `lookup` to read variables.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(model) = lookup("TENDRIL_DEFAULT_MODEL") {
            self.default_model = model;
        }
        if let Some(tools) = lookup("TENDRIL_DEFAULT_TOOLS") {
            self.default_tool_ids = split_list(&tools);
        }
        if let Some(models) = lookup("TENDRIL_THINK_TAG_MODELS") {
            for selector in split_list(&models) {
                self.models.entry(selector).or_default().parse_think_tags = true;
            }
        }
        if let Some(raw) = lookup("TENDRIL_STREAM_IDLE_TIMEOUT_MS") {
            self.stream_idle_timeout_ms = raw.trim().parse().map_err(|_| {
                TendrilError::Configuration(format!(
                    "TENDRIL_STREAM_IDLE_TIMEOUT_MS must be an integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(dir) = lookup("TENDRIL_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    pub fn with_default_model(mut self, selector: impl Into<String>) -> Self {
        self.default_model = selector.into();
        self
    }

    pub fn with_default_tools(mut self, tool_ids: Vec<String>) -> Self {
        self.default_tool_ids = tool_ids;
        self
    }

    pub fn with_model_settings(mut self, selector: impl Into<String>, settings: ModelSettings) -> Self {
        self.models.insert(selector.into(), settings);
        self
    }

    pub fn with_stream_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.stream_idle_timeout_ms = ms;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Agent configuration given to chats created without one.
    pub fn default_agent_config(&self) -> AgentConfig {
        AgentConfig::for_model(
            &ModelRef::parse(&self.default_model),
            self.default_tool_ids.clone(),
        )
    }

    pub fn model_settings(&self, selector: &str) -> ModelSettings {
        self.models.get(selector).copied().unwrap_or_default()
    }

    /// Whether content produced by `model_used` should go through the
    /// think-tag scanner. Only fully qualified selectors can match.
    pub fn parse_think_tags(&self, model_used: Option<&str>) -> bool {
        model_used
            .filter(|selector| selector.contains(':'))
            .map(|selector| self.model_settings(selector).parse_think_tags)
            .unwrap_or(false)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_ms > 0).then(|| Duration::from_millis(self.stream_idle_timeout_ms))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Location of the file-backed chat store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("chats.json")
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_data_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".tendril"))
        .unwrap_or_else(|| PathBuf::from(".tendril"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_use_gpt_4o_mini_and_two_minute_timeout() {
        let config = EngineConfig::new();
        let agent = config.default_agent_config();
        assert_eq!(agent.provider, "openai");
        assert_eq!(agent.model_id, "gpt-4o-mini");
        assert!(agent.tool_ids.is_empty());
        assert_eq!(config.stream_idle_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn env_overrides_file_values() {
        let config = EngineConfig::from_toml_str(
            r#"
            default_model = "anthropic:claude"
            stream_idle_timeout_ms = 5000
            "#,
        )
        .unwrap()
        .apply_env(env(&[
            ("TENDRIL_DEFAULT_MODEL", "ollama:qwen3"),
            ("TENDRIL_DEFAULT_TOOLS", "web_search, calculator ,"),
            ("TENDRIL_THINK_TAG_MODELS", "ollama:qwen3"),
        ]))
        .unwrap();

        assert_eq!(config.default_model, "ollama:qwen3");
        assert_eq!(config.default_tool_ids, vec!["web_search", "calculator"]);
        assert!(config.parse_think_tags(Some("ollama:qwen3")));
        assert_eq!(config.stream_idle_timeout_ms, 5000);
    }

    #[test]
    fn invalid_timeout_is_a_configuration_error() {
        let err = EngineConfig::new()
            .apply_env(env(&[("TENDRIL_STREAM_IDLE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, TendrilError::Configuration(_)));
    }

    #[test]
    fn code_settings_take_precedence() {
        let config = EngineConfig::new()
            .apply_env(env(&[("TENDRIL_DEFAULT_MODEL", "ollama:qwen3")]))
            .unwrap()
            .with_default_model("openai:gpt-4o")
            .with_stream_idle_timeout_ms(0);
        assert_eq!(config.default_model, "openai:gpt-4o");
        assert_eq!(config.stream_idle_timeout(), None);
    }

    #[test]
    fn think_tags_need_a_qualified_selector() {
        let config = EngineConfig::new().with_model_settings(
            "ollama:deepseek-r1",
            ModelSettings {
                parse_think_tags: true,
            },
        );
        assert!(config.parse_think_tags(Some("ollama:deepseek-r1")));
        assert!(!config.parse_think_tags(Some("deepseek-r1")));
        assert!(!config.parse_think_tags(None));
    }

    #[test]
    fn toml_model_tables_are_read() {
        let config = EngineConfig::from_toml_str(
            r#"
            [models."ollama:deepseek-r1"]
            parse_think_tags = true
            "#,
        )
        .unwrap();
        assert!(config.model_settings("ollama:deepseek-r1").parse_think_tags);
        assert_eq!(config.default_model, DEFAULT_MODEL);
    }

    #[test]
    fn store_path_lives_in_data_dir() {
        let config = EngineConfig::new().with_data_dir("/tmp/tendril-test");
        assert_eq!(config.store_path(), PathBuf::from("/tmp/tendril-test/chats.json"));
    }
}
