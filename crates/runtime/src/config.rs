//! Session configuration loader.

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Behavioral prompt used when no configuration file is given.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
Answer concisely and directly. Do not add explanations, background or \
commentary that was not asked for. Light small talk is fine.

You can use these tools:
- get_time: current local system time
- calculate: evaluate an arithmetic expression
- read_file: read a file in the workspace
- write_file: write or append to a file in the workspace

Rules:
1. When the user asks for the time, a calculation or a file's contents, call the matching tool.
2. Do not write explanatory text in the same message as a tool call.
3. Tool results arrive as plain text messages with role \"tool\". After a result, reply with one short sentence.
4. Present results as plain text, without tags or code blocks.
5. Do not combine actions. Call one tool at a time and answer each in turn.
6. Never describe yourself as an AI or talk about your limitations; refuse briefly when needed.";

/// Where the chat model is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
    OpenaiCompatible {
        base_url: String,
        /// Environment variable holding the API key.
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        match self {
            ProviderConfig::Ollama { base_url } => base_url,
            ProviderConfig::OpenaiCompatible { base_url, .. } => base_url,
        }
    }

    pub fn set_base_url(&mut self, url: impl Into<String>) {
        match self {
            ProviderConfig::Ollama { base_url } => *base_url = url.into(),
            ProviderConfig::OpenaiCompatible { base_url, .. } => *base_url = url.into(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Ollama {
            base_url: default_ollama_url(),
        }
    }
}

fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

/// When the turn summarizer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizeMode {
    /// Spawned after the turn; the caller does not wait for it.
    #[default]
    Background,
    /// Awaited before the turn returns.
    Inline,
    Off,
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub provider: ProviderConfig,
    pub model: String,
    pub summary_model: String,
    pub system_prompt: Option<String>,
    pub max_history_length: usize,
    pub max_iterations: usize,
    pub inject_memory: bool,
    pub memory_path: PathBuf,
    pub workspace_root: PathBuf,
    pub endpoint_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub max_retries: u32,
    pub summarize: SummarizeMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            model: "qwen2.5:3b".to_string(),
            summary_model: "deepseek-r1:8b".to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_history_length: 10,
            max_iterations: 5,
            inject_memory: true,
            memory_path: PathBuf::from("./data/memory.json"),
            workspace_root: PathBuf::from("."),
            endpoint_timeout_secs: 120,
            tool_timeout_secs: 30,
            max_retries: 2,
            summarize: SummarizeMode::Background,
        }
    }
}

impl SessionConfig {
    /// Number of pinned prefix messages the window will carry.
    pub fn pinned_prefix_len(&self) -> usize {
        usize::from(self.system_prompt.is_some()) + usize::from(self.inject_memory)
    }

    /// Reject settings the turn loop cannot work with.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_iterations == 0 {
            return Err(RuntimeError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        // Room for the pinned prefix plus one user/assistant exchange.
        let minimum = self.pinned_prefix_len() + 2;
        if self.max_history_length < minimum {
            return Err(RuntimeError::Config(format!(
                "max_history_length must be at least {} (got {})",
                minimum, self.max_history_length
            )));
        }

        if self.model.trim().is_empty() {
            return Err(RuntimeError::Config("model must not be empty".to_string()));
        }
        if self.endpoint_timeout_secs == 0 || self.tool_timeout_secs == 0 {
            return Err(RuntimeError::Config("timeouts must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Raw config structure from YAML.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    provider: ProviderConfig,
    model: String,
    summary_model: String,
    system_prompt: Option<String>,
    system_prompt_file: Option<String>,
    max_history_length: usize,
    max_iterations: usize,
    inject_memory: bool,
    memory_path: PathBuf,
    workspace_root: PathBuf,
    endpoint_timeout_secs: u64,
    tool_timeout_secs: u64,
    max_retries: u32,
    summarize: SummarizeMode,
}

impl Default for RawConfig {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            provider: defaults.provider,
            model: defaults.model,
            summary_model: defaults.summary_model,
            system_prompt: None,
            system_prompt_file: None,
            max_history_length: defaults.max_history_length,
            max_iterations: defaults.max_iterations,
            inject_memory: defaults.inject_memory,
            memory_path: defaults.memory_path,
            workspace_root: defaults.workspace_root,
            endpoint_timeout_secs: defaults.endpoint_timeout_secs,
            tool_timeout_secs: defaults.tool_timeout_secs,
            max_retries: defaults.max_retries,
            summarize: defaults.summarize,
        }
    }
}

/// Load session configuration from a YAML file.
///
/// `system_prompt_file` is resolved relative to the config file. Exactly one
/// of `system_prompt` and `system_prompt_file` must be given.
///
/// # Errors
/// Returns `RuntimeError::Config` if the file or prompt file is missing, the
/// YAML is invalid, or the resulting settings fail validation.
pub fn load_session_config(config_path: impl AsRef<Path>) -> Result<SessionConfig, RuntimeError> {
    let config_file = config_path.as_ref();

    if !config_file.exists() {
        return Err(RuntimeError::Config(format!(
            "Config file not found: {}",
            config_file.display()
        )));
    }

    let content = std::fs::read_to_string(config_file)?;

    if content.trim().is_empty() {
        return Err(RuntimeError::Config("Config file is empty".to_string()));
    }

    let raw: RawConfig = serde_yaml::from_str(&content)
        .map_err(|e| RuntimeError::Config(format!("Invalid YAML: {}", e)))?;

    let system_prompt = match (raw.system_prompt, raw.system_prompt_file) {
        (Some(_), Some(_)) => {
            return Err(RuntimeError::Config(
                "Set only one of system_prompt and system_prompt_file".to_string(),
            ))
        }
        (Some(prompt), None) => prompt,
        (None, Some(file)) => {
            let prompt_path = if Path::new(&file).is_absolute() {
                PathBuf::from(&file)
            } else {
                config_file
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(&file)
            };

            if !prompt_path.exists() {
                return Err(RuntimeError::Config(format!(
                    "System prompt file not found: {}",
                    prompt_path.display()
                )));
            }
            std::fs::read_to_string(&prompt_path)?
        }
        (None, None) => {
            return Err(RuntimeError::Config(
                "Config missing required field: system_prompt".to_string(),
            ))
        }
    };

    if system_prompt.trim().is_empty() {
        return Err(RuntimeError::Config("System prompt is empty".to_string()));
    }

    let config = SessionConfig {
        provider: raw.provider,
        model: raw.model,
        summary_model: raw.summary_model,
        system_prompt: Some(system_prompt),
        max_history_length: raw.max_history_length,
        max_iterations: raw.max_iterations,
        inject_memory: raw.inject_memory,
        memory_path: raw.memory_path,
        workspace_root: raw.workspace_root,
        endpoint_timeout_secs: raw.endpoint_timeout_secs,
        tool_timeout_secs: raw.tool_timeout_secs,
        max_retries: raw.max_retries,
        summarize: raw.summarize,
    };
    config.validate()?;

    Ok(config)
}
