//! Bot configuration loaded from a TOML file
//!
//! Every table is optional. A deployment only lists what it wants to change:
//! - `[llm]` text generation backend
//! - `[session]` history window, timeouts and storage
//! - `[image]` image generation backend and defaults
//! - `[characters]` character directory and default character

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{ConfigError, StorageKind};

/// Root bot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub bot: BotInfo,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub characters: CharactersConfig,
}

impl BotConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BotConfig = toml::from_str(content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotInfo {
    #[serde(default = "default_bot_name")]
    pub name: String,
}

fn default_bot_name() -> String {
    "Tally".to_string()
}

impl Default for BotInfo {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
        }
    }
}

/// Text generation backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Base URL of the model server
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Turns (user + assistant pairs) kept per conversation
    #[serde(default)]
    pub max_history_turns: Option<usize>,

    #[serde(default)]
    pub generation_timeout_secs: Option<u64>,

    #[serde(default)]
    pub storage: Option<StorageKind>,
}

/// Image generation backend and request defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_steps")]
    pub steps: u32,

    #[serde(default = "default_size")]
    pub width: u32,

    #[serde(default = "default_size")]
    pub height: u32,

    #[serde(default)]
    pub negative_prompt: Option<String>,
}

fn default_steps() -> u32 {
    20
}

fn default_size() -> u32 {
    512
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            steps: default_steps(),
            width: default_size(),
            height: default_size(),
            negative_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharactersConfig {
    /// Directory of character TOML files
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Character used when a conversation has not picked one
    #[serde(default)]
    pub default: Option<String>,
}
