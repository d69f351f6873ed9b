//! Application configuration
//!
//! Settings come from the environment (optionally seeded from `.env`) and can
//! be overridden by a `tally.toml` bot file.

pub mod bot;
pub mod characters;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::HistoryLimit;

pub use bot::BotConfig;
pub use characters::{builtin as characters_builtin, Character, CharacterBook};

/// Where session state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Sqlite,
}

impl StorageKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "sqlite" => Ok(StorageKind::Sqlite),
            other => Err(ConfigError::Validation(format!(
                "unknown storage backend '{}', expected 'memory' or 'sqlite'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Text generation backend: "ollama" or "openai"
    pub provider: String,
    pub model: String,
    pub ollama_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_api_key: Option<String>,

    /// Stable Diffusion WebUI compatible server
    pub image_api_url: Option<String>,

    pub max_history_turns: usize,
    pub generation_timeout_secs: u64,

    pub storage: StorageKind,
    pub data_dir: PathBuf,
    pub characters_dir: Option<PathBuf>,
    pub default_character: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            provider: "ollama".into(),
            model: "llama3.2".into(),
            ollama_url: None,
            openai_base_url: None,
            openai_api_key: None,
            image_api_url: None,
            max_history_turns: 10,
            generation_timeout_secs: 120,
            storage: StorageKind::Memory,
            data_dir: PathBuf::from("./data"),
            characters_dir: None,
            default_character: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: match lookup("PORT") {
                Some(port) => parse_number("PORT", &port)?,
                None => defaults.port,
            },
            provider: lookup("TALLY_PROVIDER").unwrap_or(defaults.provider),
            model: lookup("TALLY_MODEL").unwrap_or(defaults.model),
            ollama_url: lookup("OLLAMA_URL"),
            openai_base_url: lookup("OPENAI_BASE_URL"),
            openai_api_key: lookup("OPENAI_API_KEY"),
            image_api_url: lookup("IMAGE_API_URL"),
            max_history_turns: match lookup("MAX_HISTORY_TURNS") {
                Some(turns) => parse_number("MAX_HISTORY_TURNS", &turns)?,
                None => defaults.max_history_turns,
            },
            generation_timeout_secs: match lookup("GENERATION_TIMEOUT_SECS") {
                Some(secs) => parse_number("GENERATION_TIMEOUT_SECS", &secs)?,
                None => defaults.generation_timeout_secs,
            },
            storage: match lookup("TALLY_STORAGE") {
                Some(kind) => StorageKind::parse(&kind)?,
                None => defaults.storage,
            },
            data_dir: lookup("TALLY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            characters_dir: lookup("TALLY_CHARACTERS_DIR").map(PathBuf::from),
            default_character: lookup("TALLY_DEFAULT_CHARACTER"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a bot file. Values present in the file win.
    pub fn apply_bot_file(&mut self, bot: &BotConfig) -> Result<(), ConfigError> {
        if let Some(ref provider) = bot.llm.provider {
            self.provider = provider.clone();
        }
        if let Some(ref model) = bot.llm.model {
            self.model = model.clone();
        }
        if let Some(ref endpoint) = bot.llm.endpoint {
            match self.provider.to_lowercase().as_str() {
                "ollama" => self.ollama_url = Some(endpoint.clone()),
                _ => self.openai_base_url = Some(endpoint.clone()),
            }
        }
        if let Some(ref key_env) = bot.llm.api_key_env {
            self.openai_api_key = env::var(key_env).ok();
        }
        if let Some(turns) = bot.session.max_history_turns {
            self.max_history_turns = turns;
        }
        if let Some(secs) = bot.session.generation_timeout_secs {
            self.generation_timeout_secs = secs;
        }
        if let Some(storage) = bot.session.storage {
            self.storage = storage;
        }
        if let Some(ref endpoint) = bot.image.endpoint {
            self.image_api_url = Some(endpoint.clone());
        }
        if let Some(ref dir) = bot.characters.dir {
            self.characters_dir = Some(dir.clone());
        }
        if let Some(ref name) = bot.characters.default {
            self.default_character = Some(name.clone());
        }

        self.validate()
    }

    pub fn history_limit(&self) -> Result<HistoryLimit, ConfigError> {
        HistoryLimit::from_turns(self.max_history_turns)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.history_limit()?;
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "GENERATION_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{} must be a number, got '{}'", name, value)))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.history_limit().unwrap().max_messages(), 20);
        assert_eq!(config.storage, StorageKind::Memory);
    }

    #[test]
    fn test_env_values() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("MAX_HISTORY_TURNS", "3"),
            ("TALLY_STORAGE", "sqlite"),
            ("TALLY_PROVIDER", "openai"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.history_limit().unwrap().max_messages(), 6);
        assert_eq!(config.storage, StorageKind::Sqlite);
        assert_eq!(config.provider, "openai");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("MAX_HISTORY_TURNS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MAX_HISTORY_TURNS", "lots")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TALLY_STORAGE", "redis")])).is_err());
        assert!(Config::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", "0")])).is_err());
    }

    #[test]
    fn test_bot_file_overrides() {
        let mut config = Config::default();
        let bot = BotConfig::parse(
            r#"
[bot]
name = "Tally"

[llm]
provider = "ollama"
model = "qwen2.5"
endpoint = "http://gpu-box:11434"

[session]
max_history_turns = 4
"#,
        )
        .unwrap();

        config.apply_bot_file(&bot).unwrap();
        assert_eq!(config.model, "qwen2.5");
        assert_eq!(config.ollama_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(config.history_limit().unwrap().max_turns(), 4);
    }
}
