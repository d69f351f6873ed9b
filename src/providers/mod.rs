//! AI provider integrations
//!
//! The chat engine only sees [`TextGenerator`] and [`ImageGenerator`]; the
//! concrete HTTP clients live behind them.

mod image;
mod ollama;
mod openai_compat;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::conversation::Message;

pub use image::{GeneratedImage, ImageGenerator, ImageRequest, StableDiffusionProvider};
pub use ollama::OllamaProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Produces the assistant reply for a prepared message list
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<String, ProviderError>;
}

enum Backend {
    Ollama(OllamaProvider),
    OpenAICompat(OpenAICompatProvider),
}

/// The configured text backend bound to a model
pub struct Provider {
    backend: Backend,
    model: String,
}

impl Provider {
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let backend = match config.provider.to_lowercase().as_str() {
            "ollama" => {
                let url = config
                    .ollama_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".into());
                Backend::Ollama(OllamaProvider::new(url))
            }
            "openai" => {
                let compat = match (&config.openai_base_url, &config.openai_api_key) {
                    (Some(base_url), _) => OpenAICompatConfig {
                        api_key: config.openai_api_key.clone(),
                        ..OpenAICompatConfig::local(base_url.clone(), config.model.clone())
                    },
                    (None, Some(api_key)) => OpenAICompatConfig::openai(api_key.clone()),
                    (None, None) => {
                        return Err(ProviderError::NotConfigured(
                            "openai needs OPENAI_BASE_URL or OPENAI_API_KEY".to_string(),
                        ))
                    }
                };
                Backend::OpenAICompat(OpenAICompatProvider::new(compat)?)
            }
            _ => return Err(ProviderError::UnknownProvider(config.provider.clone())),
        };

        Ok(Self {
            backend,
            model: config.model.clone(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self.backend {
            Backend::Ollama(_) => "ollama",
            Backend::OpenAICompat(_) => "openai",
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for Provider {
    async fn generate(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let reply = match &self.backend {
            Backend::Ollama(p) => p.chat(messages, &self.model).await?,
            Backend::OpenAICompat(p) => p.chat(messages, &self.model).await?,
        };
        Ok(reply.content)
    }
}
