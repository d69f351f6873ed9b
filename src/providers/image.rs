//! Image generation against a Stable Diffusion WebUI compatible server

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::bot::ImageConfig;

use super::ProviderError;

/// An image generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,

    #[serde(default)]
    pub negative_prompt: Option<String>,

    #[serde(default)]
    pub steps: Option<u32>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,
}

/// Generated images, base64-encoded PNG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub images: Vec<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, ProviderError>;
}

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    steps: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

pub struct StableDiffusionProvider {
    client: Client,
    base_url: String,
    defaults: ImageConfig,
}

impl StableDiffusionProvider {
    pub fn new(base_url: String, defaults: ImageConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            defaults,
        })
    }

    fn build_request<'a>(&'a self, request: &'a ImageRequest) -> Txt2ImgRequest<'a> {
        Txt2ImgRequest {
            prompt: &request.prompt,
            negative_prompt: request
                .negative_prompt
                .as_deref()
                .or(self.defaults.negative_prompt.as_deref())
                .unwrap_or_default(),
            steps: request.steps.unwrap_or(self.defaults.steps),
            width: request.width.unwrap_or(self.defaults.width),
            height: request.height.unwrap_or(self.defaults.height),
        }
    }
}

#[async_trait]
impl ImageGenerator for StableDiffusionProvider {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, ProviderError> {
        let response = self
            .client
            .post(format!("{}/sdapi/v1/txt2img", self.base_url))
            .json(&self.build_request(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "{}: {}",
                status, body
            )));
        }

        let parsed: Txt2ImgResponse = response.json().await?;
        if parsed.images.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "Image server returned no images".to_string(),
            ));
        }

        Ok(GeneratedImage {
            images: parsed.images,
        })
    }
}
