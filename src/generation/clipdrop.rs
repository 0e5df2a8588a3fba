// src/generation/clipdrop.rs
// ClipDrop text-to-image adapter (Final fallback)

use super::{
    build_client, probe_endpoint, to_data_uri, AdapterError, GeneratedImage, GenerationRequest,
    ImageAdapter, ImageBatch, CLIPDROP,
};
use async_trait::async_trait;
use reqwest::multipart;

const CLIPDROP_BASE_URL: &str = "https://clipdrop-api.co";
const TIMEOUT_SECS: u64 = 15;
const NOMINAL_COST: f64 = 0.01;

pub struct ClipDropAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl ClipDropAdapter {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self, AdapterError> {
        let client = build_client(timeout_secs)?;

        tracing::info!("ClipDrop adapter initialized");

        Ok(Self {
            api_key,
            client,
            base_url: CLIPDROP_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn default_timeout_secs() -> u64 {
        TIMEOUT_SECS
    }

    fn form_for(request: &GenerationRequest) -> multipart::Form {
        let form = multipart::Form::new().text("prompt", request.prompt.clone());
        match request.negative_prompt.as_deref() {
            Some(negative) if !negative.trim().is_empty() => {
                form.text("negative_prompt", negative.to_string())
            }
            _ => form,
        }
    }
}

#[async_trait]
impl ImageAdapter for ClipDropAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageBatch, AdapterError> {
        tracing::info!("ClipDrop: generating image");

        let response = self
            .client
            .post(format!("{}/text-to-image/v1", self.base_url))
            .header("x-api-key", &self.api_key)
            .multipart(Self::form_for(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status.as_u16(), error_text));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AdapterError::InvalidResponse("empty image body".to_string()));
        }

        Ok(ImageBatch {
            images: vec![GeneratedImage {
                id: "clipdrop-img-1".to_string(),
                url: to_data_uri(content_type.as_deref(), &bytes),
                width: request.width,
                height: request.height,
            }],
            cost: Some(NOMINAL_COST),
        })
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        probe_endpoint(&self.client, &self.base_url).await
    }

    fn id(&self) -> &str {
        CLIPDROP
    }
}
