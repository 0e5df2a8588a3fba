// src/generation/hugging_face.rs
// Hugging Face Inference API adapter (Secondary)

use super::{
    build_client, probe_endpoint, to_data_uri, AdapterError, GeneratedImage, GenerationRequest,
    ImageAdapter, ImageBatch, ImageModel, HUGGING_FACE,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const HF_BASE_URL: &str = "https://api-inference.huggingface.co";
const TIMEOUT_SECS: u64 = 20;

const MODEL_SD_2_1: &str = "stabilityai/stable-diffusion-2-1";
const MODEL_SDXL: &str = "stabilityai/stable-diffusion-xl-base-1.0";
const MODEL_FLUX: &str = "black-forest-labs/FLUX.1-dev";
const MODEL_ANIME: &str = "hakurei/waifu-diffusion";
const MODEL_REALISTIC: &str = "runwayml/stable-diffusion-v1-5";

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters<'a>,
}

#[derive(Debug, Serialize)]
struct InferenceParameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    width: u32,
    height: u32,
    num_inference_steps: u32,
    guidance_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct InferenceError {
    error: String,
    #[serde(default)]
    estimated_time: Option<f32>,
}

pub struct HuggingFaceAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl HuggingFaceAdapter {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self, AdapterError> {
        let client = build_client(timeout_secs)?;

        tracing::info!("Hugging Face adapter initialized");

        Ok(Self {
            api_key,
            client,
            base_url: HF_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn default_timeout_secs() -> u64 {
        TIMEOUT_SECS
    }

    fn model_for(model: Option<ImageModel>) -> &'static str {
        match model.unwrap_or(ImageModel::StableDiffusionXl) {
            ImageModel::Flux => MODEL_FLUX,
            ImageModel::StableDiffusionXl => MODEL_SDXL,
            ImageModel::FluxAnime => MODEL_ANIME,
            ImageModel::FluxRealism => MODEL_REALISTIC,
            ImageModel::Mystic => MODEL_SD_2_1,
        }
    }

    /// Inference errors come back as JSON; 503 with `estimated_time` means cold model
    fn classify_error(status: u16, body: String) -> AdapterError {
        match serde_json::from_str::<InferenceError>(&body) {
            Ok(err) if status == 503 && err.estimated_time.is_some() => AdapterError::ModelLoading,
            Ok(err) => AdapterError::from_status(status, err.error),
            Err(_) => AdapterError::from_status(status, body),
        }
    }
}

#[async_trait]
impl ImageAdapter for HuggingFaceAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageBatch, AdapterError> {
        let model = Self::model_for(request.model);

        tracing::info!("Hugging Face: generating with {}", model);

        let body = InferenceRequest {
            inputs: &request.prompt,
            parameters: InferenceParameters {
                negative_prompt: request.negative_prompt.as_deref(),
                width: request.width,
                height: request.height,
                num_inference_steps: request.num_inference_steps,
                guidance_scale: request.guidance_scale,
                seed: request.seed,
            },
        };

        let response = self
            .client
            .post(format!("{}/models/{}", self.base_url, model))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), error_text));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !content_type
            .as_deref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
        {
            return Err(AdapterError::InvalidResponse(format!(
                "expected image body, got {}",
                content_type.as_deref().unwrap_or("no content type")
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AdapterError::InvalidResponse("empty image body".to_string()));
        }

        Ok(ImageBatch {
            images: vec![GeneratedImage {
                id: "hf-img-1".to_string(),
                url: to_data_uri(content_type.as_deref(), &bytes),
                width: request.width,
                height: request.height,
            }],
            // Free tier
            cost: Some(0.0),
        })
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        probe_endpoint(&self.client, &self.base_url).await
    }

    fn id(&self) -> &str {
        HUGGING_FACE
    }
}
