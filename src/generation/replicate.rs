// src/generation/replicate.rs
// Replicate predictions adapter (Tertiary)

use super::{
    build_client, probe_endpoint, AdapterError, GeneratedImage, GenerationRequest, ImageAdapter,
    ImageBatch, ImageModel, REPLICATE,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

const REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
// Covers submit + polling
const TIMEOUT_SECS: u64 = 90;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 30;
const NOMINAL_COST: f64 = 0.005;

const VERSION_SD: &str =
    "stability-ai/stable-diffusion:27b93a2413e7f36cd83da926f3656280b2931564ff050bf9575f1fdf9bcd7478";
const VERSION_FLUX: &str =
    "black-forest-labs/flux-schnell:bf2f5bf6da32e4a518be3b0f1b8a3fef789ae47f0c1c72c8b04a5dba2b5ee4d9";
const VERSION_SDXL: &str =
    "stability-ai/sdxl:39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";
const VERSION_ANIME: &str =
    "cjwbw/waifu-diffusion:25d2f75ecda0c0bed34c806b7b70319a53a1bcd59bf1df53973d63d1d4c9cc61";

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    width: u32,
    height: u32,
    num_outputs: u32,
    num_inference_steps: u32,
    guidance_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Many(Vec<String>),
    One(String),
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    cost: Option<f64>,
}

pub struct ReplicateAdapter {
    api_token: String,
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReplicateAdapter {
    /// `timeout_secs` bounds each HTTP call; the orchestrator bounds the whole run
    pub fn new(api_token: String, timeout_secs: u64) -> Result<Self, AdapterError> {
        let client = build_client(timeout_secs)?;

        tracing::info!("Replicate adapter initialized");

        Ok(Self {
            api_token,
            client,
            base_url: REPLICATE_BASE_URL.to_string(),
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    pub fn default_timeout_secs() -> u64 {
        TIMEOUT_SECS
    }

    fn version_for(model: Option<ImageModel>) -> &'static str {
        match model.unwrap_or(ImageModel::StableDiffusionXl) {
            ImageModel::Flux => VERSION_FLUX,
            ImageModel::StableDiffusionXl => VERSION_SDXL,
            ImageModel::FluxAnime => VERSION_ANIME,
            ImageModel::Mystic | ImageModel::FluxRealism => VERSION_SD,
        }
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_token)
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<Prediction, AdapterError> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status.as_u16(), error_text));
        }

        response
            .json::<Prediction>()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }

    async fn wait_for_completion(&self, mut prediction: Prediction) -> Result<Prediction, AdapterError> {
        let mut polls = 0u32;

        while matches!(
            prediction.status,
            PredictionStatus::Starting | PredictionStatus::Processing
        ) {
            if polls >= self.max_polls {
                tracing::warn!(
                    "Replicate: prediction {} still {:?} after {} polls",
                    prediction.id,
                    prediction.status,
                    polls
                );
                return Err(AdapterError::Timeout);
            }

            sleep(self.poll_interval).await;
            polls += 1;

            let url = format!("{}/predictions/{}", self.base_url, prediction.id);
            prediction = self.fetch(self.client.get(url)).await?;
        }

        Ok(prediction)
    }

    fn normalize(prediction: Prediction, request: &GenerationRequest) -> Result<ImageBatch, AdapterError> {
        match prediction.status {
            PredictionStatus::Succeeded => {}
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                let reason = match prediction.error {
                    Some(serde_json::Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => format!("{:?}", prediction.status).to_lowercase(),
                };
                return Err(AdapterError::GenerationFailed(reason));
            }
            other => {
                return Err(AdapterError::InvalidResponse(format!(
                    "unfinished prediction: {:?}",
                    other
                )))
            }
        }

        let urls = match prediction.output {
            Some(PredictionOutput::Many(urls)) => urls,
            Some(PredictionOutput::One(url)) => vec![url],
            None => Vec::new(),
        };

        if urls.is_empty() {
            return Err(AdapterError::InvalidResponse("prediction has no output".to_string()));
        }

        let images = urls
            .into_iter()
            .enumerate()
            .map(|(idx, url)| GeneratedImage {
                id: format!("replicate-img-{}", idx + 1),
                url,
                width: request.width,
                height: request.height,
            })
            .collect();

        Ok(ImageBatch {
            images,
            cost: Some(prediction.cost.unwrap_or(NOMINAL_COST)),
        })
    }
}

#[async_trait]
impl ImageAdapter for ReplicateAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageBatch, AdapterError> {
        let version = Self::version_for(request.model);

        tracing::info!("Replicate: creating prediction for {}", version);

        let body = PredictionRequest {
            version,
            input: PredictionInput {
                prompt: &request.prompt,
                negative_prompt: request.negative_prompt.as_deref(),
                width: request.width,
                height: request.height,
                num_outputs: request.num_images,
                num_inference_steps: request.num_inference_steps,
                guidance_scale: request.guidance_scale,
                seed: request.seed,
            },
        };

        let created = self
            .fetch(
                self.client
                    .post(format!("{}/predictions", self.base_url))
                    .json(&body),
            )
            .await?;

        let finished = self.wait_for_completion(created).await?;
        Self::normalize(finished, request)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        probe_endpoint(&self.client, &self.base_url).await
    }

    fn id(&self) -> &str {
        REPLICATE
    }
}
