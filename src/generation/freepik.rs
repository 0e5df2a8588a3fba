// src/generation/freepik.rs
// Freepik text-to-image adapter (Primary)

use super::types::DEFAULT_NEGATIVE_PROMPT;
use super::{
    build_client, probe_endpoint, to_data_uri, AdapterError, GeneratedImage, GenerationRequest,
    ImageAdapter, ImageBatch, ImageModel, FREEPIK,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

const FREEPIK_BASE_URL: &str = "https://api.freepik.com/v1";
const TIMEOUT_SECS: u64 = 15;
const NOMINAL_COST: f64 = 0.01;

#[derive(Debug, Serialize)]
struct FreepikRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    model: &'a str,
    width: u32,
    height: u32,
    num_images: u32,
    guidance_scale: f32,
    num_inference_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FreepikImage {
    #[serde(default)]
    id: Option<String>,
    url: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FreepikEncoded {
    base64: String,
}

/// The text-to-image endpoint has answered in several shapes over time
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FreepikResponse {
    Images {
        #[serde(default)]
        id: Option<String>,
        images: Vec<FreepikImage>,
        #[serde(default)]
        cost: Option<f64>,
    },
    Encoded {
        data: Vec<FreepikEncoded>,
    },
    Single {
        #[serde(default)]
        id: Option<String>,
        #[serde(alias = "url")]
        image_url: String,
        #[serde(default)]
        cost: Option<f64>,
    },
}

pub struct FreepikAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl FreepikAdapter {
    pub fn new(api_key: String, timeout_secs: u64) -> Result<Self, AdapterError> {
        let client = build_client(timeout_secs)?;

        tracing::info!("Freepik adapter initialized");

        Ok(Self {
            api_key,
            client,
            base_url: FREEPIK_BASE_URL.to_string(),
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
        model.unwrap_or(ImageModel::Mystic).as_str()
    }

    fn normalize(
        response: FreepikResponse,
        request: &GenerationRequest,
    ) -> Result<ImageBatch, AdapterError> {
        let batch = match response {
            FreepikResponse::Images { id, images, cost } => {
                let prefix = id.unwrap_or_else(|| "freepik".to_string());
                let images = images
                    .into_iter()
                    .enumerate()
                    .map(|(idx, img)| GeneratedImage {
                        id: img.id.unwrap_or_else(|| format!("{}-img-{}", prefix, idx + 1)),
                        url: img.url,
                        width: img.width.unwrap_or(request.width),
                        height: img.height.unwrap_or(request.height),
                    })
                    .collect();
                ImageBatch {
                    images,
                    cost: Some(cost.unwrap_or(NOMINAL_COST)),
                }
            }
            FreepikResponse::Encoded { data } => {
                let mut images = Vec::with_capacity(data.len());
                for (idx, item) in data.into_iter().enumerate() {
                    // Validate the payload before handing it to callers as a data URI
                    let bytes = BASE64_STANDARD
                        .decode(item.base64.as_bytes())
                        .map_err(|e| AdapterError::InvalidResponse(format!("base64: {}", e)))?;
                    images.push(GeneratedImage {
                        id: format!("freepik-img-{}", idx + 1),
                        url: to_data_uri(None, &bytes),
                        width: request.width,
                        height: request.height,
                    });
                }
                ImageBatch {
                    images,
                    cost: Some(NOMINAL_COST),
                }
            }
            FreepikResponse::Single { id, image_url, cost } => ImageBatch {
                images: vec![GeneratedImage {
                    id: id.unwrap_or_else(|| "freepik-img-1".to_string()),
                    url: image_url,
                    width: request.width,
                    height: request.height,
                }],
                cost: Some(cost.unwrap_or(NOMINAL_COST)),
            },
        };

        if batch.images.is_empty() {
            return Err(AdapterError::InvalidResponse("no images returned".to_string()));
        }
        Ok(batch)
    }
}

#[async_trait]
impl ImageAdapter for FreepikAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageBatch, AdapterError> {
        tracing::info!(
            "Freepik: generating {} image(s) {}x{}",
            request.num_images,
            request.width,
            request.height
        );

        let body = FreepikRequest {
            prompt: &request.prompt,
            negative_prompt: request
                .negative_prompt
                .as_deref()
                .unwrap_or(DEFAULT_NEGATIVE_PROMPT),
            model: Self::model_for(request.model),
            width: request.width,
            height: request.height,
            num_images: request.num_images,
            guidance_scale: request.guidance_scale,
            num_inference_steps: request.num_inference_steps,
            seed: request.seed,
            style: request.style.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/ai/text-to-image", self.base_url))
            .header("x-freepik-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(status.as_u16(), error_text));
        }

        let parsed: FreepikResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        Self::normalize(parsed, request)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        probe_endpoint(&self.client, &self.base_url).await
    }

    fn id(&self) -> &str {
        FREEPIK
    }
}
