// src/generation/types.rs
// Request/result envelope and adapter error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DIMENSION: u32 = 512;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;
pub const DEFAULT_INFERENCE_STEPS: u32 = 30;
pub const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted";

/// Models accepted across providers. Each adapter maps these onto its own catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageModel {
    Mystic,
    Flux,
    FluxRealism,
    FluxAnime,
    StableDiffusionXl,
}

impl ImageModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageModel::Mystic => "mystic",
            ImageModel::Flux => "flux",
            ImageModel::FluxRealism => "flux-realism",
            ImageModel::FluxAnime => "flux-anime",
            ImageModel::StableDiffusionXl => "stable-diffusion-xl",
        }
    }
}

/// Normalized image generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<ImageModel>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_num_images")]
    pub num_images: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub provider_preference: Option<Vec<String>>,
}

fn default_dimension() -> u32 {
    DEFAULT_DIMENSION
}

fn default_num_images() -> u32 {
    1
}

fn default_guidance_scale() -> f32 {
    DEFAULT_GUIDANCE_SCALE
}

fn default_inference_steps() -> u32 {
    DEFAULT_INFERENCE_STEPS
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            model: None,
            style: None,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            num_images: 1,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            num_inference_steps: DEFAULT_INFERENCE_STEPS,
            seed: None,
            provider_preference: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::MissingPrompt);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.num_images == 0 {
            return Err(ValidationError::InvalidField("num_images must be at least 1"));
        }
        if self.num_inference_steps == 0 {
            return Err(ValidationError::InvalidField(
                "num_inference_steps must be at least 1",
            ));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(ValidationError::InvalidField(
                "guidance_scale must be a non-negative number",
            ));
        }
        Ok(())
    }

    pub fn model_name(&self) -> &'static str {
        self.model.map(|m| m.as_str()).unwrap_or("default")
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("prompt is required")]
    MissingPrompt,

    #[error("width and height must be positive (got {width}x{height})")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("{0}")]
    InvalidField(&'static str),
}

/// A single generated image. `url` is either a vendor URL or a data URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Normalized output of one successful adapter call
#[derive(Debug, Clone)]
pub struct ImageBatch {
    pub images: Vec<GeneratedImage>,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub provider: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultError {
    pub message: String,
    pub attempts: Vec<AttemptFailure>,
}

impl ResultError {
    /// One line per failed provider, in attempt order
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| format!("{}: {}", a.provider, a.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub prompt: String,
    pub model: String,
    pub provider_chain: Vec<String>,
}

/// Envelope returned for every generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub id: String,
    pub success: bool,
    pub status: GenerationStatus,
    pub images: Vec<GeneratedImage>,
    pub provider_used: Option<String>,
    pub fallback_count: u32,
    pub generation_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    pub error: Option<ResultError>,
    pub metadata: GenerationMetadata,
}

/// Adapter error types with retry classification
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Authentication failed")]
    Authentication,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Model is loading")]
    ModelLoading,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl AdapterError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Network(_)
                | AdapterError::Timeout
                | AdapterError::RateLimited
                | AdapterError::ModelLoading
        )
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => AdapterError::Authentication,
            429 => AdapterError::RateLimited,
            _ => AdapterError::Http {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout
        } else if e.is_decode() {
            AdapterError::InvalidResponse(e.to_string())
        } else {
            AdapterError::Network(e.to_string())
        }
    }
}
