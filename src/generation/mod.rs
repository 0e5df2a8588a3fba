// src/generation/mod.rs
// Image generation adapters

mod clipdrop;
mod freepik;
mod hugging_face;
mod replicate;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use clipdrop::ClipDropAdapter;
pub use freepik::FreepikAdapter;
pub use hugging_face::HuggingFaceAdapter;
pub use replicate::ReplicateAdapter;
pub use types::{
    AdapterError, AttemptFailure, GeneratedImage, GenerationMetadata, GenerationRequest,
    GenerationResult, GenerationStatus, ImageBatch, ImageModel, ResultError, ValidationError,
};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use std::time::Duration;

pub const FREEPIK: &str = "freepik";
pub const HUGGING_FACE: &str = "hugging_face";
pub const REPLICATE: &str = "replicate";
pub const CLIPDROP: &str = "clipdrop";

/// Default fallback order when a request carries no preference
pub const DEFAULT_PROVIDER_ORDER: [&str; 4] = [FREEPIK, HUGGING_FACE, REPLICATE, CLIPDROP];

const PROBE_TIMEOUT_SECS: u64 = 5;

/// Unified image generation adapter trait
#[async_trait]
pub trait ImageAdapter: Send + Sync {
    /// Run one generation call against the vendor
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageBatch, AdapterError>;

    /// Cheap reachability check, does not generate anything
    async fn health_check(&self) -> Result<(), AdapterError>;

    /// Stable provider identifier (e.g. "freepik")
    fn id(&self) -> &str;
}

/// HEAD the vendor base URL. 405 counts as reachable.
pub(crate) async fn probe_endpoint(client: &reqwest::Client, url: &str) -> Result<(), AdapterError> {
    let response = client
        .head(url)
        .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
        .send()
        .await?;

    let status = response.status();
    if status.is_success() || status.as_u16() == 405 {
        Ok(())
    } else {
        Err(AdapterError::from_status(
            status.as_u16(),
            format!("Provider unhealthy: {}", status),
        ))
    }
}

/// Encode a binary vendor response as a data URI
pub(crate) fn to_data_uri(content_type: Option<&str>, bytes: &[u8]) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or("image/png");
    format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes))
}

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AdapterError::NotConfigured(format!("HTTP client: {}", e)))
}
