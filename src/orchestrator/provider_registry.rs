use super::ProviderConfig;
use crate::config::{mask_api_key, ServiceConfig};
use crate::generation::{
    AdapterError, ClipDropAdapter, FreepikAdapter, HuggingFaceAdapter, ImageAdapter,
    ReplicateAdapter, CLIPDROP, FREEPIK, HUGGING_FACE, REPLICATE,
};

/// Providers with credentials present, prioritised by `config.provider_order`
pub fn default_providers_from_config(config: &ServiceConfig) -> Vec<ProviderConfig> {
    let mut providers = Vec::new();

    for (priority, id) in config.provider_order.iter().enumerate() {
        let Some(key) = config.api_key_for(id) else {
            tracing::info!("Provider {} not registered: no API key", id);
            continue;
        };

        let Some(default_timeout_secs) = default_timeout_secs(id) else {
            tracing::warn!("Provider {} has no adapter", id);
            continue;
        };
        let timeout_secs = config.provider_timeout_secs.unwrap_or(default_timeout_secs);

        match build_adapter(id, key.to_string(), timeout_secs) {
            Ok(adapter) => {
                tracing::info!(
                    "Provider {} registered (priority {}, timeout {}s, key {})",
                    id,
                    priority,
                    timeout_secs,
                    mask_api_key(key)
                );
                providers.push(ProviderConfig {
                    id: id.clone(),
                    priority: priority as u8,
                    adapter,
                    max_retries: config.max_retries,
                    timeout_secs,
                });
            }
            Err(e) => tracing::warn!("Provider {} init skipped: {}", id, e),
        }
    }

    providers
}

fn default_timeout_secs(id: &str) -> Option<u64> {
    match id {
        FREEPIK => Some(FreepikAdapter::default_timeout_secs()),
        HUGGING_FACE => Some(HuggingFaceAdapter::default_timeout_secs()),
        REPLICATE => Some(ReplicateAdapter::default_timeout_secs()),
        CLIPDROP => Some(ClipDropAdapter::default_timeout_secs()),
        _ => None,
    }
}

/// The same `timeout_secs` bounds the adapter's HTTP client and the orchestrator's attempt
fn build_adapter(
    id: &str,
    key: String,
    timeout_secs: u64,
) -> Result<Box<dyn ImageAdapter>, AdapterError> {
    let adapter: Box<dyn ImageAdapter> = match id {
        FREEPIK => Box::new(FreepikAdapter::new(key, timeout_secs)?),
        HUGGING_FACE => Box::new(HuggingFaceAdapter::new(key, timeout_secs)?),
        REPLICATE => Box::new(ReplicateAdapter::new(key, timeout_secs)?),
        CLIPDROP => Box::new(ClipDropAdapter::new(key, timeout_secs)?),
        other => return Err(AdapterError::NotConfigured(other.to_string())),
    };
    Ok(adapter)
}
