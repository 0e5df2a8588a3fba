use crate::generation::{CLIPDROP, DEFAULT_PROVIDER_ORDER, FREEPIK, HUGGING_FACE, REPLICATE};
use crate::orchestrator::health::DEFAULT_FAILURE_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

const CONFIG_PATH_ENV: &str = "IMAGEGEN_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub failure_threshold: u32,
    pub provider_order: Vec<String>,
    /// Overrides every adapter's own timeout when set
    pub provider_timeout_secs: Option<u64>,
    pub max_retries: u8,
    pub freepik_api_key: Option<String>,
    pub hugging_face_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
    pub clipdrop_api_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            provider_order: default_provider_order(),
            provider_timeout_secs: None,
            max_retries: 0,
            freepik_api_key: None,
            hugging_face_api_key: None,
            replicate_api_token: None,
            clipdrop_api_key: None,
        }
    }
}

impl ServiceConfig {
    /// Optional JSON file named by IMAGEGEN_CONFIG, then process env (with `.env` already loaded)
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => load_file(Path::new(path.trim()))?,
            _ => ServiceConfig::default(),
        };

        apply_env(&mut config, |key| std::env::var(key).ok())?;
        normalize_config(&mut config);
        config.socket_addr()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "IMAGEGEN_BIND_ADDR",
                value: self.bind_addr.clone(),
            })
    }

    pub fn api_key_for(&self, provider_id: &str) -> Option<&str> {
        let key = match provider_id {
            FREEPIK => &self.freepik_api_key,
            HUGGING_FACE => &self.hugging_face_api_key,
            REPLICATE => &self.replicate_api_token,
            CLIPDROP => &self.clipdrop_api_key,
            _ => return None,
        };
        key.as_deref()
    }
}

pub fn load_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config =
        serde_json::from_str::<ServiceConfig>(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    normalize_config(&mut config);
    Ok(config)
}

pub fn apply_env<F>(config: &mut ServiceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = lookup("IMAGEGEN_BIND_ADDR") {
        config.bind_addr = addr.trim().to_string();
    }

    if let Some(raw) = lookup("IMAGEGEN_FAILURE_THRESHOLD") {
        config.failure_threshold = parse_number("IMAGEGEN_FAILURE_THRESHOLD", &raw)?;
    }

    if let Some(raw) = lookup("IMAGEGEN_PROVIDER_TIMEOUT_SECS") {
        config.provider_timeout_secs = Some(parse_number("IMAGEGEN_PROVIDER_TIMEOUT_SECS", &raw)?);
    }

    if let Some(raw) = lookup("IMAGEGEN_MAX_RETRIES") {
        config.max_retries = parse_number("IMAGEGEN_MAX_RETRIES", &raw)?;
    }

    if let Some(raw) = lookup("IMAGEGEN_PROVIDER_ORDER") {
        config.provider_order = raw.split(',').map(str::to_string).collect();
    }

    if let Some(key) = lookup("FREEPIK_API_KEY") {
        config.freepik_api_key = Some(key);
    }
    if let Some(key) = lookup("HUGGING_FACE_API_KEY") {
        config.hugging_face_api_key = Some(key);
    }
    if let Some(key) = lookup("REPLICATE_API_TOKEN") {
        config.replicate_api_token = Some(key);
    }
    if let Some(key) = lookup("CLIPDROP_API_KEY") {
        config.clipdrop_api_key = Some(key);
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

pub fn default_provider_order() -> Vec<String> {
    DEFAULT_PROVIDER_ORDER.iter().map(|p| p.to_string()).collect()
}

/// Lowercase, drop unknown ids and duplicates. An empty result falls back to the default order.
pub fn normalize_provider_order(order: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for raw in order {
        let id = raw.trim().to_ascii_lowercase();
        if id.is_empty() {
            continue;
        }
        if !DEFAULT_PROVIDER_ORDER.contains(&id.as_str()) {
            tracing::warn!("Ignoring unknown provider '{}' in provider order", id);
            continue;
        }
        if !normalized.contains(&id) {
            normalized.push(id);
        }
    }

    if normalized.is_empty() {
        default_provider_order()
    } else {
        normalized
    }
}

pub fn normalize_api_key(key: Option<String>) -> Option<String> {
    key.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn mask_api_key(api_key: &str) -> String {
    if api_key.len() <= 10 {
        return "******".to_string();
    }

    let prefix = api_key.get(..4).unwrap_or_default();
    let suffix = api_key.get(api_key.len() - 4..).unwrap_or_default();
    format!("{}********{}", prefix, suffix)
}

fn normalize_config(config: &mut ServiceConfig) {
    config.provider_order = normalize_provider_order(&config.provider_order);
    config.provider_timeout_secs = config.provider_timeout_secs.filter(|secs| *secs > 0);
    config.freepik_api_key = normalize_api_key(config.freepik_api_key.take());
    config.hugging_face_api_key = normalize_api_key(config.hugging_face_api_key.take());
    config.replicate_api_token = normalize_api_key(config.replicate_api_token.take());
    config.clipdrop_api_key = normalize_api_key(config.clipdrop_api_key.take());
}
