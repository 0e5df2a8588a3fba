use crate::generation::{GenerationRequest, GenerationResult, ValidationError};
use crate::orchestrator::health::ProviderHealthRecord;
use crate::orchestrator::{FallbackOrchestrator, ProbeReport};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type SharedOrchestrator = Arc<FallbackOrchestrator>;

#[derive(Debug, Serialize)]
struct GenerateResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    success: bool,
    providers: BTreeMap<String, ProviderHealthRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    probes: Option<BTreeMap<String, ProbeReport>>,
    timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    probe: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request body")]
    MalformedBody(String),

    #[error("Invalid query string")]
    MalformedQuery(String),

    #[error("Validation failed")]
    Validation(#[from] ValidationError),
}

impl ApiError {
    fn details(&self) -> String {
        match self {
            ApiError::MalformedBody(detail) | ApiError::MalformedQuery(detail) => detail.clone(),
            ApiError::Validation(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!("Rejected request: {}: {}", self, self.details());
        let body = GenerateResponse {
            success: false,
            data: None,
            error: Some(self.to_string()),
            details: Some(self.details()),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

pub fn router(orchestrator: SharedOrchestrator) -> Router {
    Router::new()
        .route("/ai-generate", get(provider_health).post(generate))
        .with_state(orchestrator)
}

async fn generate(
    State(orchestrator): State<SharedOrchestrator>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::MalformedBody(rejection.body_text()))?;
    request.validate()?;

    let result = orchestrator.generate_image(&request).await;

    if result.success {
        let body = GenerateResponse {
            success: true,
            data: Some(result),
            error: None,
            details: None,
        };
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    let (error, details) = match result.error.as_ref() {
        Some(e) if !e.attempts.is_empty() => (e.message.clone(), Some(e.summary())),
        Some(e) => (e.message.clone(), None),
        None => ("Generation failed".to_string(), None),
    };
    let body = GenerateResponse {
        success: false,
        data: Some(result),
        error: Some(error),
        details,
    };
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
}

async fn provider_health(
    State(orchestrator): State<SharedOrchestrator>,
    query: Result<Query<HealthQuery>, QueryRejection>,
) -> Result<Json<HealthResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::MalformedQuery(rejection.body_text()))?;

    let probes = if query.probe {
        Some(orchestrator.probe_providers().await)
    } else {
        None
    };

    Ok(Json(HealthResponse {
        success: true,
        providers: orchestrator.health().snapshot(),
        probes,
        timestamp: Utc::now().to_rfc3339(),
    }))
}
