use crate::config::ServiceConfig;
use crate::generation::{
    AdapterError, AttemptFailure, GenerationMetadata, GenerationRequest, GenerationResult,
    GenerationStatus, ImageAdapter, ImageBatch, ResultError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use self::health::HealthTracker;
use self::provider_registry::default_providers_from_config;
use self::retry::RetryPolicy;

pub mod health;
pub mod provider_registry;
pub mod retry;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("All providers failed")]
    AllProvidersExhausted(Vec<(String, AdapterError)>),

    #[error("No providers available")]
    NoProvidersAvailable,
}

impl OrchestratorError {
    pub fn to_result_error(&self) -> ResultError {
        let attempts = match self {
            OrchestratorError::AllProvidersExhausted(errors) => errors
                .iter()
                .map(|(provider, e)| AttemptFailure {
                    provider: provider.clone(),
                    error: e.to_string(),
                })
                .collect(),
            OrchestratorError::NoProvidersAvailable => Vec::new(),
        };

        ResultError {
            message: self.to_string(),
            attempts,
        }
    }
}

pub struct ProviderConfig {
    pub id: String,
    pub priority: u8,
    pub adapter: Box<dyn ImageAdapter>,
    pub max_retries: u8,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct FallbackOrchestrator {
    providers: Vec<ProviderConfig>,
    health: Arc<HealthTracker>,
    retry_base_delay: Duration,
}

impl FallbackOrchestrator {
    pub fn new(mut providers: Vec<ProviderConfig>, health: Arc<HealthTracker>) -> Self {
        providers.sort_by_key(|p| p.priority);

        for provider in &providers {
            health.register(&provider.id);
        }

        Self {
            providers,
            health,
            retry_base_delay: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        let providers = default_providers_from_config(config);
        let health = Arc::new(HealthTracker::new(config.failure_threshold));
        Self::new(providers, health)
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id.as_str()).collect()
    }

    /// Try providers in order until one produces images. Always yields exactly one result.
    pub async fn generate_image(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        let candidates = self.candidate_order(request);
        let mut provider_chain = Vec::with_capacity(candidates.len());
        let mut failures: Vec<(String, AdapterError)> = Vec::new();

        for provider in candidates {
            provider_chain.push(provider.id.clone());

            tracing::info!(
                "Attempting provider: {} (priority {})",
                provider.id,
                provider.priority
            );

            let attempt_started = Instant::now();
            let outcome = self.attempt(provider, request).await;
            let latency_ms = attempt_started.elapsed().as_secs_f64() * 1000.0;
            self.health
                .record_attempt(&provider.id, outcome.is_ok(), latency_ms);

            match outcome {
                Ok(batch) => {
                    tracing::info!(
                        "Provider {} succeeded: images={}, fallback_count={}",
                        provider.id,
                        batch.images.len(),
                        failures.len()
                    );
                    return Self::success_result(request, provider, batch, provider_chain, started);
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", provider.id, e);
                    failures.push((provider.id.clone(), e));
                }
            }
        }

        let error = if failures.is_empty() {
            OrchestratorError::NoProvidersAvailable
        } else {
            OrchestratorError::AllProvidersExhausted(failures)
        };

        tracing::error!("{}: {:?}", error, error.to_result_error().attempts);
        Self::failed_result(request, &error, provider_chain, started)
    }

    /// Run each adapter's reachability check. Does not touch the health tracker.
    pub async fn probe_providers(&self) -> BTreeMap<String, ProbeReport> {
        let mut reports = BTreeMap::new();

        for provider in &self.providers {
            let started = Instant::now();
            let report = match provider.adapter.health_check().await {
                Ok(()) => ProbeReport {
                    status: "healthy",
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    error: None,
                },
                Err(e) => ProbeReport {
                    status: "unhealthy",
                    latency_ms: None,
                    error: Some(e.to_string()),
                },
            };
            reports.insert(provider.id.clone(), report);
        }

        reports
    }

    fn candidate_order(&self, request: &GenerationRequest) -> Vec<&ProviderConfig> {
        if let Some(preference) = request.provider_preference.as_ref() {
            let mut ordered: Vec<&ProviderConfig> = Vec::new();
            for id in preference {
                let id = id.trim();
                match self.providers.iter().find(|p| p.id == id) {
                    Some(provider) => {
                        if !ordered.iter().any(|p| p.id == provider.id) {
                            ordered.push(provider);
                        }
                    }
                    None => tracing::warn!("Ignoring unregistered provider '{}' in preference", id),
                }
            }

            if !ordered.is_empty() {
                return ordered;
            }
            tracing::warn!("No registered provider in preference, using default order");
        }

        // Unavailable providers keep their relative order but go last
        let (available, degraded): (Vec<&ProviderConfig>, Vec<&ProviderConfig>) = self
            .providers
            .iter()
            .partition(|p| self.health.is_available(&p.id));

        available.into_iter().chain(degraded).collect()
    }

    async fn attempt(
        &self,
        provider: &ProviderConfig,
        request: &GenerationRequest,
    ) -> Result<ImageBatch, AdapterError> {
        let retry_policy =
            RetryPolicy::new(provider.max_retries).with_base_delay(self.retry_base_delay);
        let max_attempts = u32::from(provider.max_retries) + 1;
        let mut attempt = 0u8;

        loop {
            let result = match self.try_provider(provider, request).await {
                Ok(batch) if batch.images.is_empty() => Err(AdapterError::InvalidResponse(
                    "no images returned".to_string(),
                )),
                other => other,
            };

            match result {
                Ok(batch) => return Ok(batch),
                Err(e) => {
                    if retry_policy.should_retry(attempt, &e) {
                        tracing::warn!(
                            "Provider {} attempt {}/{} failed: {}",
                            provider.id,
                            u32::from(attempt) + 1,
                            max_attempts,
                            e
                        );
                        retry_policy.wait_before_retry(attempt).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn try_provider(
        &self,
        provider: &ProviderConfig,
        request: &GenerationRequest,
    ) -> Result<ImageBatch, AdapterError> {
        let timeout = Duration::from_secs(provider.timeout_secs);

        match tokio::time::timeout(timeout, provider.adapter.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout),
        }
    }

    fn success_result(
        request: &GenerationRequest,
        provider: &ProviderConfig,
        batch: ImageBatch,
        provider_chain: Vec<String>,
        started: Instant,
    ) -> GenerationResult {
        let status = if (batch.images.len() as u64) < request.num_images as u64 {
            GenerationStatus::Partial
        } else {
            GenerationStatus::Success
        };

        GenerationResult {
            id: uuid::Uuid::new_v4().to_string(),
            success: true,
            status,
            images: batch.images,
            provider_used: Some(provider.id.clone()),
            fallback_count: provider_chain.len().saturating_sub(1) as u32,
            generation_time_ms: started.elapsed().as_millis() as u64,
            cost: batch.cost,
            error: None,
            metadata: GenerationMetadata {
                prompt: request.prompt.clone(),
                model: request.model_name().to_string(),
                provider_chain,
            },
        }
    }

    fn failed_result(
        request: &GenerationRequest,
        error: &OrchestratorError,
        provider_chain: Vec<String>,
        started: Instant,
    ) -> GenerationResult {
        GenerationResult {
            id: uuid::Uuid::new_v4().to_string(),
            success: false,
            status: GenerationStatus::Failed,
            images: Vec::new(),
            provider_used: None,
            fallback_count: provider_chain.len().saturating_sub(1) as u32,
            generation_time_ms: started.elapsed().as_millis() as u64,
            cost: None,
            error: Some(error.to_result_error()),
            metadata: GenerationMetadata {
                prompt: request.prompt.clone(),
                model: request.model_name().to_string(),
                provider_chain,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::{Outcome, ScriptedAdapter};
    use std::sync::atomic::Ordering;

    fn provider(adapter: ScriptedAdapter, priority: u8) -> ProviderConfig {
        ProviderConfig {
            id: adapter.id().to_string(),
            priority,
            adapter: Box::new(adapter),
            max_retries: 0,
            timeout_secs: 5,
        }
    }

    fn orchestrator(adapters: Vec<ScriptedAdapter>, threshold: u32) -> FallbackOrchestrator {
        let providers = adapters
            .into_iter()
            .enumerate()
            .map(|(idx, a)| provider(a, idx as u8))
            .collect();
        FallbackOrchestrator::new(providers, Arc::new(HealthTracker::new(threshold)))
            .with_retry_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_first_healthy_provider_wins() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::Succeed),
                ScriptedAdapter::always("B", Outcome::Succeed),
            ],
            3,
        );

        let result = orch.generate_image(&GenerationRequest::new("tee")).await;
        assert!(result.success);
        assert_eq!(result.status, GenerationStatus::Success);
        assert_eq!(result.provider_used.as_deref(), Some("A"));
        assert_eq!(result.fallback_count, 0);
        assert_eq!(result.metadata.provider_chain, vec!["A"]);
        assert!(result.error.is_none());
        assert_eq!(orch.health().get("B").unwrap().total_successes, 0);
    }

    #[tokio::test]
    async fn test_fallback_count_matches_failed_attempts() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::FailHttp(500)),
                ScriptedAdapter::always("B", Outcome::FailTimeout),
                ScriptedAdapter::always("C", Outcome::Succeed),
                ScriptedAdapter::always("D", Outcome::Succeed),
            ],
            3,
        );

        let result = orch.generate_image(&GenerationRequest::new("hoodie")).await;
        assert!(result.success);
        assert_eq!(result.provider_used.as_deref(), Some("C"));
        assert_eq!(result.fallback_count, 2);
        assert_eq!(result.metadata.provider_chain, vec!["A", "B", "C"]);

        let health = orch.health();
        assert_eq!(health.get("A").unwrap().consecutive_failures, 1);
        assert_eq!(health.get("B").unwrap().consecutive_failures, 1);
        assert_eq!(health.get("C").unwrap().total_successes, 1);
        assert_eq!(health.get("D").unwrap().total_successes, 0);
    }

    #[tokio::test]
    async fn test_all_providers_failing_yields_failed_envelope() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::FailHttp(401)),
                ScriptedAdapter::always("B", Outcome::FailHttp(503)),
                ScriptedAdapter::always("C", Outcome::FailTimeout),
            ],
            3,
        );

        let result = orch.generate_image(&GenerationRequest::new("cap")).await;
        assert!(!result.success);
        assert_eq!(result.status, GenerationStatus::Failed);
        assert!(result.provider_used.is_none());
        assert!(result.images.is_empty());
        assert_eq!(result.fallback_count, 2);

        let error = result.error.unwrap();
        assert_eq!(error.message, "All providers failed");
        let providers: Vec<_> = error.attempts.iter().map(|a| a.provider.as_str()).collect();
        assert_eq!(providers, vec!["A", "B", "C"]);
        assert_eq!(error.attempts[0].error, "Authentication failed");

        for id in ["A", "B", "C"] {
            assert_eq!(orch.health().get(id).unwrap().consecutive_failures, 1);
        }
    }

    #[tokio::test]
    async fn test_no_registered_providers() {
        let orch = orchestrator(Vec::new(), 3);
        let result = orch.generate_image(&GenerationRequest::new("cap")).await;
        assert!(!result.success);
        assert_eq!(result.fallback_count, 0);
        assert_eq!(result.error.unwrap().message, "No providers available");
    }

    #[tokio::test]
    async fn test_preference_overrides_default_order() {
        let a = ScriptedAdapter::always("A", Outcome::Succeed);
        let a_calls = a.calls();
        let orch = orchestrator(vec![a, ScriptedAdapter::always("B", Outcome::Succeed)], 3);

        let mut request = GenerationRequest::new("jersey");
        request.provider_preference = Some(vec!["B".to_string(), "A".to_string()]);

        let result = orch.generate_image(&request).await;
        assert_eq!(result.provider_used.as_deref(), Some("B"));
        assert_eq!(result.fallback_count, 0);
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preference_drops_unknown_and_duplicate_ids() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::FailHttp(500)),
                ScriptedAdapter::always("B", Outcome::FailHttp(500)),
            ],
            3,
        );

        let mut request = GenerationRequest::new("jersey");
        request.provider_preference = Some(vec![
            "ghost".to_string(),
            "B".to_string(),
            "B".to_string(),
        ]);

        let result = orch.generate_image(&request).await;
        assert_eq!(result.metadata.provider_chain, vec!["B"]);
        assert_eq!(result.fallback_count, 0);
        assert_eq!(orch.health().get("B").unwrap().consecutive_failures, 1);
        assert_eq!(orch.health().get("A").unwrap().total_failures, 0);
    }

    #[tokio::test]
    async fn test_preference_with_no_registered_ids_uses_default_order() {
        let orch = orchestrator(vec![ScriptedAdapter::always("A", Outcome::Succeed)], 3);
        let mut request = GenerationRequest::new("jersey");
        request.provider_preference = Some(vec!["ghost".to_string()]);

        let result = orch.generate_image(&request).await;
        assert_eq!(result.provider_used.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_unavailable_provider_heals_after_one_success() {
        // Fails three times, then recovers
        let flaky = ScriptedAdapter::scripted(
            "A",
            vec![Outcome::FailHttp(500), Outcome::FailHttp(500), Outcome::FailHttp(500)],
            Outcome::Succeed,
        );
        let orch = orchestrator(vec![flaky], 2);
        let request = GenerationRequest::new("scarf");

        for _ in 0..3 {
            assert!(!orch.generate_image(&request).await.success);
        }
        let record = orch.health().get("A").unwrap();
        assert_eq!(record.consecutive_failures, 3);
        assert!(!record.is_available);

        assert!(orch.generate_image(&request).await.success);
        let record = orch.health().get("A").unwrap();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.is_available);
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_tried_last_in_default_order() {
        let a = ScriptedAdapter::scripted(
            "A",
            vec![Outcome::FailHttp(500), Outcome::FailHttp(500)],
            Outcome::Succeed,
        );
        let orch = orchestrator(vec![a, ScriptedAdapter::always("B", Outcome::Succeed)], 1);

        // Two failures on A with threshold 1 marks it unavailable
        let mut pinned = GenerationRequest::new("socks");
        pinned.provider_preference = Some(vec!["A".to_string()]);
        orch.generate_image(&pinned).await;
        orch.generate_image(&pinned).await;
        assert!(!orch.health().is_available("A"));

        let result = orch.generate_image(&GenerationRequest::new("socks")).await;
        assert_eq!(result.provider_used.as_deref(), Some("B"));
        assert_eq!(result.metadata.provider_chain, vec!["B"]);
    }

    #[tokio::test]
    async fn test_short_batch_is_partial() {
        let orch = orchestrator(vec![ScriptedAdapter::always("A", Outcome::SucceedWith(1))], 3);
        let mut request = GenerationRequest::new("poster");
        request.num_images = 3;

        let result = orch.generate_image(&request).await;
        assert!(result.success);
        assert_eq!(result.status, GenerationStatus::Partial);
        assert_eq!(result.images.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_counts_as_failure() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::SucceedWith(0)),
                ScriptedAdapter::always("B", Outcome::Succeed),
            ],
            3,
        );

        let result = orch.generate_image(&GenerationRequest::new("poster")).await;
        assert_eq!(result.provider_used.as_deref(), Some("B"));
        assert_eq!(result.fallback_count, 1);
        assert_eq!(orch.health().get("A").unwrap().total_failures, 1);
    }

    #[tokio::test]
    async fn test_retries_record_one_health_outcome() {
        let a = ScriptedAdapter::scripted("A", vec![Outcome::FailTimeout], Outcome::Succeed);
        let calls = a.calls();
        let mut config = provider(a, 0);
        config.max_retries = 2;
        let orch = FallbackOrchestrator::new(vec![config], Arc::new(HealthTracker::default()))
            .with_retry_base_delay(Duration::from_millis(1));

        let result = orch.generate_image(&GenerationRequest::new("tote")).await;
        assert!(result.success);
        assert_eq!(result.fallback_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let record = orch.health().get("A").unwrap();
        assert_eq!(record.total_successes, 1);
        assert_eq!(record.total_failures, 0);
    }

    #[tokio::test]
    async fn test_max_retry_budget_logs_without_overflow() {
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::fmt().with_test_writer().finish(),
        );
        let a = ScriptedAdapter::scripted("A", vec![Outcome::FailTimeout], Outcome::Succeed);
        let calls = a.calls();
        let mut config = provider(a, 0);
        config.max_retries = u8::MAX;
        let orch = FallbackOrchestrator::new(vec![config], Arc::new(HealthTracker::default()))
            .with_retry_base_delay(Duration::from_millis(1));

        let result = orch.generate_image(&GenerationRequest::new("tote")).await;
        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let a = ScriptedAdapter::always("A", Outcome::FailHttp(401));
        let calls = a.calls();
        let mut config = provider(a, 0);
        config.max_retries = 3;
        let orch = FallbackOrchestrator::new(vec![config], Arc::new(HealthTracker::default()));

        orch.generate_image(&GenerationRequest::new("tote")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out_and_falls_back() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::Hang),
                ScriptedAdapter::always("B", Outcome::Succeed),
            ],
            3,
        );

        let result = orch.generate_image(&GenerationRequest::new("beanie")).await;
        assert_eq!(result.provider_used.as_deref(), Some("B"));
        assert_eq!(result.fallback_count, 1);
        assert_eq!(orch.health().get("A").unwrap().total_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_keep_exact_counts() {
        let x = ScriptedAdapter::always("X", Outcome::Succeed).with_delay(Duration::from_millis(2));
        let orch = Arc::new(orchestrator(vec![x], 3));
        let before = orch.health().get("X").unwrap().total_successes;

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.generate_image(&GenerationRequest::new(format!("design {}", i)))
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().success);
        }

        assert_eq!(orch.health().get("X").unwrap().total_successes, before + 64);
    }

    #[tokio::test]
    async fn test_probe_reports_each_provider_without_touching_health() {
        let orch = orchestrator(
            vec![
                ScriptedAdapter::always("A", Outcome::Succeed),
                ScriptedAdapter::always("B", Outcome::FailHttp(500)),
            ],
            3,
        );

        let reports = orch.probe_providers().await;
        assert_eq!(reports["A"].status, "healthy");
        assert_eq!(reports["B"].status, "unhealthy");
        assert!(reports["B"].error.is_some());
        assert_eq!(orch.health().get("B").unwrap().total_failures, 0);
    }
}
