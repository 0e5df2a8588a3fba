use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealthRecord {
    pub provider_id: String,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub average_latency_ms: f64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub is_available: bool,
}

impl ProviderHealthRecord {
    fn empty(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            average_latency_ms: 0.0,
            total_successes: 0,
            total_failures: 0,
            is_available: true,
        }
    }

    fn total_attempts(&self) -> u64 {
        self.total_successes + self.total_failures
    }
}

/// Rolling per-provider reliability statistics, shared across requests.
///
/// Every update takes the map lock for the duration of a single record
/// mutation, so concurrent recorders never lose increments.
pub struct HealthTracker {
    records: Mutex<HashMap<String, ProviderHealthRecord>>,
    failure_threshold: u32,
}

impl HealthTracker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            failure_threshold,
        }
    }

    /// Seed an empty record so the provider shows up in snapshots before its first attempt
    pub fn register(&self, provider_id: &str) {
        self.lock()
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealthRecord::empty(provider_id));
    }

    pub fn record_attempt(&self, provider_id: &str, success: bool, latency_ms: f64) {
        let now = Utc::now();
        let mut records = self.lock();
        let record = records
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealthRecord::empty(provider_id));

        let previous = record.total_attempts() as f64;
        record.average_latency_ms =
            (record.average_latency_ms * previous + latency_ms.max(0.0)) / (previous + 1.0);

        if success {
            record.consecutive_failures = 0;
            record.total_successes += 1;
            record.last_success_at = Some(now);
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.total_failures += 1;
            record.last_failure_at = Some(now);
        }

        let was_available = record.is_available;
        record.is_available = record.consecutive_failures <= self.failure_threshold;

        if was_available && !record.is_available {
            tracing::warn!(
                "Provider {} marked unavailable, consecutive_failures={}",
                provider_id,
                record.consecutive_failures
            );
        } else if !was_available && record.is_available {
            tracing::info!("Provider {} recovered", provider_id);
        }
    }

    /// Unknown providers are treated as available
    pub fn is_available(&self, provider_id: &str) -> bool {
        self.lock()
            .get(provider_id)
            .map(|r| r.is_available)
            .unwrap_or(true)
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderHealthRecord> {
        self.lock().get(provider_id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ProviderHealthRecord> {
        self.lock()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProviderHealthRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}
