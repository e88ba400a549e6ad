/// Per-provider request metrics and aggregate gateway diagnostics

use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct ProviderCounters {
    requests: u64,
    errors: u64,
    latency_total_ms: u64,
    latency_samples: u64,
    last_status: Option<u16>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: u64,
    total_errors: u64,
    total_cache_hits: u64,
    total_fallbacks: u64,
    total_mock_responses: u64,
    per_provider: HashMap<String, ProviderCounters>,
}

/// Snapshot of one provider's counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: u64,
    pub last_status: Option<u16>,
}

/// Aggregate gateway diagnostics (rate-limit windows are merged in by the
/// gateway, which owns the limiter)
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_cache_hits: u64,
    pub total_fallbacks: u64,
    pub total_mock_responses: u64,
    pub cache_hit_rate_pct: f64,
    pub error_rate_pct: f64,
    pub per_provider: HashMap<String, ProviderStats>,
}

#[derive(Debug, Default)]
pub struct ApiStatsTracker {
    inner: RwLock<StatsInner>,
}

impl ApiStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// One durable external call is about to be made against `provider`.
    pub fn record_request(&self, provider: &str) {
        let mut inner = self.inner.write();
        inner.total_requests += 1;
        inner
            .per_provider
            .entry(provider.to_string())
            .or_default()
            .requests += 1;
    }

    pub fn record_success(&self, provider: &str, latency_ms: u64, status: u16) {
        let mut inner = self.inner.write();
        let counters = inner.per_provider.entry(provider.to_string()).or_default();
        counters.latency_total_ms += latency_ms;
        counters.latency_samples += 1;
        counters.last_status = Some(status);
    }

    pub fn record_error(&self, provider: &str, status: Option<u16>) {
        let mut inner = self.inner.write();
        inner.total_errors += 1;
        let counters = inner.per_provider.entry(provider.to_string()).or_default();
        counters.errors += 1;
        if status.is_some() {
            counters.last_status = status;
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.write().total_cache_hits += 1;
    }

    pub fn record_fallback(&self) {
        self.inner.write().total_fallbacks += 1;
    }

    pub fn record_mock_response(&self) {
        self.inner.write().total_mock_responses += 1;
    }

    pub fn snapshot(&self) -> GatewayStats {
        let inner = self.inner.read();

        // Cache hits don't reach a provider, so the hit rate is computed
        // against all lookups: hits + upstream requests
        let lookups = inner.total_cache_hits + inner.total_requests;
        let cache_hit_rate_pct = if lookups == 0 {
            0.0
        } else {
            inner.total_cache_hits as f64 / lookups as f64 * 100.0
        };
        let error_rate_pct = if inner.total_requests == 0 {
            0.0
        } else {
            inner.total_errors as f64 / inner.total_requests as f64 * 100.0
        };

        GatewayStats {
            total_requests: inner.total_requests,
            total_errors: inner.total_errors,
            total_cache_hits: inner.total_cache_hits,
            total_fallbacks: inner.total_fallbacks,
            total_mock_responses: inner.total_mock_responses,
            cache_hit_rate_pct,
            error_rate_pct,
            per_provider: inner
                .per_provider
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        ProviderStats {
                            requests: c.requests,
                            errors: c.errors,
                            avg_latency_ms: if c.latency_samples == 0 {
                                0
                            } else {
                                c.latency_total_ms / c.latency_samples
                            },
                            last_status: c.last_status,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_computed_from_counters() {
        let stats = ApiStatsTracker::new();
        stats.record_request("ordiscan");
        stats.record_success("ordiscan", 120, 200);
        stats.record_request("ordiscan");
        stats.record_error("ordiscan", Some(503));
        stats.record_cache_hit();
        stats.record_cache_hit();

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.total_cache_hits, 2);
        assert!((snap.cache_hit_rate_pct - 50.0).abs() < f64::EPSILON);
        assert!((snap.error_rate_pct - 50.0).abs() < f64::EPSILON);

        let provider = &snap.per_provider["ordiscan"];
        assert_eq!(provider.requests, 2);
        assert_eq!(provider.errors, 1);
        assert_eq!(provider.avg_latency_ms, 120);
        assert_eq!(provider.last_status, Some(503));
    }
}
