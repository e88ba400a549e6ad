/// API gateway: single entry point over cache, rate limiting, retries and
/// cross-provider fallback
///
/// Per request the gateway runs the fast path first (cache, then the rate
/// limiter) and only then the slow path: the primary provider under the
/// retry policy, the endpoint's fallback chain with schema transformation,
/// and finally the configured mock generator. Terminal outcomes are a
/// response or a structured error - callers never see provider-specific
/// shapes or uncaught failures.

use crate::cache::CacheEngine;
use crate::errors::{GatewayError, GatewayResult, NetworkError};
use crate::fallback::FallbackRegistry;
use crate::ratelimit::{RateLimitRule, RateLimitStatus, RateLimiter};
use crate::retry::RetryPolicy;
use crate::transform::SchemaTransformer;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod stats;
pub mod transport;

#[cfg(test)]
mod tests;

pub use stats::{ApiStatsTracker, GatewayStats, ProviderStats};
pub use transport::{FetchResponse, HttpTransport, ProviderTransport};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Rate limits carried by a provider registration: one global rule plus
/// per-endpoint overrides.
#[derive(Debug, Clone, Default)]
pub struct ProviderRateLimits {
    pub global: Option<RateLimitRule>,
    pub per_endpoint: HashMap<String, RateLimitRule>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Lower value = preferred; informational for callers building chains
    pub priority: u8,
    pub rate_limits: ProviderRateLimits,
}

impl ProviderConfig {
    pub fn new(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(10),
            priority: 0,
            rate_limits: ProviderRateLimits::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_global_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limits.global = Some(rule);
        self
    }

    pub fn with_endpoint_rate_limit(mut self, endpoint: &str, rule: RateLimitRule) -> Self {
        self.rate_limits
            .per_endpoint
            .insert(endpoint.to_string(), rule);
        self
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.name.is_empty() {
            return Err(GatewayError::Configuration(
                "Provider name must not be empty".to_string(),
            ));
        }
        if self.base_url.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "Provider {} has an empty base_url",
                self.name
            )));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::Configuration(format!(
                "Provider {} timeout must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Per-request options: cache behavior plus an optional overall deadline.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Cache TTL in seconds; falls back to the cache engine's default
    pub ttl_secs: Option<u64>,
    /// Tag for group invalidation; also suffixes the cache key
    pub tag: Option<String>,
    /// Skip the cache read (the response is still written back)
    pub bypass_cache: bool,
    /// Overall deadline for the slow path (retries included)
    pub deadline: Option<Instant>,
}

/// What `request` hands back to callers
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub data: Value,
    /// Provider that actually produced the data ("mock" for synthetic)
    pub source: String,
    pub from_cache: bool,
    pub is_mock: bool,
    /// Primary provider the request fell back from, when it did
    pub fallback_from: Option<String>,
    pub latency_ms: u64,
}

/// Aggregate diagnostics: stats counters plus every rate-limit window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayDiagnostics {
    #[serde(flatten)]
    pub stats: GatewayStats,
    pub rate_limits: HashMap<String, RateLimitStatus>,
}

// =============================================================================
// GATEWAY
// =============================================================================

pub struct ApiGateway {
    providers: RwLock<HashMap<String, ProviderConfig>>,
    cache: Arc<CacheEngine>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    transformer: Arc<SchemaTransformer>,
    fallbacks: Arc<FallbackRegistry>,
    transport: Arc<dyn ProviderTransport>,
    stats: ApiStatsTracker,
}

/// Cache key format: `"{provider}:{endpoint}:{JSON(params)}"`, suffixed
/// `":{tag}"` when tag-scoped.
pub fn cache_key(provider: &str, endpoint: &str, params: &Value, tag: Option<&str>) -> String {
    let mut key = format!("{}:{}:{}", provider, endpoint, params);
    if let Some(tag) = tag {
        key.push(':');
        key.push_str(tag);
    }
    key
}

impl ApiGateway {
    /// Explicitly constructed context - all collaborators are injected, no
    /// ambient globals.
    pub fn new(cache: Arc<CacheEngine>, transport: Arc<dyn ProviderTransport>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            cache,
            limiter: Arc::new(RateLimiter::new(RateLimitRule::default())),
            retry: RetryPolicy::default(),
            transformer: Arc::new(SchemaTransformer::new()),
            fallbacks: Arc::new(FallbackRegistry::new()),
            transport,
            stats: ApiStatsTracker::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn transformer(&self) -> &Arc<SchemaTransformer> {
        &self.transformer
    }

    pub fn fallbacks(&self) -> &Arc<FallbackRegistry> {
        &self.fallbacks
    }

    /// Register a provider. Called once at startup per provider;
    /// re-registration overwrites. Per-endpoint rate-limit overrides are
    /// applied to the limiter immediately.
    pub fn register_provider(&self, config: ProviderConfig) -> GatewayResult<()> {
        config.validate()?;

        for (endpoint, rule) in &config.rate_limits.per_endpoint {
            self.limiter
                .configure(&limit_key(&config.name, endpoint), *rule);
        }

        log::info!(
            "Registered provider {} ({}, priority {})",
            config.name,
            config.base_url,
            config.priority
        );
        self.providers
            .write()
            .insert(config.name.clone(), config);
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<ProviderConfig> {
        self.providers.read().get(name).cloned()
    }

    /// Stats plus rate-limit windows, the shape dashboards consume.
    pub fn diagnostics(&self) -> GatewayDiagnostics {
        GatewayDiagnostics {
            stats: self.stats.snapshot(),
            rate_limits: self.limiter.status(),
        }
    }

    /// Single entry point. Fast path: cache hit or a rate-limit verdict.
    /// Slow path: primary provider under the retry policy, then the fallback
    /// chain, then the mock generator, then a terminal structured error.
    pub async fn request(
        &self,
        endpoint: &str,
        provider: &str,
        params: Value,
        options: RequestOptions,
    ) -> GatewayResult<GatewayResponse> {
        let started = Instant::now();
        let key = cache_key(provider, endpoint, &params, options.tag.as_deref());

        // CheckCache
        if !options.bypass_cache {
            if let Some(data) = self.cache.get(&key).await? {
                self.stats.record_cache_hit();
                return Ok(GatewayResponse {
                    data,
                    source: provider.to_string(),
                    from_cache: true,
                    is_mock: false,
                    fallback_from: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        let config = self.provider(provider).ok_or_else(|| {
            GatewayError::Configuration(format!("Provider {} is not registered", provider))
        })?;

        // CheckRateLimit
        let lkey = limit_key(provider, endpoint);
        self.ensure_window(&config, endpoint, &lkey);
        if !self.limiter.allow(&lkey) {
            log::warn!("Rate limit blocked {} on {}, trying fallback", provider, endpoint);
            // On an exhausted chain the block survives as the terminal
            // error's last_error
            let blocked = self.rate_limit_error(endpoint, &lkey);
            return self
                .try_fallback(endpoint, provider, &params, &key, &options, started, &blocked)
                .await;
        }
        self.limiter.record_attempt(&lkey);

        // CallPrimary with RetryPolicy
        let primary = self
            .retry
            .execute(endpoint, options.deadline, || {
                self.call_provider(&config, endpoint, &params)
            })
            .await;

        match primary {
            Ok(fetched) => {
                self.write_back(&key, &fetched.data, &options).await;
                Ok(GatewayResponse {
                    data: fetched.data,
                    source: provider.to_string(),
                    from_cache: false,
                    is_mock: false,
                    fallback_from: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(err) => {
                log::warn!(
                    "Primary provider {} exhausted on {}: {}",
                    provider,
                    endpoint,
                    err
                );
                self.try_fallback(endpoint, provider, &params, &key, &options, started, &err)
                    .await
            }
        }
    }

    /// Walk the fallback chain: alternates in configured order (failed
    /// primary excluded, params transformed into each alternate's schema,
    /// responses transformed back), then the mock generator as last resort.
    /// The request deadline bounds the walk the same way it bounds the
    /// primary call.
    #[allow(clippy::too_many_arguments)]
    async fn try_fallback(
        &self,
        endpoint: &str,
        primary: &str,
        params: &Value,
        key: &str,
        options: &RequestOptions,
        started: Instant,
        primary_err: &GatewayError,
    ) -> GatewayResult<GatewayResponse> {
        let mut attempted = vec![primary.to_string()];
        let mut last_error = primary_err.to_string();

        let alternates = self.fallbacks.providers_for(endpoint, primary);
        if !alternates.is_empty() {
            self.stats.record_fallback();
        }

        for alt in alternates {
            self.check_deadline(endpoint, options.deadline)?;

            let config = match self.provider(&alt) {
                Some(config) => config,
                None => {
                    log::warn!("Fallback provider {} is not registered, skipping", alt);
                    continue;
                }
            };

            let lkey = limit_key(&alt, endpoint);
            self.ensure_window(&config, endpoint, &lkey);
            if !self.limiter.allow(&lkey) {
                log::debug!("Fallback provider {} rate-limited on {}", alt, endpoint);
                attempted.push(alt);
                last_error = format!("{} rate-limited locally", endpoint);
                continue;
            }
            self.limiter.record_attempt(&lkey);

            let alt_params = self
                .transformer
                .transform(primary, &alt, params.clone());

            let outcome = match options.deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(
                        remaining,
                        self.call_provider(&config, endpoint, &alt_params),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => return Err(deadline_error(endpoint, d)),
                    }
                }
                None => self.call_provider(&config, endpoint, &alt_params).await,
            };

            match outcome {
                Ok(fetched) => {
                    // Callers only ever see the primary provider's shape
                    let data = self.transformer.transform(&alt, primary, fetched.data);
                    self.write_back(key, &data, options).await;
                    log::info!(
                        "Fallback {} served {} after {} failed",
                        alt,
                        endpoint,
                        primary
                    );
                    return Ok(GatewayResponse {
                        data,
                        source: alt,
                        from_cache: false,
                        is_mock: false,
                        fallback_from: Some(primary.to_string()),
                        latency_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    log::warn!("Fallback provider {} failed on {}: {}", alt, endpoint, e);
                    last_error = e.to_string();
                    attempted.push(alt);
                }
            }
        }

        // TryMock
        self.check_deadline(endpoint, options.deadline)?;
        if let Some(spec) = self.fallbacks.get(endpoint) {
            if let Some(mock) = spec.mock {
                log::warn!(
                    "All providers failed for {}, serving synthetic data",
                    endpoint
                );
                self.stats.record_mock_response();
                return Ok(GatewayResponse {
                    data: mock(params),
                    source: "mock".to_string(),
                    from_cache: false,
                    is_mock: true,
                    fallback_from: Some(primary.to_string()),
                    latency_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        Err(GatewayError::AllProvidersFailed {
            endpoint: endpoint.to_string(),
            attempted,
            last_error,
        })
    }

    /// One durable external call, with per-provider metrics on both sides.
    async fn call_provider(
        &self,
        config: &ProviderConfig,
        endpoint: &str,
        params: &Value,
    ) -> GatewayResult<FetchResponse> {
        self.stats.record_request(&config.name);
        let started = Instant::now();

        match self.transport.fetch(config, endpoint, params).await {
            Ok(fetched) => {
                self.stats.record_success(
                    &config.name,
                    started.elapsed().as_millis() as u64,
                    fetched.status,
                );
                Ok(fetched)
            }
            Err(e) => {
                let status = match &e {
                    GatewayError::Network(NetworkError::HttpStatusError { status, .. }) => {
                        Some(*status)
                    }
                    _ => None,
                };
                self.stats.record_error(&config.name, status);
                Err(e)
            }
        }
    }

    /// Cache write-back is best-effort: a failed store never fails a request
    /// that already has data in hand.
    async fn write_back(&self, key: &str, data: &Value, options: &RequestOptions) {
        let ttl = options
            .ttl_secs
            .unwrap_or(self.cache.config().default_ttl_secs);
        if let Err(e) = self
            .cache
            .set(key, data, ttl, options.tag.as_deref())
            .await
        {
            log::warn!("Cache write-back for {} failed: {}", key, e);
        }
    }

    /// Lazily create this endpoint's rate-limit window from the provider's
    /// configured rules (per-endpoint override first, then its global rule).
    fn ensure_window(&self, config: &ProviderConfig, endpoint: &str, lkey: &str) {
        if self.limiter.endpoint_status(lkey).is_some() {
            return;
        }
        let rule = config
            .rate_limits
            .per_endpoint
            .get(endpoint)
            .copied()
            .or(config.rate_limits.global);
        if let Some(rule) = rule {
            self.limiter.configure(lkey, rule);
        }
    }

    fn check_deadline(&self, endpoint: &str, deadline: Option<Instant>) -> GatewayResult<()> {
        match deadline {
            Some(d) if Instant::now() >= d => Err(deadline_error(endpoint, d)),
            _ => Ok(()),
        }
    }

    fn rate_limit_error(&self, endpoint: &str, lkey: &str) -> GatewayError {
        let status = self.limiter.endpoint_status(lkey);
        GatewayError::RateLimitExceeded {
            endpoint: endpoint.to_string(),
            max_requests: status.as_ref().map(|s| s.max).unwrap_or_default(),
            resets_in_ms: status.map(|s| s.resets_in_ms).unwrap_or_default(),
        }
    }
}

fn limit_key(provider: &str, endpoint: &str) -> String {
    format!("{}:{}", provider, endpoint)
}

fn deadline_error(endpoint: &str, deadline: Instant) -> GatewayError {
    GatewayError::Timeout {
        endpoint: endpoint.to_string(),
        timeout_ms: deadline.elapsed().as_millis() as u64,
    }
}
