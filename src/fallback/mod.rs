/// Per-endpoint fallback chains and synthetic-data generators
///
/// Registered once at startup, consulted read-only per request. When the
/// primary provider (or its rate limit) blocks progress, the gateway walks
/// the configured alternates in order; the optional mock generator is the
/// very last resort and its output is flagged synthetic downstream.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces synthetic payloads from the (primary-schema) request params.
pub type MockGeneratorFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct FallbackSpec {
    pub endpoint: String,
    /// Alternate providers in preference order
    pub providers: Vec<String>,
    pub mock: Option<MockGeneratorFn>,
}

impl FallbackSpec {
    pub fn new(endpoint: &str, providers: Vec<&str>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            providers: providers.into_iter().map(str::to_string).collect(),
            mock: None,
        }
    }

    pub fn with_mock<F>(mut self, mock: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.mock = Some(Arc::new(mock));
        self
    }
}

#[derive(Default)]
pub struct FallbackRegistry {
    specs: RwLock<HashMap<String, FallbackSpec>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the fallback chain for an endpoint.
    pub fn register(&self, spec: FallbackSpec) {
        let mut specs = self.specs.write();
        specs.insert(spec.endpoint.clone(), spec);
    }

    pub fn get(&self, endpoint: &str) -> Option<FallbackSpec> {
        self.specs.read().get(endpoint).cloned()
    }

    /// Alternates for `endpoint` in order, excluding the provider that
    /// already failed.
    pub fn providers_for(&self, endpoint: &str, exclude: &str) -> Vec<String> {
        self.get(endpoint)
            .map(|spec| {
                spec.providers
                    .into_iter()
                    .filter(|p| p != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }
}
