/// Gateway state-machine tests against scripted transports

use super::*;
use crate::cache::{CacheConfig, CacheEngine};
use crate::errors::{GatewayError, GatewayResult, NetworkError};
use crate::fallback::FallbackSpec;
use crate::storage::{MemoryBackend, StorageBackend, TieredStore};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transport where each provider either always succeeds with a fixed body or
/// always fails, while counting every call.
#[derive(Default)]
struct ScriptedTransport {
    responses: HashMap<String, Value>,
    calls: parking_lot::Mutex<HashMap<String, u64>>,
    total_calls: AtomicU64,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self::default()
    }

    fn succeed_with(mut self, provider: &str, body: Value) -> Self {
        self.responses.insert(provider.to_string(), body);
        self
    }

    fn calls_to(&self, provider: &str) -> u64 {
        self.calls.lock().get(provider).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderTransport for ScriptedTransport {
    async fn fetch(
        &self,
        provider: &ProviderConfig,
        _endpoint: &str,
        params: &Value,
    ) -> GatewayResult<FetchResponse> {
        *self.calls.lock().entry(provider.name.clone()).or_insert(0) += 1;
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        match self.responses.get(&provider.name) {
            Some(body) => {
                let mut data = body.clone();
                if let Value::Object(map) = &mut data {
                    map.insert("params_seen".to_string(), params.clone());
                }
                Ok(FetchResponse { data, status: 200 })
            }
            None => Err(GatewayError::Network(NetworkError::HttpStatusError {
                endpoint: provider.base_url.clone(),
                status: 503,
                body: Some("unavailable".to_string()),
            })),
        }
    }
}

fn memory_gateway(transport: Arc<ScriptedTransport>) -> ApiGateway {
    let store = TieredStore::new(vec![
        Arc::new(MemoryBackend::new(100)) as Arc<dyn StorageBackend>
    ])
    .unwrap();
    let cache = Arc::new(CacheEngine::new(store, CacheConfig::default()).unwrap());
    // Single attempt so failure tests don't wait on backoff
    ApiGateway::new(cache, transport).with_retry_policy(RetryPolicy::new(
        1,
        Duration::from_millis(1),
        Duration::from_millis(10),
    ))
}

fn register(gateway: &ApiGateway, name: &str) {
    gateway
        .register_provider(ProviderConfig::new(
            name,
            &format!("https://api.{}.test", name),
        ))
        .unwrap();
}

#[tokio::test]
async fn primary_success_is_cached_and_reused() {
    let transport = Arc::new(
        ScriptedTransport::new().succeed_with("ordiscan", json!({"runes": ["DOG", "PUPS"]})),
    );
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");

    let first = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.source, "ordiscan");
    assert_eq!(first.data["runes"], json!(["DOG", "PUPS"]));

    let second = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.data, first.data);

    // Exactly one upstream call despite two requests
    assert_eq!(transport.calls_to("ordiscan"), 1);

    let diag = gateway.diagnostics();
    assert_eq!(diag.stats.total_requests, 1);
    assert_eq!(diag.stats.total_cache_hits, 1);
}

#[tokio::test]
async fn fallback_walks_providers_in_order() {
    // A and B fail, C succeeds: the response's source must be C
    let transport = Arc::new(ScriptedTransport::new().succeed_with("c", json!({"ok": true})));
    let gateway = memory_gateway(transport.clone());
    for name in ["a", "b", "c"] {
        register(&gateway, name);
    }
    gateway
        .fallbacks()
        .register(FallbackSpec::new("/runes/market", vec!["a", "b", "c"]));

    let response = gateway
        .request("/runes/market", "a", json!({}), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.source, "c");
    assert_eq!(response.fallback_from, Some("a".to_string()));
    assert!(!response.is_mock);
    assert_eq!(transport.calls_to("a"), 1);
    assert_eq!(transport.calls_to("b"), 1);
    assert_eq!(transport.calls_to("c"), 1);
}

#[tokio::test]
async fn ordiscan_to_geniidata_scenario() {
    // The canonical flow: ordiscan down, geniidata serving, second call
    // cached with no extra provider traffic
    let transport = Arc::new(
        ScriptedTransport::new().succeed_with("geniidata", json!({"data": {"list": []}})),
    );
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");
    register(&gateway, "geniidata");
    gateway.fallbacks().register(FallbackSpec::new(
        "/runes/list",
        vec!["ordiscan", "geniidata"],
    ));

    let first = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(first.source, "geniidata");
    assert_eq!(first.fallback_from, Some("ordiscan".to_string()));
    assert!(!first.from_cache);

    let calls_before = transport.total_calls();
    let second = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(transport.total_calls(), calls_before);

    let diag = gateway.diagnostics();
    assert_eq!(diag.stats.total_fallbacks, 1);
    assert_eq!(diag.stats.total_cache_hits, 1);
}

#[tokio::test]
async fn params_are_transformed_per_direction() {
    let transport = Arc::new(
        ScriptedTransport::new().succeed_with("geniidata", json!({"data": {"list": [1, 2]}})),
    );
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");
    register(&gateway, "geniidata");
    gateway.fallbacks().register(FallbackSpec::new(
        "/runes/list",
        vec!["ordiscan", "geniidata"],
    ));

    // Request params: ordiscan's `page` becomes geniidata's `offset`
    gateway.transformer().register("ordiscan", "geniidata", |v| {
        Ok(json!({ "offset": v["page"].as_u64().unwrap_or(0) * 20 }))
    });
    // Response: geniidata's nested list becomes ordiscan's flat shape
    gateway.transformer().register("geniidata", "ordiscan", |v| {
        Ok(json!({ "runes": v["data"]["list"].clone() }))
    });

    let response = gateway
        .request(
            "/runes/list",
            "ordiscan",
            json!({"page": 2}),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    // The caller got the primary provider's schema back
    assert_eq!(response.data["runes"], json!([1, 2]));
    assert!(response.data.get("data").is_none());
}

#[tokio::test]
async fn mock_is_last_resort_and_flagged() {
    let transport = Arc::new(ScriptedTransport::new()); // everything fails
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");
    register(&gateway, "geniidata");
    gateway.fallbacks().register(
        FallbackSpec::new("/runes/list", vec!["ordiscan", "geniidata"])
            .with_mock(|_| json!({"runes": [], "synthetic": true})),
    );

    let response = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();

    assert!(response.is_mock);
    assert_eq!(response.source, "mock");
    assert_eq!(response.fallback_from, Some("ordiscan".to_string()));
    assert_eq!(response.data["synthetic"], json!(true));

    // Synthetic data is never cached
    let again = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert!(again.is_mock);
    assert!(!again.from_cache);
}

#[tokio::test]
async fn exhausted_chain_reports_all_attempts() {
    let transport = Arc::new(ScriptedTransport::new());
    let gateway = memory_gateway(transport);
    register(&gateway, "ordiscan");
    register(&gateway, "geniidata");
    gateway.fallbacks().register(FallbackSpec::new(
        "/runes/list",
        vec!["ordiscan", "geniidata"],
    ));

    let err = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap_err();

    match err {
        GatewayError::AllProvidersFailed {
            endpoint,
            attempted,
            last_error,
        } => {
            assert_eq!(endpoint, "/runes/list");
            assert_eq!(attempted, vec!["ordiscan", "geniidata"]);
            assert!(last_error.contains("503"));
        }
        other => panic!("expected AllProvidersFailed, got {}", other),
    }
}

#[tokio::test]
async fn rate_limit_block_falls_back_without_calling_primary() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .succeed_with("ordiscan", json!({"via": "primary"}))
            .succeed_with("geniidata", json!({"via": "fallback"})),
    );
    let gateway = memory_gateway(transport.clone());

    // Primary allows zero requests on this endpoint
    gateway
        .register_provider(
            ProviderConfig::new("ordiscan", "https://api.ordiscan.test")
                .with_endpoint_rate_limit(
                    "/runes/list",
                    RateLimitRule {
                        max_requests: 0,
                        interval: Duration::from_secs(60),
                    },
                ),
        )
        .unwrap();
    register(&gateway, "geniidata");
    gateway.fallbacks().register(FallbackSpec::new(
        "/runes/list",
        vec!["ordiscan", "geniidata"],
    ));

    let response = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.source, "geniidata");
    assert_eq!(transport.calls_to("ordiscan"), 0);
    assert_eq!(transport.calls_to("geniidata"), 1);
}

#[tokio::test]
async fn rate_limit_block_without_fallback_is_a_structured_error() {
    let transport = Arc::new(
        ScriptedTransport::new().succeed_with("ordiscan", json!({"via": "primary"})),
    );
    let gateway = memory_gateway(transport.clone());
    gateway
        .register_provider(
            ProviderConfig::new("ordiscan", "https://api.ordiscan.test")
                .with_endpoint_rate_limit(
                    "/runes/list",
                    RateLimitRule {
                        max_requests: 1,
                        interval: Duration::from_secs(60),
                    },
                ),
        )
        .unwrap();

    // First call consumes the window; bypass the cache so the second call
    // reaches the limiter
    gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();

    let err = gateway
        .request(
            "/runes/list",
            "ordiscan",
            json!({}),
            RequestOptions {
                bypass_cache: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    match err {
        GatewayError::AllProvidersFailed {
            endpoint,
            attempted,
            last_error,
        } => {
            assert_eq!(endpoint, "/runes/list");
            assert_eq!(attempted, vec!["ordiscan"]);
            // The local block survives as the terminal error's context
            assert!(last_error.contains("Rate limit exceeded"));
        }
        other => panic!("expected AllProvidersFailed, got {}", other),
    }
    assert_eq!(transport.calls_to("ordiscan"), 1);
}

#[tokio::test]
async fn expired_deadline_stops_the_fallback_walk() {
    let transport = Arc::new(
        ScriptedTransport::new().succeed_with("geniidata", json!({"ok": true})),
    );
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");
    register(&gateway, "geniidata");
    gateway.fallbacks().register(
        FallbackSpec::new("/runes/list", vec!["ordiscan", "geniidata"])
            .with_mock(|_| json!({"synthetic": true})),
    );

    // Deadline already in the past: neither the primary, the alternates nor
    // the mock may serve the request
    let err = gateway
        .request(
            "/runes/list",
            "ordiscan",
            json!({}),
            RequestOptions {
                deadline: Some(Instant::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout { .. }));
    assert_eq!(transport.calls_to("ordiscan"), 0);
    assert_eq!(transport.calls_to("geniidata"), 0);
}

#[tokio::test]
async fn bypass_cache_still_writes_back() {
    let transport =
        Arc::new(ScriptedTransport::new().succeed_with("ordiscan", json!({"n": 1})));
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");

    gateway
        .request(
            "/runes/list",
            "ordiscan",
            json!({}),
            RequestOptions {
                bypass_cache: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The write-back happened even though the read was bypassed
    let cached = gateway
        .request("/runes/list", "ordiscan", json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert!(cached.from_cache);
    assert_eq!(transport.calls_to("ordiscan"), 1);
}

#[tokio::test]
async fn tagged_requests_can_be_invalidated_as_a_group() {
    let transport =
        Arc::new(ScriptedTransport::new().succeed_with("ordiscan", json!({"n": 1})));
    let gateway = memory_gateway(transport.clone());
    register(&gateway, "ordiscan");

    let opts = RequestOptions {
        tag: Some("runes".to_string()),
        ..Default::default()
    };
    gateway
        .request("/runes/list", "ordiscan", json!({}), opts.clone())
        .await
        .unwrap();

    gateway.cache().invalidate_tag("runes").await.unwrap();

    let refetched = gateway
        .request("/runes/list", "ordiscan", json!({}), opts)
        .await
        .unwrap();
    assert!(!refetched.from_cache);
    assert_eq!(transport.calls_to("ordiscan"), 2);
}

#[tokio::test]
async fn unregistered_provider_is_a_configuration_error() {
    let gateway = memory_gateway(Arc::new(ScriptedTransport::new()));
    let err = gateway
        .request("/runes/list", "nobody", json!({}), RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));
}

#[test]
fn cache_key_format_is_stable() {
    let key = cache_key("ordiscan", "/runes/list", &json!({"page": 1}), None);
    assert_eq!(key, "ordiscan:/runes/list:{\"page\":1}");

    let tagged = cache_key("ordiscan", "/runes/list", &json!({}), Some("runes"));
    assert_eq!(tagged, "ordiscan:/runes/list:{}:runes");
}

#[tokio::test]
async fn provider_validation_rejects_bad_configs() {
    let gateway = memory_gateway(Arc::new(ScriptedTransport::new()));
    assert!(gateway
        .register_provider(ProviderConfig::new("", "https://x.test"))
        .is_err());
    assert!(gateway
        .register_provider(ProviderConfig::new("x", ""))
        .is_err());
    assert!(gateway
        .register_provider(
            ProviderConfig::new("x", "https://x.test").with_timeout(Duration::ZERO)
        )
        .is_err());
}
