//! Demo wiring for the data-access layer: two rune-index providers with a
//! fallback chain and a mock generator, a three-tier cache, and one request
//! followed by a diagnostics dump.

use anyhow::Result;
use runelens::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Tiers: memory -> sqlite -> JSON file, fastest first
    let store = TieredStore::new(vec![
        Arc::new(MemoryBackend::new(500)) as Arc<dyn StorageBackend>,
        Arc::new(SqliteBackend::open("runelens-cache.db")?),
        Arc::new(FileBackend::open("runelens-fallback.json")),
    ])?;
    let cache = Arc::new(CacheEngine::new(store, CacheConfig::market_data())?);
    let _sweeper = cache.spawn_sweeper();

    let gateway = ApiGateway::new(cache, Arc::new(HttpTransport::new()));
    let _limit_sweeper = gateway
        .rate_limiter()
        .spawn_sweeper(std::time::Duration::from_secs(30));

    gateway.register_provider(
        ProviderConfig::new("ordiscan", "https://api.ordiscan.com")
            .with_priority(0)
            .with_global_rate_limit(RateLimitRule::per_minute(60)),
    )?;
    gateway.register_provider(
        ProviderConfig::new("geniidata", "https://api.geniidata.com")
            .with_priority(1)
            .with_global_rate_limit(RateLimitRule::per_minute(30)),
    )?;

    gateway.fallbacks().register(
        FallbackSpec::new("/v1/rune-list", vec!["ordiscan", "geniidata"]).with_mock(|_| {
            json!({
                "runes": [
                    {"name": "UNCOMMONGOODS", "price_sats": 0, "synthetic": true}
                ]
            })
        }),
    );
    gateway.transformer().register("geniidata", "ordiscan", |v| {
        // geniidata nests its rows under data.list; flatten to ordiscan's shape
        Ok(json!({ "runes": v["data"]["list"].clone() }))
    });

    let options = RequestOptions {
        ttl_secs: Some(120),
        tag: Some("runes".to_string()),
        ..Default::default()
    };

    match gateway
        .request("/v1/rune-list", "ordiscan", json!({"page": 1}), options)
        .await
    {
        Ok(response) => {
            log::info!(
                "source={} from_cache={} is_mock={} latency={}ms",
                response.source,
                response.from_cache,
                response.is_mock,
                response.latency_ms
            );
            println!("{}", serde_json::to_string_pretty(&response.data)?);
        }
        Err(e) => log::error!("Request failed: {}", e),
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&gateway.diagnostics())?
    );
    Ok(())
}
