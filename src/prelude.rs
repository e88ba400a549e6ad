// Common imports that are used throughout the project
pub use crate::cache::{CacheConfig, CacheEngine, CacheEntry, CacheMetrics};
pub use crate::compression::CompressionCodec;
pub use crate::errors::{GatewayError, GatewayResult, NetworkError};
pub use crate::fallback::{FallbackRegistry, FallbackSpec};
pub use crate::gateway::{
    ApiGateway, GatewayResponse, HttpTransport, ProviderConfig, ProviderTransport,
    RequestOptions,
};
pub use crate::ratelimit::{RateLimitRule, RateLimiter};
pub use crate::retry::RetryPolicy;
pub use crate::storage::{
    FileBackend, MemoryBackend, SqliteBackend, StorageBackend, TieredStore,
};
pub use crate::transform::SchemaTransformer;

pub use async_trait::async_trait;
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use serde_json::{json, Value};
pub use std::collections::HashMap;
pub use std::sync::Arc;
