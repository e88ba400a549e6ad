/// HTTP transport behind the gateway's provider calls
///
/// The trait is the seam tests use to inject scripted providers; production
/// uses [`HttpTransport`] over a shared reqwest client. Request params are
/// sent as query-string pairs; responses must be JSON.

use crate::errors::{GatewayError, GatewayResult, NetworkError};
use crate::gateway::ProviderConfig;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;

/// What came back from a provider call
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub data: Value,
    pub status: u16,
}

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn fetch(
        &self,
        provider: &ProviderConfig,
        endpoint: &str,
        params: &Value,
    ) -> GatewayResult<FetchResponse>;
}

// One client for the whole process; per-request timeouts come from the
// provider config
static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

#[derive(Debug, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Flatten a JSON params object into query pairs. Non-object params are sent
/// as a single `params` value.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    match params {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![("params".to_string(), other.to_string())],
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn fetch(
        &self,
        provider: &ProviderConfig,
        endpoint: &str,
        params: &Value,
    ) -> GatewayResult<FetchResponse> {
        let url = format!(
            "{}{}",
            provider.base_url.trim_end_matches('/'),
            endpoint
        );

        let response = HTTP_CLIENT
            .get(&url)
            .query(&query_pairs(params))
            .timeout(provider.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        endpoint: url.clone(),
                        timeout_ms: provider.timeout.as_millis() as u64,
                    }
                } else {
                    GatewayError::Network(NetworkError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    })
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.ok().map(|b| {
                // Keep error payloads log-sized
                b.chars().take(256).collect::<String>()
            });
            return Err(GatewayError::Network(NetworkError::HttpStatusError {
                endpoint: url,
                status,
                body,
            }));
        }

        let data: Value = response.json().await.map_err(|e| {
            GatewayError::Network(NetworkError::InvalidResponseBody {
                endpoint: url,
                reason: e.to_string(),
            })
        })?;

        Ok(FetchResponse { data, status })
    }
}
