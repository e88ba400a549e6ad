/// Structured error handling for the data-access layer
///
/// Every failure surfaced to a caller is a `GatewayError` value - nothing in
/// the library panics on bad upstream data. The taxonomy mirrors how errors
/// are handled: transient transport failures are retried locally, rate-limit
/// blocks trigger the fallback chain, and `AllProvidersFailed` is terminal.

pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// MAIN ERROR TYPE
// =============================================================================

#[derive(Debug, Clone)]
pub enum GatewayError {
    // Transport-level failures (retryable)
    Network(NetworkError),

    // Deadline or per-request timeout expired (retryable)
    Timeout {
        endpoint: String,
        timeout_ms: u64,
    },

    // Local rate limiter rejected the request - not retryable locally,
    // triggers the fallback chain instead
    RateLimitExceeded {
        endpoint: String,
        max_requests: u32,
        resets_in_ms: u64,
    },

    // Terminal: primary and every configured fallback failed
    AllProvidersFailed {
        endpoint: String,
        attempted: Vec<String>,
        last_error: String,
    },

    // Cache entry corruption - the entry is dropped and treated as a miss
    Decompression {
        key: String,
        reason: String,
    },

    // Storage backend failures (tier I/O)
    Storage {
        backend: String,
        reason: String,
    },

    // Payload (de)serialization failures
    Serialization(String),

    // Invalid configuration rejected at construction time
    Configuration(String),
}

impl GatewayError {
    /// Whether the retry policy should attempt this operation again.
    ///
    /// Only transport-level failures are transient; everything else either
    /// escalates to fallback (rate limits) or is terminal for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::Timeout { .. }
        )
    }

    /// Short stable tag for metrics and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Network(_) => "network",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::RateLimitExceeded { .. } => "rate_limit",
            GatewayError::AllProvidersFailed { .. } => "all_providers_failed",
            GatewayError::Decompression { .. } => "decompression",
            GatewayError::Storage { .. } => "storage",
            GatewayError::Serialization(_) => "serialization",
            GatewayError::Configuration(_) => "configuration",
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Network(e) => write!(f, "Network Error: {}", e),
            GatewayError::Timeout {
                endpoint,
                timeout_ms,
            } => {
                write!(f, "Timeout after {}ms calling {}", timeout_ms, endpoint)
            }
            GatewayError::RateLimitExceeded {
                endpoint,
                max_requests,
                resets_in_ms,
            } => {
                write!(
                    f,
                    "Rate limit exceeded for {} ({} req/window, resets in {}ms)",
                    endpoint, max_requests, resets_in_ms
                )
            }
            GatewayError::AllProvidersFailed {
                endpoint,
                attempted,
                last_error,
            } => {
                write!(
                    f,
                    "All providers failed for {} (tried: {}): {}",
                    endpoint,
                    attempted.join(", "),
                    last_error
                )
            }
            GatewayError::Decompression { key, reason } => {
                write!(f, "Failed to decompress cache entry {}: {}", key, reason)
            }
            GatewayError::Storage { backend, reason } => {
                write!(f, "Storage backend {} failed: {}", backend, reason)
            }
            GatewayError::Serialization(msg) => write!(f, "Serialization Error: {}", msg),
            GatewayError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

// =============================================================================
// NETWORK ERROR TYPES
// =============================================================================

#[derive(Debug, Clone)]
pub enum NetworkError {
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },
    HttpStatusError {
        endpoint: String,
        status: u16,
        body: Option<String>,
    },
    InvalidResponseBody {
        endpoint: String,
        reason: String,
    },
    Generic {
        message: String,
    },
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::ConnectionFailed { endpoint, reason } => {
                write!(f, "Connection to {} failed: {}", endpoint, reason)
            }
            NetworkError::HttpStatusError {
                endpoint,
                status,
                body,
            } => {
                write!(
                    f,
                    "HTTP {} from {}: {}",
                    status,
                    endpoint,
                    body.as_deref().unwrap_or("No body")
                )
            }
            NetworkError::InvalidResponseBody { endpoint, reason } => {
                write!(f, "Invalid response body from {}: {}", endpoint, reason)
            }
            NetworkError::Generic { message } => write!(f, "{}", message),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl From<NetworkError> for GatewayError {
    fn from(e: NetworkError) -> Self {
        GatewayError::Network(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let net = GatewayError::Network(NetworkError::Generic {
            message: "reset by peer".to_string(),
        });
        assert!(net.is_retryable());

        let timeout = GatewayError::Timeout {
            endpoint: "/runes/list".to_string(),
            timeout_ms: 5000,
        };
        assert!(timeout.is_retryable());

        let limited = GatewayError::RateLimitExceeded {
            endpoint: "/runes/list".to_string(),
            max_requests: 60,
            resets_in_ms: 1200,
        };
        assert!(!limited.is_retryable());

        let terminal = GatewayError::AllProvidersFailed {
            endpoint: "/runes/list".to_string(),
            attempted: vec!["ordiscan".to_string()],
            last_error: "HTTP 503".to_string(),
        };
        assert!(!terminal.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = GatewayError::AllProvidersFailed {
            endpoint: "/runes/list".to_string(),
            attempted: vec!["ordiscan".to_string(), "geniidata".to_string()],
            last_error: "HTTP 502".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/runes/list"));
        assert!(msg.contains("ordiscan, geniidata"));
        assert!(msg.contains("HTTP 502"));
    }
}
