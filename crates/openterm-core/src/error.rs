use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    CircuitOpen,
    UpstreamTimeout,
    Upstream,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::Upstream => "upstream",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the orchestration layer around an upstream source.
///
/// The primitives themselves (buckets, breakers, metrics) never fail; only
/// `acquire_or_wait`, the retry wrapper and [`SourceClient`](crate::SourceClient)
/// produce these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    #[error("rate limit exceeded for {provider}")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("circuit breaker open for {provider}")]
    CircuitOpen { provider: String },

    #[error("timeout waiting for {provider}")]
    UpstreamTimeout { provider: String },

    #[error("{provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
        retryable: bool,
    },
}

impl ResilienceError {
    pub fn rate_limited(provider: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after_secs,
        }
    }

    pub fn circuit_open(provider: impl Into<String>) -> Self {
        Self::CircuitOpen {
            provider: provider.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            provider: provider.into(),
        }
    }

    /// Transport failure without an HTTP status; treated as transient.
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    /// Non-2xx response. Only 5xx statuses are retryable.
    pub fn http_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: format!("HTTP {status}: {}", message.into()),
            status: Some(status),
            retryable: status >= 500,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            Self::Upstream { .. } => ErrorKind::Upstream,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::RateLimited { provider, .. }
            | Self::CircuitOpen { provider }
            | Self::UpstreamTimeout { provider }
            | Self::Upstream { provider, .. } => provider,
        }
    }

    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::CircuitOpen { .. } | Self::UpstreamTimeout { .. } => {
                true
            }
            Self::Upstream { retryable, .. } => *retryable,
        }
    }

    /// Suggested wait in seconds, for rate limit errors only.
    pub const fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::UpstreamTimeout { .. } => "SOURCE_TIMEOUT",
            Self::Upstream { .. } => "SOURCE_ERROR",
        }
    }

    /// HTTP status an API boundary should answer with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited { .. } => 429,
            Self::CircuitOpen { .. } => 503,
            Self::UpstreamTimeout { .. } => 504,
            Self::Upstream { .. } => 502,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            source: Some(self.provider().to_owned()),
            retryable: self.is_retryable(),
            retry_after_seconds: self.retry_after(),
        }
    }
}

/// Serializable error payload for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}
