//! Environment-driven settings for the well-known sources.
//!
//! Every variable carries the `OPENTERM_` prefix and falls back to a default
//! when unset. Malformed values are rejected with a [`ConfigError`] naming the
//! offending variable instead of being silently replaced.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::source::SourceId;

pub const ENV_PREFIX: &str = "OPENTERM_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be a boolean (true/false/1/0/yes/no/on/off), got '{value}'")]
    InvalidBool { var: String, value: String },

    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: String, value: String },

    #[error("{var} allows less than one request per minute, got '{value}'")]
    QuotaTooLow { var: String, value: String },

    #[error("{var} contains control characters and cannot be sent as a header")]
    InvalidHeader { var: String },

    #[error("unknown source '{value}'")]
    UnknownSource { value: String },
}

/// Feature flags surfaced in the health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub enable_stooq: bool,
    pub enable_yahoo: bool,
    pub enable_edgar: bool,
    pub enable_fred: bool,
    pub enable_news: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceSettings {
    pub enable_stooq: bool,
    pub enable_yahoo: bool,
    pub enable_edgar: bool,
    pub enable_fred: bool,
    /// Gates the news source (finnhub).
    pub enable_news: bool,
    pub stooq_rpm: u32,
    /// Yahoo's quota is expressed per hour.
    pub yahoo_rph: u32,
    /// SEC EDGAR's quota is expressed per second.
    pub edgar_rps: u32,
    pub fred_rpm: u32,
    pub finnhub_rpm: u32,
    pub max_wait: Duration,
    pub request_timeout: Duration,
    pub sec_user_agent: String,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            enable_stooq: true,
            enable_yahoo: true,
            enable_edgar: true,
            enable_fred: true,
            enable_news: true,
            stooq_rpm: 60,
            yahoo_rph: 100,
            edgar_rps: 8,
            fred_rpm: 100,
            finnhub_rpm: 50,
            max_wait: Duration::from_secs(30),
            request_timeout: Duration::from_millis(30_000),
            sec_user_agent: String::from("OpenTerm/0.1 (openterm@example.com)"),
        }
    }
}

impl ResilienceSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which receives full variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();

        let settings = Self {
            enable_stooq: env.flag("ENABLE_STOOQ", defaults.enable_stooq)?,
            enable_yahoo: env.flag("ENABLE_YAHOO", defaults.enable_yahoo)?,
            enable_edgar: env.flag("ENABLE_EDGAR", defaults.enable_edgar)?,
            enable_fred: env.flag("ENABLE_FRED", defaults.enable_fred)?,
            enable_news: env.flag("ENABLE_NEWS", defaults.enable_news)?,
            stooq_rpm: env.positive("STOOQ_RPM", defaults.stooq_rpm)?,
            yahoo_rph: env.positive("YAHOO_RPH", defaults.yahoo_rph)?,
            edgar_rps: env.positive("EDGAR_RPS", defaults.edgar_rps)?,
            fred_rpm: env.positive("FRED_RPM", defaults.fred_rpm)?,
            finnhub_rpm: env.positive("FINNHUB_RPM", defaults.finnhub_rpm)?,
            max_wait: Duration::from_secs(env.positive(
                "RATE_LIMIT_MAX_WAIT_SECS",
                defaults.max_wait.as_secs(),
            )?),
            request_timeout: Duration::from_millis(env.positive(
                "REQUEST_TIMEOUT_MS",
                u64::try_from(defaults.request_timeout.as_millis()).unwrap_or(u64::MAX),
            )?),
            sec_user_agent: env.header("SEC_USER_AGENT")?.unwrap_or(defaults.sec_user_agent),
        };
        settings.check_quotas()?;
        Ok(settings)
    }

    /// A bucket below one token per minute could never admit a request.
    fn check_quotas(&self) -> Result<(), ConfigError> {
        for source in SourceId::ALL {
            if self.requests_per_minute(source) < 1.0 {
                let (key, value) = self.quota_setting(source);
                return Err(ConfigError::QuotaTooLow {
                    var: format!("{ENV_PREFIX}{key}"),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    const fn quota_setting(&self, source: SourceId) -> (&'static str, u32) {
        match source {
            SourceId::Stooq => ("STOOQ_RPM", self.stooq_rpm),
            SourceId::YahooFinance => ("YAHOO_RPH", self.yahoo_rph),
            SourceId::SecEdgar => ("EDGAR_RPS", self.edgar_rps),
            SourceId::Fred => ("FRED_RPM", self.fred_rpm),
            SourceId::Finnhub => ("FINNHUB_RPM", self.finnhub_rpm),
        }
    }

    pub const fn is_enabled(&self, source: SourceId) -> bool {
        match source {
            SourceId::Stooq => self.enable_stooq,
            SourceId::YahooFinance => self.enable_yahoo,
            SourceId::SecEdgar => self.enable_edgar,
            SourceId::Fred => self.enable_fred,
            SourceId::Finnhub => self.enable_news,
        }
    }

    /// Quota normalized to requests per minute.
    pub fn requests_per_minute(&self, source: SourceId) -> f64 {
        match source {
            SourceId::Stooq => f64::from(self.stooq_rpm),
            SourceId::YahooFinance => f64::from(self.yahoo_rph) / 60.0,
            SourceId::SecEdgar => f64::from(self.edgar_rps) * 60.0,
            SourceId::Fred => f64::from(self.fred_rpm),
            SourceId::Finnhub => f64::from(self.finnhub_rpm),
        }
    }

    /// Registry-level breaker policy. Yahoo trips sooner and recovers slower.
    pub fn circuit_policy(&self, source: SourceId) -> CircuitBreakerConfig {
        match source {
            SourceId::Stooq | SourceId::SecEdgar => {
                CircuitBreakerConfig::new(5, Duration::from_secs(60))
            }
            SourceId::YahooFinance => CircuitBreakerConfig::new(3, Duration::from_secs(120)),
            SourceId::Fred | SourceId::Finnhub => CircuitBreakerConfig::default(),
        }
    }

    pub const fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags {
            enable_stooq: self.enable_stooq,
            enable_yahoo: self.enable_yahoo,
            enable_edgar: self.enable_edgar,
            enable_fred: self.enable_fred,
            enable_news: self.enable_news,
        }
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(&format!("{ENV_PREFIX}{key}"))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                var: format!("{ENV_PREFIX}{key}"),
                value,
            }),
        }
    }

    /// Non-blank value usable as an HTTP header.
    fn header(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let Some(value) = self.raw(key).filter(|value| !value.trim().is_empty()) else {
            return Ok(None);
        };
        if value.chars().any(|c| c.is_control() && c != '\t') {
            return Err(ConfigError::InvalidHeader {
                var: format!("{ENV_PREFIX}{key}"),
            });
        }
        Ok(Some(value))
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
    {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        match value.trim().parse::<T>() {
            Ok(parsed) if parsed != T::default() => Ok(parsed),
            _ => Err(ConfigError::InvalidNumber {
                var: format!("{ENV_PREFIX}{key}"),
                value,
            }),
        }
    }
}
