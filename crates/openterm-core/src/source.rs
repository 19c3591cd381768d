use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Well-known upstream data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Stooq,
    YahooFinance,
    SecEdgar,
    Fred,
    Finnhub,
}

impl SourceId {
    pub const ALL: [Self; 5] = [
        Self::Stooq,
        Self::YahooFinance,
        Self::SecEdgar,
        Self::Fred,
        Self::Finnhub,
    ];

    /// Sources that can serve prices; readiness needs at least one of them.
    pub const PRICE_SOURCES: [Self; 2] = [Self::Stooq, Self::YahooFinance];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stooq => "stooq",
            Self::YahooFinance => "yahoo_finance",
            Self::SecEdgar => "sec_edgar",
            Self::Fred => "fred",
            Self::Finnhub => "finnhub",
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stooq" => Ok(Self::Stooq),
            "yahoo_finance" | "yahoo" => Ok(Self::YahooFinance),
            "sec_edgar" | "edgar" => Ok(Self::SecEdgar),
            "fred" => Ok(Self::Fred),
            "finnhub" => Ok(Self::Finnhub),
            other => Err(ConfigError::UnknownSource {
                value: other.to_owned(),
            }),
        }
    }
}
