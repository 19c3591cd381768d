//! CLI argument definitions for OpenTerm.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sources` | List registered sources with quotas and breaker policy |
//! | `health` | Print the merged source health report |
//! | `ready` | Readiness probe; exits 1 when no price source is available |
//! | `probe` | Send one request to a source through the resilience layer |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--mock` | `false` | Use the offline transport instead of the network |
//!
//! Settings come from `OPENTERM_*` environment variables and logging from
//! `RUST_LOG` (`OPENTERM_LOG_FORMAT=json` switches to JSON logs on stderr).
//!
//! # Examples
//!
//! ```bash
//! openterm sources --pretty
//! OPENTERM_ENABLE_YAHOO=false openterm ready
//! openterm probe stooq "https://stooq.com/q/l/?s=aapl.us&i=d"
//! ```

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "openterm",
    author,
    version,
    about = "Source health and resilience tooling for OpenTerm market data adapters"
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Answer requests from the offline transport (no network access).
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List registered sources, their quotas and breaker policies.
    Sources,

    /// Print per-source stats, degraded sources and feature flags.
    Health,

    /// Report readiness. Exits with status 1 when not ready.
    Ready,

    /// Send one GET request through the rate limiter, breakers and retry.
    ///
    /// # Examples
    ///
    ///   openterm probe stooq "https://stooq.com/q/l/?s=aapl.us&i=d"
    ///   openterm probe sec_edgar https://data.sec.gov/submissions/CIK0000320193.json
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Source name (stooq, yahoo_finance, sec_edgar, fred, finnhub).
    pub source: String,

    /// URL to request.
    pub url: String,

    /// Override the request timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Retries after the first attempt.
    #[arg(long, default_value_t = 2)]
    pub retries: u32,
}
