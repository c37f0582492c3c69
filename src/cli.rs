// src/cli.rs
use crate::config::{Config, split_domains};
use clap::Parser;
use std::path::PathBuf;

/// certstream-monitor: Certificate Transparency stream monitor
///
/// Watch the certstream feed for certificates covering your domains and
/// forward matches to a webhook.
#[derive(Parser, Debug, Clone)]
#[command(name = "certstream-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // ===== Input & Configuration =====
    /// Domains to watch (comma or space separated; overrides TARGET_DOMAINS)
    #[arg(value_name = "DOMAIN")]
    pub domains: Vec<String>,

    /// Path to TOML config file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    // ===== Output Format =====
    /// Output events in JSONL format to stdout
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Output only the matched domains, one per line
    #[arg(long = "urls-only")]
    pub urls_only: bool,

    // ===== Connection =====
    /// Base reconnection timeout in seconds
    #[arg(long = "reconnect-timeout")]
    pub reconnect_timeout: Option<u64>,

    /// Maximum reconnection timeout in seconds
    #[arg(long = "max-reconnect")]
    pub max_reconnect: Option<u64>,

    /// Reconnect immediately instead of backing off
    #[arg(long = "no-backoff")]
    pub no_backoff: bool,

    // ===== Performance =====
    /// Internal event buffer size for high-volume streams
    #[arg(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Number of parallel decode workers
    #[arg(long = "workers")]
    pub workers: Option<usize>,

    // ===== Notifications =====
    /// Override webhook URL from config
    #[arg(long = "webhook")]
    pub webhook_url: Option<String>,

    /// Override webhook API token from config
    #[arg(long = "api-token")]
    pub api_token: Option<String>,

    // ===== Display & Statistics =====
    /// Log processing stats every N seconds (0 to disable)
    #[arg(long = "stats-interval")]
    pub stats_interval: Option<u64>,

    // ===== Logging =====
    /// Verbose output (debug logging, certificate details)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.json && self.urls_only {
            anyhow::bail!("Cannot specify multiple output formats. Choose one of: --json or --urls-only");
        }

        // Verbose and quiet are mutually exclusive
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        Ok(())
    }

    /// Determine the output format based on flags
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.urls_only {
            OutputFormat::UrlsOnly
        } else {
            OutputFormat::Human
        }
    }

    /// Positional domains, split on commas and whitespace
    pub fn watched_domains(&self) -> Vec<String> {
        self.domains.iter().flat_map(|d| split_domains(d)).collect()
    }

    /// Apply flag overrides on top of file and environment settings.
    pub fn apply_to(&self, cfg: &mut Config) {
        let domains = self.watched_domains();
        if !domains.is_empty() {
            cfg.watchlist.domains = domains;
        }
        if let Some(secs) = self.reconnect_timeout {
            cfg.certstream.reconnect_timeout_secs = secs;
        }
        if let Some(secs) = self.max_reconnect {
            cfg.certstream.max_reconnect_timeout_secs = secs;
        }
        if self.no_backoff {
            cfg.certstream.no_backoff = true;
        }
        if let Some(size) = self.buffer_size {
            cfg.certstream.buffer_size = size;
        }
        if let Some(workers) = self.workers {
            cfg.certstream.workers = workers;
        }
        if let Some(ref url) = self.webhook_url {
            cfg.webhook.url = Some(url.clone());
        }
        if let Some(ref token) = self.api_token {
            cfg.webhook.api_token = Some(token.clone());
        }
        if let Some(secs) = self.stats_interval {
            cfg.stats.interval_secs = secs;
        }
    }
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable colored text output (default)
    Human,
    /// JSON Lines format (one JSON object per line)
    Json,
    /// Matched domains only
    UrlsOnly,
}
