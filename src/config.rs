// src/config.rs

use crate::logging::DEFAULT_SUPPRESSED_ERRORS;
use crate::matcher::WatchList;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Public certstream service used when no endpoint is configured
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://certstream.calidog.io/";

/// Fixed keepalive ping cadence
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CertstreamConfig {
    pub url: String,
    pub reconnect_timeout_secs: u64,
    pub max_reconnect_timeout_secs: u64,
    pub no_backoff: bool,
    pub buffer_size: usize,
    pub workers: usize,
    pub connect_timeout_secs: u64,
}

impl Default for CertstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WEBSOCKET_URL.to_string(),
            reconnect_timeout_secs: 1,
            max_reconnect_timeout_secs: 300,
            no_backoff: false,
            buffer_size: 50_000,
            workers: 4,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WatchlistConfig {
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub api_token: Option<String>,
    /// HMAC-SHA256 signing key for the request body
    pub secret: Option<String>,
    pub timeout_secs: u64,
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_token: None,
            secret: None,
            timeout_secs: 10,
            workers: 4,
            queue_size: 10_000,
        }
    }
}

impl WebhookConfig {
    pub fn is_enabled(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    pub fn has_api_token(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatsConfig {
    /// 0 disables periodic reporting
    pub interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub suppressed_errors: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            suppressed_errors: DEFAULT_SUPPRESSED_ERRORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub certstream: CertstreamConfig,
    pub watchlist: WatchlistConfig,
    pub webhook: WebhookConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(contents).context("Failed to parse config")?;
        Ok(cfg)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// Empty values are ignored, as are numbers that fail to parse.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("CERTSTREAM_URL") {
            self.certstream.url = url;
        }
        if let Some(domains) = get("TARGET_DOMAINS") {
            self.watchlist.domains = split_domains(&domains);
        }
        if let Some(url) = get("WEBHOOK_URL") {
            self.webhook.url = Some(url);
        }
        if let Some(token) = get("API_TOKEN") {
            self.webhook.api_token = Some(token);
        }
        if let Some(flag) = get("NO_BACKOFF") {
            self.certstream.no_backoff = flag == "true" || flag == "1";
        }
        if let Some(size) = get("BUFFER_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.certstream.buffer_size = size;
        }
        if let Some(workers) = get("WORKERS").and_then(|v| v.trim().parse().ok()) {
            self.certstream.workers = workers;
        }
        if let Some(interval) = get("STATS_INTERVAL").and_then(|v| v.trim().parse().ok()) {
            self.stats.interval_secs = interval;
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let ws = url::Url::parse(&self.certstream.url)
            .with_context(|| format!("Invalid certstream URL '{}'", self.certstream.url))?;
        if ws.scheme() != "ws" && ws.scheme() != "wss" {
            anyhow::bail!("Certstream URL must use ws:// or wss://, got '{}'", self.certstream.url);
        }

        if self.certstream.workers == 0 {
            anyhow::bail!("certstream.workers must be at least 1");
        }
        if self.certstream.buffer_size == 0 {
            anyhow::bail!("certstream.buffer_size must be at least 1");
        }
        if self.certstream.max_reconnect_timeout_secs < self.certstream.reconnect_timeout_secs {
            anyhow::bail!(
                "certstream.max_reconnect_timeout_secs ({}) is lower than reconnect_timeout_secs ({})",
                self.certstream.max_reconnect_timeout_secs,
                self.certstream.reconnect_timeout_secs
            );
        }
        if self.certstream.connect_timeout_secs == 0 {
            anyhow::bail!("certstream.connect_timeout_secs must be at least 1");
        }

        if let Some(ref hook) = self.webhook.url {
            if !hook.trim().is_empty() {
                let parsed = url::Url::parse(hook)
                    .with_context(|| format!("Invalid webhook URL '{}'", hook))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    anyhow::bail!("Webhook URL must use http:// or https://, got '{}'", hook);
                }
            }
        }
        if self.webhook.workers == 0 || self.webhook.queue_size == 0 {
            anyhow::bail!("webhook.workers and webhook.queue_size must be at least 1");
        }

        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.interval_secs)
    }
}

/// Split a comma and/or whitespace separated domain list.
pub fn split_domains(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Frozen settings of one monitor instance, shared read-only by every
/// pipeline component.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub websocket_url: String,
    pub watchlist: WatchList,
    pub reconnect_timeout: Duration,
    pub max_reconnect_timeout: Duration,
    pub disable_backoff: bool,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Capacity of the raw message queue
    pub ingest_buffer_size: usize,
    /// Capacity of the event channel
    pub event_buffer_size: usize,
    pub worker_count: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MonitorConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let cs = &cfg.certstream;
        Self {
            websocket_url: cs.url.clone(),
            watchlist: WatchList::new(&cfg.watchlist.domains),
            reconnect_timeout: Duration::from_secs(cs.reconnect_timeout_secs),
            max_reconnect_timeout: Duration::from_secs(cs.max_reconnect_timeout_secs),
            disable_backoff: cs.no_backoff,
            connect_timeout: Duration::from_secs(cs.connect_timeout_secs),
            keepalive_interval: KEEPALIVE_INTERVAL,
            ingest_buffer_size: cs.buffer_size.saturating_mul(3).max(1),
            event_buffer_size: cs.buffer_size.max(1),
            worker_count: cs.workers.max(1),
        }
    }
}
