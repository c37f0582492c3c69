// src/notifier.rs
use crate::config::WebhookConfig;
use crate::types::CertEvent;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Certstream-Signature";
pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Destination for per-domain match notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, event: &CertEvent, domain: &str, matched_with: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize, PartialEq)]
pub struct NotificationPayload<'a> {
    pub domain: &'a str,
    pub timestamp: DateTime<Utc>,
    pub cert_type: &'static str,
    pub common_name: &'a str,
    pub issuer: &'a str,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub all_domains: &'a [String],
    pub matched_with: &'a str,
}

impl<'a> NotificationPayload<'a> {
    pub fn new(event: &'a CertEvent, domain: &'a str, matched_with: &'a str) -> Self {
        let record = &event.record;
        Self {
            domain,
            timestamp: event.timestamp,
            cert_type: event.cert_type().as_str(),
            common_name: &record.common_name,
            issuer: &record.issuer,
            not_before: record.not_before_time(),
            not_after: record.not_after_time(),
            all_domains: &record.all_domains,
            matched_with,
        }
    }
}

/// HTTP POST webhook client
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
    api_token: Option<String>,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(cfg: &WebhookConfig) -> anyhow::Result<Self> {
        let url = cfg
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .context("Webhook URL is not configured")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(concat!("certstream-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            api_token: cfg.api_token.clone().filter(|t| !t.is_empty()),
            secret: cfg.secret.clone().filter(|s| !s.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`
pub fn sign(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("HMAC init error: {:?}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl NotificationSink for WebhookClient {
    async fn send(&self, event: &CertEvent, domain: &str, matched_with: &str) -> anyhow::Result<()> {
        let payload = NotificationPayload::new(event, domain, matched_with);
        let body = serde_json::to_vec(&payload)?;

        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");

        if let Some(token) = &self.api_token {
            req = req.header(API_TOKEN_HEADER, token);
        }

        // Optional HMAC signature header
        if let Some(secret) = &self.secret {
            req = req.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let resp = req.body(body).send().await?;
        resp.error_for_status()?; // non-2xx -> error

        Ok(())
    }
}
