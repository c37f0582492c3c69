// src/types.rs
//! Wire formats of the certstream feed and the decoded records built from them.
//!
//! Decoding happens in two passes. [`LeafSummary`] borrows only the message
//! type and leaf domain list out of the raw bytes, which is enough to apply
//! the watch-list. The full [`CertStreamMessage`] is only decoded for
//! messages that survive that filter.

use crate::matcher::is_domain_match;
use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Discriminant of messages carrying a certificate
pub const CERTIFICATE_UPDATE: &str = "certificate_update";

/// Certificates whose validity began longer ago than this are renewals.
pub const RENEWAL_THRESHOLD_SECS: i64 = 24 * 60 * 60;

/// One frame as received from the socket. Ownership moves from the
/// connection manager to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage(Vec<u8>);

impl RawMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

// ---- cheap first pass ----

/// Lightweight view of a message: type discriminant and leaf domains only.
#[derive(Debug, Deserialize)]
pub struct LeafSummary<'a> {
    #[serde(borrow, default)]
    pub message_type: Cow<'a, str>,
    #[serde(borrow, default)]
    data: Option<SummaryData<'a>>,
}

#[derive(Debug, Deserialize)]
struct SummaryData<'a> {
    #[serde(borrow, default)]
    leaf_cert: Option<SummaryLeaf<'a>>,
}

#[derive(Debug, Deserialize)]
struct SummaryLeaf<'a> {
    #[serde(borrow, default)]
    all_domains: Vec<Cow<'a, str>>,
}

impl<'a> LeafSummary<'a> {
    pub fn decode(bytes: &'a [u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn is_certificate_update(&self) -> bool {
        self.message_type == CERTIFICATE_UPDATE
    }

    pub fn domains(&self) -> &[Cow<'a, str>] {
        self.data
            .as_ref()
            .and_then(|d| d.leaf_cert.as_ref())
            .map(|leaf| leaf.all_domains.as_slice())
            .unwrap_or(&[])
    }
}

// ---- full second pass ----

#[derive(Debug, Deserialize)]
pub struct CertStreamMessage {
    pub message_type: String,
    #[serde(default)]
    pub data: Option<UpdateData>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateData {
    #[serde(default)]
    pub cert_index: Option<u64>,
    #[serde(default)]
    pub update_type: Option<String>,
    pub leaf_cert: LeafCert,
    #[serde(default)]
    pub seen: Option<f64>,
    #[serde(default)]
    pub source: Option<Source>,
}

#[derive(Debug, Deserialize)]
pub struct LeafCert {
    #[serde(default)]
    pub all_domains: Vec<String>,
    #[serde(default)]
    pub not_before: Option<f64>,
    #[serde(default)]
    pub not_after: Option<f64>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub subject: Subject,
    #[serde(default)]
    pub issuer: Issuer,
}

#[derive(Debug, Default, Deserialize)]
pub struct Subject {
    #[serde(rename = "CN", default)]
    pub common_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Issuer {
    #[serde(rename = "O", default)]
    pub organization: Option<String>,
    #[serde(rename = "CN", default)]
    pub common_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

// ---- decoded records ----

/// NEW vs RENEWAL classification of an observed certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertType {
    New,
    Renewal,
}

impl CertType {
    /// RENEWAL iff `not_before + 24h` lies strictly before `now`.
    pub fn classify(not_before: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if not_before + TimeDelta::seconds(RENEWAL_THRESHOLD_SECS) < now {
            CertType::Renewal
        } else {
            CertType::New
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CertType::New => "NEW",
            CertType::Renewal => "RENEWAL",
        }
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully decoded certificate observation. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateRecord {
    pub common_name: String,
    pub issuer: String,
    /// Epoch seconds
    pub not_before: i64,
    /// Epoch seconds
    pub not_after: i64,
    pub all_domains: Vec<String>,
    pub cert_type: CertType,
    pub cert_index: Option<u64>,
    pub fingerprint: Option<String>,
    pub update_type: Option<String>,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
    /// Wire `seen` timestamp, when present and valid
    pub seen: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    /// Full decode of a raw message. Classification is relative to `now`.
    pub fn decode(bytes: &[u8], now: DateTime<Utc>) -> anyhow::Result<Self> {
        let message: CertStreamMessage =
            serde_json::from_slice(bytes).context("Failed to decode certificate message")?;

        if message.message_type != CERTIFICATE_UPDATE {
            anyhow::bail!("Unexpected message type '{}'", message.message_type);
        }

        let data = message
            .data
            .context("Certificate update without data section")?;

        Ok(Self::from_update(data, now))
    }

    pub fn from_update(data: UpdateData, now: DateTime<Utc>) -> Self {
        let leaf = data.leaf_cert;
        let not_before = leaf.not_before.unwrap_or_default() as i64;
        let not_after = leaf.not_after.unwrap_or_default() as i64;

        let cert_type = match DateTime::from_timestamp(not_before, 0) {
            Some(start) => CertType::classify(start, now),
            None => CertType::New,
        };

        let (source_name, source_url) = data
            .source
            .map(|s| (s.name, s.url))
            .unwrap_or((None, None));

        Self {
            common_name: leaf.subject.common_name.unwrap_or_default(),
            issuer: leaf.issuer.organization.unwrap_or_default(),
            not_before,
            not_after,
            all_domains: leaf.all_domains,
            cert_type,
            cert_index: data.cert_index,
            fingerprint: leaf.fingerprint,
            update_type: data.update_type,
            source_name,
            source_url,
            seen: data.seen.and_then(epoch_to_datetime),
        }
    }

    pub fn not_before_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.not_before, 0)
    }

    pub fn not_after_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.not_after, 0)
    }
}

/// A certificate delivered to the caller.
///
/// `matched_domains` holds the watch-list terms that matched, in watch-list
/// order. It is empty only when no watch-list is configured.
#[derive(Debug, Clone)]
pub struct CertEvent {
    pub record: Arc<CertificateRecord>,
    pub timestamp: DateTime<Utc>,
    pub matched_domains: Vec<String>,
}

impl CertEvent {
    pub fn new(record: CertificateRecord, matched_domains: Vec<String>, now: DateTime<Utc>) -> Self {
        let timestamp = record.seen.unwrap_or(now);
        Self {
            record: Arc::new(record),
            timestamp,
            matched_domains,
        }
    }

    pub fn cert_type(&self) -> CertType {
        self.record.cert_type
    }

    pub fn is_filtered(&self) -> bool {
        !self.matched_domains.is_empty()
    }

    /// Leaf domains covered by the match set, each paired with the first
    /// term that covers it. Certificate order; empty for unfiltered events.
    pub fn matched_leaves(&self) -> Vec<(&str, &str)> {
        self.record
            .all_domains
            .iter()
            .filter_map(|leaf| {
                self.matched_domains
                    .iter()
                    .find(|term| is_domain_match(leaf, term))
                    .map(|term| (leaf.as_str(), term.as_str()))
            })
            .collect()
    }
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0) as i64)
}
