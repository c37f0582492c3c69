// src/monitor/pipeline.rs
//! Decode/filter workers: raw frames in, certificate events out.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use super::wait_for_shutdown;
use crate::config::MonitorConfig;
use crate::logging::Logger;
use crate::queue::{BoundedSender, Offer, should_log_drop};
use crate::stats::PipelineStats;
use crate::types::{CertEvent, CertificateRecord, LeafSummary, RawMessage};

const EVENT_DROP_LOG_EVERY: u64 = 1000;

/// What happened to one raw message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not a certificate update
    Ignored,
    /// Payload could not be decoded
    Malformed,
    /// No leaf domain matched the watch-list; never fully decoded
    Skipped,
    Emitted,
    /// Event channel full
    Dropped,
    /// Event channel closed
    Closed,
}

pub struct DecodeWorker {
    id: usize,
    config: Arc<MonitorConfig>,
    events_tx: BoundedSender<CertEvent>,
    stats: Arc<PipelineStats>,
    logger: Arc<dyn Logger>,
}

impl DecodeWorker {
    pub fn new(
        id: usize,
        config: Arc<MonitorConfig>,
        events_tx: BoundedSender<CertEvent>,
        stats: Arc<PipelineStats>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            id,
            config,
            events_tx,
            stats,
            logger,
        }
    }

    /// Consume the ingestion queue until shutdown or until it is closed.
    pub async fn run(self, raw_rx: flume::Receiver<RawMessage>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                received = raw_rx.recv_async() => match received {
                    Ok(raw) => {
                        self.process(&raw, Utc::now());
                    }
                    Err(_) => break,
                },
            }
        }

        self.logger.debug(&format!("Decode worker {} stopped", self.id));
    }

    /// Two-pass decode of one message.
    ///
    /// The borrowed leaf summary is enough to reject other message types and
    /// non-matching certificates. Only survivors pay for the full decode.
    pub fn process(&self, raw: &RawMessage, now: DateTime<Utc>) -> Disposition {
        let summary = match LeafSummary::decode(raw.as_bytes()) {
            Ok(summary) => summary,
            Err(e) => {
                PipelineStats::bump(&self.stats.parse_errors);
                self.logger.error(&format!("Failed to parse message: {}", e));
                return Disposition::Malformed;
            }
        };
        PipelineStats::bump(&self.stats.messages_decoded);

        if !summary.is_certificate_update() {
            PipelineStats::bump(&self.stats.messages_ignored);
            return Disposition::Ignored;
        }

        let watchlist = &self.config.watchlist;
        let matched = if watchlist.is_empty() {
            Vec::new()
        } else {
            let matched = watchlist.matched_terms(summary.domains());
            if matched.is_empty() {
                PipelineStats::bump(&self.stats.prefilter_skips);
                return Disposition::Skipped;
            }
            PipelineStats::bump(&self.stats.prefilter_hits);
            matched
        };

        PipelineStats::bump(&self.stats.full_decodes);
        let record = match CertificateRecord::decode(raw.as_bytes(), now) {
            Ok(record) => record,
            Err(e) => {
                PipelineStats::bump(&self.stats.parse_errors);
                self.logger
                    .error(&format!("Failed to decode certificate: {:#}", e));
                return Disposition::Malformed;
            }
        };

        let event = CertEvent::new(record, matched, now);
        self.logger.debug(&format!(
            "Certificate for {} ({})",
            event.record.common_name,
            event.cert_type()
        ));

        match self.events_tx.offer(event) {
            Offer::Accepted => {
                PipelineStats::bump(&self.stats.events_sent);
                Disposition::Emitted
            }
            Offer::Dropped(total) => {
                if should_log_drop(total, EVENT_DROP_LOG_EVERY) {
                    self.logger.error(&format!(
                        "Event channel full ({} slots), dropped {} events",
                        self.events_tx.capacity(),
                        total
                    ));
                }
                Disposition::Dropped
            }
            Offer::Closed => Disposition::Closed,
        }
    }
}
