// src/dispatcher.rs
//! Bounded worker pool delivering match notifications.
//!
//! One job is queued per matching leaf domain of an event. Delivery is
//! fire-and-forget: failures are counted and logged, never retried.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::logging::Logger;
use crate::notifier::NotificationSink;
use crate::queue::{self, BoundedSender, Offer, should_log_drop};
use crate::stats::PipelineStats;
use crate::types::CertEvent;

const DROP_LOG_EVERY: u64 = 1000;
const FAILURE_LOG_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub event: Arc<CertEvent>,
    /// Leaf domain from the certificate
    pub domain: String,
    /// Watch-list term that covered `domain`
    pub matched_with: String,
}

pub struct NotificationDispatcher {
    jobs_tx: Option<BoundedSender<NotificationJob>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
    logger: Arc<dyn Logger>,
}

impl NotificationDispatcher {
    /// Spawn `workers` delivery tasks. With no sink the dispatcher is inert
    /// and [`enqueue`](Self::enqueue) does nothing.
    pub fn new(
        sink: Option<Arc<dyn NotificationSink>>,
        workers: usize,
        queue_size: usize,
        stats: Arc<PipelineStats>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let Some(sink) = sink else {
            return Self {
                jobs_tx: None,
                workers: Vec::new(),
                stats,
                logger,
            };
        };

        let (jobs_tx, jobs_rx) = queue::bounded(queue_size.max(1), Arc::clone(&stats.notify_dropped));

        let workers = (0..workers.max(1))
            .map(|_| {
                tokio::spawn(deliver(
                    jobs_rx.clone(),
                    Arc::clone(&sink),
                    Arc::clone(&stats),
                    Arc::clone(&logger),
                ))
            })
            .collect();

        Self {
            jobs_tx: Some(jobs_tx),
            workers,
            stats,
            logger,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.jobs_tx.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.jobs_tx.as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Queue one job per matching leaf domain. Returns how many were accepted.
    pub fn enqueue(&self, event: Arc<CertEvent>) -> usize {
        let Some(jobs_tx) = &self.jobs_tx else {
            return 0;
        };

        let mut accepted = 0;
        for (domain, matched_with) in event.matched_leaves() {
            let job = NotificationJob {
                event: Arc::clone(&event),
                domain: domain.to_string(),
                matched_with: matched_with.to_string(),
            };

            match jobs_tx.offer(job) {
                Offer::Accepted => {
                    PipelineStats::bump(&self.stats.notify_enqueued);
                    accepted += 1;
                }
                Offer::Dropped(total) => {
                    if should_log_drop(total, DROP_LOG_EVERY) {
                        self.logger.error(&format!(
                            "Webhook backlog, dropping notifications. Dropped: {}",
                            total
                        ));
                    }
                }
                Offer::Closed => break,
            }
        }
        accepted
    }

    /// Close the job queue and wait for queued and in-flight deliveries.
    pub async fn close_and_wait(mut self) {
        drop(self.jobs_tx.take());

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                self.logger
                    .error(&format!("Notification worker failed: {}", e));
            }
        }
    }
}

async fn deliver(
    jobs_rx: flume::Receiver<NotificationJob>,
    sink: Arc<dyn NotificationSink>,
    stats: Arc<PipelineStats>,
    logger: Arc<dyn Logger>,
) {
    while let Ok(job) = jobs_rx.recv_async().await {
        match sink.send(&job.event, &job.domain, &job.matched_with).await {
            Ok(()) => {
                PipelineStats::bump(&stats.notify_delivered);
                logger.debug(&format!("Notification sent for {}", job.domain));
            }
            Err(e) => {
                let total = PipelineStats::bump(&stats.notify_failed);
                if should_log_drop(total, FAILURE_LOG_EVERY) {
                    logger.error(&format!(
                        "Webhook delivery failed for {} ({} failures so far): {:#}",
                        job.domain, total, e
                    ));
                }
            }
        }
    }
}
