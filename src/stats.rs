// src/stats.rs
//! Pipeline counters and periodic throughput reporting

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

/// Lock-free counters shared by every pipeline stage.
///
/// Each counter only ever increases. Snapshots read them one at a time, so
/// counters in one snapshot may be slightly skewed relative to each other.
#[derive(Debug)]
pub struct PipelineStats {
    pub(crate) raw_received: AtomicU64,
    pub(crate) raw_dropped: Arc<AtomicU64>,
    pub(crate) messages_decoded: AtomicU64,
    pub(crate) messages_ignored: AtomicU64,
    pub(crate) parse_errors: AtomicU64,
    pub(crate) prefilter_hits: AtomicU64,
    pub(crate) prefilter_skips: AtomicU64,
    pub(crate) full_decodes: AtomicU64,
    pub(crate) events_sent: AtomicU64,
    pub(crate) events_dropped: Arc<AtomicU64>,
    pub(crate) notify_enqueued: AtomicU64,
    pub(crate) notify_dropped: Arc<AtomicU64>,
    pub(crate) notify_delivered: AtomicU64,
    pub(crate) notify_failed: AtomicU64,
    pub(crate) connections: AtomicU64,
    pub(crate) connection_failures: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of all counters plus queue gauges
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub raw_received: u64,
    pub raw_dropped: u64,
    pub messages_decoded: u64,
    pub messages_ignored: u64,
    pub parse_errors: u64,
    pub prefilter_hits: u64,
    pub prefilter_skips: u64,
    pub full_decodes: u64,
    pub events_sent: u64,
    pub events_dropped: u64,
    pub notify_enqueued: u64,
    pub notify_dropped: u64,
    pub notify_delivered: u64,
    pub notify_failed: u64,
    pub connections: u64,
    pub connection_failures: u64,
    pub raw_queue_len: usize,
    pub raw_queue_cap: usize,
    pub event_queue_len: usize,
    pub event_queue_cap: usize,
    pub uptime_secs: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            raw_received: AtomicU64::new(0),
            raw_dropped: Arc::new(AtomicU64::new(0)),
            messages_decoded: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            prefilter_hits: AtomicU64::new(0),
            prefilter_skips: AtomicU64::new(0),
            full_decodes: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            events_dropped: Arc::new(AtomicU64::new(0)),
            notify_enqueued: AtomicU64::new(0),
            notify_dropped: Arc::new(AtomicU64::new(0)),
            notify_delivered: AtomicU64::new(0),
            notify_failed: AtomicU64::new(0),
            connections: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter, returning the new total.
    pub(crate) fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Counter snapshot. Queue gauges are left at zero; the owner of the
    /// queues fills them in.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            raw_received: load(&self.raw_received),
            raw_dropped: load(&self.raw_dropped),
            messages_decoded: load(&self.messages_decoded),
            messages_ignored: load(&self.messages_ignored),
            parse_errors: load(&self.parse_errors),
            prefilter_hits: load(&self.prefilter_hits),
            prefilter_skips: load(&self.prefilter_skips),
            full_decodes: load(&self.full_decodes),
            events_sent: load(&self.events_sent),
            events_dropped: load(&self.events_dropped),
            notify_enqueued: load(&self.notify_enqueued),
            notify_dropped: load(&self.notify_dropped),
            notify_delivered: load(&self.notify_delivered),
            notify_failed: load(&self.notify_failed),
            connections: load(&self.connections),
            connection_failures: load(&self.connection_failures),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ..StatsSnapshot::default()
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// One-line report with per-second rates relative to `prev`.
    pub fn format_line(&self, prev: &StatsSnapshot, interval: Duration) -> String {
        let secs = interval.as_secs_f64().max(f64::EPSILON);
        let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 / secs;

        format!(
            "Stats: raw={} (+{:.0}/s) dropped={} rawQ={}/{} decoded={} (+{:.0}/s) prefilter hit={} skip={} \
             events={} (+{:.0}/s) evDrop={} evQ={}/{} notify sent={} drop={} fail={} uptime={}",
            self.raw_received,
            rate(self.raw_received, prev.raw_received),
            self.raw_dropped,
            self.raw_queue_len,
            self.raw_queue_cap,
            self.messages_decoded,
            rate(self.messages_decoded, prev.messages_decoded),
            self.prefilter_hits,
            self.prefilter_skips,
            self.events_sent,
            rate(self.events_sent, prev.events_sent),
            self.events_dropped,
            self.event_queue_len,
            self.event_queue_cap,
            self.notify_delivered,
            self.notify_dropped,
            self.notify_failed,
            format_uptime(self.uptime_secs),
        )
    }
}

/// Format uptime duration
pub fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Log a stats line every `interval` until shutdown is signalled.
///
/// `source` produces the current snapshot; it is sampled once per tick.
pub async fn run_reporter<F>(source: F, interval: Duration, mut shutdown_rx: watch::Receiver<bool>)
where
    F: Fn() -> StatsSnapshot + Send,
{
    if interval.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    let mut prev = source();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = source();
                info!("{}", current.format_line(&prev, interval));
                prev = current;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
