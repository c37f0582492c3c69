// src/monitor/mod.rs
//! Certificate stream monitor.
//!
//! A [`Monitor`] owns one connection control task and a pool of decode
//! workers joined by a bounded ingestion queue. Finished events land on a
//! bounded event channel read through [`Monitor::events`].

pub mod connection;
pub mod pipeline;

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::logging::{Logger, TracingLogger};
use crate::queue::{self, BoundedSender};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::types::{CertEvent, RawMessage};

use self::connection::ConnectionManager;
use self::pipeline::DecodeWorker;

/// Resolves once shutdown has been signalled or the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    /// Kept for queue gauges only
    raw_rx: flume::Receiver<RawMessage>,
}

pub struct Monitor {
    config: Arc<MonitorConfig>,
    logger: Arc<dyn Logger>,
    stats: Arc<PipelineStats>,
    events_tx: BoundedSender<CertEvent>,
    events_rx: flume::Receiver<CertEvent>,
    running: Mutex<Option<Running>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_logger(config, Arc::new(TracingLogger::default()))
    }

    pub fn with_logger(config: MonitorConfig, logger: Arc<dyn Logger>) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let (events_tx, events_rx) =
            queue::bounded(config.event_buffer_size, Arc::clone(&stats.events_dropped));

        Self {
            config: Arc::new(config),
            logger,
            stats,
            events_tx,
            events_rx,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Spawn the connection task and decode workers.
    ///
    /// Must be called from within a tokio runtime. Calling it while already
    /// running does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (raw_tx, raw_rx) = queue::bounded::<RawMessage>(
            self.config.ingest_buffer_size,
            Arc::clone(&self.stats.raw_dropped),
        );

        let mut tasks = Vec::with_capacity(self.config.worker_count + 1);

        for id in 0..self.config.worker_count {
            let worker = DecodeWorker::new(
                id,
                Arc::clone(&self.config),
                self.events_tx.clone(),
                Arc::clone(&self.stats),
                Arc::clone(&self.logger),
            );
            tasks.push(tokio::spawn(worker.run(raw_rx.clone(), shutdown_tx.subscribe())));
        }

        let connection = ConnectionManager::new(
            Arc::clone(&self.config),
            raw_tx,
            Arc::clone(&self.stats),
            Arc::clone(&self.logger),
        );
        tasks.push(tokio::spawn(connection.run(shutdown_tx.subscribe())));

        self.logger.info(&format!(
            "Monitor started with {} workers (watching {} domains)",
            self.config.worker_count,
            self.config.watchlist.len()
        ));

        *running = Some(Running {
            shutdown_tx,
            tasks,
            raw_rx,
        });
    }

    /// Signal shutdown and wait for every spawned task to finish.
    ///
    /// Safe to call repeatedly; only the first call after a `start` does
    /// any work. The monitor can be started again afterwards.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(true);

        for task in running.tasks {
            if let Err(e) = task.await {
                self.logger.error(&format!("Pipeline task failed: {}", e));
            }
        }

        self.logger.info("Monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Receiver for finished events. Every clone competes for the same
    /// events.
    pub fn events(&self) -> flume::Receiver<CertEvent> {
        self.events_rx.clone()
    }

    /// Shared counters, for collaborators that report into the same stats.
    pub fn pipeline_stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Counter snapshot with current queue depths.
    pub fn stats(&self) -> StatsSnapshot {
        let raw_queue_len = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.raw_rx.len())
            .unwrap_or(0);

        StatsSnapshot {
            raw_queue_len,
            raw_queue_cap: self.config.ingest_buffer_size,
            event_queue_len: self.events_tx.len(),
            event_queue_cap: self.events_tx.capacity(),
            ..self.stats.snapshot()
        }
    }
}
