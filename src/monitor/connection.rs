// src/monitor/connection.rs
//! WebSocket connection lifecycle: connect, keepalive, read loop, reconnect.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};

use super::wait_for_shutdown;
use crate::backoff::BackoffPolicy;
use crate::config::MonitorConfig;
use crate::logging::Logger;
use crate::queue::{BoundedSender, Offer, should_log_drop};
use crate::stats::PipelineStats;
use crate::types::RawMessage;

/// Certificate chains can be large
const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const RAW_DROP_LOG_EVERY: u64 = 1000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// How a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

/// Time of the last frame read from the peer, shared with the keepalive task.
struct PeerActivity {
    started: Instant,
    last_read_ms: AtomicU64,
}

impl PeerActivity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_read_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_read_ms.store(elapsed, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_read_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Aborts the keepalive task when the session ends.
struct KeepaliveGuard(JoinHandle<()>);

impl Drop for KeepaliveGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sole producer of the ingestion queue.
///
/// The reconnect attempt counter lives here and is only touched by the
/// control loop in [`ConnectionManager::run`].
pub struct ConnectionManager {
    config: Arc<MonitorConfig>,
    backoff: BackoffPolicy,
    raw_tx: BoundedSender<RawMessage>,
    stats: Arc<PipelineStats>,
    logger: Arc<dyn Logger>,
    attempts: u32,
    rng: StdRng,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<MonitorConfig>,
        raw_tx: BoundedSender<RawMessage>,
        stats: Arc<PipelineStats>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self {
            config,
            backoff,
            raw_tx,
            stats,
            logger,
            attempts: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Control loop. Returns once shutdown is signalled; the ingestion queue
    /// sender is dropped with `self`, closing the queue.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        self.logger
            .info(&format!("Connecting to {}", self.config.websocket_url));

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let connected = tokio::select! {
                result = self.connect() => result,
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            };

            match connected {
                Ok(ws) => {
                    self.attempts = 0;
                    PipelineStats::bump(&self.stats.connections);
                    self.logger
                        .info(&format!("Connected to {}", self.config.websocket_url));

                    if self.session(ws, &mut shutdown_rx).await == SessionEnd::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    self.attempts = self.attempts.saturating_add(1);
                    PipelineStats::bump(&self.stats.connection_failures);
                    self.logger.error(&format!("Connection error: {:#}", e));
                }
            }

            let delay = self.backoff.delay(self.attempts, &mut self.rng);
            if delay.is_zero() {
                self.logger.info("Connection lost. Reconnecting immediately...");
            } else {
                self.logger
                    .info(&format!("Connection lost. Reconnecting in {:?}...", delay));
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            }
        }

        self.logger.info("Connection manager stopped");
    }

    async fn connect(&self) -> anyhow::Result<WsStream> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);

        let attempt = connect_async_with_config(
            self.config.websocket_url.as_str(),
            Some(ws_config),
            false,
        );

        let (ws, _response) = tokio::time::timeout(self.config.connect_timeout, attempt)
            .await
            .map_err(|_| {
                anyhow::anyhow!("connect timed out after {:?}", self.config.connect_timeout)
            })??;

        Ok(ws)
    }

    /// Read frames until the connection drops or shutdown is signalled.
    async fn session(&self, ws: WsStream, shutdown_rx: &mut watch::Receiver<bool>) -> SessionEnd {
        let (sink, mut stream) = ws.split();
        let sink = Arc::new(Mutex::new(sink));

        let activity = Arc::new(PeerActivity::new());

        let (lost_tx, mut lost_rx) = oneshot::channel();
        let keepalive = KeepaliveGuard(tokio::spawn(keepalive(
            Arc::clone(&sink),
            self.config.keepalive_interval,
            Arc::clone(&activity),
            lost_tx,
        )));

        let end = loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown_rx) => break SessionEnd::Shutdown,
                reason = &mut lost_rx => {
                    let reason = reason.unwrap_or_else(|_| "keepalive task exited".to_string());
                    self.logger.error(&format!("Keepalive failed: {}", reason));
                    break SessionEnd::Lost;
                }
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        activity.touch();
                        match message {
                            Message::Text(text) => {
                                self.enqueue_raw(RawMessage::from(text));
                            }
                            Message::Binary(bytes) => {
                                self.enqueue_raw(RawMessage::from(bytes));
                            }
                            Message::Close(_) => {
                                self.logger.info("Server closed the connection");
                                break SessionEnd::Lost;
                            }
                            // Pings are answered by the transport; pongs only count as activity
                            _ => {}
                        }
                    }
                    None => {
                        self.logger.info("Server closed the connection");
                        break SessionEnd::Lost;
                    }
                    Some(Err(e)) => {
                        self.logger.error(&format!("Read error: {}", e));
                        break SessionEnd::Lost;
                    }
                }
            }
        };

        drop(keepalive);

        if end == SessionEnd::Shutdown {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }));
            let mut sink = sink.lock().await;
            if let Err(e) = sink.send(close).await {
                self.logger.debug(&format!("Close frame not sent: {}", e));
            }
        }

        end
    }

    /// Hand a frame to the ingestion queue without waiting for capacity.
    pub fn enqueue_raw(&self, message: RawMessage) -> Offer {
        PipelineStats::bump(&self.stats.raw_received);

        let offer = self.raw_tx.offer(message);
        match offer {
            Offer::Accepted => {}
            Offer::Dropped(total) => {
                if should_log_drop(total, RAW_DROP_LOG_EVERY) {
                    self.logger.error(&format!(
                        "Ingestion queue full ({} slots), dropped {} raw messages",
                        self.raw_tx.capacity(),
                        total
                    ));
                }
            }
            Offer::Closed => {
                // Workers are gone; still account for the message
                PipelineStats::bump(&self.stats.raw_dropped);
            }
        }
        offer
    }
}

/// Ping the peer every `period`. The session is reported lost when a ping
/// cannot be written or nothing was read for two periods.
async fn keepalive(
    sink: Arc<Mutex<WsSink>>,
    period: Duration,
    activity: Arc<PeerActivity>,
    lost_tx: oneshot::Sender<String>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    let deadline = period * 2;

    loop {
        ticker.tick().await;

        let idle = activity.idle();
        if idle > deadline {
            let _ = lost_tx.send(format!("no response from server for {:?}", idle));
            return;
        }

        let sent = sink.lock().await.send(Message::Ping(Vec::new())).await;
        if let Err(e) = sent {
            let _ = lost_tx.send(e.to_string());
            return;
        }
    }
}
