// Integration tests for certstream-monitor
use certstream_monitor::config::{MonitorConfig, WebhookConfig};
use certstream_monitor::dispatcher::NotificationDispatcher;
use certstream_monitor::logging::TracingLogger;
use certstream_monitor::matcher::WatchList;
use certstream_monitor::monitor::Monitor;
use certstream_monitor::notifier::{NotificationSink, WebhookClient};
use certstream_monitor::types::CertType;

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock certstream server on an ephemeral port.
///
/// Every accepted connection receives `messages`. With `close_after_send`
/// the server then closes the connection, otherwise it keeps it open until
/// the client goes away. Returns the URL and a connection counter.
async fn start_mock_certstream_server(
    messages: Vec<String>,
    close_after_send: bool,
) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let messages = messages.clone();

            tokio::spawn(async move {
                let Ok(ws_stream) = accept_async(stream).await else {
                    return;
                };
                let (mut ws_sender, mut ws_receiver) = ws_stream.split();

                for msg_text in messages {
                    if ws_sender.send(Message::Text(msg_text)).await.is_err() {
                        return;
                    }
                }

                if close_after_send {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return;
                }

                // Keep reading so pings are answered, until the client leaves
                while let Some(Ok(_)) = ws_receiver.next().await {}
            });
        }
    });

    (format!("ws://{}/", addr), accepted)
}

fn cert_update(domains: &[&str], common_name: &str, not_before: i64) -> String {
    serde_json::json!({
        "message_type": "certificate_update",
        "data": {
            "cert_index": 1,
            "update_type": "X509LogEntry",
            "leaf_cert": {
                "all_domains": domains,
                "not_before": not_before,
                "not_after": not_before + 90 * 86400,
                "subject": { "CN": common_name },
                "issuer": { "O": "Let's Encrypt", "CN": "R3" }
            }
        }
    })
    .to_string()
}

fn heartbeat() -> String {
    serde_json::json!({ "message_type": "heartbeat", "timestamp": 1700000000.0 }).to_string()
}

fn test_config(url: String) -> MonitorConfig {
    MonitorConfig {
        websocket_url: url,
        reconnect_timeout: Duration::from_millis(50),
        max_reconnect_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(2),
        ingest_buffer_size: 300,
        event_buffer_size: 100,
        worker_count: 2,
        ..MonitorConfig::default()
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_end_to_end_domain_matching() {
    // Start mock webhook server
    let webhook_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("x-api-token", "integration-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&webhook_server)
        .await;

    let ten_days_ago = chrono::Utc::now().timestamp() - 10 * 86400;
    let messages = vec![
        heartbeat(),
        // Contains "nhn.no" only as a character suffix
        cert_update(&["mynhn.no", "nhn.no.example.com"], "mynhn.no", ten_days_ago),
        cert_update(&["nhn.no", "www.nhn.no"], "www.nhn.no", ten_days_ago),
    ];
    let (url, _) = start_mock_certstream_server(messages, false).await;

    let config = MonitorConfig {
        watchlist: WatchList::new(["nhn.no"]),
        // One worker keeps processing in arrival order
        worker_count: 1,
        ..test_config(url)
    };
    let monitor = Monitor::new(config);
    monitor.start();

    let events = monitor.events();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv_async())
        .await
        .expect("no event received")
        .unwrap();

    assert_eq!(event.cert_type(), CertType::Renewal);
    assert_eq!(event.cert_type().as_str(), "RENEWAL");
    assert_eq!(event.matched_domains, vec!["nhn.no"]);
    assert_eq!(event.record.common_name, "www.nhn.no");
    assert_eq!(event.record.all_domains, vec!["nhn.no", "www.nhn.no"]);

    // Notifications: one job per matching leaf domain
    let webhook_config = WebhookConfig {
        url: Some(webhook_server.uri()),
        api_token: Some("integration-token".to_string()),
        ..WebhookConfig::default()
    };
    let sink: Arc<dyn NotificationSink> = Arc::new(WebhookClient::new(&webhook_config).unwrap());
    let dispatcher = NotificationDispatcher::new(
        Some(sink),
        2,
        10,
        monitor.pipeline_stats(),
        Arc::new(TracingLogger::default()),
    );

    assert_eq!(dispatcher.enqueue(Arc::new(event)), 2);
    dispatcher.close_and_wait().await;

    monitor.stop().await;

    let stats = monitor.stats();
    assert_eq!(stats.events_sent, 1);
    assert_eq!(stats.messages_ignored, 1);
    assert_eq!(stats.prefilter_skips, 1);
    assert_eq!(stats.prefilter_hits, 1);
    assert_eq!(stats.full_decodes, 1);
    assert_eq!(stats.notify_enqueued, 2);
    assert_eq!(stats.notify_delivered, 2);
    assert_eq!(stats.notify_failed, 0);
    assert!(events.is_empty());

    let requests = webhook_server.received_requests().await.unwrap();
    let mut notified: Vec<String> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            assert_eq!(body["matched_with"], "nhn.no");
            assert_eq!(body["cert_type"], "RENEWAL");
            assert_eq!(body["common_name"], "www.nhn.no");
            body["domain"].as_str().unwrap().to_string()
        })
        .collect();
    notified.sort();
    assert_eq!(notified, vec!["nhn.no", "www.nhn.no"]);
}

#[tokio::test]
async fn test_unfiltered_stream_delivers_every_certificate() {
    let now = chrono::Utc::now().timestamp();
    let messages = vec![
        cert_update(&["a.example"], "a.example", now),
        heartbeat(),
        cert_update(&["b.example"], "b.example", now),
        "{not json".to_string(),
        cert_update(&["c.example"], "c.example", now),
    ];
    let (url, _) = start_mock_certstream_server(messages, false).await;

    let monitor = Monitor::new(test_config(url));
    monitor.start();

    let events = monitor.events();
    let mut names = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv_async())
            .await
            .expect("missing event")
            .unwrap();
        assert!(event.matched_domains.is_empty());
        assert_eq!(event.cert_type(), CertType::New);
        names.push(event.record.common_name.clone());
    }

    // Workers may finish out of arrival order
    names.sort();
    assert_eq!(names, vec!["a.example", "b.example", "c.example"]);

    assert!(
        wait_until(
            || {
                let s = monitor.stats();
                s.parse_errors == 1 && s.messages_ignored == 1
            },
            Duration::from_secs(2)
        )
        .await
    );

    monitor.stop().await;
    let stats = monitor.stats();
    assert_eq!(stats.raw_received, 5);
    assert_eq!(stats.raw_dropped, 0);
    assert_eq!(stats.events_sent, 3);
    assert_eq!(stats.prefilter_skips, 0);
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let now = chrono::Utc::now().timestamp();
    let messages = vec![cert_update(&["again.example"], "again.example", now)];
    let (url, accepted) = start_mock_certstream_server(messages, true).await;

    let monitor = Monitor::new(test_config(url));
    monitor.start();

    assert!(
        wait_until(|| monitor.stats().connections >= 3, Duration::from_secs(5)).await,
        "monitor did not reconnect"
    );

    monitor.stop().await;

    let stats = monitor.stats();
    assert!(accepted.load(Ordering::SeqCst) >= 3);
    assert_eq!(stats.connection_failures, 0);
    // Every finished session delivered its message
    assert!(stats.raw_received >= 2);
}

#[tokio::test]
async fn test_stop_interrupts_reconnect_backoff() {
    let (url, accepted) = start_mock_certstream_server(Vec::new(), true).await;

    let config = MonitorConfig {
        reconnect_timeout: Duration::from_secs(30),
        max_reconnect_timeout: Duration::from_secs(60),
        ..test_config(url)
    };
    let monitor = Monitor::new(config);
    monitor.start();

    // First session ends right away; the monitor is now backing off
    assert!(wait_until(|| accepted.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(2), monitor.stop())
        .await
        .expect("stop did not interrupt the backoff timer");
    assert!(!monitor.is_running());

    // No new connection attempt after stop
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.stats().connections, 1);
}

#[tokio::test]
async fn test_burst_drops_are_accounted() {
    let now = chrono::Utc::now().timestamp();
    let total = 500;
    let messages: Vec<String> = (0..total)
        .map(|i| {
            let domain = format!("host{}.example", i);
            cert_update(&[domain.as_str()], &domain, now)
        })
        .collect();
    let (url, _) = start_mock_certstream_server(messages, false).await;

    let config = MonitorConfig {
        ingest_buffer_size: 5,
        event_buffer_size: 10,
        worker_count: 1,
        ..test_config(url)
    };
    let monitor = Monitor::new(config);
    monitor.start();

    // Nobody reads events, so the event channel fills up too
    let settled = wait_until(
        || {
            let s = monitor.stats();
            s.raw_received == total as u64
                && s.raw_dropped + s.messages_decoded + s.parse_errors == s.raw_received
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(settled, "raw messages were lost without being counted");

    monitor.stop().await;

    let stats = monitor.stats();
    assert_eq!(stats.events_sent + stats.events_dropped, stats.messages_decoded);
    assert!(stats.events_sent <= 10);
    assert_eq!(monitor.events().len() as u64, stats.events_sent);
}
