// src/main.rs
use certstream_monitor::cli::Cli;
use certstream_monitor::config::{Config, MonitorConfig};
use certstream_monitor::dispatcher::NotificationDispatcher;
use certstream_monitor::logging::{self, Logger, TracingLogger};
use certstream_monitor::monitor::Monitor;
use certstream_monitor::notifier::{NotificationSink, WebhookClient};
use certstream_monitor::output::{self, Formatter};
use certstream_monitor::shutdown::ShutdownSignal;
use certstream_monitor::stats::{self, StatsSnapshot};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Validate arguments
    cli.validate()?;

    // Defaults, then config file, then environment, then flags
    let mut config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    cli.apply_to(&mut config);
    config.validate()?;

    logging::init_tracing(logging::resolve_level(cli.verbose, cli.quiet, &config.logging.level));

    tracing::info!("Starting certstream-monitor {}...", env!("CARGO_PKG_VERSION"));

    let format = cli.output_format();
    for line in output::startup_summary(&config, format, cli.verbose) {
        tracing::info!("{}", line);
    }

    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new(config.logging.suppressed_errors.clone()));
    let monitor = Arc::new(Monitor::with_logger(
        MonitorConfig::from_config(&config),
        Arc::clone(&logger),
    ));

    // Webhook notifications
    let sink: Option<Arc<dyn NotificationSink>> = if config.webhook.is_enabled() {
        Some(Arc::new(WebhookClient::new(&config.webhook)?))
    } else {
        None
    };
    let dispatcher = NotificationDispatcher::new(
        sink,
        config.webhook.workers,
        config.webhook.queue_size,
        monitor.pipeline_stats(),
        Arc::clone(&logger),
    );
    let has_api_token = config.webhook.has_api_token();

    let mut signals = ShutdownSignal::install()?;
    monitor.start();

    // Periodic stats
    let (stats_shutdown_tx, stats_shutdown_rx) = tokio::sync::watch::channel(false);
    let stats_interval = config.stats_interval();
    let stats_handle = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(stats::run_reporter(
            move || monitor.stats(),
            stats_interval,
            stats_shutdown_rx,
        ))
    };

    tracing::info!("Waiting for certificates... (Press CTRL+C to exit)");

    let mut formatter = Formatter::stdout(format, cli.verbose);
    let mut warned_no_webhook = false;
    let mut warned_no_token = false;

    let events = monitor.events();

    loop {
        tokio::select! {
            signal = signals.recv() => {
                tracing::info!("Received {}, shutting down...", signal);
                break;
            }
            received = events.recv_async() => {
                let Ok(event) = received else { break };

                if let Err(e) = formatter.write_event(&event) {
                    tracing::warn!("Output error: {:?}", e);
                }

                if !event.is_filtered() {
                    continue;
                }

                if !dispatcher.is_enabled() {
                    if !warned_no_webhook {
                        tracing::warn!("Domain matched but WEBHOOK_URL is not set - notifications will not be sent");
                        warned_no_webhook = true;
                    }
                } else if !has_api_token && !warned_no_token {
                    tracing::warn!("Domain matched but API_TOKEN is not set - webhook requests may fail authentication");
                    warned_no_token = true;
                }

                dispatcher.enqueue(Arc::new(event));
            }
        }
    }

    stats_shutdown_tx.send(true).ok();
    stats_handle.await.ok();

    monitor.stop().await;

    if dispatcher.queue_len() > 0 {
        tracing::info!("Waiting for {} pending notifications...", dispatcher.queue_len());
    }
    dispatcher.close_and_wait().await;

    let snapshot = monitor.stats();
    print_final_stats(&snapshot);

    Ok(())
}

fn print_final_stats(snapshot: &StatsSnapshot) {
    let uptime = Duration::from_secs(snapshot.uptime_secs.max(1));
    tracing::info!(
        "{}",
        snapshot.format_line(&StatsSnapshot::default(), uptime)
    );
    tracing::info!(
        "Final: {} connections ({} failed), {} parse errors, {} ignored messages",
        snapshot.connections,
        snapshot.connection_failures,
        snapshot.parse_errors,
        snapshot.messages_ignored
    );
}
