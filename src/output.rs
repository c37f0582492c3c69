// src/output.rs
//! Console rendering of certificate events

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::types::CertEvent;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};

/// One JSON line per reported domain
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    timestamp: DateTime<Utc>,
    cert_type: &'static str,
    domain: &'a str,
    matched_with: Option<&'a str>,
    common_name: &'a str,
    issuer: &'a str,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    all_domains: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    cert_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

pub struct Formatter<W: Write> {
    writer: W,
    format: OutputFormat,
    verbose: bool,
    use_colors: bool,
}

impl Formatter<io::Stdout> {
    /// Formatter writing to stdout, coloured when stdout is a terminal
    pub fn stdout(format: OutputFormat, verbose: bool) -> Self {
        let use_colors = is_terminal::is_terminal(std::io::stdout());
        Self::new(io::stdout(), format, verbose, use_colors)
    }
}

impl<W: Write> Formatter<W> {
    pub fn new(writer: W, format: OutputFormat, verbose: bool, use_colors: bool) -> Self {
        Self {
            writer,
            format,
            verbose,
            use_colors,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Render one event.
    ///
    /// Filtered events print every matching leaf domain. Unfiltered events
    /// print only their first domain unless verbose, to keep firehose mode
    /// readable.
    pub fn write_event(&mut self, event: &CertEvent) -> io::Result<()> {
        let leaves: Vec<(&str, Option<&str>)> = if event.is_filtered() {
            event
                .matched_leaves()
                .into_iter()
                .map(|(leaf, term)| (leaf, Some(term)))
                .collect()
        } else {
            let take = if self.verbose { usize::MAX } else { 1 };
            event
                .record
                .all_domains
                .iter()
                .take(take)
                .map(|leaf| (leaf.as_str(), None))
                .collect()
        };

        for (domain, matched_with) in leaves {
            match self.format {
                OutputFormat::UrlsOnly => writeln!(self.writer, "{}", domain)?,
                OutputFormat::Json => self.write_json(event, domain, matched_with)?,
                OutputFormat::Human => self.write_human(event, domain, matched_with)?,
            }
        }
        self.writer.flush()
    }

    fn write_json(&mut self, event: &CertEvent, domain: &str, matched_with: Option<&str>) -> io::Result<()> {
        let record = &event.record;
        let line = EventLine {
            timestamp: event.timestamp,
            cert_type: event.cert_type().as_str(),
            domain,
            matched_with,
            common_name: &record.common_name,
            issuer: &record.issuer,
            not_before: record.not_before_time(),
            not_after: record.not_after_time(),
            all_domains: &record.all_domains,
            cert_index: record.cert_index,
            fingerprint: record.fingerprint.as_deref(),
            source: record.source_name.as_deref(),
        };
        let json = serde_json::to_string(&line)?;
        writeln!(self.writer, "{}", json)
    }

    fn write_human(&mut self, event: &CertEvent, domain: &str, matched_with: Option<&str>) -> io::Result<()> {
        let timestamp = event.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string();
        let record = &event.record;

        // Matched term is only worth showing in verbose mode
        let matched = matched_with.filter(|_| self.verbose);

        if self.use_colors {
            write!(
                self.writer,
                "{} {} - {}",
                format!("[{}]", timestamp).dimmed(),
                domain,
                record.common_name.green()
            )?;
            if let Some(term) = matched {
                write!(self.writer, "{}", format!(" (matched: {})", term).yellow())?;
            }
        } else {
            write!(self.writer, "[{}] {} - {}", timestamp, domain, record.common_name)?;
            if let Some(term) = matched {
                write!(self.writer, " (matched: {})", term)?;
            }
        }
        writeln!(self.writer)?;

        if self.verbose {
            writeln!(self.writer, "    Type: {}", event.cert_type())?;
            writeln!(self.writer, "    Issuer: {}", record.issuer)?;
            writeln!(
                self.writer,
                "    Valid: {} -> {}",
                format_date(record.not_before_time()),
                format_date(record.not_after_time())
            )?;
        }
        Ok(())
    }
}

fn format_date(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Show only the first and last 4 characters of a token
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return "(not set)".to_string();
    }
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// Startup configuration summary, one line per setting
pub fn startup_summary(cfg: &Config, format: OutputFormat, verbose: bool) -> Vec<String> {
    let mut lines = vec!["=== CertStream Monitor Configuration ===".to_string()];

    if cfg.watchlist.domains.is_empty() {
        lines.push("Target Domains: ALL (no filtering)".to_string());
    } else {
        lines.push(format!("Target Domains: {}", cfg.watchlist.domains.join(", ")));
    }

    lines.push(format!("WebSocket URL: {}", cfg.certstream.url));

    if cfg.certstream.no_backoff {
        lines.push("Reconnection: Immediate (no backoff)".to_string());
    } else {
        lines.push(format!(
            "Reconnection: Base timeout: {}s, Max timeout: {}s (exponential backoff)",
            cfg.certstream.reconnect_timeout_secs, cfg.certstream.max_reconnect_timeout_secs
        ));
    }

    lines.push(format!("Buffer Size: {}", cfg.certstream.buffer_size));
    lines.push(format!("Worker Count: {}", cfg.certstream.workers));

    if cfg.stats.interval_secs > 0 {
        lines.push(format!("Stats Interval: {}s", cfg.stats.interval_secs));
    } else {
        lines.push("Stats Interval: Disabled".to_string());
    }

    match cfg.webhook.url.as_deref().filter(|_| cfg.webhook.is_enabled()) {
        Some(url) => {
            lines.push(format!("Webhook URL: {}", url));
            lines.push(format!(
                "API Token: {}",
                mask_token(cfg.webhook.api_token.as_deref().unwrap_or(""))
            ));
        }
        None => lines.push("Webhook: Disabled".to_string()),
    }

    let mode = match format {
        OutputFormat::UrlsOnly => "URLs only",
        OutputFormat::Json => "JSON lines",
        OutputFormat::Human if verbose => "Verbose",
        OutputFormat::Human => "Normal",
    };
    lines.push(format!("Output Mode: {}", mode));

    lines
}
