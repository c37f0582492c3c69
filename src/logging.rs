// src/logging.rs
//! Logging capability used by the ingestion pipeline.
//!
//! Pipeline components log through the [`Logger`] trait so embedders can
//! route or silence them. The default [`TracingLogger`] forwards to `tracing`
//! and swallows error messages matching a configurable list of benign
//! transport-close texts.

use tracing_subscriber::EnvFilter;

/// Error substrings produced by ordinary WebSocket teardown
pub const DEFAULT_SUPPRESSED_ERRORS: &[&str] = &[
    "Connection reset without closing handshake",
    "Trying to work with closed connection",
    "Connection closed normally",
];

pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default [`Logger`] backed by `tracing`.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    suppressed: Vec<String>,
}

impl TracingLogger {
    pub fn new(suppressed: Vec<String>) -> Self {
        let suppressed = suppressed.into_iter().filter(|s| !s.is_empty()).collect();
        Self { suppressed }
    }

    pub fn suppressed(&self) -> &[String] {
        &self.suppressed
    }

    pub fn is_suppressed(&self, message: &str) -> bool {
        self.suppressed.iter().any(|s| message.contains(s.as_str()))
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSED_ERRORS.iter().map(|s| s.to_string()).collect())
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "certstream", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "certstream", "{}", message);
    }

    fn error(&self, message: &str) {
        if self.is_suppressed(message) {
            tracing::trace!(target: "certstream", "suppressed: {}", message);
            return;
        }
        tracing::error!(target: "certstream", "{}", message);
    }
}

/// Pick the log level: `-v` beats `-q` beats the configured level.
pub fn resolve_level<'a>(verbose: bool, quiet: bool, configured: &'a str) -> &'a str {
    if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        configured
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
