// src/lib.rs
// Library interface for certstream-monitor
pub mod backoff;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod matcher;
pub mod monitor;
pub mod notifier;
pub mod output;
pub mod queue;
pub mod shutdown;
pub mod stats;
pub mod types;
