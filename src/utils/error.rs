//! The `error` module defines the error types used within the harness.
//!
//! Configuration problems are fatal and surface before any network activity.
//! Everything tied to a single session (connect, subscribe, disconnect,
//! timeouts) is recorded against that session and never aborts the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid or missing settings, or a non-positive client count.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("client {index} failed to connect: {reason}")]
    Connect { index: usize, reason: String },

    #[error("client {index} failed to subscribe: {reason}")]
    Subscribe { index: usize, reason: String },

    #[error("client {index} failed to disconnect: {reason}")]
    Disconnect { index: usize, reason: String },

    #[error("client {index} timed out during {operation}")]
    Timeout {
        index: usize,
        operation: &'static str,
    },

    #[error("client {index} {operation} cancelled by shutdown")]
    Cancelled {
        index: usize,
        operation: &'static str,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode run report: {0}")]
    Json(#[from] serde_json::Error),
}
