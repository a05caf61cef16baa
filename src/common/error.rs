//! Error types for the shell execution layer
//!
//! Every fault that crosses the process boundary is converted into one of
//! the wire-level result kinds before it is sent; the variants here cover
//! everything that can go wrong on either side of that boundary.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the shell execution layer
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("No server listening at '{0}'. Start one with 'shellexec serve'")]
    ServerNotRunning(String),

    #[error("Failed to connect to server: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("Server communication error: {0}")]
    Communication(String),

    #[error("Connection closed before a terminal response arrived")]
    ConnectionClosed,

    // === Execution Errors ===
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(String),

    #[error("Command timed out after {0} ms")]
    Timeout(u64),

    // === Wire Protocol Errors ===
    #[error("Malformed request payload: {0}")]
    MalformedRequest(String),

    #[error("Malformed response payload: {0}")]
    MalformedResponse(String),

    // === Mailbox Errors ===
    #[error("Exchange directory error at '{path}': {error}")]
    ExchangeDir { path: String, error: String },

    #[error("Directory watch error: {0}")]
    Watch(#[from] notify::Error),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an exchange directory error
    pub fn exchange_dir(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::ExchangeDir {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

}
