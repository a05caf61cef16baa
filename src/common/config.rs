//! Configuration file handling

use serde::Deserialize;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Mailbox transport settings
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Default execution budget when a caller does not supply one
    #[serde(default = "default_command_ms")]
    pub command_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_ms: default_command_ms(),
        }
    }
}

fn default_command_ms() -> u64 {
    10_000
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// How long shutdown waits for in-flight handlers before cancelling them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Size of each output read while relaying to a socket client
    #[serde(default = "default_relay_chunk_bytes")]
    pub relay_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
            relay_chunk_bytes: default_relay_chunk_bytes(),
        }
    }
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}
fn default_relay_chunk_bytes() -> usize {
    4096
}

/// Mailbox transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MailboxConfig {
    /// Extra time the client waits for a response beyond the command budget,
    /// covering serialization and scheduling overhead on the server side
    #[serde(default = "default_response_slack_ms")]
    pub response_slack_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            response_slack_ms: default_response_slack_ms(),
        }
    }
}

fn default_response_slack_ms() -> u64 {
    2_000
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    })?;
                return toml::from_str(&content)
                    .map_err(|e| super::Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.command_ms, 10_000);
        assert_eq!(config.server.relay_chunk_bytes, 4096);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[server]\nshutdown_grace_ms = 500\n").unwrap();
        assert_eq!(config.server.shutdown_grace_ms, 500);
        assert_eq!(config.server.relay_chunk_bytes, 4096);
        assert_eq!(config.mailbox.response_slack_ms, 2_000);
    }
}
