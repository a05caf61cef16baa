//! Mailbox client: writes a request file, watches for the response
//!
//! The response watch is registered before the request file is written, so
//! even an instantly produced response cannot be missed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::executor::{OutputStream, ShellExecutor, ShellRequest};
use crate::proto::{wire, Command, CommandResult, ResultKind};
use crate::watch::{DirEventHandler, DirWatcher};

use super::{next_exchange_id, REQUEST_SUFFIX, RESPONSE_SUFFIX};

/// Client half of the mailbox transport
pub struct MailboxClient {
    exchange_dir: PathBuf,
    /// Wait margin beyond the command budget before giving up on a response
    response_slack: Duration,
}

impl MailboxClient {
    pub fn new(exchange_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(exchange_dir, &Config::default())
    }

    pub fn with_config(exchange_dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            exchange_dir: exchange_dir.into(),
            response_slack: Duration::from_millis(config.mailbox.response_slack_ms),
        }
    }

    /// Execute one command, returning its terminal result
    ///
    /// Transport-level faults are folded into the result: an unparsable or
    /// missing response yields a `ClientError` kind rather than an error,
    /// so a result is produced for every request. `Err` is reserved for
    /// failures to even submit the request.
    pub async fn execute(&self, cmd: &Command) -> Result<CommandResult> {
        let id = next_exchange_id();
        let request_path = self
            .exchange_dir
            .join(format!("{}.{}", id, REQUEST_SUFFIX));
        let response_path = self
            .exchange_dir
            .join(format!("{}.{}", id, RESPONSE_SUFFIX));

        let (tx, rx) = oneshot::channel();
        let handler = ResponseHandler {
            target: response_path.clone(),
            tx: Some(tx),
        };
        let watcher = DirWatcher::spawn(&self.exchange_dir, handler)?;

        // World-accessible so the server may read and delete it
        if let Err(e) = super::publish_file(&request_path, &wire::encode_command(cmd), 0o666).await
        {
            watcher.stop().await;
            return Err(Error::exchange_dir(&request_path, e));
        }
        tracing::debug!(id = %id, command = %cmd.command, "mailbox request sent");

        let wait = cmd.timeout() + self.response_slack;
        let outcome = tokio::time::timeout(wait, rx).await;
        watcher.stop().await;

        let result = match outcome {
            Ok(Ok(data)) => match wire::decode_result(&data) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(id = %id, "malformed mailbox response: {e}");
                    CommandResult::client_error(format!("malformed response: {e}"))
                }
            },
            Ok(Err(_)) => CommandResult::client_error("response watch ended unexpectedly"),
            Err(_) => {
                // Withdraw the request in case the server never picked it up
                let _ = tokio::fs::remove_file(&request_path).await;
                tracing::warn!(id = %id, "no mailbox response within {} ms", wait.as_millis());
                CommandResult::client_error(format!("no response within {} ms", wait.as_millis()))
            }
        };

        Ok(result)
    }
}

struct ResponseHandler {
    target: PathBuf,
    tx: Option<oneshot::Sender<Vec<u8>>>,
}

#[async_trait]
impl DirEventHandler for ResponseHandler {
    async fn on_close_write(&mut self, path: &Path) {
        self.pick_up(path).await;
    }

    async fn on_moved_to(&mut self, path: &Path) {
        self.pick_up(path).await;
    }
}

impl ResponseHandler {
    async fn pick_up(&mut self, path: &Path) {
        // The watch covers only the exchange directory, so the unique
        // filename is the whole identity
        if path.file_name() != self.target.file_name() || self.tx.is_none() {
            return;
        }
        match tokio::fs::read(path).await {
            Ok(data) => {
                let _ = tokio::fs::remove_file(path).await;
                if let Some(tx) = self.tx.take() {
                    let _ = tx.send(data);
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read response: {e}");
            }
        }
    }
}

/// Mailbox-backed implementation of the uniform execution interface
///
/// Output is buffered by the transport, so the stream yields the whole
/// capture as a single chunk once the result arrives.
pub struct MailboxExecutor {
    client: MailboxClient,
}

impl MailboxExecutor {
    pub fn new(exchange_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: MailboxClient::new(exchange_dir),
        }
    }

    pub fn with_config(exchange_dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            client: MailboxClient::with_config(exchange_dir, config),
        }
    }
}

#[async_trait]
impl ShellExecutor for MailboxExecutor {
    async fn execute(&self, request: ShellRequest) -> Result<OutputStream> {
        let mut cmd = Command::new(request.command, request.timeout);
        cmd.parameters = request.parameters;
        cmd.environment = request.environment;
        cmd.through_shell = request.through_shell;
        cmd.redirect_stderr = true;

        let result = self.client.execute(&cmd).await?;
        match result.kind {
            ResultKind::Exited | ResultKind::TimedOut => {
                let (tx, stream) = OutputStream::channel(1);
                if !result.stdout.is_empty() {
                    let _ = tx.send(result.stdout).await;
                }
                Ok(stream)
            }
            ResultKind::ServerError | ResultKind::ClientError => {
                Err(Error::Communication(result.stderr_lossy()))
            }
        }
    }
}
