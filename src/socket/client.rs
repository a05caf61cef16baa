//! Socket client: one connection per command, streamed responses
//!
//! The client enforces its own end-to-end timeout spanning connect, send
//! and drain. Connect latency is deducted from the budget so a slow
//! connection cannot silently eat into execution time.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::exec;
use crate::executor::{OutputStream, ShellExecutor, ShellRequest};
use crate::proto::{RunCommandRequest, RunCommandResponse};

use super::transport;

/// Extra drain time beyond the execution budget. The server owns the
/// timed-out verdict; this margin lets its terminal frame arrive before the
/// client-side backstop fires.
const TERMINAL_MARGIN: Duration = Duration::from_millis(2000);

/// Client half of the socket transport
pub struct SocketClient {
    address: String,
}

impl SocketClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Execute one request, forwarding output chunks to `sink` as they
    /// arrive, and return the terminal exit code (sentinels included)
    ///
    /// A connection that drops before the terminal frame yields
    /// [`Error::ConnectionClosed`]; end-of-stream is detected structurally
    /// from the framed reader's `UnexpectedEof`, never from message text.
    pub async fn execute(
        &self,
        request: &RunCommandRequest,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<i32> {
        let budget = request.timeout();
        let started = Instant::now();

        let stream = tokio::time::timeout(budget, transport::connect(&self.address))
            .await
            .map_err(|_| Error::Timeout(request.timeout_ms))?
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound
                    || e.kind() == io::ErrorKind::ConnectionRefused
                {
                    Error::ServerNotRunning(self.address.clone())
                } else {
                    Error::ConnectFailed(e)
                }
            })?;

        let remaining = budget.saturating_sub(started.elapsed()) + TERMINAL_MARGIN;
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let exchange = async {
            let data = serde_json::to_vec(request)?;
            transport::send_frame(&mut writer, &data).await?;
            // Half-close: the request is the only outbound message
            writer.shutdown().await?;

            loop {
                let frame = transport::recv_frame(&mut reader).await.map_err(|e| {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        Error::ConnectionClosed
                    } else {
                        Error::Io(e)
                    }
                })?;
                let response: RunCommandResponse = serde_json::from_slice(&frame)
                    .map_err(|e| Error::MalformedResponse(e.to_string()))?;

                match response {
                    RunCommandResponse::Buffer { data } => {
                        // A dropped sink means the caller stopped listening;
                        // keep draining to the terminal frame regardless
                        let _ = sink.send(data).await;
                    }
                    RunCommandResponse::Exit { code } => return Ok(code),
                }
            }
        };

        tokio::time::timeout(remaining, exchange)
            .await
            .map_err(|_| Error::Timeout(request.timeout_ms))?
    }

    /// Execute one request and buffer all of its output
    pub async fn execute_buffered(&self, request: &RunCommandRequest) -> Result<(Vec<u8>, i32)> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
        let collect = async {
            let mut buf = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            buf
        };
        let (code, buf) = tokio::join!(self.execute(request, tx), collect);
        Ok((buf, code?))
    }
}

/// Socket-backed implementation of the uniform execution interface
pub struct SocketExecutor {
    address: String,
}

impl SocketExecutor {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl ShellExecutor for SocketExecutor {
    async fn execute(&self, request: ShellRequest) -> Result<OutputStream> {
        let argv = exec::build_argv(
            &request.command,
            &request.parameters,
            request.through_shell,
        );
        let run_request = RunCommandRequest {
            argv,
            environment: request.environment,
            timeout_ms: request.timeout.as_millis() as u64,
        };

        let client = SocketClient::new(self.address.clone());
        let (tx, stream) = OutputStream::channel(16);
        tokio::spawn(async move {
            match client.execute(&run_request, tx).await {
                Ok(code) => tracing::debug!(code, "socket command finished"),
                Err(e) => tracing::warn!("socket command failed: {e}"),
            }
        });

        Ok(stream)
    }
}
