//! Socket server: accept loop and per-connection command handlers
//!
//! A dedicated accept loop hands each connection to an independent handler
//! task. Handlers share no state; they are grouped in one `JoinSet` so
//! shutdown can await them together and cancel whatever outlives the grace
//! period. Cancelled handlers take their child process with them
//! (`kill_on_drop`).

use std::time::Duration;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::exec;
use crate::proto::{RunCommandRequest, RunCommandResponse, EXIT_CODE_FAILED_TO_START, EXIT_CODE_TIMED_OUT};

use super::transport;

/// Server half of the socket transport
pub struct SocketServer {
    listener: transport::Listener,
    address: String,
    relay_chunk_bytes: usize,
    shutdown_grace: Duration,
}

impl SocketServer {
    /// Bind to a fresh per-instance address
    pub async fn bind() -> Result<Self> {
        Self::bind_with_config(&Config::default()).await
    }

    pub async fn bind_with_config(config: &Config) -> Result<Self> {
        let address = paths::new_socket_address();
        let listener = transport::create_listener(&address)
            .await
            .map_err(Error::Io)?;

        tracing::info!(address = %address, "socket server listening");

        Ok(Self {
            listener,
            address,
            relay_chunk_bytes: config.server.relay_chunk_bytes,
            shutdown_grace: Duration::from_millis(config.server.shutdown_grace_ms),
        })
    }

    /// The opaque address ("binder key") clients connect to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Serve connections until `shutdown` resolves
    ///
    /// The shutdown signal cancels the accept loop explicitly; closing the
    /// listening socket would not by itself unblock a pending accept.
    /// In-flight handlers get the configured grace period, then the
    /// remainder are cancelled.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut handlers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(stream) => {
                        let chunk_size = self.relay_chunk_bytes;
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, chunk_size).await {
                                tracing::error!("connection handler error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                    }
                },
            }
        }

        let in_flight = handlers.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for in-flight handlers");
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while handlers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    remaining = handlers.len(),
                    "grace period expired, cancelling remaining handlers"
                );
                handlers.shutdown().await;
            }
        }

        paths::remove_socket(&self.address)?;
        tracing::info!("socket server shutdown complete");
        Ok(())
    }
}

/// Handle one connection: one request, one process, one response stream
async fn handle_connection(stream: transport::Stream, chunk_size: usize) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let request = match read_request(&mut reader).await {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("malformed run request: {e}");
            send_response(
                &mut writer,
                &RunCommandResponse::Buffer {
                    data: e.to_string().into_bytes(),
                },
            )
            .await?;
            send_response(
                &mut writer,
                &RunCommandResponse::Exit {
                    code: EXIT_CODE_FAILED_TO_START,
                },
            )
            .await?;
            return Ok(());
        }
    };

    tracing::debug!(
        argv = ?request.argv,
        timeout_ms = request.timeout_ms,
        "accepted run request"
    );

    let mut child = match exec::spawn(&request.argv, &request.environment) {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("spawn failed: {e}");
            send_response(
                &mut writer,
                &RunCommandResponse::Buffer {
                    data: e.to_string().into_bytes(),
                },
            )
            .await?;
            send_response(
                &mut writer,
                &RunCommandResponse::Exit {
                    code: EXIT_CODE_FAILED_TO_START,
                },
            )
            .await?;
            return Ok(());
        }
    };

    // Relay output frames while the process runs, bounded by the request's
    // budget. Expiry drops the relay future mid-flight; the child and the
    // writer stay usable for the kill and the terminal frame.
    let relay = async {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
        let stream_fut = exec::stream_output(&mut child, chunk_size, tx);
        let forward_fut = async {
            while let Some(data) = rx.recv().await {
                send_response(&mut writer, &RunCommandResponse::Buffer { data }).await?;
            }
            Ok::<(), Error>(())
        };
        let (code, forwarded) = tokio::join!(stream_fut, forward_fut);
        forwarded?;
        code
    };

    match tokio::time::timeout(request.timeout(), relay).await {
        Ok(Ok(code)) => {
            tracing::info!(code, "process exited");
            send_response(&mut writer, &RunCommandResponse::Exit { code }).await?;
        }
        Ok(Err(e)) => {
            // Relay failed, most likely the client went away; make sure the
            // process does not linger, then try a terminal frame anyway
            tracing::warn!("relay error: {e}");
            let _ = child.start_kill();
            let _ = child.wait().await;
            let _ = send_response(
                &mut writer,
                &RunCommandResponse::Exit {
                    code: EXIT_CODE_FAILED_TO_START,
                },
            )
            .await;
        }
        Err(_) => {
            tracing::info!(
                timeout_ms = request.timeout_ms,
                "execution budget expired, destroying process"
            );
            let _ = child.start_kill();
            let _ = child.wait().await;
            send_response(
                &mut writer,
                &RunCommandResponse::Exit {
                    code: EXIT_CODE_TIMED_OUT,
                },
            )
            .await?;
        }
    }

    Ok(())
}

async fn read_request<R>(reader: &mut R) -> Result<RunCommandRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let data = transport::recv_frame(reader).await?;
    serde_json::from_slice(&data).map_err(|e| Error::MalformedRequest(e.to_string()))
}

async fn send_response<W>(writer: &mut W, response: &RunCommandResponse) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let data = serde_json::to_vec(response)?;
    transport::send_frame(writer, &data).await?;
    Ok(())
}
