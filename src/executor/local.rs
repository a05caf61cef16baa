//! Local pass-through backend
//!
//! Runs the command in this process's own context, standing in for the
//! platform's built-in shell-execution facility. Useful when caller and
//! target context are the same, and as the reference behavior the IPC
//! backends are measured against.

use async_trait::async_trait;

use crate::common::Result;
use crate::exec;
use crate::executor::{OutputStream, ShellExecutor, ShellRequest};

/// Bytes per streamed chunk
const CHUNK_SIZE: usize = 4096;

#[derive(Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShellExecutor for LocalExecutor {
    async fn execute(&self, request: ShellRequest) -> Result<OutputStream> {
        let argv = exec::build_argv(
            &request.command,
            &request.parameters,
            request.through_shell,
        );
        let mut child = exec::spawn(&argv, &request.environment)?;

        let (tx, stream) = OutputStream::channel(16);
        let timeout = request.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, exec::stream_output(&mut child, CHUNK_SIZE, tx))
                .await
            {
                Ok(Ok(code)) => tracing::debug!(code, "local command exited"),
                Ok(Err(e)) => tracing::warn!("local command relay error: {e}"),
                Err(_) => {
                    tracing::info!("local command timed out, destroying process");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        });

        Ok(stream)
    }
}
