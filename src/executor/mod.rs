//! Uniform command-execution interface
//!
//! One capability: "run this command, optionally through a shell, with
//! this environment, within this timeout", with interchangeable backends:
//! the mailbox transport, the socket transport, and a local pass-through.
//! The backend is chosen once when the executor is composed, never per
//! call.

pub mod local;

pub use local::LocalExecutor;

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::Result;

/// One command execution as seen by callers of the uniform interface
#[derive(Debug, Clone)]
pub struct ShellRequest {
    /// The program or shell snippet to run
    pub command: String,
    /// Ordered parameter list
    pub parameters: Vec<String>,
    /// Extra environment variables (keys unique)
    pub environment: HashMap<String, String>,
    /// Run through `sh -c` with the parameters joined onto the command
    pub through_shell: bool,
    /// Execution budget, end-to-end from submission
    pub timeout: Duration,
}

impl ShellRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: Vec::new(),
            environment: HashMap::new(),
            through_shell: false,
            timeout: Duration::from_millis(
                crate::common::config::Timeouts::default().command_ms,
            ),
        }
    }

    pub fn parameters(mut self, parameters: Vec<String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn through_shell(mut self, through_shell: bool) -> Self {
        self.through_shell = through_shell;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Incremental byte output of one command execution
///
/// Chunks arrive in production order; the stream ends when the command's
/// lifecycle terminates (or its relay is cut short by a timeout).
pub struct OutputStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl OutputStream {
    /// Create a sender/stream pair for a backend to feed
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// Next chunk of output, or `None` once the stream has ended
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Fully drain the stream and decode it as UTF-8 text
    pub async fn drain_to_string(mut self) -> String {
        let mut buf = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl futures_util::Stream for OutputStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The one capability every backend provides
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// Execute a command, streaming its output incrementally
    async fn execute(&self, request: ShellRequest) -> Result<OutputStream>;

    /// Execute a command, fully draining its output into UTF-8 text
    async fn execute_to_string(&self, request: ShellRequest) -> Result<String> {
        Ok(self.execute(request).await?.drain_to_string().await)
    }
}
