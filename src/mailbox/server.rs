//! Mailbox server: watches the exchange directory and executes requests
//!
//! One persistent directory watch serves arbitrarily many concurrent
//! request/response pairs. Every inbound request is claimed atomically and
//! handled in its own task, so request N+1 can arrive and complete while
//! request N is still running.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::exec;
use crate::proto::{wire, CommandResult};
use crate::watch::{DirEventHandler, DirWatcher};

use super::{REQUEST_SUFFIX, RESPONSE_SUFFIX};

/// Server half of the mailbox transport
pub struct MailboxServer {
    exchange_dir: PathBuf,
    watcher: DirWatcher,
}

impl MailboxServer {
    /// Create the exchange directory (if needed) and start serving from it
    pub async fn start(exchange_dir: impl Into<PathBuf>) -> Result<Self> {
        let exchange_dir = exchange_dir.into();

        tokio::fs::create_dir_all(&exchange_dir)
            .await
            .map_err(|e| Error::exchange_dir(&exchange_dir, e))?;
        // All local processes may write requests and read responses; see the
        // module docs for the trust model
        set_permissions(&exchange_dir, 0o777)
            .await
            .map_err(|e| Error::exchange_dir(&exchange_dir, e))?;

        let handler = RequestHandler {
            exchange_dir: exchange_dir.clone(),
        };
        let watcher = DirWatcher::spawn(&exchange_dir, handler)?;

        // Requests written before the watch registered are still honored
        sweep_pending(&exchange_dir).await;

        tracing::info!(dir = %exchange_dir.display(), "mailbox server ready");

        Ok(Self {
            exchange_dir,
            watcher,
        })
    }

    /// The directory address clients exchange files through
    pub fn exchange_dir(&self) -> &Path {
        &self.exchange_dir
    }

    /// Stop watching for new requests
    ///
    /// Requests already claimed keep running in their own tasks and still
    /// write their responses.
    pub async fn stop(self) {
        self.watcher.stop().await;
        tracing::info!("mailbox server stopped");
    }
}

struct RequestHandler {
    exchange_dir: PathBuf,
}

#[async_trait]
impl DirEventHandler for RequestHandler {
    async fn on_close_write(&mut self, path: &Path) {
        self.accept(path);
    }

    async fn on_moved_to(&mut self, path: &Path) {
        self.accept(path);
    }
}

impl RequestHandler {
    /// Spawn an independent handling task for a request file
    fn accept(&self, path: &Path) {
        if path.extension().and_then(|e| e.to_str()) != Some(REQUEST_SUFFIX) {
            return;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return;
        };

        let request_path = path.to_path_buf();
        let response_path = self
            .exchange_dir
            .join(format!("{}.{}", stem, RESPONSE_SUFFIX));

        tokio::spawn(async move {
            handle_request(request_path, response_path).await;
        });
    }
}

/// Pick up request files that predate the watch
async fn sweep_pending(exchange_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(exchange_dir).await else {
        return;
    };
    let handler = RequestHandler {
        exchange_dir: exchange_dir.to_path_buf(),
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        handler.accept(&entry.path());
    }
}

async fn handle_request(request_path: PathBuf, response_path: PathBuf) {
    // Claim the request by renaming it: of any duplicate notifications for
    // the same file, exactly one claim succeeds
    let claimed_path = request_path.with_extension("claimed");
    match tokio::fs::rename(&request_path, &claimed_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(path = %request_path.display(), "failed to claim request: {e}");
            return;
        }
    }

    let data = match tokio::fs::read(&claimed_path).await {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(path = %claimed_path.display(), "failed to read request: {e}");
            return;
        }
    };
    let _ = tokio::fs::remove_file(&claimed_path).await;

    let result = match wire::decode_command(&data) {
        Ok(cmd) => {
            tracing::debug!(
                command = %cmd.command,
                parameters = ?cmd.parameters,
                timeout_ms = cmd.timeout_ms,
                "executing mailbox request"
            );
            exec::run_buffered(&cmd).await
        }
        Err(e) => {
            tracing::warn!("malformed mailbox request: {e}");
            CommandResult::server_error(e.to_string())
        }
    };

    tracing::info!(
        kind = %result.kind,
        exit_code = result.exit_code,
        stdout_bytes = result.stdout.len(),
        stderr_bytes = result.stderr.len(),
        "mailbox request complete"
    );

    // Readable and deletable by the requesting process
    if let Err(e) = super::publish_file(&response_path, &wire::encode_result(&result), 0o666).await
    {
        tracing::error!(path = %response_path.display(), "failed to write response: {e}");
    }
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
