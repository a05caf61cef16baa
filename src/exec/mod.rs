//! Process spawning and output capture
//!
//! One OS process per request, owned by the handler task that created it.
//! Output is read incrementally so a timeout can report whatever had been
//! produced up to that point instead of draining to EOF against a process
//! that may still be writing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command as OsCommand};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};
use crate::proto::{Command, CommandResult, NO_EXIT_CODE};

/// Bytes per incremental output read
const READ_CHUNK_SIZE: usize = 8192;

/// How long to keep draining the pipes after the process itself has exited.
/// A background child can inherit the pipes and hold them open forever;
/// without this bound the read loop would never terminate.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Resolve the shell used for through-shell execution
fn shell_program() -> PathBuf {
    which::which("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"))
}

/// Build the argument vector for a command, optionally wrapped as
/// `sh -c "<command> <parameters...>"`
pub fn build_argv(command: &str, parameters: &[String], through_shell: bool) -> Vec<String> {
    if through_shell {
        let mut line = command.to_string();
        for param in parameters {
            line.push(' ');
            line.push_str(param);
        }
        vec![
            shell_program().to_string_lossy().into_owned(),
            "-c".to_string(),
            line,
        ]
    } else {
        let mut argv = Vec::with_capacity(parameters.len() + 1);
        argv.push(command.to_string());
        argv.extend(parameters.iter().cloned());
        argv
    }
}

/// Spawn an argument vector with piped stdout/stderr and extra environment
///
/// The child is killed if its handle is dropped, so an aborted handler task
/// never leaks its process.
pub fn spawn(argv: &[String], environment: &HashMap<String, String>) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::SpawnFailed("empty argument vector".to_string()))?;

    let mut cmd = OsCommand::new(program);
    cmd.args(args)
        .envs(environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn()
        .map_err(|e| Error::SpawnFailed(format!("{}: {}", program, e)))
}

/// Run a mailbox command to completion, capturing output into buffers
///
/// Never returns an error: every fault becomes a terminal [`CommandResult`]
/// so the requesting side always receives exactly one result.
pub async fn run_buffered(cmd: &Command) -> CommandResult {
    let argv = build_argv(&cmd.command, &cmd.parameters, cmd.through_shell);
    let mut child = match spawn(&argv, &cmd.environment) {
        Ok(child) => child,
        Err(e) => return CommandResult::server_error(e.to_string()),
    };

    let Some(mut stdout_reader) = child.stdout.take() else {
        return CommandResult::server_error("child stdout was not piped");
    };
    let Some(mut stderr_reader) = child.stderr.take() else {
        return CommandResult::server_error("child stderr was not piped");
    };

    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();
    let mut tmp_stdout = [0u8; READ_CHUNK_SIZE];
    let mut tmp_stderr = [0u8; READ_CHUNK_SIZE];
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut exit_status = None;

    let timeout_fut = tokio::time::sleep(cmd.timeout());
    tokio::pin!(timeout_fut);

    // Drive the timeout, both pipes and process exit concurrently; the
    // buffers always hold exactly what has been produced so far
    while stdout_open || stderr_open || exit_status.is_none() {
        tokio::select! {
            _ = &mut timeout_fut => {
                if exit_status.is_some() {
                    // Exited, but the pipes are still held open (inherited by
                    // a background child); stop draining
                    break;
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                if cmd.redirect_stderr {
                    stdout.append(&mut stderr);
                }
                return CommandResult::timed_out(stdout, stderr);
            }
            read = stdout_reader.read(&mut tmp_stdout), if stdout_open => match read {
                Ok(0) => stdout_open = false,
                Ok(n) => stdout.extend_from_slice(&tmp_stdout[..n]),
                Err(e) => {
                    tracing::warn!("stdout read error: {e}");
                    stdout_open = false;
                }
            },
            read = stderr_reader.read(&mut tmp_stderr), if stderr_open => match read {
                Ok(0) => stderr_open = false,
                Ok(n) => {
                    let sink = if cmd.redirect_stderr { &mut stdout } else { &mut stderr };
                    sink.extend_from_slice(&tmp_stderr[..n]);
                }
                Err(e) => {
                    tracing::warn!("stderr read error: {e}");
                    stderr_open = false;
                }
            },
            status = child.wait(), if exit_status.is_none() => match status {
                Ok(status) => {
                    exit_status = Some(status);
                    timeout_fut.as_mut().reset(Instant::now() + PIPE_DRAIN_GRACE);
                }
                Err(e) => return CommandResult::server_error(format!("wait failed: {e}")),
            },
        }
    }

    let Some(status) = exit_status else {
        return CommandResult::server_error("process exit status unavailable");
    };
    CommandResult::exited(status.code().unwrap_or(NO_EXIT_CODE), stdout, stderr)
}

/// Forward a child's combined output to `sink` chunk by chunk, then reap it
///
/// Returns the exit code once both pipes reach EOF (or the post-exit drain
/// grace expires). Dropping the receiving end cancels the command: the
/// caller gets [`Error::ConnectionClosed`] and is expected to destroy the
/// child.
pub async fn stream_output(
    child: &mut Child,
    chunk_size: usize,
    sink: mpsc::Sender<Vec<u8>>,
) -> Result<i32> {
    let Some(mut stdout_reader) = child.stdout.take() else {
        return Err(Error::Internal("child stdout was not piped".to_string()));
    };
    let Some(mut stderr_reader) = child.stderr.take() else {
        return Err(Error::Internal("child stderr was not piped".to_string()));
    };

    let mut out_buf = vec![0u8; chunk_size.max(1)];
    let mut err_buf = vec![0u8; chunk_size.max(1)];
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut exit_code: Option<i32> = None;

    // Re-armed to the drain grace once the process exits; the caller's
    // overall timeout bounds everything before that
    let drain_deadline = tokio::time::sleep(Duration::from_secs(3600));
    tokio::pin!(drain_deadline);

    while stdout_open || stderr_open {
        tokio::select! {
            status = child.wait(), if exit_code.is_none() => {
                let status = status?;
                exit_code = Some(status.code().unwrap_or(NO_EXIT_CODE));
                drain_deadline.as_mut().reset(Instant::now() + PIPE_DRAIN_GRACE);
            }
            _ = &mut drain_deadline, if exit_code.is_some() => break,
            read = stdout_reader.read(&mut out_buf), if stdout_open => match read {
                Ok(0) => stdout_open = false,
                Ok(n) => {
                    if sink.send(out_buf[..n].to_vec()).await.is_err() {
                        return Err(Error::ConnectionClosed);
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            },
            read = stderr_reader.read(&mut err_buf), if stderr_open => match read {
                Ok(0) => stderr_open = false,
                Ok(n) => {
                    if sink.send(err_buf[..n].to_vec()).await.is_err() {
                        return Err(Error::ConnectionClosed);
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            },
        }
    }

    match exit_code {
        Some(code) => Ok(code),
        None => {
            let status = child.wait().await?;
            Ok(status.code().unwrap_or(NO_EXIT_CODE))
        }
    }
}
