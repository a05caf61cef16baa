//! shellexec - run shell commands inside another local process
//!
//! A small command-execution IPC layer: a test-harness process submits
//! shell commands that execute inside a different, sandboxed process on
//! the same device, with streamed or buffered output, exit status and a
//! per-command timeout. Two transports, a filesystem mailbox and a named
//! local socket, carry the same contract behind one uniform
//! executor interface.

pub mod cli;
pub mod commands;
pub mod common;
pub mod exec;
pub mod executor;
pub mod mailbox;
pub mod proto;
pub mod socket;
pub mod watch;

// Re-export commonly used types
pub use common::{Error, Result};
pub use executor::{LocalExecutor, OutputStream, ShellExecutor, ShellRequest};
pub use mailbox::{MailboxClient, MailboxExecutor, MailboxServer};
pub use proto::{Command, CommandResult, ResultKind};
pub use socket::{SocketClient, SocketExecutor, SocketServer};
