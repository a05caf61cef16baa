//! Request/response message types for both transports

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code placeholder carried when a result kind has no real exit code
pub const NO_EXIT_CODE: i32 = -1;

/// Socket-transport sentinel: the process could not be started; the lone
/// buffer frame on the connection carries the diagnostic text
pub const EXIT_CODE_FAILED_TO_START: i32 = -1;

/// Socket-transport sentinel: the execution budget expired and the process
/// was destroyed
pub const EXIT_CODE_TIMED_OUT: i32 = -2;

/// How a command's lifecycle terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// The process ran to completion; the exit code is meaningful
    Exited,
    /// The execution budget expired; output captured so far is attached
    TimedOut,
    /// The server could not parse the request or manage the process
    ServerError,
    /// The client could not parse the response, or the transport dropped
    ClientError,
}

impl ResultKind {
    /// Wire tag for the mailbox binary encoding
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Exited => 0,
            Self::TimedOut => 1,
            Self::ServerError => 2,
            Self::ClientError => 3,
        }
    }

    /// Parse a wire tag back into a kind
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Exited),
            1 => Some(Self::TimedOut),
            2 => Some(Self::ServerError),
            3 => Some(Self::ClientError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited => write!(f, "exited"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::ServerError => write!(f, "server_error"),
            Self::ClientError => write!(f, "client_error"),
        }
    }
}

/// One shell command as carried by the mailbox transport
///
/// Immutable once sent; the request file holds exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program or shell snippet to run
    pub command: String,
    /// Ordered parameter list
    pub parameters: Vec<String>,
    /// Extra environment variables (keys unique)
    pub environment: HashMap<String, String>,
    /// Run through `sh -c` with the parameters joined onto the command
    pub through_shell: bool,
    /// Merge stderr into the stdout capture
    pub redirect_stderr: bool,
    /// Execution budget in milliseconds, end-to-end from acceptance
    pub timeout_ms: u64,
}

impl Command {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            parameters: Vec::new(),
            environment: HashMap::new(),
            through_shell: false,
            redirect_stderr: false,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Terminal result of one Command, produced exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub kind: ResultKind,
    /// Meaningful only when `kind` is `Exited`; `NO_EXIT_CODE` otherwise
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandResult {
    pub fn exited(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            kind: ResultKind::Exited,
            exit_code,
            stdout,
            stderr,
        }
    }

    /// Timeout result carrying whatever output was captured before expiry
    pub fn timed_out(stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            kind: ResultKind::TimedOut,
            exit_code: NO_EXIT_CODE,
            stdout,
            stderr,
        }
    }

    /// Server-side fault; the diagnostic text travels in the stderr capture
    pub fn server_error(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::ServerError,
            exit_code: NO_EXIT_CODE,
            stdout: Vec::new(),
            stderr: diagnostic.into().into_bytes(),
        }
    }

    /// Client-side fault; the diagnostic text travels in the stderr capture
    pub fn client_error(diagnostic: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::ClientError,
            exit_code: NO_EXIT_CODE,
            stdout: Vec::new(),
            stderr: diagnostic.into().into_bytes(),
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// One command execution as carried by the socket transport
///
/// Sent once per connection, immediately after connecting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCommandRequest {
    /// Argument vector; `argv[0]` is the program
    pub argv: Vec<String>,
    /// Extra environment variables (keys unique)
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Execution budget in milliseconds
    pub timeout_ms: u64,
}

impl RunCommandRequest {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One frame of the socket transport's response stream
///
/// A connection carries zero or more `Buffer` frames followed by exactly
/// one `Exit` frame, never both in one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunCommandResponse {
    /// A chunk of process output, in production order
    Buffer { data: Vec<u8> },
    /// The terminal signal: a real exit code, or a sentinel
    Exit { code: i32 },
}
