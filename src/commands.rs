//! CLI command definitions
//!
//! Defines the clap commands for the shellexec CLI.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run an execution server and print its address
    Serve {
        /// Transport to serve
        #[arg(long, value_enum, default_value = "socket")]
        transport: TransportKind,

        /// Exchange directory for the mailbox transport
        /// (defaults to a well-known location)
        #[arg(long)]
        exchange_dir: Option<PathBuf>,
    },

    /// Execute a command through a backend
    Run {
        /// The program or shell snippet to run
        command: String,

        /// Parameters passed to the command
        #[arg(last = true)]
        parameters: Vec<String>,

        /// Backend to execute through
        #[arg(long, value_enum, default_value = "local")]
        via: BackendKind,

        /// Server address: binder key (socket) or exchange directory
        /// (mailbox); falls back to $SHELLEXEC_ADDRESS
        #[arg(long)]
        address: Option<String>,

        /// Extra environment variables as KEY=VALUE
        /// Can be specified multiple times: -e A=1 -e B=2
        #[arg(long = "env", short = 'e')]
        env: Vec<String>,

        /// Run the command through the shell
        #[arg(long)]
        shell: bool,

        /// Execution budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// Which server transport to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Socket,
    Mailbox,
}

/// Which backend a client command executes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Local,
    Socket,
    Mailbox,
}
