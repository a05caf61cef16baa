//! Socket transport: execute-and-stream over a named local socket
//!
//! The server listens on a per-instance local socket whose opaque address
//! ("binder key") is handed to the cooperating process out-of-band. Each
//! connection carries exactly one [`crate::proto::RunCommandRequest`]
//! followed by a stream of [`crate::proto::RunCommandResponse`] frames.

pub mod client;
pub mod server;
pub mod transport;

pub use client::{SocketClient, SocketExecutor};
pub use server::SocketServer;
