//! Message model for both transports
//!
//! Two independent encodings on purpose: the mailbox transport carries one
//! hand-rolled binary message per file (`wire`), the socket transport
//! carries length-delimited serde messages with many frames per connection
//! (`types` + the socket transport's framing).

pub mod types;
pub mod wire;

pub use types::{
    Command, CommandResult, ResultKind, RunCommandRequest, RunCommandResponse,
    EXIT_CODE_FAILED_TO_START, EXIT_CODE_TIMED_OUT, NO_EXIT_CODE,
};
