//! Directory change watching for the mailbox transport

pub mod watcher;

pub use watcher::{DirEventHandler, DirWatcher};
