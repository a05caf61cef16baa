//! Mailbox transport: request/response exchange through a shared directory
//!
//! Two processes that share no memory or sockets but do share a filesystem
//! exchange exactly one `Command`/`CommandResult` pair per request through
//! uniquely named files:
//! ```text
//! <exchange_dir>/<id>.request    written by the client
//! <exchange_dir>/<id>.response   written by the server
//! ```
//! Each side picks the other's file up from a close-after-write
//! notification, reads it and deletes it. Filename uniqueness is the only
//! synchronization: every file has exactly one writer and one reader.
//!
//! The exchange directory is opened to all local processes. That is an
//! acceptable trust model only because this is an on-device, test-only
//! mechanism; any process able to abuse it already has equivalent
//! test-harness privileges.

pub mod client;
pub mod server;

pub use client::{MailboxClient, MailboxExecutor};
pub use server::MailboxServer;

use std::sync::atomic::{AtomicU64, Ordering};

/// Filename suffix for request files
pub(crate) const REQUEST_SUFFIX: &str = "request";
/// Filename suffix for response files
pub(crate) const RESPONSE_SUFFIX: &str = "response";

static NEXT_EXCHANGE: AtomicU64 = AtomicU64::new(0);

/// Generate an exchange id unique across every live process on the device
///
/// The pid disambiguates between processes, the counter between concurrent
/// requests within one process.
pub(crate) fn next_exchange_id() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        NEXT_EXCHANGE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Publish a file into the exchange directory
///
/// Writes and chmods under a staging name, then renames into place, so the
/// peer's watch only ever sees a complete file with its final permissions.
pub(crate) async fn publish_file(
    path: &std::path::Path,
    data: &[u8],
    mode: u32,
) -> std::io::Result<()> {
    let staged = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(format!("{ext}-tmp")),
        None => path.with_extension("tmp"),
    };
    tokio::fs::write(&staged, data).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(mode)).await?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    tokio::fs::rename(&staged, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exchange_ids_never_collide() {
        let ids: Vec<String> = (0..1000).map(|_| next_exchange_id()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn test_exchange_ids_unique_across_tasks() {
        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(tokio::spawn(async {
                (0..100).map(|_| next_exchange_id()).collect::<Vec<_>>()
            }));
        }
        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all.insert(id), "duplicate exchange id");
            }
        }
    }
}
