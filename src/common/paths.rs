//! Socket and exchange-directory addressing
//!
//! Unix/macOS: Unix domain sockets under $XDG_RUNTIME_DIR or /tmp
//! Windows: named pipes (handled by the interprocess crate)
//!
//! Both transports are addressed by an opaque string handed to the peer
//! out-of-band (a CLI flag or the SHELLEXEC_ADDRESS environment variable):
//! the socket name for the socket transport, the exchange directory path
//! for the mailbox transport.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Name used for sockets, directories and config
const APP_NAME: &str = "shellexec";

/// Environment variable carrying a server address to the client side
pub const ADDRESS_ENV_VAR: &str = "SHELLEXEC_ADDRESS";

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

/// Directory that holds per-instance socket files
#[cfg(unix)]
fn socket_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    // Fallback to /tmp with uid for security
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

/// Generate a fresh, unique socket address for a new server instance
///
/// The returned string is the opaque address handed to clients; no two
/// server instances on the same device ever collide.
#[cfg(unix)]
pub fn new_socket_address() -> String {
    let n = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
    socket_dir()
        .join(format!("server-{}-{}.sock", std::process::id(), n))
        .to_string_lossy()
        .into_owned()
}

#[cfg(windows)]
pub fn new_socket_address() -> String {
    let n = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", APP_NAME, std::process::id(), n)
}

/// Ensure the directory for a socket address exists
///
/// The cooperating process may run under a different uid, so the directory
/// must stay traversable; access control is the socket file's own mode.
#[cfg(unix)]
pub fn ensure_socket_dir(address: &str) -> io::Result<()> {
    let path = Path::new(address);
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid socket path"))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}

#[cfg(windows)]
pub fn ensure_socket_dir(_address: &str) -> io::Result<()> {
    // Named pipes don't need a directory on Windows
    Ok(())
}

/// Remove the socket file for an address if it exists (for cleanup)
#[cfg(unix)]
pub fn remove_socket(address: &str) -> io::Result<()> {
    let path = Path::new(address);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket(_address: &str) -> io::Result<()> {
    // Named pipes are automatically cleaned up on Windows
    Ok(())
}

/// Default well-known exchange directory for the mailbox transport
///
/// Shared by every local process, so it lives in a world-accessible
/// location rather than a per-user runtime dir.
pub fn default_exchange_dir() -> PathBuf {
    std::env::temp_dir().join(format!("{}-exchange", APP_NAME))
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/shellexec/`
/// - macOS: `~/Library/Application Support/shellexec/`
/// - Windows: `%APPDATA%\shellexec\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addresses_are_unique() {
        let a = new_socket_address();
        let b = new_socket_address();
        assert_ne!(a, b);
    }

    #[test]
    fn test_exchange_dir_is_valid() {
        let dir = default_exchange_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }
}
