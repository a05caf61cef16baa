//! Cross-platform local socket layer
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate. Frames are length-prefixed: a u32 LE byte
//! count followed by the payload.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::paths;

/// Maximum frame size (10 MB)
const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

// Platform-specific imports and type aliases
#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{
        prelude::*,
        Listener, Stream,
    };
    pub use interprocess::local_socket::{
        GenericFilePath, ListenerOptions,
    };
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{
        prelude::*,
        Listener, Stream,
    };
    pub use interprocess::local_socket::{
        GenericNamespaced, ListenerOptions,
    };
}

use platform::*;

/// Re-export Stream for use in other modules
pub use platform::{Listener, Stream};

/// Create a listener bound to the given opaque address
pub async fn create_listener(address: &str) -> io::Result<Listener> {
    // Ensure the socket directory exists (Unix) and clean up a stale socket
    paths::ensure_socket_dir(address)?;
    paths::remove_socket(address)?;

    #[cfg(unix)]
    let listener = {
        let name = address.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new()
            .name(name)
            .create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let name = address.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new()
            .name(name)
            .create_tokio()?
    };

    // The cooperating process may run under another uid; the same-device
    // test-only trust model applies as for the mailbox exchange directory
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(address, std::fs::Permissions::from_mode(0o666))?;
    }

    Ok(listener)
}

/// Connect to a server's socket by its opaque address
pub async fn connect(address: &str) -> io::Result<Stream> {
    #[cfg(unix)]
    let stream = {
        let name = address.to_fs_name::<GenericFilePath>()?;
        Stream::connect(name).await?
    };

    #[cfg(windows)]
    let stream = {
        let name = address.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(name).await?
    };

    Ok(stream)
}

/// Send a length-prefixed frame
pub async fn send_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Frame too large",
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed frame
pub async fn recv_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buf = Vec::new();
        send_frame(&mut buf, b"payload").await.unwrap();

        let mut reader = Cursor::new(buf);
        let frame = recv_frame(&mut reader).await.unwrap();
        assert_eq!(frame, b"payload");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut reader = Cursor::new(buf);
        assert!(recv_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_unexpected_eof() {
        let mut buf = Vec::new();
        send_frame(&mut buf, b"payload").await.unwrap();
        buf.truncate(buf.len() - 3);

        let mut reader = Cursor::new(buf);
        let err = recv_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
