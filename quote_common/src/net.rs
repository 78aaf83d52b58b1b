//! Transport addresses and socket plumbing shared by publisher and subscriber.
//!
//! The feed runs over a local stream socket: a Unix domain socket where the
//! platform has one (`ipc://<path>`), or a loopback TCP socket otherwise
//! (`tcp://127.0.0.1:<port>`). Binding `tcp://127.0.0.1:0` lets the OS pick the
//! port; the bound address is what subscribers must be told about.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

use log::info;

use crate::error::FeedError;
use crate::result::Result;

/// File name of the default IPC endpoint inside the temp directory.
pub const DEFAULT_IPC_FILE: &str = "quote_feed_ipc";

/// Scheme prefix of Unix domain socket addresses.
const IPC_SCHEME: &str = "ipc://";
/// Scheme prefix of loopback TCP addresses.
const TCP_SCHEME: &str = "tcp://";

/// Broadcast address of a feed session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedAddress {
    /// Filesystem path of a Unix domain socket.
    Ipc(PathBuf),
    /// TCP socket address; port 0 asks the OS for an ephemeral port.
    Tcp(SocketAddr),
}

impl FeedAddress {
    /// Platform default: an IPC path in the temp directory on unix, an
    /// ephemeral loopback TCP port elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(unix) {
            FeedAddress::Ipc(std::env::temp_dir().join(DEFAULT_IPC_FILE))
        } else {
            FeedAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }

    /// Ephemeral loopback TCP address.
    pub fn loopback() -> Self {
        FeedAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}

impl fmt::Display for FeedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedAddress::Ipc(path) => write!(f, "{}{}", IPC_SCHEME, path.display()),
            FeedAddress::Tcp(addr) => write!(f, "{}{}", TCP_SCHEME, addr),
        }
    }
}

impl FromStr for FeedAddress {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix(IPC_SCHEME) {
            if path.is_empty() {
                return Err(FeedError::InvalidAddress(s.to_string()));
            }
            Ok(FeedAddress::Ipc(PathBuf::from(path)))
        } else if let Some(addr) = s.strip_prefix(TCP_SCHEME) {
            addr.parse()
                .map(FeedAddress::Tcp)
                .map_err(|e| FeedError::InvalidAddress(format!("{}: {}", s, e)))
        } else {
            Err(FeedError::InvalidAddress(format!(
                "{}: expected `ipc://` or `tcp://` scheme",
                s
            )))
        }
    }
}

/// Listening side of the transport.
pub enum FeedListener {
    /// Unix domain socket listener.
    #[cfg(unix)]
    Ipc(UnixListener, PathBuf),
    /// TCP listener.
    Tcp(TcpListener),
}

impl FeedListener {
    /// Binds `address`. A stale socket file left at an IPC path is replaced.
    pub fn bind(address: &FeedAddress) -> Result<Self> {
        match address {
            #[cfg(unix)]
            FeedAddress::Ipc(path) => {
                if path.exists() {
                    info!("Replacing stale IPC socket file {}", path.display());
                    std::fs::remove_file(path)?;
                }
                Ok(FeedListener::Ipc(UnixListener::bind(path)?, path.clone()))
            }
            #[cfg(not(unix))]
            FeedAddress::Ipc(path) => Err(FeedError::InvalidAddress(format!(
                "IPC transport is not available on this platform: {}",
                path.display()
            ))),
            FeedAddress::Tcp(addr) => Ok(FeedListener::Tcp(TcpListener::bind(addr)?)),
        }
    }

    /// Bound address, with the OS-assigned port for TCP.
    pub fn local_address(&self) -> Result<FeedAddress> {
        match self {
            #[cfg(unix)]
            FeedListener::Ipc(_, path) => Ok(FeedAddress::Ipc(path.clone())),
            FeedListener::Tcp(listener) => Ok(FeedAddress::Tcp(listener.local_addr()?)),
        }
    }

    /// Blocks until the next subscriber connects.
    pub fn accept(&self) -> Result<FeedStream> {
        match self {
            #[cfg(unix)]
            FeedListener::Ipc(listener, _) => Ok(FeedStream::Ipc(listener.accept()?.0)),
            FeedListener::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok(FeedStream::Tcp(stream))
            }
        }
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        match self {
            #[cfg(unix)]
            FeedListener::Ipc(_, path) => {
                let _ = std::fs::remove_file(path);
            }
            FeedListener::Tcp(_) => {}
        }
    }
}

/// Connected stream socket of either kind.
pub enum FeedStream {
    /// Unix domain socket stream.
    #[cfg(unix)]
    Ipc(UnixStream),
    /// TCP stream.
    Tcp(TcpStream),
}

impl FeedStream {
    /// Connects to a publisher at `address`.
    pub fn connect(address: &FeedAddress) -> Result<Self> {
        match address {
            #[cfg(unix)]
            FeedAddress::Ipc(path) => Ok(FeedStream::Ipc(UnixStream::connect(path)?)),
            #[cfg(not(unix))]
            FeedAddress::Ipc(path) => Err(FeedError::InvalidAddress(format!(
                "IPC transport is not available on this platform: {}",
                path.display()
            ))),
            FeedAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_nodelay(true)?;
                Ok(FeedStream::Tcp(stream))
            }
        }
    }

    /// Sets the read timeout; `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => stream.set_read_timeout(timeout)?,
            FeedStream::Tcp(stream) => stream.set_read_timeout(timeout)?,
        }
        Ok(())
    }

    /// Sets the write timeout; `None` blocks indefinitely.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => stream.set_write_timeout(timeout)?,
            FeedStream::Tcp(stream) => stream.set_write_timeout(timeout)?,
        }
        Ok(())
    }

    /// Another handle to the same socket.
    pub fn try_clone(&self) -> Result<Self> {
        match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => Ok(FeedStream::Ipc(stream.try_clone()?)),
            FeedStream::Tcp(stream) => Ok(FeedStream::Tcp(stream.try_clone()?)),
        }
    }

    /// Shuts down both directions; blocked reads on other handles return.
    pub fn shutdown(&self) -> Result<()> {
        let result = match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => stream.shutdown(Shutdown::Both),
            FeedStream::Tcp(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Read for FeedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => stream.read(buf),
            FeedStream::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for FeedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => stream.write(buf),
            FeedStream::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            #[cfg(unix)]
            FeedStream::Ipc(stream) => stream.flush(),
            FeedStream::Tcp(stream) => stream.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_addresses() {
        let tcp: FeedAddress = "tcp://127.0.0.1:5555".parse().unwrap();
        assert_eq!(tcp, FeedAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 5555))));
        assert_eq!(tcp.to_string(), "tcp://127.0.0.1:5555");

        let ipc: FeedAddress = "ipc:///tmp/quote_feed_ipc".parse().unwrap();
        assert_eq!(ipc, FeedAddress::Ipc(PathBuf::from("/tmp/quote_feed_ipc")));
        assert_eq!(ipc.to_string(), "ipc:///tmp/quote_feed_ipc");

        assert!("udp://127.0.0.1:1".parse::<FeedAddress>().is_err());
        assert!("tcp://nowhere".parse::<FeedAddress>().is_err());
        assert!("ipc://".parse::<FeedAddress>().is_err());
    }

    #[test]
    fn loopback_bind_reports_ephemeral_port() {
        let listener = FeedListener::bind(&FeedAddress::loopback()).unwrap();
        match listener.local_address().unwrap() {
            FeedAddress::Tcp(addr) => assert_ne!(addr.port(), 0),
            other => panic!("unexpected address {other}"),
        }
    }

    #[test]
    fn connected_streams_exchange_bytes() {
        let listener = FeedListener::bind(&FeedAddress::loopback()).unwrap();
        let address = listener.local_address().unwrap();
        let mut client = FeedStream::connect(&address).unwrap();
        let mut server = listener.accept().unwrap();

        server.write_all(b"tick").unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"tick");
    }

    #[cfg(unix)]
    #[test]
    fn ipc_bind_replaces_stale_socket_file() {
        let path = std::env::temp_dir().join(format!("quote_feed_stale_{}", std::process::id()));
        std::fs::write(&path, b"left over").unwrap();

        let address = FeedAddress::Ipc(path.clone());
        let listener = FeedListener::bind(&address).unwrap();
        let mut client = FeedStream::connect(&address).unwrap();
        let mut server = listener.accept().unwrap();
        server.write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");

        drop(listener);
        assert!(!path.exists());
    }
}
