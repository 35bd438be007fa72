//! Byte-stream transport: TCP and Unix Domain Sockets.
//!
//! The core only needs "read some bytes" and "write these bytes in order",
//! so every transport is reduced to a boxed read half and write half.
//! In-memory streams (e.g. `tokio::io::duplex`) go through the same type.
//!
//! # Example
//!
//! ```ignore
//! use wirelink::transport::{PeerAddr, TransportListener};
//!
//! let listener = TransportListener::bind(&"tcp://127.0.0.1:0".parse()?).await?;
//! let stream = listener.accept().await?;
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, WirelinkError};

/// Boxed read half of a transport stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a transport stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Address of a peer (or of a local listening endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    /// TCP host and port.
    Tcp { host: String, port: u16 },
    /// Unix Domain Socket path.
    Unix(PathBuf),
}

impl PeerAddr {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        PeerAddr::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        PeerAddr::Unix(path.into())
    }

    /// TCP port, if any (`0` for Unix sockets).
    pub fn port(&self) -> u16 {
        match self {
            PeerAddr::Tcp { port, .. } => *port,
            PeerAddr::Unix(_) => 0,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{}]:{}", host, port)
            }
            PeerAddr::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            PeerAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl FromStr for PeerAddr {
    type Err = WirelinkError;

    /// Parse `tcp://host:port`, `unix:///path`, or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(WirelinkError::Config(format!("empty socket path in {}", s)));
            }
            return Ok(PeerAddr::unix(path));
        }

        let rest = s.strip_prefix("tcp://").unwrap_or(s);
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| WirelinkError::Config(format!("missing port in address {}", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| WirelinkError::Config(format!("invalid port in {}: {}", s, e)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(WirelinkError::Config(format!("missing host in address {}", s)));
        }

        Ok(PeerAddr::tcp(host, port))
    }
}

/// A connected byte stream, already split into halves.
pub struct TransportStream {
    reader: BoxedReader,
    writer: BoxedWriter,
    peer: String,
}

impl TransportStream {
    /// Wrap any bidirectional async stream.
    pub fn new<S>(io: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: peer.into(),
        }
    }

    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| format!("tcp://{}", a))
            .unwrap_or_else(|_| "tcp://unknown".to_string());
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        }
    }

    /// Human-readable peer label.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Split into read and write halves.
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportStream")
            .field("peer", &self.peer)
            .finish()
    }
}

/// Establish a link to `addr`.
pub async fn connect(addr: &PeerAddr) -> Result<TransportStream> {
    match addr {
        PeerAddr::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            Ok(TransportStream::from_tcp(stream))
        }
        PeerAddr::Unix(path) => unix_impl::connect(path).await,
    }
}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// A listening endpoint that yields accepted streams.
pub struct TransportListener {
    kind: ListenerKind,
    local: PeerAddr,
}

impl TransportListener {
    /// Bind to `addr`.
    ///
    /// TCP port `0` picks a free port; [`local_addr`](Self::local_addr)
    /// reports the one chosen. A stale Unix socket file is removed first.
    pub async fn bind(addr: &PeerAddr) -> Result<Self> {
        match addr {
            PeerAddr::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                let bound = listener.local_addr()?;
                Ok(Self {
                    kind: ListenerKind::Tcp(listener),
                    local: PeerAddr::tcp(bound.ip().to_string(), bound.port()),
                })
            }
            PeerAddr::Unix(path) => unix_impl::bind(path),
        }
    }

    /// The address peers should connect to.
    pub fn local_addr(&self) -> &PeerAddr {
        &self.local
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<TransportStream> {
        match &self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(TransportStream::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                let (reader, writer) = stream.into_split();
                Ok(TransportStream {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    peer: self.local.to_string(),
                })
            }
        }
    }
}

impl Drop for TransportListener {
    fn drop(&mut self) {
        if let PeerAddr::Unix(path) = &self.local {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    pub(super) async fn connect(path: &Path) -> Result<TransportStream> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(TransportStream {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: format!("unix://{}", path.display()),
        })
    }

    pub(super) fn bind(path: &Path) -> Result<TransportListener> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(TransportListener {
            kind: ListenerKind::Unix(listener),
            local: PeerAddr::Unix(path.to_path_buf()),
        })
    }
}

#[cfg(not(unix))]
mod unix_impl {
    use super::*;
    use std::path::Path;

    fn unsupported() -> WirelinkError {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unix domain sockets are not available on this platform",
        )
        .into()
    }

    pub(super) async fn connect(_path: &Path) -> Result<TransportStream> {
        Err(unsupported())
    }

    pub(super) fn bind(_path: &Path) -> Result<TransportListener> {
        Err(unsupported())
    }
}
