//! Transport layer: destination addressing, listeners, and streams.
//!
//! A destination string selects the transport: a leading `/` names a Unix
//! domain socket path, anything else is `host:port` IPv4 TCP. `http://`
//! and `https://` prefixes are recognized but not supported here.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::error::{Result, WirecallError};

/// A parsed call destination.
///
/// # Example
///
/// ```
/// use wirecall::transport::Endpoint;
///
/// let tcp = Endpoint::parse("127.0.0.1:8383").unwrap();
/// assert_eq!(tcp.to_string(), "127.0.0.1:8383");
///
/// let unix = Endpoint::parse("/tmp/app.sock").unwrap();
/// assert_eq!(unix.to_string(), "/tmp/app.sock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// IPv4 TCP destination.
    Tcp { host: String, port: u16 },
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse a destination string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Err(WirecallError::Config(
                "http transport is not supported".to_string(),
            ));
        }
        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(WirecallError::Config(format!(
                "invalid destination '{s}': expected host:port or a socket path"
            )));
        };
        if host.is_empty() {
            return Err(WirecallError::Config(format!(
                "invalid destination '{s}': missing host"
            )));
        }
        let port = port.parse::<u16>().map_err(|_| {
            WirecallError::Config(format!("invalid destination '{s}': bad port"))
        })?;
        Ok(Endpoint::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl std::str::FromStr for Endpoint {
    type Err = WirecallError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Resolve a host/port pair to its IPv4 addresses.
async fn resolve_ipv4(host: &str, port: u16) -> Result<Vec<std::net::SocketAddr>> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| WirecallError::Connect(format!("resolve {host}:{port}: {e}")))?;
    let addrs: Vec<_> = addrs.filter(|addr| addr.is_ipv4()).collect();
    if addrs.is_empty() {
        return Err(WirecallError::Connect(format!(
            "no ipv4 address for {host}:{port}"
        )));
    }
    Ok(addrs)
}

/// A bound listening socket, TCP or Unix.
///
/// Unix listeners unlink a stale socket file before binding and remove
/// their socket file again on drop.
pub enum Listener {
    Tcp(TcpListener),
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl Listener {
    /// Bind to an endpoint.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let addrs = resolve_ipv4(host, *port).await?;
                let mut last_err = None;
                for addr in addrs {
                    match TcpListener::bind(addr).await {
                        Ok(listener) => return Ok(Listener::Tcp(listener)),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(match last_err {
                    Some(e) => WirecallError::Io(e),
                    None => WirecallError::Connect(format!("no address to bind for {endpoint}")),
                })
            }
            Endpoint::Unix(path) => {
                if Path::new(path).exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// Accept one connection, returning the stream and a peer label for
    /// logging (`addr:port` for TCP, `unix` otherwise).
    pub async fn accept(&self) -> Result<(Stream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Stream::Tcp(stream), addr.to_string()))
            }
            Listener::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok((Stream::Unix(stream), "unix".to_string()))
            }
        }
    }

    /// The bound local address for TCP listeners, `None` for Unix.
    pub fn tcp_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix { .. } => None,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A connected stream, TCP or Unix.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    /// Connect to an endpoint within `timeout`.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::connect_inner(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(WirecallError::Timeout),
        }
    }

    async fn connect_inner(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let addrs = resolve_ipv4(host, *port).await?;
                let mut last_err = None;
                for addr in addrs {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => return Ok(Stream::Tcp(stream)),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(match last_err {
                    Some(e) => WirecallError::Connect(format!("connect {endpoint}: {e}")),
                    None => WirecallError::Connect(format!("no address for {endpoint}")),
                })
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    WirecallError::Connect(format!("connect {}: {e}", path.display()))
                })?;
                Ok(Stream::Unix(stream))
            }
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_tcp() {
        let endpoint = Endpoint::parse("localhost:8383").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Tcp {
                host: "localhost".to_string(),
                port: 8383
            }
        );
    }

    #[test]
    fn test_parse_unix_path() {
        let endpoint = Endpoint::parse("/var/run/app.sock").unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/var/run/app.sock")));
    }

    #[test]
    fn test_parse_rejects_http() {
        let err = Endpoint::parse("http://localhost:8080").unwrap_err();
        assert!(err.to_string().contains("http transport is not supported"));

        let err = Endpoint::parse("https://localhost:8080").unwrap_err();
        assert!(matches!(err, WirecallError::Config(_)));
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(Endpoint::parse("host:notaport").unwrap_err().to_string().contains("bad port"));
        assert!(Endpoint::parse("host:99999").is_err());
        assert!(Endpoint::parse(":8080").is_err());
        assert!(Endpoint::parse("justahost").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["127.0.0.1:8383", "/tmp/x.sock"] {
            assert_eq!(Endpoint::parse(s).unwrap().to_string(), s);
        }
    }

    #[tokio::test]
    async fn test_unix_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"stale").unwrap();

        let endpoint = Endpoint::Unix(path.clone());
        let listener = Listener::bind(&endpoint).await.unwrap();

        let (mut client, (mut served, label)) = tokio::join!(
            async { Stream::connect(&endpoint, Duration::from_secs(1)).await.unwrap() },
            async { listener.accept().await.unwrap() },
        );
        assert_eq!(label, "unix");

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        served.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tcp_bind_ephemeral_port() {
        let endpoint = Endpoint::parse("127.0.0.1:0").unwrap();
        let listener = Listener::bind(&endpoint).await.unwrap();
        let addr = listener.tcp_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let target = Endpoint::parse(&addr.to_string()).unwrap();
        let (_client, (_served, label)) = tokio::join!(
            async { Stream::connect(&target, Duration::from_secs(1)).await.unwrap() },
            async { listener.accept().await.unwrap() },
        );
        assert!(label.starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port that refuses connections.
        let listener = Listener::bind(&Endpoint::parse("127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let addr = listener.tcp_addr().unwrap();
        drop(listener);

        let target = Endpoint::parse(&addr.to_string()).unwrap();
        let err = Stream::connect(&target, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WirecallError::Connect(_)));
    }
}
