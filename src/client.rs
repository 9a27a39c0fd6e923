//! Client builder and call engine.
//!
//! A [`Client`] owns one connection and issues calls on it strictly in
//! sequence: pack the request envelope, stamp the header and codec marker
//! into the reserved prefix, write it out, then read back exactly one
//! header and body and decode the response. Every socket wait is bounded
//! by the configured timeout, re-armed per wait.
//!
//! # Example
//!
//! ```ignore
//! use wirecall::{Client, Packager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::builder("127.0.0.1:8383")
//!         .persistent(true)
//!         .connect()
//!         .await?;
//!
//!     let response = client.call("default", None).await?;
//!     println!("[OKEY]: {}", response.result()?.unwrap_or(&wirecall::Value::Null));
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::envelope::{Request, Response};
use crate::error::{Result, WirecallError};
use crate::pack::{Packager, Value};
use crate::protocol::{
    flags, stamp_prefix, Header, DEFAULT_MAX_BODY_LEN, HEADER_SIZE, MARKER_SIZE, WIRE_PREFIX,
};
use crate::transport::{Endpoint, Stream};

/// Identity string stamped into the provider field of every request.
pub const CLIENT_NAME: &str = concat!("wirecall-client/", env!("CARGO_PKG_VERSION"));

/// Default per-wait I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// First correlation id stamped by a fresh client.
const FIRST_REQUEST_ID: u32 = 1000;

/// Bound one socket wait by `timeout`.
async fn timed<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(WirecallError::from_io(e)),
        Err(_) => Err(WirecallError::Timeout),
    }
}

/// Builder for configuring and connecting a [`Client`].
pub struct ClientBuilder {
    destination: String,
    timeout: Duration,
    persistent: bool,
    provider: String,
}

impl ClientBuilder {
    /// Create a builder for a destination string (`host:port` or a Unix
    /// socket path).
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            timeout: DEFAULT_TIMEOUT,
            persistent: false,
            provider: CLIENT_NAME.to_string(),
        }
    }

    /// Set the per-wait connect/read/write timeout. Default: 1 second.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the server to keep the connection open across calls.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Override the identity stamped into request headers and shown in
    /// the server's access log. Default: [`CLIENT_NAME`].
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Parse the destination and connect.
    pub async fn connect(self) -> Result<Client> {
        let endpoint = Endpoint::parse(&self.destination)?;
        let stream = Stream::connect(&endpoint, self.timeout).await?;
        Ok(Client {
            stream,
            endpoint,
            timeout: self.timeout,
            persistent: self.persistent,
            provider: self.provider,
            next_id: FIRST_REQUEST_ID,
        })
    }
}

/// One connection issuing sequential calls.
pub struct Client {
    stream: Stream,
    endpoint: Endpoint,
    timeout: Duration,
    persistent: bool,
    provider: String,
    next_id: u32,
}

impl Client {
    /// Create a client builder.
    pub fn builder(destination: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(destination)
    }

    /// Connect with default settings.
    pub async fn connect(destination: &str) -> Result<Client> {
        ClientBuilder::new(destination).connect().await
    }

    /// The destination this client is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Call `method` with packed parameters; `None` sends a nil.
    ///
    /// Returns the decoded response; inspect it with
    /// [`Response::result`]. Any transport failure aborts the call with
    /// no response at all.
    pub async fn call(&mut self, method: &str, params: Option<Packager>) -> Result<Response> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let mut payload = Request::pack(u64::from(id), method, params, WIRE_PREFIX)?;
        let body_len = (payload.len() - HEADER_SIZE) as u32;
        let header = Header::new(
            id,
            &self.provider,
            body_len,
            if self.persistent { flags::PERSISTENT } else { 0 },
        );
        stamp_prefix(&mut payload, &header);

        self.write_all_timed(&payload).await?;
        self.read_response().await
    }

    /// Call `method` with each value packed as one positional argument.
    pub async fn call_args(&mut self, method: &str, args: &[Value]) -> Result<Response> {
        let mut params = Packager::array(args.len() as u32);
        for arg in args {
            params.push_value(arg)?;
        }
        self.call(method, Some(params)).await
    }

    async fn write_all_timed(&mut self, payload: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < payload.len() {
            let n = timed(self.timeout, self.stream.write(&payload[written..])).await?;
            if n == 0 {
                return Err(WirecallError::ConnectionClosed);
            }
            written += n;
        }
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut header_buf = [0u8; HEADER_SIZE];
        self.read_exact_timed(&mut header_buf).await?;

        let header = Header::parse(&header_buf).map_err(|_| {
            WirecallError::Protocol(format!(
                "{} not answered by a compliant server",
                self.endpoint
            ))
        })?;

        if header.body_len > DEFAULT_MAX_BODY_LEN {
            return Err(WirecallError::Protocol(format!(
                "response body length {} exceeds maximum {}",
                header.body_len, DEFAULT_MAX_BODY_LEN
            )));
        }
        let mut body = vec![0u8; header.body_len as usize];
        self.read_exact_timed(&mut body).await?;

        if body.len() < MARKER_SIZE {
            return Err(WirecallError::Protocol(format!(
                "response body too short ({} bytes)",
                body.len()
            )));
        }
        Response::unpack(&body[MARKER_SIZE..])
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = timed(self.timeout, self.stream.read(&mut buf[filled..])).await?;
            if n == 0 {
                return Err(WirecallError::ConnectionClosed);
            }
            filled += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameReader;
    use crate::transport::Listener;

    struct Peer {
        listener: Listener,
        _dir: tempfile::TempDir,
        path: String,
    }

    async fn bind_peer() -> Peer {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpc.sock");
        let endpoint = Endpoint::Unix(path.clone());
        let listener = Listener::bind(&endpoint).await.unwrap();
        Peer {
            listener,
            _dir: dir,
            path: path.to_str().unwrap().to_string(),
        }
    }

    async fn read_one_frame(stream: &mut Stream) -> crate::protocol::Frame {
        let mut reader = FrameReader::new();
        loop {
            if let Some(frame) = reader.poll_frame().unwrap() {
                return frame;
            }
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer saw early close");
            reader.feed(&buf[..n]);
        }
    }

    async fn write_response(stream: &mut Stream, id: u32, retval: &str) {
        let mut response = Response::new(u64::from(id));
        let mut packed = Packager::single();
        packed.push_str(retval).unwrap();
        response.set_retval(packed).unwrap();

        let mut payload = response.pack(WIRE_PREFIX).unwrap();
        let body_len = (payload.len() - HEADER_SIZE) as u32;
        let header = Header::new(id, "peer", body_len, 0);
        stamp_prefix(&mut payload, &header);
        stream.write_all(&payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let peer = bind_peer().await;
        let path = peer.path.clone();

        let served = tokio::spawn(async move {
            let (mut stream, _) = peer.listener.accept().await.unwrap();
            let frame = read_one_frame(&mut stream).await;
            assert_eq!(frame.header.id, 1000);
            assert!(frame.marker_ok());
            assert_eq!(frame.header.provider_label(), CLIENT_NAME);

            let request = Request::unpack(frame.envelope()).unwrap();
            assert_eq!(request.method(), "ping");
            assert_eq!(request.params(), Some(&Value::Null));

            write_response(&mut stream, frame.header.id, "pong").await;
        });

        let mut client = Client::connect(&path).await.unwrap();
        let response = client.call("ping", None).await.unwrap();
        assert_eq!(response.id(), 1000);
        assert_eq!(response.result().unwrap(), Some(&Value::from("pong")));

        served.await.unwrap();
    }

    #[tokio::test]
    async fn test_sequential_ids_and_persistent_flag() {
        let peer = bind_peer().await;
        let path = peer.path.clone();

        let served = tokio::spawn(async move {
            let (mut stream, _) = peer.listener.accept().await.unwrap();
            for want_id in [1000u32, 1001] {
                let frame = read_one_frame(&mut stream).await;
                assert_eq!(frame.header.id, want_id);
                assert!(frame.header.is_persistent());
                write_response(&mut stream, frame.header.id, "ok").await;
            }
        });

        let mut client = Client::builder(&path)
            .persistent(true)
            .connect()
            .await
            .unwrap();
        for _ in 0..2 {
            let response = client.call_args("echo", &[Value::from(1)]).await.unwrap();
            assert_eq!(response.status(), 0);
        }

        served.await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_override_reaches_the_wire() {
        let peer = bind_peer().await;
        let path = peer.path.clone();

        let served = tokio::spawn(async move {
            let (mut stream, _) = peer.listener.accept().await.unwrap();
            let frame = read_one_frame(&mut stream).await;
            assert_eq!(frame.header.provider_label(), "billing-svc/2.1");
            write_response(&mut stream, frame.header.id, "ok").await;
        });

        let mut client = Client::builder(&path)
            .provider("billing-svc/2.1")
            .connect()
            .await
            .unwrap();
        client.call("ping", None).await.unwrap();

        served.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_closed() {
        let peer = bind_peer().await;
        let path = peer.path.clone();

        let served = tokio::spawn(async move {
            let (mut stream, _) = peer.listener.accept().await.unwrap();
            let _ = read_one_frame(&mut stream).await;
            // Drop without answering.
        });

        let mut client = Client::connect(&path).await.unwrap();
        let err = client.call("ping", None).await.unwrap_err();
        assert!(matches!(err, WirecallError::ConnectionClosed));

        served.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_header_is_protocol_error() {
        let peer = bind_peer().await;
        let path = peer.path.clone();

        let served = tokio::spawn(async move {
            let (mut stream, _) = peer.listener.accept().await.unwrap();
            let _ = read_one_frame(&mut stream).await;
            stream.write_all(&[0u8; HEADER_SIZE]).await.unwrap();
        });

        let mut client = Client::connect(&path).await.unwrap();
        let err = client.call("ping", None).await.unwrap_err();
        assert!(err.to_string().contains("not answered by a compliant server"));

        served.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let peer = bind_peer().await;
        let path = peer.path.clone();

        let served = tokio::spawn(async move {
            let (mut stream, _) = peer.listener.accept().await.unwrap();
            let _ = read_one_frame(&mut stream).await;
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let mut client = Client::builder(&path)
            .timeout(Duration::from_millis(100))
            .connect()
            .await
            .unwrap();
        let err = client.call("ping", None).await.unwrap_err();
        assert!(matches!(err, WirecallError::Timeout));

        served.abort();
    }
}
