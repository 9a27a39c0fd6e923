//! Per-connection request/response loop.
//!
//! One task owns one accepted connection and walks it through
//! `AwaitingHeader/AwaitingBody → Dispatching → Writing`, then either
//! resets for the next request (persistent flag set) or closes. Every
//! read and write wait is bounded by the server's idle timeout; a timeout
//! or I/O failure closes only this connection.

use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::{ServerShared, SERVER_NAME};
use crate::envelope::{status, Request, Response};
use crate::protocol::{
    marker_label, stamp_prefix, Frame, FrameReader, Header, HEADER_SIZE, MARKER_SIZE, WIRE_PREFIX,
};
use crate::transport::Stream;

/// Serve one accepted connection until it closes.
pub(crate) async fn serve_connection<S>(mut stream: Stream, peer: String, shared: &ServerShared<S>) {
    let mut reader = FrameReader::with_max_body(shared.max_body_len);
    let mut chunk = [0u8; 16 * 1024];

    loop {
        // Accumulate one frame, stamping the request clock when its first
        // bytes arrive.
        let mut started: Option<Instant> = None;
        let frame = loop {
            match reader.poll_frame() {
                Ok(Some(frame)) => break frame,
                Ok(None) => {}
                Err(e) => {
                    warn!(peer = %peer, error = %e, "not sent by a compliant client, closing");
                    return;
                }
            }

            let n = match tokio::time::timeout(shared.idle_timeout, stream.read(&mut chunk)).await
            {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "failed to read request");
                    return;
                }
                Err(_) => {
                    debug!(peer = %peer, "idle timeout, closing connection");
                    return;
                }
            };
            if n == 0 {
                debug!(peer = %peer, "connection closed by peer");
                return;
            }
            if started.is_none() {
                started = Some(Instant::now());
            }
            reader.feed(&chunk[..n]);
        };
        let started = started.unwrap_or_else(Instant::now);

        let (mut response, method) = dispatch(&frame, shared);

        let mut payload = match response.pack(WIRE_PREFIX) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to pack response");
                return;
            }
        };
        let body_len = (payload.len() - HEADER_SIZE) as u32;
        let header = Header::new(response.id() as u32, SERVER_NAME, body_len, 0);
        stamp_prefix(&mut payload, &header);

        let mut sent = 0;
        while sent < payload.len() {
            match tokio::time::timeout(shared.idle_timeout, stream.write(&payload[sent..])).await {
                Ok(Ok(0)) => {
                    debug!(peer = %peer, "connection closed while writing");
                    return;
                }
                Ok(Ok(n)) => sent += n,
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "failed to write response");
                    return;
                }
                Err(_) => {
                    debug!(peer = %peer, "write timeout, abandoning response");
                    return;
                }
            }
        }

        log_access(&response, &method, &frame, &peer, sent, started);

        if !frame.header.is_persistent() {
            return;
        }
        // Persistent: loop with fresh request/response state. Bytes of a
        // pipelined next request stay buffered in the reader.
    }
}

/// Run a frame through marker check, envelope decode, and handler lookup.
///
/// Always produces a response to send back; failures before the envelope
/// decodes leave the response id at zero.
fn dispatch<S>(frame: &Frame, shared: &ServerShared<S>) -> (Response, String) {
    if !frame.marker_ok() {
        let marker = frame.marker();
        let shown = &marker[..marker.len().min(MARKER_SIZE - 1)];
        let mut response = Response::default();
        response.set_error(
            status::ERROR,
            format!(
                "package protocol {} is not supported, only msgpack does",
                marker_label(shown)
            ),
        );
        return (response, String::new());
    }

    let request = match Request::unpack(frame.envelope()) {
        Ok(request) => request,
        Err(_) => {
            let mut response = Response::default();
            response.set_error(status::ERROR, "request header verify failed");
            return (response, String::new());
        }
    };

    let mut response = Response::new(request.id());
    match shared.handlers.lookup(request.method()) {
        None => response.set_error(
            status::ERROR,
            format!("call to undefined method '{}'", request.method()),
        ),
        Some(handler) => {
            if let Err(e) = handler(&request, &mut response, &shared.data) {
                response.set_error(status::ERROR, e.to_string());
            }
        }
    }
    (response, request.method().to_string())
}

/// Write the per-request access line.
///
/// Success: `id peer "method" "provider" bytes elapsed-micros`
/// Failure: `id peer "method" error "provider" bytes -`
fn log_access(
    response: &Response,
    method: &str,
    frame: &Frame,
    peer: &str,
    sent: usize,
    started: Instant,
) {
    let provider = frame.header.provider_label();
    if response.status() != status::OK {
        error!(
            target: "access",
            "{} {} \"{}\" {} \"{}\" {} -",
            response.id(),
            peer,
            method,
            response.error().unwrap_or(""),
            provider,
            sent,
        );
    } else {
        info!(
            target: "access",
            "{} {} \"{}\" \"{}\" {} {}",
            response.id(),
            peer,
            method,
            provider,
            sent,
            started.elapsed().as_micros(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{Packager, Value};
    use crate::protocol::{flags, CODEC_MARKER};
    use crate::server::HandlerTable;
    use std::time::Duration;
    use tokio::net::UnixStream;

    fn echo_shared() -> ServerShared<()> {
        let mut handlers: HandlerTable<()> = HandlerTable::new();
        handlers.register("echo", |request, response, _state| {
            let mut retval = Packager::single();
            retval.push_value(request.params().unwrap_or(&Value::Null))?;
            response.set_retval(retval)
        });
        ServerShared {
            handlers,
            data: (),
            idle_timeout: Duration::from_secs(3),
            max_body_len: 1024 * 1024,
        }
    }

    fn pack_request(id: u32, method: &str, flags: u32) -> Vec<u8> {
        let mut payload = Request::pack(u64::from(id), method, None, WIRE_PREFIX).unwrap();
        let body_len = (payload.len() - HEADER_SIZE) as u32;
        let header = Header::new(id, "tester", body_len, flags);
        stamp_prefix(&mut payload, &header);
        payload
    }

    async fn read_reply(stream: &mut UnixStream) -> Response {
        let mut header_buf = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header_buf).await.unwrap();
        let header = Header::parse(&header_buf).unwrap();
        assert_eq!(header.provider_label(), SERVER_NAME);

        let mut body = vec![0u8; header.body_len as usize];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(&body[..MARKER_SIZE], &CODEC_MARKER);
        let response = Response::unpack(&body[MARKER_SIZE..]).unwrap();
        assert_eq!(response.id(), u64::from(header.id));
        response
    }

    fn serve_pair(shared: ServerShared<()>) -> UnixStream {
        let (client, served) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            serve_connection(Stream::Unix(served), "unix".to_string(), &shared).await;
        });
        client
    }

    #[tokio::test]
    async fn test_echo_then_close() {
        let mut client = serve_pair(echo_shared());

        client.write_all(&pack_request(1000, "echo", 0)).await.unwrap();
        let response = read_reply(&mut client).await;
        assert_eq!(response.id(), 1000);
        assert_eq!(response.result().unwrap(), Some(&Value::Null));

        // Persistent flag not set: the server closes after one response.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistent_serves_sequential_requests_without_leakage() {
        let mut client = serve_pair(echo_shared());

        // First request fails; its error string must not leak into the next.
        client
            .write_all(&pack_request(1, "missing", flags::PERSISTENT))
            .await
            .unwrap();
        let response = read_reply(&mut client).await;
        assert_eq!(response.status(), status::ERROR);
        assert_eq!(
            response.error(),
            Some("call to undefined method 'missing'")
        );

        for id in [2u32, 3, 4] {
            client
                .write_all(&pack_request(id, "echo", flags::PERSISTENT))
                .await
                .unwrap();
            let response = read_reply(&mut client).await;
            assert_eq!(response.id(), u64::from(id));
            assert_eq!(response.status(), status::OK);
            assert!(response.error().is_none());
        }
    }

    #[tokio::test]
    async fn test_unsupported_marker_names_it() {
        let mut client = serve_pair(echo_shared());

        let mut payload = Request::pack(5, "echo", None, WIRE_PREFIX).unwrap();
        let body_len = (payload.len() - HEADER_SIZE) as u32;
        let header = Header::new(5, "tester", body_len, 0);
        header.encode_into(&mut payload[..HEADER_SIZE]);
        payload[HEADER_SIZE..WIRE_PREFIX].copy_from_slice(b"JSONPKG\0");

        client.write_all(&payload).await.unwrap();
        let response = read_reply(&mut client).await;
        assert_eq!(response.status(), status::ERROR);
        assert_eq!(
            response.error(),
            Some("package protocol JSONPKG is not supported, only msgpack does")
        );
        // Envelope never decoded, so the id stays zero.
        assert_eq!(response.id(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_envelope_reports_verify_failure() {
        let mut client = serve_pair(echo_shared());

        let garbage = b"\x93\x01\x02\x03";
        let body_len = (MARKER_SIZE + garbage.len()) as u32;
        let header = Header::new(6, "tester", body_len, 0);
        let mut payload = header.encode().to_vec();
        payload.extend_from_slice(&CODEC_MARKER);
        payload.extend_from_slice(garbage);

        client.write_all(&payload).await.unwrap();
        let response = read_reply(&mut client).await;
        assert_eq!(response.error(), Some("request header verify failed"));
    }

    #[tokio::test]
    async fn test_bad_magic_closes_without_reply() {
        let mut client = serve_pair(echo_shared());

        let mut payload = pack_request(7, "echo", 0);
        payload[6] = 0;
        client.write_all(&payload).await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_closes() {
        let mut shared = echo_shared();
        shared.max_body_len = 64;
        let mut client = serve_pair(shared);

        let header = Header::new(8, "tester", 4096, 0);
        client.write_all(&header.encode()).await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let mut shared = echo_shared();
        shared.idle_timeout = Duration::from_millis(50);
        let mut client = serve_pair(shared);

        // Never send anything; the server must hang up on its own.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_application_error() {
        let mut handlers: HandlerTable<()> = HandlerTable::new();
        handlers.register("fail", |_request, _response, _state| {
            Err(crate::error::WirecallError::Config("refused".to_string()))
        });
        let shared = ServerShared {
            handlers,
            data: (),
            idle_timeout: Duration::from_secs(3),
            max_body_len: 1024 * 1024,
        };
        let mut client = serve_pair(shared);

        client.write_all(&pack_request(9, "fail", 0)).await.unwrap();
        let response = read_reply(&mut client).await;
        assert_eq!(response.status(), status::ERROR);
        assert_eq!(response.error(), Some("invalid configuration: refused"));
    }
}
