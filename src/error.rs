//! Error types for wirecall operations.

use thiserror::Error;

/// Main error type for all wirecall operations.
#[derive(Debug, Error)]
pub enum WirecallError {
    /// Resolving or connecting to the destination failed (client only).
    #[error("connect failed: {0}")]
    Connect(String),

    /// A bounded socket wait expired.
    #[error("operation timed out")]
    Timeout,

    /// Send/receive failure other than a clean close.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection mid-operation.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Bad magic, unsupported codec marker, or a structurally invalid
    /// envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handler-reported failure, carried inside a normally-framed response.
    #[error("server error (status {status}): {message}")]
    Application { status: i64, message: String },

    /// Invalid option value, e.g. worker count out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Codec-level encode failure.
    #[error("msgpack encode error: {0}")]
    Encode(String),

    /// Codec-level decode failure.
    #[error("msgpack decode error: {0}")]
    Decode(String),
}

impl WirecallError {
    /// Classify an I/O error from a socket operation.
    ///
    /// Timeout kinds become [`WirecallError::Timeout`], teardown kinds
    /// become [`WirecallError::ConnectionClosed`], anything else stays an
    /// I/O error.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => WirecallError::Timeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => WirecallError::ConnectionClosed,
            _ => WirecallError::Io(err),
        }
    }
}

/// Result type alias using WirecallError.
pub type Result<T> = std::result::Result<T, WirecallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WirecallError::Protocol("bad magic".to_string());
        assert_eq!(err.to_string(), "protocol error: bad magic");

        let err = WirecallError::Application {
            status: 8,
            message: "call to undefined method 'x'".to_string(),
        };
        assert!(err.to_string().contains("status 8"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "test");
        let err: WirecallError = io_err.into();
        assert!(matches!(err, WirecallError::Io(_)));
    }

    #[test]
    fn test_from_io_classification() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "t");
        assert!(matches!(
            WirecallError::from_io(timed_out),
            WirecallError::Timeout
        ));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "r");
        assert!(matches!(
            WirecallError::from_io(reset),
            WirecallError::ConnectionClosed
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "d");
        assert!(matches!(
            WirecallError::from_io(denied),
            WirecallError::Io(_)
        ));
    }
}
