//! Request and response envelopes.
//!
//! The envelope is the canonical top-level msgpack map exchanged on every
//! call. Keys are single characters:
//!
//! - request: `"i"` id, `"m"` method, `"p"` parameters
//! - response: `"i"` id, `"s"` status, `"r"` return value, `"e"` error
//!
//! Decoding is tolerant per field and strict on structure: a value of the
//! wrong type leaves that field at its default and unknown keys are
//! skipped, but a top-level value that is not a map, a map smaller than
//! two entries, or a non-string key fails the whole decode.

mod request;
mod response;

pub use request::Request;
pub use response::Response;

use crate::error::{Result, WirecallError};
use crate::pack::{decode, Value};

/// Envelope key for the request/response correlation id.
pub const KEY_ID: &str = "i";
/// Envelope key for the request method name.
pub const KEY_METHOD: &str = "m";
/// Envelope key for the request parameters.
pub const KEY_PARAMS: &str = "p";
/// Envelope key for the response status.
pub const KEY_STATUS: &str = "s";
/// Envelope key for the response return value.
pub const KEY_RETVAL: &str = "r";
/// Envelope key for the response error string.
pub const KEY_ERROR: &str = "e";

/// Response status codes.
pub mod status {
    /// Call succeeded.
    pub const OK: i64 = 0;
    /// Call failed with a server-reported error.
    pub const ERROR: i64 = 8;
}

/// Decode an envelope's top-level map, enforcing the structural rules.
///
/// Codec-level failures surface as protocol errors here: by the time bytes
/// claim to be an envelope, a malformed buffer is a protocol violation.
pub(crate) fn envelope_pairs(bytes: &[u8], what: &str) -> Result<Vec<(Value, Value)>> {
    let decoded = match decode(bytes) {
        Ok(decoded) => decoded,
        Err(WirecallError::Decode(msg)) => {
            return Err(WirecallError::Protocol(format!(
                "{what} envelope is malformed: {msg}"
            )));
        }
        Err(e) => return Err(e),
    };
    match decoded {
        Value::Map(pairs) if pairs.len() >= 2 => Ok(pairs),
        Value::Map(pairs) => Err(WirecallError::Protocol(format!(
            "{what} envelope map is too small ({} entries)",
            pairs.len()
        ))),
        other => Err(WirecallError::Protocol(format!(
            "{what} envelope is not a map (got {:?})",
            other.kind()
        ))),
    }
}

/// Extract a string key or fail the decode.
pub(crate) fn envelope_key<'a>(key: &'a Value, what: &str) -> Result<&'a str> {
    key.as_str().ok_or_else(|| {
        WirecallError::Protocol(format!("{what} envelope has a non-string key"))
    })
}
