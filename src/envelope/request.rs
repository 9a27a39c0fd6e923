//! The request envelope.

use crate::envelope::{envelope_key, envelope_pairs, KEY_ID, KEY_METHOD, KEY_PARAMS};
use crate::error::Result;
use crate::pack::{Packager, Value};

/// One decoded call request: correlation id, method name, parameters.
///
/// Requests are packed on the client with [`Request::pack`] and decoded on
/// the server with [`Request::unpack`]. A fresh `Request` is decoded for
/// every frame, so nothing carries over between calls on a persistent
/// connection.
#[derive(Debug, Default)]
pub struct Request {
    id: u64,
    method: String,
    params: Option<Value>,
}

impl Request {
    /// The correlation id stamped by the caller.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The method name, empty when the envelope carried none.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The decoded parameters, `None` when the `"p"` key was absent.
    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Build the encoded request envelope.
    ///
    /// `params` is spliced in as the `"p"` value; `None` packs a msgpack
    /// nil. The returned buffer starts with `prefix` zero bytes reserved
    /// for the header and codec marker, stamped in later by the caller.
    pub fn pack(id: u64, method: &str, params: Option<Packager>, prefix: usize) -> Result<Vec<u8>> {
        let mut envelope = Packager::map(3);
        envelope.push_str(KEY_ID)?.push_uint(id)?;
        envelope.push_str(KEY_METHOD)?.push_str(method)?;
        envelope.push_str(KEY_PARAMS)?;
        match params {
            Some(packager) => envelope.push_packager(packager)?,
            None => envelope.push_null()?,
        };
        let body = envelope.finish()?;

        let mut buf = vec![0u8; prefix];
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a request envelope.
    ///
    /// Structure is strict (top-level map of at least two entries, string
    /// keys); individual fields are tolerant: a wrong-typed `"i"` or `"m"`
    /// keeps its default, unknown keys are skipped.
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        let pairs = envelope_pairs(bytes, "request")?;

        let mut request = Request::default();
        for (key, value) in pairs {
            match envelope_key(&key, "request")? {
                KEY_ID => {
                    if let Value::UInt(id) = value {
                        request.id = id;
                    }
                }
                KEY_METHOD => {
                    if let Value::Str(method) = value {
                        request.method = method;
                    }
                }
                KEY_PARAMS => request.params = Some(value),
                _ => {}
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WirecallError;

    #[test]
    fn test_pack_exact_bytes() {
        let bytes = Request::pack(42, "default", None, 0).unwrap();

        let mut want = vec![0x83];
        want.extend_from_slice(&[0xa1, b'i', 0x2a]);
        want.extend_from_slice(&[0xa1, b'm', 0xa7]);
        want.extend_from_slice(b"default");
        want.extend_from_slice(&[0xa1, b'p', 0xc0]);
        assert_eq!(bytes, want);
    }

    #[test]
    fn test_pack_reserves_prefix() {
        let bytes = Request::pack(1, "m", None, 10).unwrap();
        assert_eq!(&bytes[..10], &[0u8; 10]);
        assert_eq!(bytes[10], 0x83);
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let bytes = Request::pack(42, "default", None, 0).unwrap();
        let request = Request::unpack(&bytes).unwrap();

        assert_eq!(request.id(), 42);
        assert_eq!(request.method(), "default");
        assert_eq!(request.params(), Some(&Value::Null));
    }

    #[test]
    fn test_pack_with_params() {
        let mut params = Packager::array(2);
        params.push_uint(7).unwrap().push_str("x").unwrap();

        let bytes = Request::pack(1, "sum", Some(params), 0).unwrap();
        let request = Request::unpack(&bytes).unwrap();

        assert_eq!(request.method(), "sum");
        assert_eq!(
            request.params(),
            Some(&Value::Array(vec![Value::UInt(7), Value::from("x")]))
        );
    }

    #[test]
    fn test_unpack_tolerates_wrong_field_types() {
        // "i" carries a string, "m" carries an int: both keep defaults.
        let mut envelope = Packager::map(2);
        envelope.push_str("i").unwrap().push_str("nope").unwrap();
        envelope.push_str("m").unwrap().push_uint(3).unwrap();
        let bytes = envelope.finish().unwrap();

        let request = Request::unpack(&bytes).unwrap();
        assert_eq!(request.id(), 0);
        assert_eq!(request.method(), "");
        assert!(request.params().is_none());
    }

    #[test]
    fn test_unpack_skips_unknown_keys() {
        let mut envelope = Packager::map(3);
        envelope.push_str("i").unwrap().push_uint(9).unwrap();
        envelope.push_str("x").unwrap().push_bool(true).unwrap();
        envelope.push_str("m").unwrap().push_str("go").unwrap();
        let bytes = envelope.finish().unwrap();

        let request = Request::unpack(&bytes).unwrap();
        assert_eq!(request.id(), 9);
        assert_eq!(request.method(), "go");
    }

    #[test]
    fn test_unpack_rejects_non_map() {
        let mut envelope = Packager::array(2);
        envelope.push_uint(1).unwrap().push_uint(2).unwrap();
        let bytes = envelope.finish().unwrap();

        let err = Request::unpack(&bytes).unwrap_err();
        assert!(matches!(err, WirecallError::Protocol(_)));
    }

    #[test]
    fn test_unpack_rejects_non_string_key() {
        let mut envelope = Packager::map(2);
        envelope.push_uint(1).unwrap().push_uint(2).unwrap();
        envelope.push_str("m").unwrap().push_str("x").unwrap();
        let bytes = envelope.finish().unwrap();

        let err = Request::unpack(&bytes).unwrap_err();
        assert!(err.to_string().contains("non-string key"));
    }
}
