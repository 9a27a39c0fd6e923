//! The response envelope.

use crate::envelope::{
    envelope_key, envelope_pairs, status, KEY_ERROR, KEY_ID, KEY_RETVAL, KEY_STATUS,
};
use crate::error::{Result, WirecallError};
use crate::pack::{Packager, Value};

/// One call response: correlation id, status, return value, error string.
///
/// On the server a handler fills the response through [`set_retval`] or
/// [`set_error`] and the connection packs it. On the client
/// [`Response::unpack`] decodes the wire bytes and [`Response::result`]
/// folds status and error into a `Result`.
///
/// [`set_retval`]: Response::set_retval
/// [`set_error`]: Response::set_error
#[derive(Debug, Default)]
pub struct Response {
    id: u64,
    status: i64,
    /// Return value staged by a handler, spliced in at pack time.
    retval: Option<Packager>,
    /// Return value decoded from the wire.
    value: Option<Value>,
    error: Option<String>,
}

impl Response {
    /// Create an empty response correlated to a request id.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> i64 {
        self.status
    }

    /// The decoded return value, `None` when the `"r"` key was absent.
    pub fn retval(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The server-reported error string, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Stage a packed return value. The packager must be complete.
    pub fn set_retval(&mut self, retval: Packager) -> Result<()> {
        if !retval.is_complete() {
            return Err(WirecallError::Encode(
                "return value packager is incomplete".to_string(),
            ));
        }
        self.retval = Some(retval);
        Ok(())
    }

    /// Mark the call failed with a status code and error message.
    pub fn set_error(&mut self, status: i64, message: impl Into<String>) {
        self.status = status;
        self.error = Some(message.into());
    }

    /// Fold status and error into a `Result` over the return value.
    ///
    /// A nonzero status becomes an [`WirecallError::Application`] carrying
    /// the status and the server's error string.
    pub fn result(&self) -> Result<Option<&Value>> {
        if self.status == status::OK {
            Ok(self.value.as_ref())
        } else {
            Err(WirecallError::Application {
                status: self.status,
                message: self.error.clone().unwrap_or_default(),
            })
        }
    }

    /// Build the encoded response envelope.
    ///
    /// Same reserved-prefix scheme as the request pack: the buffer starts
    /// with `prefix` zero bytes for the header and codec marker. The
    /// staged return value is taken, so packing twice sends it only once.
    pub fn pack(&mut self, prefix: usize) -> Result<Vec<u8>> {
        let mut envelope = Packager::map(4);
        envelope.push_str(KEY_ID)?.push_uint(self.id)?;
        envelope.push_str(KEY_STATUS)?.push_int(self.status)?;
        envelope.push_str(KEY_RETVAL)?;
        match self.retval.take() {
            Some(retval) => envelope.push_packager(retval)?,
            None => envelope.push_null()?,
        };
        envelope.push_str(KEY_ERROR)?;
        match &self.error {
            Some(message) => envelope.push_str(message)?,
            None => envelope.push_null()?,
        };
        let body = envelope.finish()?;

        let mut buf = vec![0u8; prefix];
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a response envelope.
    ///
    /// Same policy as the request side: strict structure, tolerant fields.
    /// A missing `"e"` key simply leaves the error absent.
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        let pairs = envelope_pairs(bytes, "response")?;

        let mut response = Response::default();
        for (key, value) in pairs {
            match envelope_key(&key, "response")? {
                KEY_ID => {
                    if let Value::UInt(id) = value {
                        response.id = id;
                    }
                }
                KEY_STATUS => {
                    if let Some(status) = value.as_i64() {
                        response.status = status;
                    }
                }
                KEY_RETVAL => response.value = Some(value),
                KEY_ERROR => {
                    if let Value::Str(message) = value {
                        response.error = Some(message);
                    }
                }
                _ => {}
            }
        }
        Ok(response)
    }
}
