//! Write-only msgpack builder with declared container shapes.
//!
//! A [`Packager`] is opened for an array, a map, or a single value, and
//! every push streams straight into the encoded buffer. The declared
//! element counts are enforced as pushes happen: pushing past a full
//! container fails immediately, and [`Packager::finish`] fails while
//! declared slots are still open. Container headers are written up front,
//! so a count mismatch can never silently produce a malformed buffer.

use serde::Serialize;

use crate::error::{Result, WirecallError};
use crate::pack::Value;

fn enc<E: std::fmt::Display>(err: E) -> WirecallError {
    WirecallError::Encode(err.to_string())
}

/// Streaming builder for one encoded msgpack value.
///
/// # Example
///
/// ```
/// use wirecall::pack::Packager;
///
/// let mut inner = Packager::array(2);
/// inner.push_uint(1).unwrap().push_uint(2).unwrap();
///
/// let mut outer = Packager::map(1);
/// outer.push_str("ids").unwrap().push_packager(inner).unwrap();
/// let bytes = outer.finish().unwrap();
/// assert_eq!(bytes, [0x81, 0xa3, b'i', b'd', b's', 0x92, 0x01, 0x02]);
/// ```
pub struct Packager {
    buf: Vec<u8>,
    /// Remaining pushes per open container, innermost last. Empty once the
    /// declared shape is complete.
    stack: Vec<usize>,
}

impl std::fmt::Debug for Packager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packager")
            .field("len", &self.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl Packager {
    /// Open a packager for an array of `len` elements.
    pub fn array(len: u32) -> Self {
        let mut packager = Self::empty();
        // Writing into a Vec cannot fail.
        let _ = rmp::encode::write_array_len(&mut packager.buf, len);
        packager.stack.push(len as usize);
        packager.settle();
        packager
    }

    /// Open a packager for a map of `len` key/value entries.
    pub fn map(len: u32) -> Self {
        let mut packager = Self::empty();
        let _ = rmp::encode::write_map_len(&mut packager.buf, len);
        packager.stack.push(len as usize * 2);
        packager.settle();
        packager
    }

    /// Open a packager for exactly one top-level value.
    pub fn single() -> Self {
        let mut packager = Self::empty();
        packager.stack.push(1);
        packager
    }

    fn empty() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            stack: Vec::with_capacity(4),
        }
    }

    /// Whether every declared slot has been filled.
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty()
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn push_null(&mut self) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_nil(&mut self.buf).map_err(enc)?;
        self.settle();
        Ok(self)
    }

    pub fn push_bool(&mut self, value: bool) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_bool(&mut self.buf, value).map_err(enc)?;
        self.settle();
        Ok(self)
    }

    /// Push a signed integer, encoded in its smallest representation.
    pub fn push_int(&mut self, value: i64) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_sint(&mut self.buf, value).map_err(enc)?;
        self.settle();
        Ok(self)
    }

    pub fn push_uint(&mut self, value: u64) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_uint(&mut self.buf, value).map_err(enc)?;
        self.settle();
        Ok(self)
    }

    pub fn push_double(&mut self, value: f64) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_f64(&mut self.buf, value).map_err(enc)?;
        self.settle();
        Ok(self)
    }

    pub fn push_str(&mut self, value: &str) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_str(&mut self.buf, value).map_err(enc)?;
        self.settle();
        Ok(self)
    }

    /// Begin a nested array of `len` elements as the next value.
    pub fn push_array(&mut self, len: u32) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_array_len(&mut self.buf, len).map_err(enc)?;
        self.stack.push(len as usize);
        self.settle();
        Ok(self)
    }

    /// Begin a nested map of `len` entries as the next value.
    pub fn push_map(&mut self, len: u32) -> Result<&mut Self> {
        self.consume_slot()?;
        rmp::encode::write_map_len(&mut self.buf, len).map_err(enc)?;
        self.stack.push(len as usize * 2);
        self.settle();
        Ok(self)
    }

    /// Push a whole [`Value`] tree as the next value.
    pub fn push_value(&mut self, value: &Value) -> Result<&mut Self> {
        match value {
            Value::Null => self.push_null(),
            Value::Bool(b) => self.push_bool(*b),
            Value::Int(i) => self.push_int(*i),
            Value::UInt(u) => self.push_uint(*u),
            Value::Double(d) => self.push_double(*d),
            Value::Str(s) => self.push_str(s),
            Value::Array(items) => {
                self.push_array(items.len() as u32)?;
                for item in items {
                    self.push_value(item)?;
                }
                Ok(self)
            }
            Value::Map(pairs) => {
                self.push_map(pairs.len() as u32)?;
                for (key, val) in pairs {
                    self.push_value(key)?;
                    self.push_value(val)?;
                }
                Ok(self)
            }
        }
    }

    /// Splice a fully-built child packager in as the next value.
    ///
    /// The child must be complete; its buffer holds exactly one encoded
    /// value, so it fills exactly one slot here.
    pub fn push_packager(&mut self, child: Packager) -> Result<&mut Self> {
        if !child.is_complete() {
            return Err(WirecallError::Encode(
                "nested packager is incomplete".to_string(),
            ));
        }
        self.consume_slot()?;
        self.buf.extend_from_slice(&child.buf);
        self.settle();
        Ok(self)
    }

    /// Serialize any `serde` value as the next element.
    pub fn push_serialize<T: Serialize>(&mut self, value: &T) -> Result<&mut Self> {
        // Struct-as-map: field names survive on the wire.
        let bytes = rmp_serde::to_vec_named(value).map_err(enc)?;
        self.consume_slot()?;
        self.buf.extend_from_slice(&bytes);
        self.settle();
        Ok(self)
    }

    /// Return the encoded buffer.
    ///
    /// Fails while declared slots are still unfilled.
    pub fn finish(self) -> Result<Vec<u8>> {
        if let Some(&remaining) = self.stack.last() {
            return Err(WirecallError::Encode(format!(
                "packager finished early: {remaining} value(s) still expected"
            )));
        }
        Ok(self.buf)
    }

    /// Decrement the innermost open container, failing once the declared
    /// shape is already complete.
    fn consume_slot(&mut self) -> Result<()> {
        match self.stack.last_mut() {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(())
            }
            _ => Err(WirecallError::Encode(
                "push exceeds the declared container size".to_string(),
            )),
        }
    }

    /// Pop containers that have received all their declared values.
    fn settle(&mut self) {
        while matches!(self.stack.last(), Some(0)) {
            self.stack.pop();
        }
    }
}
