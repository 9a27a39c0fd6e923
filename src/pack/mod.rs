//! Tagged value model and msgpack packing.
//!
//! This module is the seam between the RPC envelope logic and the concrete
//! wire codec (`rmp`/`rmpv`): the envelope layer only ever speaks [`Value`]
//! and [`Packager`], so the codec underneath can change without touching
//! request/response handling.
//!
//! - [`Value`]: an owned tree decoded from one msgpack value
//! - [`Packager`]: a write-only builder that streams pushes straight into
//!   an encoded buffer against a declared container shape
//! - [`decode`] / [`decode_as`]: one-shot decoding into a [`Value`] tree
//!   or into any `serde`-deserializable type
//!
//! # Example
//!
//! ```
//! use wirecall::pack::{decode, Packager, Value};
//!
//! let mut packager = Packager::array(2);
//! packager.push_bool(true).unwrap().push_str("done").unwrap();
//! let bytes = packager.finish().unwrap();
//!
//! let value = decode(&bytes).unwrap();
//! assert_eq!(value, Value::Array(vec![Value::Bool(true), Value::Str("done".into())]));
//! ```

mod packager;

pub use packager::Packager;

use crate::error::{Result, WirecallError};

/// The data kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Null,
    Bool,
    Int,
    UInt,
    Double,
    Str,
    Array,
    Map,
}

/// One decoded msgpack value, owned.
///
/// Decoding copies out of the wire buffer, so a `Value` never borrows from
/// the connection's read buffer and can outlive it freely.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Negative integers.
    Int(i64),
    /// Zero and positive integers.
    UInt(u64),
    Double(f64),
    Str(String),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// The kind tag of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::UInt(_) => Kind::UInt,
            Value::Double(_) => Kind::Double,
            Value::Str(_) => Kind::Str,
            Value::Array(_) => Kind::Array,
            Value::Map(_) => Kind::Map,
        }
    }

    /// Logical size: element count for arrays, entry count for maps, byte
    /// length for strings, zero for scalars.
    pub fn size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::Array(items) => items.len(),
            Value::Map(pairs) => pairs.len(),
            _ => 0,
        }
    }

    /// Check for null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Signed view of an integer, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Unsigned view of an integer, if non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Look up a map entry by string key, first match wins.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// A forward cursor over container children.
    ///
    /// Arrays yield their elements in order; maps yield their children
    /// interleaved key, value, key, value. Scalars yield nothing. The
    /// cursor restarts from the first child on every call.
    pub fn children(&self) -> Children<'_> {
        let inner = match self {
            Value::Array(items) => ChildrenInner::Items(items.iter()),
            Value::Map(pairs) => ChildrenInner::Pairs {
                pairs: pairs.iter(),
                pending: None,
            },
            _ => ChildrenInner::Empty,
        };
        Children { inner }
    }

    /// Recover a typed serde value from this decoded tree.
    pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let mut packed = Packager::single();
        packed.push_value(self)?;
        decode_as(&packed.finish()?)
    }
}

/// Cursor over the children of an array or map, see [`Value::children`].
pub struct Children<'a> {
    inner: ChildrenInner<'a>,
}

enum ChildrenInner<'a> {
    Empty,
    Items(std::slice::Iter<'a, Value>),
    Pairs {
        pairs: std::slice::Iter<'a, (Value, Value)>,
        pending: Option<&'a Value>,
    },
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<&'a Value> {
        match &mut self.inner {
            ChildrenInner::Empty => None,
            ChildrenInner::Items(iter) => iter.next(),
            ChildrenInner::Pairs { pairs, pending } => {
                if let Some(value) = pending.take() {
                    return Some(value);
                }
                let (key, value) = pairs.next()?;
                *pending = Some(value);
                Some(key)
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::from(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        if i >= 0 {
            Value::UInt(i as u64)
        } else {
            Value::Int(i)
        }
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Decode one msgpack value from the front of `bytes`.
///
/// Fails on a truncated or malformed buffer, on invalid UTF-8 inside a
/// string or binary chunk, and on msgpack extension types.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut cursor = bytes;
    let raw = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| WirecallError::Decode(e.to_string()))?;
    from_rmpv(raw)
}

/// Decode one msgpack value directly into a `serde`-deserializable type.
pub fn decode_as<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| WirecallError::Decode(e.to_string()))
}

fn from_rmpv(raw: rmpv::Value) -> Result<Value> {
    match raw {
        rmpv::Value::Nil => Ok(Value::Null),
        rmpv::Value::Boolean(b) => Ok(Value::Bool(b)),
        rmpv::Value::Integer(i) => {
            if let Some(u) = i.as_u64() {
                Ok(Value::UInt(u))
            } else if let Some(s) = i.as_i64() {
                Ok(Value::Int(s))
            } else {
                Err(WirecallError::Decode("integer out of range".to_string()))
            }
        }
        rmpv::Value::F32(f) => Ok(Value::Double(f64::from(f))),
        rmpv::Value::F64(d) => Ok(Value::Double(d)),
        rmpv::Value::String(s) => match s.into_str() {
            Some(s) => Ok(Value::Str(s)),
            None => Err(WirecallError::Decode("invalid utf-8 in string".to_string())),
        },
        rmpv::Value::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Ok(Value::Str(s)),
            Err(_) => Err(WirecallError::Decode(
                "binary chunk is not valid utf-8".to_string(),
            )),
        },
        rmpv::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_rmpv(item)?);
            }
            Ok(Value::Array(out))
        }
        rmpv::Value::Map(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                out.push((from_rmpv(key)?, from_rmpv(value)?));
            }
            Ok(Value::Map(out))
        }
        rmpv::Value::Ext(_, _) => Err(WirecallError::Decode(
            "unsupported msgpack extension type".to_string(),
        )),
    }
}
