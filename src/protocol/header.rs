//! Frame header encoding and decoding.
//!
//! Implements the 82-byte packed header:
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────┬──────────┬──────────┬──────────┐
//! │ Id      │ Version │ Magic   │ Reserved │ Provider │ Token    │ Body len │
//! │ 4 bytes │ 2 bytes │ 4 bytes │ 4 bytes  │ 32 bytes │ 32 bytes │ 4 bytes  │
//! │ u32 BE  │ u16 BE  │ u32 BE  │ u32 BE   │ padded   │ padded   │ u32 BE   │
//! └─────────┴─────────┴─────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. `reserved` is the flags word;
//! `provider`/`token` are NUL-padded identity fields. `body_len` counts the
//! codec marker plus envelope bytes that follow the header.

use crate::error::{Result, WirecallError};

/// Header size in bytes (fixed, exactly 82).
pub const HEADER_SIZE: usize = 82;

/// Protocol magic constant, present in every valid header.
pub const MAGIC: u32 = 0x80DF_EC60;

/// Width of the provider identity field.
pub const PROVIDER_SIZE: usize = 32;

/// Width of the token field.
pub const TOKEN_SIZE: usize = 32;

/// Flag constants for the header's reserved word.
pub mod flags {
    /// Ask the server to keep the connection open after responding.
    pub const PERSISTENT: u32 = 0x1;
    /// Liveness probe; defined for wire compatibility, drives no logic.
    pub const PING: u32 = 0x2;
    /// Method listing; defined for wire compatibility, drives no logic.
    pub const LIST: u32 = 0x4;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u32, flag: u32) -> bool {
        flags & flag != 0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request correlation number.
    pub id: u32,
    /// Protocol version, currently always 0.
    pub version: u16,
    /// Flags word (see `flags` module).
    pub flags: u32,
    /// Identity string of the sender, NUL padded.
    pub provider: [u8; PROVIDER_SIZE],
    /// Opaque credential, unused by logic.
    pub token: [u8; TOKEN_SIZE],
    /// Byte length of the codec marker + envelope that follow.
    pub body_len: u32,
}

impl Header {
    /// Create a new header stamped with the given identity.
    ///
    /// The provider string is truncated to [`PROVIDER_SIZE`] bytes and NUL
    /// padded; the token field is left zeroed.
    pub fn new(id: u32, provider: &str, body_len: u32, flags: u32) -> Self {
        let mut field = [0u8; PROVIDER_SIZE];
        let bytes = provider.as_bytes();
        let len = bytes.len().min(PROVIDER_SIZE);
        field[..len].copy_from_slice(&bytes[..len]);

        Self {
            id,
            version: 0,
            flags,
            provider: field,
            token: [0u8; TOKEN_SIZE],
            body_len,
        }
    }

    /// Encode the header to bytes (Big Endian, magic filled in).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// The buffer must be at least [`HEADER_SIZE`] bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6..10].copy_from_slice(&MAGIC.to_be_bytes());
        buf[10..14].copy_from_slice(&self.flags.to_be_bytes());
        buf[14..46].copy_from_slice(&self.provider);
        buf[46..78].copy_from_slice(&self.token);
        buf[78..82].copy_from_slice(&self.body_len.to_be_bytes());
    }

    /// Decode a header from bytes, validating the magic constant.
    ///
    /// Fails with a protocol error when the buffer is shorter than
    /// [`HEADER_SIZE`] or the magic does not match. No other validation
    /// (version, body length bounds) happens here; bounds checking is the
    /// caller's responsibility.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(WirecallError::Protocol(format!(
                "short header: {} bytes",
                buf.len()
            )));
        }

        let magic = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        if magic != MAGIC {
            return Err(WirecallError::Protocol(format!(
                "bad protocol magic 0x{magic:08x}"
            )));
        }

        let mut provider = [0u8; PROVIDER_SIZE];
        provider.copy_from_slice(&buf[14..46]);
        let mut token = [0u8; TOKEN_SIZE];
        token.copy_from_slice(&buf[46..78]);

        Ok(Self {
            id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: u16::from_be_bytes([buf[4], buf[5]]),
            flags: u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]),
            provider,
            token,
            body_len: u32::from_be_bytes([buf[78], buf[79], buf[80], buf[81]]),
        })
    }

    /// Check if the persistent-connection flag is set.
    #[inline]
    pub fn is_persistent(&self) -> bool {
        flags::has_flag(self.flags, flags::PERSISTENT)
    }

    /// The sender identity for log lines, `-` when the field is empty.
    pub fn provider_label(&self) -> String {
        let end = self
            .provider
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PROVIDER_SIZE);
        if end == 0 {
            "-".to_string()
        } else {
            String::from_utf8_lossy(&self.provider[..end]).into_owned()
        }
    }
}
