//! Wire protocol: the fixed header, the codec marker, and frame assembly.
//!
//! Every message on the wire is laid out as:
//!
//! ```text
//! +------------------+------------------+----------------------+
//! | header (82 B)    | marker (8 B)     | envelope (msgpack)   |
//! +------------------+------------------+----------------------+
//! ```
//!
//! The header's `body_len` counts the marker plus the envelope. The marker
//! names the serialization codec; only msgpack is supported, and the
//! comparison covers the first seven bytes so the trailing byte of an
//! eight-byte name still participates when present.

pub mod frame;
pub mod header;

pub use frame::{Frame, FrameReader, DEFAULT_MAX_BODY_LEN};
pub use header::{flags, Header, HEADER_SIZE, MAGIC, PROVIDER_SIZE, TOKEN_SIZE};

/// Size of the codec marker that precedes every envelope.
pub const MARKER_SIZE: usize = 8;

/// The supported codec marker, NUL padded to [`MARKER_SIZE`].
pub const CODEC_MARKER: [u8; MARKER_SIZE] = *b"MSGPACK\0";

/// Total size of the reserved prefix (header + codec marker) of a message.
pub const WIRE_PREFIX: usize = HEADER_SIZE + MARKER_SIZE;

/// Check whether `body` starts with the supported codec marker.
///
/// Only the first seven bytes are compared, mirroring how the marker name
/// itself is seven characters with a NUL pad.
pub fn marker_matches(body: &[u8]) -> bool {
    body.len() >= MARKER_SIZE && body[..MARKER_SIZE - 1] == CODEC_MARKER[..MARKER_SIZE - 1]
}

/// Render a marker as printable text for error messages, trimming the
/// trailing NUL pad.
pub fn marker_label(marker: &[u8]) -> String {
    let end = marker.iter().position(|&b| b == 0).unwrap_or(marker.len());
    String::from_utf8_lossy(&marker[..end]).into_owned()
}

/// Stamp the header and codec marker into a message's reserved prefix.
///
/// `buf` must hold at least [`WIRE_PREFIX`] bytes; the envelope packing
/// path reserves them up front so the prefix is written in place without
/// shifting the payload.
pub fn stamp_prefix(buf: &mut [u8], header: &Header) {
    header.encode_into(&mut buf[..HEADER_SIZE]);
    buf[HEADER_SIZE..WIRE_PREFIX].copy_from_slice(&CODEC_MARKER);
}
