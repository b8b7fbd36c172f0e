//! # Adaptive Codec
//!
//! Compress-then-base64 framing for opaque byte blobs carried inside wire
//! envelopes. Small payloads are left uncompressed; larger ones are
//! compressed with Zstd level 3 and the compressed form is only kept if
//! it actually shrank the payload.
//!
//! ```text
//! encode(bytes) ──► (base64_string, compressed_flag)
//! decode(string, compressed_flag) ──► bytes
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Error, Result};

/// Payloads shorter than this are never compressed.
pub const MIN_COMPRESS_SIZE: usize = 512;

/// Zstd compression level used for all payloads. A deliberate
/// speed/ratio balance point, not the max level.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Compress (adaptively) and base64-encode a byte blob.
///
/// Returns `(encoded, compressed)`. `compressed` is `true` only if the
/// Zstd-compressed form was both attempted and strictly smaller than the
/// original; otherwise the raw bytes are base64-encoded unchanged.
pub fn encode(data: &[u8]) -> (String, bool) {
    if data.len() < MIN_COMPRESS_SIZE {
        return (BASE64.encode(data), false);
    }

    match zstd::stream::encode_all(data, COMPRESSION_LEVEL) {
        Ok(compressed) if compressed.len() < data.len() => (BASE64.encode(&compressed), true),
        _ => (BASE64.encode(data), false),
    }
}

/// Base64-decode and, if `compressed`, Zstd-decompress a payload encoded
/// by [`encode`].
pub fn decode(data: &str, compressed: bool) -> Result<Vec<u8>> {
    let raw = BASE64.decode(data).map_err(|_| Error::CorruptPayload)?;
    if !compressed {
        return Ok(raw);
    }
    zstd::stream::decode_all(raw.as_slice()).map_err(|_| Error::CorruptPayload)
}
