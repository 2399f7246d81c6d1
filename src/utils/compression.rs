//! zlib compression for compressed frames.
//!
//! Inflation is bounded by the declared uncompressed length, which itself is
//! capped by the leg's maximum packet size before any allocation happens.

use crate::error::{constants, ProtocolError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses `data` with zlib at the default level.
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if the encoder fails
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|_| ProtocolError::CompressionFailure)?;
    encoder
        .finish()
        .map_err(|_| ProtocolError::CompressionFailure)
}

/// Inflates `data` that claims to expand to exactly `declared_len` bytes.
///
/// # Errors
/// Returns `ProtocolError::OversizedPacket` if `declared_len` exceeds `limit`,
/// and `ProtocolError::DecompressionFailure` if the stream is corrupt or does
/// not inflate to the declared length.
pub fn decompress(data: &[u8], declared_len: usize, limit: usize) -> Result<Vec<u8>> {
    if declared_len > limit {
        return Err(ProtocolError::OversizedPacket(declared_len));
    }

    let mut out = Vec::with_capacity(declared_len);
    // One extra byte lets an overlong stream be detected without reading it all.
    ZlibDecoder::new(data)
        .take(declared_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::DecompressionFailure)?;

    if out.len() != declared_len {
        return Err(ProtocolError::MalformedPacket(
            constants::ERR_DATA_LENGTH_MISMATCH.to_string(),
        ));
    }
    Ok(out)
}
