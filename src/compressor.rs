/*!
C4 — wraps an encoded byte stream with a reversible compression codec.

Write pipeline (spec §4.3): `value -> Encode -> (conditionally) Compress ->
bytes`. Compression only kicks in once the encoded payload crosses
[`DEFAULT_COMPRESSION_THRESHOLD_BYTES`]; small rows are stored raw because
the codec's framing overhead would outweigh any space saved.
*/

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::{Read, Write};

/// Payloads at or above this size are compressed by default; see
/// [`crate::settings::Settings::compression_threshold_bytes`] to override.
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 4096;

/// A reversible byte-stream codec.
pub trait Compressor: Send + Sync {
    fn wrap_encode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
    fn wrap_decode(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// No-op codec, used for payloads under the compression threshold or when
/// compression is disabled outright.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn wrap_encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn wrap_decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Raw DEFLATE, no gzip framing — smaller output than [`GzipCompressor`] at
/// the cost of not being independently identifiable on disk.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    level: Compression,
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        DeflateCompressor {
            level: Compression::default(),
        }
    }
}

impl DeflateCompressor {
    pub fn with_level(level: u32) -> Self {
        DeflateCompressor {
            level: Compression::new(level),
        }
    }
}

impl Compressor for DeflateCompressor {
    fn wrap_encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), self.level);
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn wrap_decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::SerializationFailure(e.to_string()))?;
        Ok(out)
    }
}

/// Gzip framing around DEFLATE. Slightly larger output than
/// [`DeflateCompressor`] but self-describing, which matters if the value
/// column is ever inspected outside the engine.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        GzipCompressor {
            level: Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn wrap_encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn wrap_decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::SerializationFailure(e.to_string()))?;
        Ok(out)
    }
}

/// Applies `compressor` iff `bytes.len()` is at or above `threshold`,
/// returning the (possibly unchanged) bytes and whether compression ran —
/// the bit persisted in [`crate::entry::CacheEntry::compressed`].
pub fn compress_if_over_threshold(
    compressor: &dyn Compressor,
    bytes: Vec<u8>,
    threshold: usize,
) -> Result<(Vec<u8>, bool)> {
    if bytes.len() < threshold {
        return Ok((bytes, false));
    }
    let compressed = compressor.wrap_encode(&bytes)?;
    Ok((compressed, true))
}

/// Inverts [`compress_if_over_threshold`] given the persisted `compressed`
/// bit.
pub fn decompress_if_flagged(
    compressor: &dyn Compressor,
    bytes: &[u8],
    compressed: bool,
) -> Result<Vec<u8>> {
    if compressed {
        compressor.wrap_decode(bytes)
    } else {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_round_trips() {
        let c = DeflateCompressor::default();
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let wrapped = c.wrap_encode(&data).unwrap();
        assert!(wrapped.len() < data.len());
        let back = c.wrap_decode(&wrapped).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn gzip_round_trips() {
        let c = GzipCompressor::default();
        let data = b"repeat repeat repeat repeat repeat".repeat(50);
        let wrapped = c.wrap_encode(&data).unwrap();
        let back = c.wrap_decode(&wrapped).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn none_compressor_is_identity() {
        let c = NoneCompressor;
        let data = b"small".to_vec();
        let wrapped = c.wrap_encode(&data).unwrap();
        assert_eq!(wrapped, data);
    }

    #[test]
    fn small_payloads_skip_compression() {
        let small = vec![0u8; 10];
        let (out, compressed) =
            compress_if_over_threshold(&GzipCompressor::default(), small.clone(), 4096).unwrap();
        assert!(!compressed);
        assert_eq!(out, small);
    }

    #[test]
    fn large_payloads_are_compressed() {
        let large = vec![7u8; 8192];
        let (out, compressed) =
            compress_if_over_threshold(&GzipCompressor::default(), large.clone(), 4096).unwrap();
        assert!(compressed);
        assert_ne!(out, large);
        let back = decompress_if_flagged(&GzipCompressor::default(), &out, compressed).unwrap();
        assert_eq!(back, large);
    }
}
