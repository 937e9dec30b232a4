//! Frame compressor
//!
//! Packs i16 samples little-endian and deflates them with zlib. Lossless:
//! the decoder reproduces the exact sample sequence.

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::DEFAULT_COMPRESSION_LEVEL;
use crate::error::CodecError;

/// zlib frame encoder
///
/// Takes `&self` so the capture callback can share it without a lock.
pub struct FrameEncoder {
    level: Compression,
    frames_encoded: AtomicU64,
    bytes_in: AtomicU64,
    bytes_produced: AtomicU64,
}

impl FrameEncoder {
    /// Create an encoder with a zlib level (0-9, clamped)
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
            frames_encoded: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_produced: AtomicU64::new(0),
        }
    }

    /// Compress one frame of interleaved samples
    pub fn encode(&self, samples: &[i16]) -> Result<Bytes, CodecError> {
        let raw_len = samples.len() * 2;
        let mut raw = Vec::with_capacity(raw_len);
        for sample in samples {
            raw.extend_from_slice(&sample.to_le_bytes());
        }

        let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw_len / 2 + 16), self.level);
        encoder
            .write_all(&raw)
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;

        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(raw_len as u64, Ordering::Relaxed);
        self.bytes_produced
            .fetch_add(compressed.len() as u64, Ordering::Relaxed);

        Ok(Bytes::from(compressed))
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        let frames_encoded = self.frames_encoded.load(Ordering::Relaxed);
        let bytes_in = self.bytes_in.load(Ordering::Relaxed);
        let bytes_produced = self.bytes_produced.load(Ordering::Relaxed);
        EncoderStats {
            frames_encoded,
            bytes_produced,
            compression_ratio: if bytes_produced > 0 {
                bytes_in as f32 / bytes_produced as f32
            } else {
                0.0
            },
        }
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    /// Raw bytes per compressed byte
    pub compression_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_compresses_well() {
        let encoder = FrameEncoder::default();
        let encoded = encoder.encode(&[0i16; 1024]).unwrap();

        assert!(!encoded.is_empty());
        assert!(encoded.len() < 2048 / 10);

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert!(stats.compression_ratio > 10.0);
    }

    #[test]
    fn test_empty_frame_still_produces_stream() {
        let encoder = FrameEncoder::new(1);
        let encoded = encoder.encode(&[]).unwrap();
        // zlib header + empty deflate block + adler32
        assert!(!encoded.is_empty());
    }
}
