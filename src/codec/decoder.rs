//! Frame decompressor

use flate2::read::ZlibDecoder;
use std::io::Read;

use crate::config::AudioConfig;
use crate::error::CodecError;

/// zlib frame decoder
///
/// Output is capped so a hostile peer cannot inflate a tiny datagram into
/// an arbitrarily large buffer.
pub struct FrameDecoder {
    max_decoded_bytes: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames decompressing past `max_decoded_bytes`
    pub fn new(max_decoded_bytes: usize) -> Self {
        Self { max_decoded_bytes }
    }

    /// Size the cap at four blocks of the local format, which tolerates peers
    /// running a larger block size
    pub fn for_config(config: &AudioConfig) -> Self {
        Self::new(config.samples_per_block() * 2 * 4)
    }

    /// Decompress one frame into interleaved samples
    pub fn decode(&self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let mut raw = Vec::with_capacity(self.max_decoded_bytes.min(data.len() * 8));
        ZlibDecoder::new(data)
            .take(self.max_decoded_bytes as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| CodecError::DecompressionFailed(e.to_string()))?;

        if raw.len() > self.max_decoded_bytes {
            return Err(CodecError::FrameTooLarge(self.max_decoded_bytes));
        }
        if raw.len() % 2 != 0 {
            return Err(CodecError::InvalidFrameSize(raw.len()));
        }

        Ok(raw
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn max_decoded_bytes(&self) -> usize {
        self.max_decoded_bytes
    }
}
