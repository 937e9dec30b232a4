//! Lossless audio frame compression
//!
//! Frames travel as zlib-deflated little-endian i16 PCM. Unlike a perceptual
//! codec this is bit-exact, so a decoded frame equals the captured one.

pub mod encoder;
pub mod decoder;

pub use encoder::FrameEncoder;
pub use decoder::FrameDecoder;
