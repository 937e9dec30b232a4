//! Error types for the voice chat engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

/// Frame compression errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Invalid frame size: {0} bytes")]
    InvalidFrameSize(usize),

    #[error("Decompressed frame exceeds {0} bytes")]
    FrameTooLarge(usize),
}

/// Wire packet encode/decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Empty datagram")]
    Empty,

    #[error("Unknown packet kind: {0}")]
    UnknownKind(u8),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Audio marker mismatch")]
    BadMarker,

    #[error("Name length {declared} exceeds remaining {remaining} bytes")]
    NameOverflow { declared: usize, remaining: usize },

    #[error("Speaker name is not valid UTF-8")]
    InvalidName,

    #[error("Speaker name too long: {0} bytes")]
    NameTooLong(usize),

    #[error("Audio payload is empty")]
    EmptyPayload,

    #[error("Datagram too large: {0} bytes")]
    TooLarge(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Failed to connect to server after {attempts} join attempts")]
    JoinTimeout { attempts: u32 },

    #[error("Not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,
}

/// Session membership errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Username is empty")]
    EmptyUsername,

    #[error("Username too long: {0} bytes")]
    UsernameTooLong(usize),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
